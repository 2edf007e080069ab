// MIT License
//
// Copyright (c) 2020 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! A fixed-capacity pool of key/value slots.
//!
//! Keys and values live in two dense byte arrays indexed by slot address, so
//! slot `i` owns bytes `i * dsize_key..(i + 1) * dsize_key` of the key array
//! and the matching range of the value array. Free slots are kept in a
//! bounded lock-free queue, which makes [`allocate`] and [`free`] O(1) and
//! safe to call from every worker of a batch at once.
//!
//! [`allocate`]: SlabBuffer::allocate
//! [`free`]: SlabBuffer::free

use crate::error::{Error, Result};

use std::{
    cell::UnsafeCell,
    fmt, ptr, slice,
    sync::atomic::{AtomicBool, Ordering},
};

use crossbeam_queue::ArrayQueue;
use tracing::debug;

/// An opaque handle to one slot of a [`SlabBuffer`].
///
/// Addresses are only meaningful for the slab that issued them. A rehash
/// moves every entry into a new slab, so addresses must be looked up again
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotAddr(u32);

impl SlotAddr {
    /// Written to the output of a lookup that found nothing.
    pub const NULL: SlotAddr = SlotAddr(u32::MAX);

    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl Default for SlotAddr {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for SlotAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Borrowed contents of an occupied slot.
#[derive(Debug, Clone, Copy)]
pub struct SlotRef<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
}

pub struct SlabBuffer {
    keys: Box<[UnsafeCell<u8>]>,
    values: Box<[UnsafeCell<u8>]>,
    occupied: Box<[AtomicBool]>,
    free_list: ArrayQueue<u32>,
    capacity: usize,
    dsize_key: usize,
    dsize_value: usize,
}

// slot bytes are only written by the worker that allocated the slot, before
// the slot's address is published to anyone else
unsafe impl Sync for SlabBuffer {}
unsafe impl Send for SlabBuffer {}

impl SlabBuffer {
    /// Creates a slab with `capacity` free slots.
    ///
    /// `capacity` must fit in a [`SlotAddr`] and `dsize_key` must be nonzero.
    /// A zero `dsize_value` is allowed and yields a key-only slab.
    pub fn new(capacity: usize, dsize_key: usize, dsize_value: usize) -> Result<Self> {
        if dsize_key == 0 {
            return Err(Error::Config("key size must be nonzero".into()));
        }

        if capacity >= SlotAddr::NULL.0 as usize {
            return Err(Error::Config(format!(
                "slab capacity {} does not fit in a slot address",
                capacity
            )));
        }

        // ArrayQueue rejects a zero capacity; an empty slab still needs a queue
        let free_list = ArrayQueue::new(capacity.max(1));

        for i in 0..capacity as u32 {
            free_list
                .push(i)
                .map_err(|_| Error::Config("free list overflow".into()))?;
        }

        debug!(capacity, dsize_key, dsize_value, "created slab buffer");

        Ok(Self {
            keys: zeroed_cells(capacity * dsize_key),
            values: zeroed_cells(capacity * dsize_value),
            occupied: (0..capacity).map(|_| AtomicBool::new(false)).collect(),
            free_list,
            capacity,
            dsize_key,
            dsize_value,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dsize_key(&self) -> usize {
        self.dsize_key
    }

    pub fn dsize_value(&self) -> usize {
        self.dsize_value
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.capacity - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_occupied(&self, addr: SlotAddr) -> bool {
        self.occupied
            .get(addr.index())
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Takes a free slot off the free list.
    pub fn allocate(&self) -> Result<SlotAddr> {
        let index = self.free_list.pop().ok_or(Error::OutOfCapacity {
            capacity: self.capacity,
        })?;

        let was_occupied = self.occupied[index as usize].swap(true, Ordering::AcqRel);
        assert!(!was_occupied, "free list handed out occupied slot {}", index);

        Ok(SlotAddr(index))
    }

    /// Returns `addr` to the free list.
    ///
    /// Fails without touching the free list if `addr` was not issued by this
    /// slab or is already free.
    pub fn free(&self, addr: SlotAddr) -> Result<()> {
        let flag = self
            .occupied
            .get(addr.index())
            .ok_or(Error::InvalidSlot(addr))?;

        if !flag.swap(false, Ordering::AcqRel) {
            return Err(Error::DoubleFree(addr));
        }

        // every index is in the queue at most once, so it can never be full
        self.free_list
            .push(addr.0)
            .map_err(|_| Error::DoubleFree(addr))
    }

    /// Copies `key` into the slot, then either copies `value` or zero-fills
    /// the value region.
    ///
    /// # Safety
    ///
    /// `addr` must be occupied and exclusively owned by the caller: no other
    /// thread may read or write the slot's bytes until the caller publishes
    /// `addr`, and no borrow covering this slot's bytes, whether from
    /// [`resolve`], [`key`], [`value`], [`key_buffer`] or [`value_buffer`],
    /// may be alive across this call.
    ///
    /// [`resolve`]: SlabBuffer::resolve
    /// [`key`]: SlabBuffer::key
    /// [`value`]: SlabBuffer::value
    /// [`key_buffer`]: SlabBuffer::key_buffer
    /// [`value_buffer`]: SlabBuffer::value_buffer
    pub unsafe fn fill(&self, addr: SlotAddr, key: &[u8], value: Option<&[u8]>) {
        assert_eq!(key.len(), self.dsize_key);
        debug_assert!(self.is_occupied(addr));

        let key_ptr = self.key_ptr(addr);
        ptr::copy_nonoverlapping(key.as_ptr(), key_ptr, self.dsize_key);

        let value_ptr = self.value_ptr(addr);

        match value {
            Some(value) => {
                assert_eq!(value.len(), self.dsize_value);
                ptr::copy_nonoverlapping(value.as_ptr(), value_ptr, self.dsize_value);
            }
            None => ptr::write_bytes(value_ptr, 0, self.dsize_value),
        }
    }

    /// Returns the contents of an occupied slot.
    pub fn resolve(&self, addr: SlotAddr) -> Result<SlotRef<'_>> {
        if !self.is_occupied(addr) {
            return Err(Error::InvalidSlot(addr));
        }

        Ok(SlotRef {
            key: unsafe { slice::from_raw_parts(self.key_ptr(addr), self.dsize_key) },
            value: unsafe { slice::from_raw_parts(self.value_ptr(addr), self.dsize_value) },
        })
    }

    pub fn key(&self, addr: SlotAddr) -> Result<&[u8]> {
        self.resolve(addr).map(|slot| slot.key)
    }

    pub fn value(&self, addr: SlotAddr) -> Result<&[u8]> {
        self.resolve(addr).map(|slot| slot.value)
    }

    pub fn value_mut(&mut self, addr: SlotAddr) -> Result<&mut [u8]> {
        if !self.is_occupied(addr) {
            return Err(Error::InvalidSlot(addr));
        }

        Ok(unsafe { slice::from_raw_parts_mut(self.value_ptr(addr), self.dsize_value) })
    }

    /// Key bytes of a slot the caller already knows to be occupied.
    ///
    /// Used on hot lookup paths where the occupancy check of [`key`] would be
    /// redundant.
    ///
    /// [`key`]: SlabBuffer::key
    pub(crate) fn key_unchecked(&self, addr: SlotAddr) -> &[u8] {
        debug_assert!(addr.index() < self.capacity);

        unsafe { slice::from_raw_parts(self.key_ptr(addr), self.dsize_key) }
    }

    /// The dense key storage, `capacity * dsize_key` bytes indexed by slot.
    ///
    /// Bytes of free slots are unspecified.
    pub fn key_buffer(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(UnsafeCell::raw_get(self.keys.as_ptr()), self.keys.len()) }
    }

    /// The dense value storage, `capacity * dsize_value` bytes indexed by
    /// slot.
    pub fn value_buffer(&self) -> &[u8] {
        unsafe {
            slice::from_raw_parts(
                UnsafeCell::raw_get(self.values.as_ptr()),
                self.values.len(),
            )
        }
    }

    fn key_ptr(&self, addr: SlotAddr) -> *mut u8 {
        assert!(addr.index() < self.capacity);

        unsafe { UnsafeCell::raw_get(self.keys.as_ptr()).add(addr.index() * self.dsize_key) }
    }

    fn value_ptr(&self, addr: SlotAddr) -> *mut u8 {
        assert!(addr.index() < self.capacity);

        unsafe { UnsafeCell::raw_get(self.values.as_ptr()).add(addr.index() * self.dsize_value) }
    }
}

impl fmt::Debug for SlabBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("dsize_key", &self.dsize_key)
            .field("dsize_value", &self.dsize_value)
            .finish()
    }
}

fn zeroed_cells(length: usize) -> Box<[UnsafeCell<u8>]> {
    (0..length).map(|_| UnsafeCell::new(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        collections::HashSet,
        sync::{Arc, Barrier, Mutex},
        thread,
    };

    #[test]
    fn allocate_until_exhausted() {
        let slab = SlabBuffer::new(4, 4, 4).unwrap();

        let addrs: HashSet<_> = (0..4).map(|_| slab.allocate().unwrap()).collect();
        assert_eq!(addrs.len(), 4);
        assert_eq!(slab.len(), 4);

        assert_eq!(
            slab.allocate(),
            Err(Error::OutOfCapacity { capacity: 4 })
        );
    }

    #[test]
    fn free_makes_slot_reusable() {
        let slab = SlabBuffer::new(1, 4, 4).unwrap();

        let addr = slab.allocate().unwrap();
        assert!(slab.allocate().is_err());

        slab.free(addr).unwrap();
        assert!(slab.is_empty());
        assert_eq!(slab.allocate().unwrap(), addr);
    }

    #[test]
    fn double_free_is_rejected() {
        let slab = SlabBuffer::new(2, 4, 4).unwrap();

        let addr = slab.allocate().unwrap();
        slab.free(addr).unwrap();

        assert_eq!(slab.free(addr), Err(Error::DoubleFree(addr)));
        assert_eq!(slab.len(), 0);

        // the free list must not contain the slot twice
        let a = slab.allocate().unwrap();
        let b = slab.allocate().unwrap();
        assert_ne!(a, b);
        assert!(slab.allocate().is_err());
    }

    #[test]
    fn foreign_address_is_rejected() {
        let slab = SlabBuffer::new(2, 4, 4).unwrap();

        assert_eq!(
            slab.free(SlotAddr::new(7)),
            Err(Error::InvalidSlot(SlotAddr::new(7)))
        );
        assert!(slab.resolve(SlotAddr::NULL).is_err());
    }

    #[test]
    fn fill_and_resolve() {
        let mut slab = SlabBuffer::new(2, 4, 8).unwrap();

        let a = slab.allocate().unwrap();
        let b = slab.allocate().unwrap();

        unsafe {
            slab.fill(a, &1u32.to_le_bytes(), Some(&10u64.to_le_bytes()));
            slab.fill(b, &2u32.to_le_bytes(), None);
        }

        let slot = slab.resolve(a).unwrap();
        assert_eq!(slot.key, 1u32.to_le_bytes());
        assert_eq!(slot.value, 10u64.to_le_bytes());

        assert_eq!(slab.value(b).unwrap(), [0u8; 8]);

        slab.value_mut(b).unwrap().copy_from_slice(&20u64.to_le_bytes());
        assert_eq!(slab.value(b).unwrap(), 20u64.to_le_bytes());

        let start = b.index() * 8;
        assert_eq!(&slab.value_buffer()[start..start + 8], 20u64.to_le_bytes());
        assert_eq!(slab.key_buffer().len(), 8);
    }

    #[test]
    fn zero_key_size_is_rejected() {
        assert!(matches!(SlabBuffer::new(4, 0, 4), Err(Error::Config(_))));
    }

    #[test]
    fn concurrent_allocate_and_free() {
        const NUM_THREADS: usize = 16;
        const PER_THREAD: usize = 256;

        let slab = Arc::new(SlabBuffer::new(NUM_THREADS * PER_THREAD, 4, 4).unwrap());
        let barrier = Arc::new(Barrier::new(NUM_THREADS));
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let threads: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let slab = slab.clone();
                let barrier = barrier.clone();
                let seen = seen.clone();

                thread::spawn(move || {
                    barrier.wait();

                    let mine: Vec<_> = (0..PER_THREAD).map(|_| slab.allocate().unwrap()).collect();

                    {
                        let mut seen = seen.lock().unwrap();

                        for addr in mine.iter() {
                            assert!(seen.insert(*addr));
                        }
                    }

                    for addr in mine.iter().step_by(2) {
                        slab.free(*addr).unwrap();
                    }
                })
            })
            .collect();

        for result in threads.into_iter().map(|t| t.join()) {
            assert!(result.is_ok());
        }

        assert_eq!(seen.lock().unwrap().len(), NUM_THREADS * PER_THREAD);
        assert_eq!(slab.len(), NUM_THREADS * PER_THREAD / 2);
    }
}
