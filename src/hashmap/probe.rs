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

//! Bucketed open addressing over a flat array of packed 64-bit entries.
//!
//! Each bucket is a fixed-width run of entries. An entry is either empty,
//! a tombstone, or holds the upper 32 bits of the key's hash next to the
//! slot address plus one. Every transition is a single CAS, so lookups,
//! insertions of distinct keys and removals of distinct keys may all run
//! concurrently.

use crate::{
    error::{Error, Result},
    policy::KeyEq,
    slab::{SlabBuffer, SlotAddr},
};

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use rayon::prelude::*;

const EMPTY: u64 = 0;
const TOMBSTONE: u64 = u32::MAX as u64;

pub(crate) struct ProbeTable {
    entries: Box<[AtomicU64]>, // len() == bucket_count * width
    bucket_count: usize,
    width: usize,
    len: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Empty,
    Tombstone,
    Filled { tag: u32, addr: SlotAddr },
}

enum Action<T> {
    Continue,
    Reload,
    Return(T),
}

enum Probe<T> {
    LoopEnded,
    Returned(T),
}

impl ProbeTable {
    /// Creates a table of `bucket_count` buckets holding at least `capacity`
    /// entries in total, with no bucket narrower than `min_width`.
    pub(crate) fn new(bucket_count: usize, capacity: usize, min_width: usize) -> Self {
        assert!(bucket_count > 0);

        let width = min_width.max(1).max((capacity + bucket_count - 1) / bucket_count);

        Self {
            entries: (0..bucket_count * width)
                .map(|_| AtomicU64::new(EMPTY))
                .collect(),
            bucket_count,
            width,
            len: AtomicUsize::new(0),
        }
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub(crate) fn width(&self) -> usize {
        self.width
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub(crate) fn get<E: KeyEq>(
        &self,
        hash: u64,
        key: &[u8],
        slab: &SlabBuffer,
        key_eq: &E,
    ) -> Option<SlotAddr> {
        let tag = tag_of(hash);

        let result = self.probe_loop(hash, |entry| match decode(entry.load(Ordering::Acquire)) {
            Entry::Empty => Action::Return(None),
            Entry::Filled { tag: t, addr }
                if t == tag && key_eq.eq(slab.key_unchecked(addr), key) =>
            {
                Action::Return(Some(addr))
            }
            _ => Action::Continue,
        });

        match result {
            Probe::Returned(found) => found,
            Probe::LoopEnded => None,
        }
    }

    /// Maps `key` to `addr` unless `key` is already present, in which case the
    /// existing address is returned in the inner error.
    ///
    /// No other thread may insert a key equal to `key` concurrently.
    pub(crate) fn insert_if_absent<E: KeyEq>(
        &self,
        hash: u64,
        addr: SlotAddr,
        key: &[u8],
        slab: &SlabBuffer,
        key_eq: &E,
    ) -> Result<std::result::Result<(), SlotAddr>> {
        let tag = tag_of(hash);
        let new_entry = encode(tag, addr);

        loop {
            let mut vacancy: Option<(&AtomicU64, u64)> = None;

            let result = self.probe_loop(hash, |entry| {
                let current = entry.load(Ordering::Acquire);

                match decode(current) {
                    Entry::Empty => {
                        vacancy.get_or_insert((entry, current));

                        Action::Return(None)
                    }
                    Entry::Tombstone => {
                        vacancy.get_or_insert((entry, current));

                        Action::Continue
                    }
                    Entry::Filled { tag: t, addr: existing }
                        if t == tag && key_eq.eq(slab.key_unchecked(existing), key) =>
                    {
                        Action::Return(Some(existing))
                    }
                    Entry::Filled { .. } => Action::Continue,
                }
            });

            if let Probe::Returned(Some(existing)) = result {
                return Ok(Err(existing));
            }

            let (entry, current) = vacancy.ok_or(Error::OutOfCapacity {
                capacity: self.entries.len(),
            })?;

            // release so that readers of the entry also see the slot bytes
            if entry
                .compare_exchange(current, new_entry, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.len.fetch_add(1, Ordering::Relaxed);

                return Ok(Ok(()));
            }

            // another key took the vacancy; probe again from the start
        }
    }

    /// Replaces the entry for `key` with a tombstone and returns its address.
    pub(crate) fn remove<E: KeyEq>(
        &self,
        hash: u64,
        key: &[u8],
        slab: &SlabBuffer,
        key_eq: &E,
    ) -> Option<SlotAddr> {
        let tag = tag_of(hash);

        let result = self.probe_loop(hash, |entry| {
            let current = entry.load(Ordering::Acquire);

            match decode(current) {
                Entry::Empty => Action::Return(None),
                Entry::Filled { tag: t, addr }
                    if t == tag && key_eq.eq(slab.key_unchecked(addr), key) =>
                {
                    match entry.compare_exchange(
                        current,
                        TOMBSTONE,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => Action::Return(Some(addr)),
                        Err(_) => Action::Reload,
                    }
                }
                _ => Action::Continue,
            }
        });

        match result {
            Probe::Returned(Some(addr)) => {
                self.len.fetch_sub(1, Ordering::Relaxed);

                Some(addr)
            }
            _ => None,
        }
    }

    /// Returns the address of every live entry, bucket by bucket.
    pub(crate) fn addrs(&self) -> Vec<SlotAddr> {
        self.entries
            .par_iter()
            .filter_map(|entry| match decode(entry.load(Ordering::Acquire)) {
                Entry::Filled { addr, .. } => Some(addr),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn bucket_sizes(&self) -> Vec<usize> {
        self.entries
            .par_chunks(self.width)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|e| matches!(decode(e.load(Ordering::Acquire)), Entry::Filled { .. }))
                    .count()
            })
            .collect()
    }

    fn probe_loop<'a, F: FnMut(&'a AtomicU64) -> Action<T>, T>(
        &'a self,
        hash: u64,
        mut f: F,
    ) -> Probe<T> {
        let initial_bucket = (hash % self.bucket_count as u64) as usize;

        let bucket_count = self.bucket_count;

        for bucket_index in (0..bucket_count).map(|i| (i + initial_bucket) % bucket_count) {
            let start = bucket_index * self.width;

            for entry in self.entries[start..start + self.width].iter() {
                loop {
                    match f(entry) {
                        Action::Continue => break,
                        Action::Reload => (),
                        Action::Return(t) => return Probe::Returned(t),
                    }
                }
            }
        }

        Probe::LoopEnded
    }
}

fn tag_of(hash: u64) -> u32 {
    (hash >> 32) as u32
}

fn encode(tag: u32, addr: SlotAddr) -> u64 {
    // addresses are below u32::MAX - 1, so addr + 1 is neither 0 nor a tombstone
    ((tag as u64) << 32) | (addr.index() as u64 + 1)
}

fn decode(entry: u64) -> Entry {
    match entry {
        EMPTY => Entry::Empty,
        TOMBSTONE => Entry::Tombstone,
        _ => Entry::Filled {
            tag: (entry >> 32) as u32,
            addr: SlotAddr::new((entry as u32) - 1),
        },
    }
}
