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

//! A lockfree table of separately chained buckets mapping key bytes to slot
//! addresses.
//!
//! Nodes hold only a hash and a slot address; key bytes are read from the
//! slab the node points into. Insertions prepend to a bucket's chain with a
//! single CAS on the bucket head, so any number of threads may insert and look
//! up concurrently. Removal unlinks nodes and requires that no other thread
//! modifies the same bucket at the same time.

use crate::{
    policy::KeyEq,
    slab::{SlabBuffer, SlotAddr},
};

use std::{
    mem,
    sync::atomic::{self, AtomicUsize, Ordering},
};

use crossbeam_epoch::{self, Atomic, Guard, Owned, Shared};
use rayon::prelude::*;

pub(crate) struct ChainTable {
    buckets: Box<[Atomic<Node>]>, // len() is a power of 2
    len: AtomicUsize,
    modulo_mask: usize,
}

struct Node {
    hash: u64,
    addr: SlotAddr,
    next: Atomic<Node>,
}

impl ChainTable {
    /// Creates a table with at least `num_buckets` buckets.
    pub(crate) fn with_buckets(num_buckets: usize) -> Self {
        let length = num_buckets.max(1).next_power_of_two();

        Self {
            buckets: (0..length).map(|_| Atomic::null()).collect(),
            len: AtomicUsize::new(0),
            modulo_mask: length - 1,
        }
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub(crate) fn bucket_index(&self, hash: u64) -> usize {
        hash as usize & self.modulo_mask
    }

    pub(crate) fn get<'g, E: KeyEq>(
        &self,
        guard: &'g Guard,
        hash: u64,
        key: &[u8],
        slab: &SlabBuffer,
        key_eq: &E,
    ) -> Option<SlotAddr> {
        let head = self.buckets[self.bucket_index(hash)].load(Ordering::Acquire, guard);

        find_in_chain(guard, head, Shared::null(), hash, key, slab, key_eq)
    }

    /// Maps `key` to `addr` unless `key` is already present.
    ///
    /// The key bytes of `addr` must already be written to `slab`. Returns the
    /// address of the existing entry if there is one.
    pub(crate) fn insert_if_absent<'g, E: KeyEq>(
        &self,
        guard: &'g Guard,
        hash: u64,
        addr: SlotAddr,
        key: &[u8],
        slab: &SlabBuffer,
        key_eq: &E,
    ) -> Result<(), SlotAddr> {
        let bucket = &self.buckets[self.bucket_index(hash)];

        let mut new_node = Owned::new(Node {
            hash,
            addr,
            next: Atomic::null(),
        });

        let mut head = bucket.load(Ordering::Acquire, guard);
        // nodes from here to the end of the chain have already been searched
        let mut searched = Shared::null();

        loop {
            if let Some(existing) = find_in_chain(guard, head, searched, hash, key, slab, key_eq) {
                return Err(existing);
            }

            new_node.next.store(head, Ordering::Relaxed);

            // release so that readers of the new head also see the slot bytes
            match bucket.compare_exchange(
                head,
                new_node,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    self.len.fetch_add(1, Ordering::Relaxed);

                    return Ok(());
                }
                Err(e) => {
                    // insertions only ever prepend, so the old head is still
                    // reachable from the new one
                    searched = head;
                    head = e.current;
                    new_node = e.new;
                }
            }
        }
    }

    /// Unlinks the entry for `key` and returns its address.
    ///
    /// # Safety
    ///
    /// No other thread may insert into or remove from the bucket `hash` maps
    /// to for the duration of this call.
    pub(crate) unsafe fn remove<'g, E: KeyEq>(
        &self,
        guard: &'g Guard,
        hash: u64,
        key: &[u8],
        slab: &SlabBuffer,
        key_eq: &E,
    ) -> Option<SlotAddr> {
        let mut link = &self.buckets[self.bucket_index(hash)];
        let mut current = link.load(Ordering::Acquire, guard);

        while let Some(node) = current.as_ref() {
            let next = node.next.load(Ordering::Acquire, guard);

            if node.hash == hash && key_eq.eq(slab.key_unchecked(node.addr), key) {
                link.store(next, Ordering::Release);
                self.len.fetch_sub(1, Ordering::Relaxed);

                let addr = node.addr;
                guard.defer_destroy(current);

                return Some(addr);
            }

            link = &node.next;
            current = next;
        }

        None
    }

    /// Returns the address of every entry, bucket by bucket.
    pub(crate) fn addrs(&self) -> Vec<SlotAddr> {
        self.buckets
            .par_iter()
            .flat_map_iter(|bucket| {
                let guard = &crossbeam_epoch::pin();
                let mut addrs = Vec::new();

                for_each_node(guard, bucket, |node| addrs.push(node.addr));

                addrs
            })
            .collect()
    }

    pub(crate) fn bucket_sizes(&self) -> Vec<usize> {
        self.buckets
            .par_iter()
            .map(|bucket| {
                let guard = &crossbeam_epoch::pin();
                let mut size = 0;

                for_each_node(guard, bucket, |_| size += 1);

                size
            })
            .collect()
    }
}

impl Drop for ChainTable {
    fn drop(&mut self) {
        // ensure all loads have the most recent data available
        atomic::fence(Ordering::Acquire);

        // drop is called with a mutable reference, so no other thread can be
        // holding a reference to any node
        let guard = unsafe { crossbeam_epoch::unprotected() };

        for bucket in self.buckets.iter() {
            let mut current = bucket.swap(Shared::null(), Ordering::Relaxed, guard);

            while !current.is_null() {
                let next = unsafe { current.deref() }
                    .next
                    .load(Ordering::Relaxed, guard);

                mem::drop(unsafe { current.into_owned() });
                current = next;
            }
        }
    }
}

fn find_in_chain<'g, E: KeyEq>(
    guard: &'g Guard,
    mut current: Shared<'g, Node>,
    stop: Shared<'g, Node>,
    hash: u64,
    key: &[u8],
    slab: &SlabBuffer,
    key_eq: &E,
) -> Option<SlotAddr> {
    while current != stop {
        let node = unsafe { current.as_ref() }?;

        if node.hash == hash && key_eq.eq(slab.key_unchecked(node.addr), key) {
            return Some(node.addr);
        }

        current = node.next.load(Ordering::Acquire, guard);
    }

    None
}

fn for_each_node<'g, F: FnMut(&'g Node)>(guard: &'g Guard, bucket: &Atomic<Node>, mut f: F) {
    let mut current = bucket.load(Ordering::Acquire, guard);

    while let Some(node) = unsafe { current.as_ref() } {
        f(node);
        current = node.next.load(Ordering::Acquire, guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::policy::{self, BytewiseEq, DefaultHashBuilder};

    use std::{
        collections::HashSet,
        sync::{Arc, Barrier},
        thread,
    };

    struct Fixture {
        table: ChainTable,
        slab: SlabBuffer,
        build_hasher: DefaultHashBuilder,
    }

    impl Fixture {
        fn new(num_buckets: usize, capacity: usize) -> Self {
            Self {
                table: ChainTable::with_buckets(num_buckets),
                slab: SlabBuffer::new(capacity, 4, 0).unwrap(),
                build_hasher: DefaultHashBuilder::default(),
            }
        }

        fn insert(&self, k: u32) -> Result<(), SlotAddr> {
            let key = k.to_le_bytes();
            let hash = policy::hash(&self.build_hasher, &key);
            let addr = self.slab.allocate().unwrap();
            unsafe { self.slab.fill(addr, &key, None) };

            let guard = &crossbeam_epoch::pin();
            let result = self
                .table
                .insert_if_absent(guard, hash, addr, &key, &self.slab, &BytewiseEq);

            if result.is_err() {
                self.slab.free(addr).unwrap();
            }

            result
        }

        fn get(&self, k: u32) -> Option<SlotAddr> {
            let key = k.to_le_bytes();
            let hash = policy::hash(&self.build_hasher, &key);
            let guard = &crossbeam_epoch::pin();

            self.table.get(guard, hash, &key, &self.slab, &BytewiseEq)
        }

        fn remove(&mut self, k: u32) -> Option<SlotAddr> {
            let key = k.to_le_bytes();
            let hash = policy::hash(&self.build_hasher, &key);
            let guard = &crossbeam_epoch::pin();

            unsafe { self.table.remove(guard, hash, &key, &self.slab, &BytewiseEq) }
        }
    }

    #[test]
    fn bucket_count_is_rounded_up() {
        assert_eq!(ChainTable::with_buckets(0).bucket_count(), 1);
        assert_eq!(ChainTable::with_buckets(3).bucket_count(), 4);
        assert_eq!(ChainTable::with_buckets(64).bucket_count(), 64);
    }

    #[test]
    fn insert_get_remove() {
        let mut fixture = Fixture::new(2, 64);

        for i in 0..32 {
            assert!(fixture.insert(i).is_ok());
        }

        assert_eq!(fixture.table.len(), 32);

        for i in 0..32 {
            let addr = fixture.get(i).unwrap();
            assert_eq!(fixture.slab.key(addr).unwrap(), i.to_le_bytes());
            assert_eq!(fixture.insert(i), Err(addr));
        }

        assert_eq!(fixture.get(32), None);

        for i in (0..32).step_by(2) {
            assert!(fixture.remove(i).is_some());
            assert_eq!(fixture.remove(i), None);
        }

        assert_eq!(fixture.table.len(), 16);
        assert_eq!(fixture.table.addrs().len(), 16);
        assert_eq!(fixture.table.bucket_sizes().iter().sum::<usize>(), 16);

        for i in 0..32 {
            assert_eq!(fixture.get(i).is_some(), i % 2 == 1);
        }
    }

    #[test]
    fn concurrent_insertion_into_one_bucket() {
        const NUM_THREADS: usize = 16;
        const PER_THREAD: u32 = 128;

        // a single bucket forces every insert to contend on the same head
        let fixture = Arc::new(Fixture::new(1, NUM_THREADS * PER_THREAD as usize));
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let threads: Vec<_> = (0..NUM_THREADS as u32)
            .map(|i| {
                let fixture = fixture.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();

                    for j in (0..PER_THREAD).map(|j| j + i * PER_THREAD) {
                        assert!(fixture.insert(j).is_ok());
                    }
                })
            })
            .collect();

        for result in threads.into_iter().map(|t| t.join()) {
            assert!(result.is_ok());
        }

        let total = NUM_THREADS as u32 * PER_THREAD;
        assert_eq!(fixture.table.len(), total as usize);

        let addrs: HashSet<_> = fixture.table.addrs().into_iter().collect();
        assert_eq!(addrs.len(), total as usize);

        for i in 0..total {
            assert!(fixture.get(i).is_some());
        }
    }
}
