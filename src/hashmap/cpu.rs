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

//! The host backend: lockfree chained buckets over a slab, driven by the
//! rayon thread pool.

use super::{chain::ChainTable, grow_target, rehash_capacity, resolve_duplicates, DeviceHashmap};

use crate::{
    batch,
    config::HashmapConfig,
    device::Device,
    error::{Error, Result},
    policy::{BytewiseEq, DefaultHashBuilder, KeyEq},
    slab::{SlabBuffer, SlotAddr},
};

use std::{fmt, hash::BuildHasher};

use rayon::prelude::*;
use tracing::{debug, trace, warn};

/// A batched hash map on the host.
///
/// The bucket count is always a power of two; requests are rounded up.
pub struct CpuHashmap<S = DefaultHashBuilder, E = BytewiseEq> {
    store: Store,
    build_hasher: S,
    key_eq: E,
    capacity: usize,
    bucket_count: usize,
    device: Device,
}

struct Store {
    table: ChainTable,
    slab: SlabBuffer,
}

impl CpuHashmap {
    pub fn new(config: &HashmapConfig) -> Result<Self> {
        Self::with_policies(config, DefaultHashBuilder::default(), BytewiseEq)
    }
}

impl<S: BuildHasher + Send + Sync, E: KeyEq> CpuHashmap<S, E> {
    pub fn with_policies(config: &HashmapConfig, build_hasher: S, key_eq: E) -> Result<Self> {
        config.validate()?;

        let store = Store::new(
            config.init_buckets,
            config.init_capacity,
            config.dsize_key,
            config.dsize_value,
        )?;
        let bucket_count = store.table.bucket_count();

        debug!(
            device = %config.device,
            bucket_count,
            capacity = config.init_capacity,
            dsize_key = config.dsize_key,
            dsize_value = config.dsize_value,
            "created host hash map"
        );

        Ok(Self {
            store,
            build_hasher,
            key_eq,
            capacity: config.init_capacity,
            bucket_count,
            device: config.device,
        })
    }

    fn insert_impl(
        &mut self,
        keys: &[u8],
        values: Option<&[u8]>,
        addrs: &mut [SlotAddr],
        masks: &mut [bool],
    ) -> Result<()> {
        let count = masks.len();
        batch::check_len("addrs", count, addrs.len())?;
        batch::check_shape(count, keys, self.dsize_key(), values, self.dsize_value())?;

        if let Some(buckets) = grow_target(self.size(), count, self.capacity, self.bucket_count) {
            debug!(
                size = self.size(),
                count,
                capacity = self.capacity,
                buckets,
                "growing before insertion"
            );

            self.rehash(buckets)?;
        }

        trace!(count, activate = values.is_none(), "inserting batch");

        self.store
            .insert(&self.build_hasher, &self.key_eq, keys, values, addrs, masks)
    }
}

impl Store {
    fn new(buckets: usize, capacity: usize, dsize_key: usize, dsize_value: usize) -> Result<Self> {
        // the slab rejects unaddressable capacities before the table is sized
        let slab = SlabBuffer::new(capacity, dsize_key, dsize_value)?;

        Ok(Self {
            table: ChainTable::with_buckets(buckets),
            slab,
        })
    }

    fn insert<S: BuildHasher + Sync, E: KeyEq>(
        &self,
        build_hasher: &S,
        key_eq: &E,
        keys: &[u8],
        values: Option<&[u8]>,
        addrs: &mut [SlotAddr],
        masks: &mut [bool],
    ) -> Result<()> {
        let dsize_key = self.slab.dsize_key();
        let dsize_value = self.slab.dsize_value();

        let hashes = batch::hash_keys(build_hasher, keys, dsize_key);
        let plan = batch::first_occurrences(keys, dsize_key, &hashes, key_eq);

        addrs
            .par_iter_mut()
            .zip(masks.par_iter_mut())
            .enumerate()
            .try_for_each_init(crossbeam_epoch::pin, |guard, (i, (addr, mask))| -> Result<()> {
                if plan[i].is_some() {
                    return Ok(());
                }

                let key = batch::nth(keys, dsize_key, i);
                let slot = self.slab.allocate()?;

                // the slot was just allocated, so this thread owns it until it
                // is published by the table insertion below
                unsafe {
                    self.slab
                        .fill(slot, key, values.map(|v| batch::nth(v, dsize_value, i)))
                };

                match self
                    .table
                    .insert_if_absent(guard, hashes[i], slot, key, &self.slab, key_eq)
                {
                    Ok(()) => {
                        *addr = slot;
                        *mask = true;
                    }
                    Err(existing) => {
                        self.slab.free(slot)?;
                        *addr = existing;
                        *mask = false;
                    }
                }

                Ok(())
            })?;

        resolve_duplicates(&plan, addrs, masks);

        Ok(())
    }
}

impl<S: BuildHasher + Send + Sync, E: KeyEq> DeviceHashmap for CpuHashmap<S, E> {
    fn rehash(&mut self, buckets: usize) -> Result<()> {
        if buckets == 0 {
            return Err(Error::Config("bucket count must be nonzero".into()));
        }

        let size = self.size();
        let mut capacity = rehash_capacity(buckets, self.capacity, self.bucket_count);

        if capacity < size {
            warn!(buckets, capacity, size, "rehash would drop entries; keeping capacity at size");

            capacity = size;
        }

        let store = Store::new(buckets, capacity, self.dsize_key(), self.dsize_value())?;

        if size > 0 {
            let active = self.store.table.addrs();
            let (keys, values) = batch::extract(&self.store.slab, &active);

            let mut addrs = vec![SlotAddr::NULL; active.len()];
            let mut masks = vec![false; active.len()];

            store.insert(
                &self.build_hasher,
                &self.key_eq,
                &keys,
                Some(values.as_slice()),
                &mut addrs,
                &mut masks,
            )?;

            let lost = masks.iter().filter(|&&m| !m).count();

            if lost > 0 {
                return Err(Error::Config(format!(
                    "hash and key equality policies disagree: rehash would lose {} entries",
                    lost
                )));
            }
        }

        debug!(
            from_buckets = self.bucket_count,
            to_buckets = store.table.bucket_count(),
            from_capacity = self.capacity,
            to_capacity = capacity,
            size,
            "rehashed"
        );

        self.bucket_count = store.table.bucket_count();
        self.capacity = capacity;
        self.store = store;

        Ok(())
    }

    fn insert(
        &mut self,
        keys: &[u8],
        values: &[u8],
        addrs: &mut [SlotAddr],
        masks: &mut [bool],
    ) -> Result<()> {
        self.insert_impl(keys, Some(values), addrs, masks)
    }

    fn activate(&mut self, keys: &[u8], addrs: &mut [SlotAddr], masks: &mut [bool]) -> Result<()> {
        self.insert_impl(keys, None, addrs, masks)
    }

    fn find(&self, keys: &[u8], addrs: &mut [SlotAddr], masks: &mut [bool]) -> Result<()> {
        let count = masks.len();
        batch::check_len("addrs", count, addrs.len())?;
        batch::check_shape(count, keys, self.dsize_key(), None, 0)?;

        let dsize_key = self.dsize_key();
        let Store { table, slab } = &self.store;
        let key_eq = &self.key_eq;

        let hashes = batch::hash_keys(&self.build_hasher, keys, dsize_key);

        addrs
            .par_iter_mut()
            .zip(masks.par_iter_mut())
            .enumerate()
            .for_each_init(crossbeam_epoch::pin, |guard, (i, (addr, mask))| {
                let key = batch::nth(keys, dsize_key, i);

                match table.get(guard, hashes[i], key, slab, key_eq) {
                    Some(found) => {
                        *addr = found;
                        *mask = true;
                    }
                    None => {
                        *addr = SlotAddr::NULL;
                        *mask = false;
                    }
                }
            });

        Ok(())
    }

    fn erase(&mut self, keys: &[u8], masks: &mut [bool]) -> Result<()> {
        let count = masks.len();
        batch::check_shape(count, keys, self.dsize_key(), None, 0)?;

        trace!(count, "erasing batch");

        let dsize_key = self.dsize_key();
        let Store { table, slab } = &self.store;
        let key_eq = &self.key_eq;

        let hashes = batch::hash_keys(&self.build_hasher, keys, dsize_key);

        // group keys by bucket so each bucket is unlinked by a single thread
        let mut order: Vec<usize> = (0..count).collect();
        order.par_sort_unstable_by_key(|&i| (table.bucket_index(hashes[i]), i));

        let groups: Vec<&[usize]> = order
            .chunk_by(|&a, &b| table.bucket_index(hashes[a]) == table.bucket_index(hashes[b]))
            .collect();

        let removed: Vec<(usize, bool)> = groups
            .par_iter()
            .map(|group| {
                let guard = &crossbeam_epoch::pin();

                group
                    .iter()
                    .map(|&i| -> Result<(usize, bool)> {
                        let key = batch::nth(keys, dsize_key, i);

                        // no other thread touches this bucket during the batch
                        match unsafe { table.remove(guard, hashes[i], key, slab, key_eq) } {
                            Some(addr) => {
                                slab.free(addr)?;

                                Ok((i, true))
                            }
                            None => Ok((i, false)),
                        }
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        for (i, was_removed) in removed {
            masks[i] = was_removed;
        }

        self.bucket_count = self.store.table.bucket_count();

        Ok(())
    }

    fn active_indices(&self) -> Vec<SlotAddr> {
        self.store.table.addrs()
    }

    fn bucket_sizes(&self) -> Vec<usize> {
        self.store.table.bucket_sizes()
    }

    fn size(&self) -> usize {
        self.store.table.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    fn dsize_key(&self) -> usize {
        self.store.slab.dsize_key()
    }

    fn dsize_value(&self) -> usize {
        self.store.slab.dsize_value()
    }

    fn device(&self) -> Device {
        self.device
    }

    fn key(&self, addr: SlotAddr) -> Result<&[u8]> {
        self.store.slab.key(addr)
    }

    fn value(&self, addr: SlotAddr) -> Result<&[u8]> {
        self.store.slab.value(addr)
    }

    fn value_mut(&mut self, addr: SlotAddr) -> Result<&mut [u8]> {
        self.store.slab.value_mut(addr)
    }

    fn key_buffer(&self) -> &[u8] {
        self.store.slab.key_buffer()
    }

    fn value_buffer(&self) -> &[u8] {
        self.store.slab.value_buffer()
    }
}

impl<S, E> fmt::Debug for CpuHashmap<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuHashmap")
            .field("device", &self.device)
            .field("size", &self.store.table.len())
            .field("capacity", &self.capacity)
            .field("bucket_count", &self.bucket_count)
            .field("slab", &self.store.slab)
            .finish()
    }
}
