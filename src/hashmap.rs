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

//! Batched hash maps from fixed-size byte keys to fixed-size byte values.
//!
//! Every operation works on a whole batch of keys at once and reports a
//! per-key outcome through output arrays: a [`SlotAddr`] naming the slot that
//! holds the entry, and a mask bit telling whether the operation took effect
//! for that key. Keys that are already present on insertion, or absent on
//! lookup or removal, are never errors.
//!
//! Two backends implement [`DeviceHashmap`]: a host backend of lockfree
//! chained buckets, and a kernel backend of bucketed open addressing whose
//! work is issued as grid/block launches. [`Hashmap`] picks one according to
//! the [`Device`] it is built for.
//!
//! Mutating operations take `&mut self`, so a batch never races with
//! anything outside of itself. Lookups take `&self` and may run from many
//! threads at once.

mod chain;
mod cpu;
mod kernel;
mod launch;
mod probe;


pub use cpu::CpuHashmap;
pub use kernel::KernelHashmap;

use crate::{
    batch,
    config::HashmapConfig,
    device::{Device, DeviceType},
    error::Result,
    policy::{BytewiseEq, DefaultHashBuilder, KeyEq},
    slab::SlotAddr,
};

use std::{fmt, hash::BuildHasher};

/// The contract every backend implements.
///
/// Batch inputs are flat byte arrays holding `N` keys of `dsize_key()` bytes
/// (and `N` values of `dsize_value()` bytes); outputs are caller-owned arrays
/// of length `N`. A length mismatch is reported as
/// [`Error::BatchShape`](crate::Error::BatchShape) before any work is done.
pub trait DeviceHashmap: Send + Sync {
    /// Rebuilds the table with `buckets` buckets, preserving every entry.
    ///
    /// Capacity scales with the bucket count, keeping the average number of
    /// slots per bucket. On error the table is left as it was.
    fn rehash(&mut self, buckets: usize) -> Result<()>;

    /// Inserts every key that is not already present along with its value.
    ///
    /// `masks[i]` is true if key `i` was inserted. Otherwise key `i` was
    /// present, either before the batch or earlier in the same batch, and
    /// `addrs[i]` is the address of that entry.
    fn insert(
        &mut self,
        keys: &[u8],
        values: &[u8],
        addrs: &mut [SlotAddr],
        masks: &mut [bool],
    ) -> Result<()>;

    /// Like [`insert`](DeviceHashmap::insert), but reserves zero-filled values
    /// to be written later through [`value_mut`](DeviceHashmap::value_mut).
    fn activate(&mut self, keys: &[u8], addrs: &mut [SlotAddr], masks: &mut [bool])
        -> Result<()>;

    /// Looks up every key. Misses write [`SlotAddr::NULL`] and a false mask.
    fn find(&self, keys: &[u8], addrs: &mut [SlotAddr], masks: &mut [bool]) -> Result<()>;

    /// Removes every present key and frees its slot.
    ///
    /// If a key occurs more than once in the batch, only its first occurrence
    /// reports true.
    fn erase(&mut self, keys: &[u8], masks: &mut [bool]) -> Result<()>;

    /// Addresses of every occupied slot.
    fn active_indices(&self) -> Vec<SlotAddr>;

    /// Number of entries in each bucket.
    fn bucket_sizes(&self) -> Vec<usize>;

    fn load_factor(&self) -> f32 {
        self.size() as f32 / self.bucket_count() as f32
    }

    fn size(&self) -> usize;

    fn capacity(&self) -> usize;

    fn bucket_count(&self) -> usize;

    fn dsize_key(&self) -> usize;

    fn dsize_value(&self) -> usize;

    fn device(&self) -> Device;

    fn key(&self, addr: SlotAddr) -> Result<&[u8]>;

    fn value(&self, addr: SlotAddr) -> Result<&[u8]>;

    fn value_mut(&mut self, addr: SlotAddr) -> Result<&mut [u8]>;

    /// Every slot's key bytes, indexed by slot address.
    fn key_buffer(&self) -> &[u8];

    /// Every slot's value bytes, indexed by slot address.
    fn value_buffer(&self) -> &[u8];
}

/// Per-key outcomes of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub addrs: Vec<SlotAddr>,
    pub masks: Vec<bool>,
}

impl Batch {
    fn with_len(len: usize) -> Self {
        Self {
            addrs: vec![SlotAddr::NULL; len],
            masks: vec![false; len],
        }
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    /// Number of keys the operation took effect for.
    pub fn num_succeeded(&self) -> usize {
        self.masks.iter().filter(|&&m| m).count()
    }

    /// Addresses of the keys the operation took effect for, in batch order.
    pub fn succeeded(&self) -> impl Iterator<Item = SlotAddr> + '_ {
        self.addrs
            .iter()
            .zip(self.masks.iter())
            .filter(|(_, &m)| m)
            .map(|(&a, _)| a)
    }
}

/// A batched hash map on some device.
///
/// # Examples
///
/// ```
/// use slabhash::Hashmap;
///
/// let mut map = Hashmap::builder(4, 4).init_capacity(2).init_buckets(2).build()?;
///
/// let keys: Vec<u8> = [1u32, 2, 3].iter().flat_map(|k| k.to_le_bytes()).collect();
/// let values: Vec<u8> = [10u32, 20, 30].iter().flat_map(|v| v.to_le_bytes()).collect();
///
/// let inserted = map.insert(&keys, &values)?;
/// assert_eq!(inserted.masks, [true, true, true]);
/// assert_eq!(map.size(), 3);
///
/// let found = map.find(&keys[4..8])?;
/// assert_eq!(map.value(found.addrs[0])?, 20u32.to_le_bytes());
/// # Ok::<(), slabhash::Error>(())
/// ```
pub struct Hashmap {
    inner: Box<dyn DeviceHashmap>,
}

impl Hashmap {
    /// Builds a map with the default hash and equality policies.
    pub fn new(config: HashmapConfig) -> Result<Self> {
        HashmapBuilder::from_config(config).build()
    }

    pub fn builder(dsize_key: usize, dsize_value: usize) -> HashmapBuilder {
        HashmapBuilder::new(dsize_key, dsize_value)
    }

    /// Wraps an already constructed backend.
    pub fn from_device_hashmap(inner: Box<dyn DeviceHashmap>) -> Self {
        Self { inner }
    }

    pub fn rehash(&mut self, buckets: usize) -> Result<()> {
        self.inner.rehash(buckets)
    }

    pub fn insert(&mut self, keys: &[u8], values: &[u8]) -> Result<Batch> {
        let mut batch = Batch::with_len(self.count(keys)?);
        self.insert_into(keys, values, &mut batch.addrs, &mut batch.masks)?;

        Ok(batch)
    }

    pub fn insert_into(
        &mut self,
        keys: &[u8],
        values: &[u8],
        addrs: &mut [SlotAddr],
        masks: &mut [bool],
    ) -> Result<()> {
        self.inner.insert(keys, values, addrs, masks)
    }

    pub fn activate(&mut self, keys: &[u8]) -> Result<Batch> {
        let mut batch = Batch::with_len(self.count(keys)?);
        self.activate_into(keys, &mut batch.addrs, &mut batch.masks)?;

        Ok(batch)
    }

    pub fn activate_into(
        &mut self,
        keys: &[u8],
        addrs: &mut [SlotAddr],
        masks: &mut [bool],
    ) -> Result<()> {
        self.inner.activate(keys, addrs, masks)
    }

    pub fn find(&self, keys: &[u8]) -> Result<Batch> {
        let mut batch = Batch::with_len(self.count(keys)?);
        self.find_into(keys, &mut batch.addrs, &mut batch.masks)?;

        Ok(batch)
    }

    pub fn find_into(&self, keys: &[u8], addrs: &mut [SlotAddr], masks: &mut [bool]) -> Result<()> {
        self.inner.find(keys, addrs, masks)
    }

    pub fn erase(&mut self, keys: &[u8]) -> Result<Vec<bool>> {
        let mut masks = vec![false; self.count(keys)?];
        self.erase_into(keys, &mut masks)?;

        Ok(masks)
    }

    pub fn erase_into(&mut self, keys: &[u8], masks: &mut [bool]) -> Result<()> {
        self.inner.erase(keys, masks)
    }

    pub fn active_indices(&self) -> Vec<SlotAddr> {
        self.inner.active_indices()
    }

    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.inner.bucket_sizes()
    }

    pub fn load_factor(&self) -> f32 {
        self.inner.load_factor()
    }

    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn bucket_count(&self) -> usize {
        self.inner.bucket_count()
    }

    pub fn dsize_key(&self) -> usize {
        self.inner.dsize_key()
    }

    pub fn dsize_value(&self) -> usize {
        self.inner.dsize_value()
    }

    pub fn device(&self) -> Device {
        self.inner.device()
    }

    pub fn key(&self, addr: SlotAddr) -> Result<&[u8]> {
        self.inner.key(addr)
    }

    pub fn value(&self, addr: SlotAddr) -> Result<&[u8]> {
        self.inner.value(addr)
    }

    pub fn value_mut(&mut self, addr: SlotAddr) -> Result<&mut [u8]> {
        self.inner.value_mut(addr)
    }

    pub fn key_buffer(&self) -> &[u8] {
        self.inner.key_buffer()
    }

    pub fn value_buffer(&self) -> &[u8] {
        self.inner.value_buffer()
    }

    pub fn as_device_hashmap(&self) -> &dyn DeviceHashmap {
        self.inner.as_ref()
    }

    fn count(&self, keys: &[u8]) -> Result<usize> {
        let dsize_key = self.dsize_key();
        let count = keys.len() / dsize_key;
        batch::check_len("keys", count * dsize_key, keys.len())?;

        Ok(count)
    }
}

impl fmt::Debug for Hashmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hashmap")
            .field("device", &self.device())
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("bucket_count", &self.bucket_count())
            .field("dsize_key", &self.dsize_key())
            .field("dsize_value", &self.dsize_value())
            .finish()
    }
}

/// Builds a [`Hashmap`] with chosen sizes, device, and hash and equality
/// policies.
#[derive(Debug, Clone)]
pub struct HashmapBuilder<S = DefaultHashBuilder, E = BytewiseEq> {
    config: HashmapConfig,
    build_hasher: S,
    key_eq: E,
}

impl HashmapBuilder {
    pub fn new(dsize_key: usize, dsize_value: usize) -> Self {
        Self::from_config(HashmapConfig::new(dsize_key, dsize_value))
    }

    pub fn from_config(config: HashmapConfig) -> Self {
        Self {
            config,
            build_hasher: DefaultHashBuilder::default(),
            key_eq: BytewiseEq,
        }
    }
}

impl<S, E> HashmapBuilder<S, E> {
    pub fn init_buckets(mut self, init_buckets: usize) -> Self {
        self.config.init_buckets = init_buckets;

        self
    }

    pub fn init_capacity(mut self, init_capacity: usize) -> Self {
        self.config.init_capacity = init_capacity;

        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.config.device = device;

        self
    }

    pub fn hasher<T>(self, build_hasher: T) -> HashmapBuilder<T, E> {
        HashmapBuilder {
            config: self.config,
            build_hasher,
            key_eq: self.key_eq,
        }
    }

    /// Sets the key equality policy. It must agree with the hash policy.
    pub fn key_eq<F>(self, key_eq: F) -> HashmapBuilder<S, F> {
        HashmapBuilder {
            config: self.config,
            build_hasher: self.build_hasher,
            key_eq,
        }
    }

    pub fn config(&self) -> &HashmapConfig {
        &self.config
    }
}

impl<S, E> HashmapBuilder<S, E>
where
    S: BuildHasher + Send + Sync + 'static,
    E: KeyEq + 'static,
{
    pub fn build(self) -> Result<Hashmap> {
        self.config.validate()?;

        let inner: Box<dyn DeviceHashmap> = match self.config.device.device_type() {
            DeviceType::Cpu => Box::new(CpuHashmap::with_policies(
                &self.config,
                self.build_hasher,
                self.key_eq,
            )?),
            DeviceType::Cuda => Box::new(KernelHashmap::with_policies(
                &self.config,
                self.build_hasher,
                self.key_eq,
            )?),
        };

        Ok(Hashmap { inner })
    }
}

/// Bucket count to rehash to before inserting `count` more keys, if the table
/// cannot hold them.
pub(crate) fn grow_target(
    size: usize,
    count: usize,
    capacity: usize,
    bucket_count: usize,
) -> Option<usize> {
    let new_size = size + count;

    if new_size <= capacity {
        return None;
    }

    let avg_capacity_per_bucket = capacity as f64 / bucket_count as f64;
    let expected = (new_size as f64 / avg_capacity_per_bucket).ceil() as usize;

    Some(expected.max(bucket_count * 2))
}

/// Slab capacity after rehashing to `buckets`, keeping the average number of
/// slots per bucket.
pub(crate) fn rehash_capacity(buckets: usize, capacity: usize, bucket_count: usize) -> usize {
    let avg_capacity_per_bucket = capacity as f64 / bucket_count as f64;

    ((buckets as f64 * avg_capacity_per_bucket).ceil() as usize).max(1)
}

/// Points every later occurrence of a key at its first occurrence's outcome.
pub(crate) fn resolve_duplicates(
    plan: &[Option<usize>],
    addrs: &mut [SlotAddr],
    masks: &mut [bool],
) {
    for (i, winner) in plan.iter().enumerate() {
        if let Some(w) = *winner {
            addrs[i] = addrs[w];
            masks[i] = false;
        }
    }
}
