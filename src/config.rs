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

//! Construction parameters and process-wide tunables.

use crate::{
    device::Device,
    error::{Error, Result},
};

use std::{
    env,
    sync::atomic::{AtomicUsize, Ordering},
};

use tracing::warn;

pub const DEFAULT_INIT_BUCKETS: usize = 64;
pub const DEFAULT_INIT_CAPACITY: usize = 64;

/// Parameters a hash map is constructed with.
///
/// Key and value sizes and the device are fixed for the lifetime of the map.
/// Bucket count and capacity are only starting points; both change through
/// rehashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashmapConfig {
    pub init_buckets: usize,
    pub init_capacity: usize,
    pub dsize_key: usize,
    pub dsize_value: usize,
    pub device: Device,
}

impl HashmapConfig {
    pub fn new(dsize_key: usize, dsize_value: usize) -> Self {
        Self {
            init_buckets: DEFAULT_INIT_BUCKETS,
            init_capacity: DEFAULT_INIT_CAPACITY,
            dsize_key,
            dsize_value,
            device: Device::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dsize_key == 0 {
            return Err(Error::Config("key size must be nonzero".into()));
        }

        if self.init_buckets == 0 {
            return Err(Error::Config("bucket count must be nonzero".into()));
        }

        if self.init_capacity == 0 {
            return Err(Error::Config("capacity must be nonzero".into()));
        }

        Ok(())
    }
}

/// Number of kernel threads per launched block.
///
/// Read once from `SLABHASH_BLOCK_SIZE`.
pub(crate) fn block_size() -> usize {
    const DEFAULT_BLOCK_SIZE: usize = 256;
    static STORAGE: AtomicUsize = AtomicUsize::new(0);

    cached_env_usize(&STORAGE, "SLABHASH_BLOCK_SIZE", DEFAULT_BLOCK_SIZE)
}

/// Minimum number of entries per bucket in the kernel backend's table.
///
/// Read once from `SLABHASH_BUCKET_WIDTH`.
pub(crate) fn bucket_width() -> usize {
    const DEFAULT_BUCKET_WIDTH: usize = 8;
    static STORAGE: AtomicUsize = AtomicUsize::new(0);

    cached_env_usize(&STORAGE, "SLABHASH_BUCKET_WIDTH", DEFAULT_BUCKET_WIDTH)
}

fn cached_env_usize(storage: &AtomicUsize, name: &str, default: usize) -> usize {
    let mut value = storage.load(Ordering::Relaxed);

    if value == 0 {
        value = match env::var(name) {
            Ok(s) => match s.parse::<usize>() {
                Ok(parsed) if parsed > 0 => parsed,
                _ => {
                    warn!(variable = name, value = %s, default, "ignoring invalid override");

                    default
                }
            },
            Err(_) => default,
        };

        storage
            .compare_exchange(0, value, Ordering::Relaxed, Ordering::Relaxed)
            .ok();
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = HashmapConfig::new(4, 4);

        assert_eq!(config.init_buckets, DEFAULT_INIT_BUCKETS);
        assert_eq!(config.init_capacity, DEFAULT_INIT_CAPACITY);
        assert_eq!(config.device, Device::cpu());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(HashmapConfig::new(0, 4).validate().is_err());

        let mut config = HashmapConfig::new(4, 4);
        config.init_buckets = 0;
        assert!(config.validate().is_err());

        let mut config = HashmapConfig::new(4, 4);
        config.init_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_tunables_are_positive() {
        assert!(block_size() > 0);
        assert!(bucket_width() > 0);
    }
}
