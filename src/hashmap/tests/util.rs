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

use crate::{device::Device, hashmap::Hashmap, slab::SlotAddr};

use std::hash::{BuildHasher, Hasher};

pub(crate) const DEVICES: [Device; 2] = [Device::cpu(), Device::cuda(0)];

pub(crate) fn encode(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn decode(bytes: &[u8]) -> u32 {
    let mut array = [0; 4];
    array.copy_from_slice(bytes);

    u32::from_le_bytes(array)
}

/// A map of `u32` keys to `u32` values.
pub(crate) fn map_on(device: Device, init_buckets: usize, init_capacity: usize) -> Hashmap {
    Hashmap::builder(4, 4)
        .init_buckets(init_buckets)
        .init_capacity(init_capacity)
        .device(device)
        .build()
        .unwrap()
}

/// Looks up every key, returning its value if present.
pub(crate) fn lookup(map: &Hashmap, keys: &[u32]) -> Vec<Option<u32>> {
    let found = map.find(&encode(keys)).unwrap();

    found
        .addrs
        .iter()
        .zip(found.masks.iter())
        .map(|(&addr, &mask)| {
            if mask {
                Some(decode(map.value(addr).unwrap()))
            } else {
                assert_eq!(addr, SlotAddr::NULL);

                None
            }
        })
        .collect()
}

/// Sends every key to the same hash.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ConstantHashBuilder;

impl BuildHasher for ConstantHashBuilder {
    type Hasher = ConstantHasher;

    fn build_hasher(&self) -> ConstantHasher {
        ConstantHasher
    }
}

pub(crate) struct ConstantHasher;

impl Hasher for ConstantHasher {
    fn finish(&self) -> u64 {
        0x5eed
    }

    fn write(&mut self, _: &[u8]) {}
}
