// MIT License
//
// Copyright (c) 2019 Gregory Meyer
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

//! Batched concurrent hash maps over a fixed-capacity slab.
//!
//! Keys and values are fixed-size byte strings. Entries live in a
//! [`SlabBuffer`] and are named by [`SlotAddr`]; the hash table maps key bytes
//! to slot addresses. Every operation takes a whole batch of keys, does the
//! per-key work in parallel, and reports each key's outcome in output arrays.
//!
//! A [`Hashmap`] is built for a [`Device`]. Host maps use lockfree chained
//! buckets; accelerator maps use bucketed open addressing driven by grid/block
//! kernel launches.

mod batch;
pub mod config;
pub mod device;
pub mod error;
pub mod hashmap;
pub mod nns;
pub mod policy;
pub mod slab;

pub use config::HashmapConfig;
pub use device::{Device, DeviceType};
pub use error::{Error, Result};
pub use hashmap::{Batch, CpuHashmap, DeviceHashmap, Hashmap, HashmapBuilder, KernelHashmap};
pub use nns::{Dataset, DenseDataset, Dtype, NnsIndex};
pub use policy::{BytewiseEq, DefaultHashBuilder, KeyEq};
pub use slab::{SlabBuffer, SlotAddr, SlotRef};
