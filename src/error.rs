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

//! Errors returned by the slab and the hash map engines.
//!
//! Per-key outcomes such as "already present" or "not found" are never
//! errors; they are reported through the output masks of a batch. The
//! variants here are either contract violations by the caller or internal
//! sizing failures, and they abort the batch that raised them.

use crate::slab::SlotAddr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The slab had no free slot left.
    ///
    /// Batched inserts grow the table before this can happen, so seeing this
    /// from a batch call means the sizing heuristic under-grew.
    #[error("slab exhausted: all {capacity} slots are occupied")]
    OutOfCapacity { capacity: usize },

    #[error("slot {0} is already free")]
    DoubleFree(SlotAddr),

    #[error("slot {0} is not an occupied slot of this slab")]
    InvalidSlot(SlotAddr),

    #[error("{what}: expected {expected} bytes or elements, got {actual}")]
    BatchShape {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid device: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, Error>;
