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

//! Hashing and equality policies for fixed-size byte keys.

use std::hash::BuildHasher;

/// Default hasher for hash maps.
///
/// This is currently [aHash], a hashing algorithm designed around acceleration
/// by the [AES-NI] instruction set on x86 processors. aHash is not
/// cryptographically secure, but is fast and resistant to DoS attacks.
///
/// [aHash]: https://docs.rs/ahash
/// [AES-NI]: https://en.wikipedia.org/wiki/AES_instruction_set
pub type DefaultHashBuilder = ahash::RandomState;

/// Equality of two keys of the same, table-wide length.
///
/// Implementations must agree with the hash policy they are paired with: keys
/// that compare equal must hash equally.
pub trait KeyEq: Send + Sync {
    fn eq(&self, lhs: &[u8], rhs: &[u8]) -> bool;
}

/// Compares keys byte for byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseEq;

impl KeyEq for BytewiseEq {
    #[inline]
    fn eq(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        lhs == rhs
    }
}

impl<F: Fn(&[u8], &[u8]) -> bool + Send + Sync> KeyEq for F {
    #[inline]
    fn eq(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        self(lhs, rhs)
    }
}

#[inline]
pub(crate) fn hash<H: BuildHasher>(build_hasher: &H, key: &[u8]) -> u64 {
    build_hasher.hash_one(key)
}
