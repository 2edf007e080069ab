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

//! Grid/block kernel launches.
//!
//! A launch of `n` threads is split into `ceil(n / block)` blocks. Blocks run
//! concurrently on the worker pool; threads within a block run in order.
//! Each thread owns the output elements at its own index, so kernels never
//! share mutable state except through atomics.

use crate::{config, error::Result};

use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Launch {
    pub(crate) grid: usize,
    pub(crate) block: usize,
}

impl Launch {
    pub(crate) fn for_threads(num_threads: usize) -> Self {
        Self::with_block(num_threads, config::block_size())
    }

    fn with_block(num_threads: usize, block: usize) -> Self {
        assert!(block > 0);

        Self {
            grid: (num_threads + block - 1) / block,
            block,
        }
    }

    /// Runs `kernel` once per element of `out`, storing each result at the
    /// thread's index.
    pub(crate) fn map<T, K>(self, out: &mut [T], kernel: K)
    where
        T: Send,
        K: Fn(usize) -> T + Sync,
    {
        let block = self.block;

        out.par_chunks_mut(block)
            .enumerate()
            .for_each(|(block_index, chunk)| {
                for (offset, slot) in chunk.iter_mut().enumerate() {
                    *slot = kernel(block_index * block + offset);
                }
            });
    }

    /// Runs `kernel` once per element of `out`, which the thread may write.
    pub(crate) fn try_map<T, K>(self, out: &mut [T], kernel: K) -> Result<()>
    where
        T: Send,
        K: Fn(usize, &mut T) -> Result<()> + Sync,
    {
        let block = self.block;

        out.par_chunks_mut(block)
            .enumerate()
            .try_for_each(|(block_index, chunk)| {
                for (offset, slot) in chunk.iter_mut().enumerate() {
                    kernel(block_index * block + offset, slot)?;
                }

                Ok(())
            })
    }

    /// Runs `kernel` once per index with two output elements per thread.
    ///
    /// The first error raised by any block is returned; blocks that have not
    /// started when it is raised are skipped.
    pub(crate) fn try_map2<A, B, K>(self, a: &mut [A], b: &mut [B], kernel: K) -> Result<()>
    where
        A: Send,
        B: Send,
        K: Fn(usize, &mut A, &mut B) -> Result<()> + Sync,
    {
        assert_eq!(a.len(), b.len());

        let block = self.block;

        a.par_chunks_mut(block)
            .zip(b.par_chunks_mut(block))
            .enumerate()
            .try_for_each(|(block_index, (a_chunk, b_chunk))| {
                for (offset, (x, y)) in a_chunk.iter_mut().zip(b_chunk.iter_mut()).enumerate() {
                    kernel(block_index * block + offset, x, y)?;
                }

                Ok(())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::Error;

    #[test]
    fn grid_covers_every_thread() {
        assert_eq!(Launch::with_block(0, 4).grid, 0);
        assert_eq!(Launch::with_block(1, 4).grid, 1);
        assert_eq!(Launch::with_block(8, 4).grid, 2);
        assert_eq!(Launch::with_block(9, 4).grid, 3);
    }

    #[test]
    fn map_writes_each_index() {
        let mut out = vec![0; 1000];
        Launch::with_block(out.len(), 7).map(&mut out, |i| i * 2);

        assert!(out.iter().enumerate().all(|(i, &x)| x == i * 2));
    }

    #[test]
    fn try_map2_propagates_errors() {
        let mut a = vec![0; 100];
        let mut b = vec![false; 100];

        let launch = Launch::with_block(a.len(), 16);

        assert!(launch
            .try_map2(&mut a, &mut b, |i, x, y| {
                *x = i;
                *y = i % 2 == 0;

                Ok(())
            })
            .is_ok());
        assert_eq!(a[99], 99);
        assert!(b[98] && !b[99]);

        let result = launch.try_map2(&mut a, &mut b, |i, _, _| {
            if i == 50 {
                Err(Error::OutOfCapacity { capacity: 50 })
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err(Error::OutOfCapacity { capacity: 50 }));
    }
}
