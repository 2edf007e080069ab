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

//! Helpers shared by every backend's batch operations.

use crate::{
    error::{Error, Result},
    policy::{self, KeyEq},
    slab::{SlabBuffer, SlotAddr},
};

use std::hash::BuildHasher;

use rayon::prelude::*;

/// Checks that a batch of `count` keys (and values, if any) has the byte
/// lengths the table expects.
pub(crate) fn check_shape(
    count: usize,
    keys: &[u8],
    dsize_key: usize,
    values: Option<&[u8]>,
    dsize_value: usize,
) -> Result<()> {
    check_len("keys", count * dsize_key, keys.len())?;

    if let Some(values) = values {
        check_len("values", count * dsize_value, values.len())?;
    }

    Ok(())
}

pub(crate) fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::BatchShape {
            what,
            expected,
            actual,
        })
    }
}

#[inline]
pub(crate) fn nth(data: &[u8], dsize: usize, i: usize) -> &[u8] {
    &data[i * dsize..(i + 1) * dsize]
}

pub(crate) fn hash_keys<H: BuildHasher + Sync>(
    build_hasher: &H,
    keys: &[u8],
    dsize_key: usize,
) -> Vec<u64> {
    keys.par_chunks_exact(dsize_key)
        .map(|key| policy::hash(build_hasher, key))
        .collect()
}

/// Resolves keys that occur more than once in the same batch.
///
/// Element `i` of the result is `None` if key `i` is the first occurrence of
/// its value in the batch, or `Some(w)` where `w < i` is the index of that
/// first occurrence. Only first occurrences take part in insertion, so the
/// first occurrence always wins.
pub(crate) fn first_occurrences<E: KeyEq>(
    keys: &[u8],
    dsize_key: usize,
    hashes: &[u64],
    key_eq: &E,
) -> Vec<Option<usize>> {
    let mut order: Vec<usize> = (0..hashes.len()).collect();
    order.par_sort_unstable_by_key(|&i| (hashes[i], i));

    let mut runs = Vec::new();
    let mut start = 0;

    for end in 1..=order.len() {
        if end == order.len() || hashes[order[end]] != hashes[order[start]] {
            if end - start > 1 {
                runs.push(&order[start..end]);
            }

            start = end;
        }
    }

    let mut plan = vec![None; hashes.len()];

    if runs.is_empty() {
        return plan;
    }

    // runs are sorted by index, so the first equal key found is the earliest
    let losers: Vec<(usize, usize)> = runs
        .par_iter()
        .flat_map_iter(|run| {
            run.iter().enumerate().filter_map(move |(j, &i)| {
                let key = nth(keys, dsize_key, i);

                run[..j]
                    .iter()
                    .find(|&&w| key_eq.eq(nth(keys, dsize_key, w), key))
                    .map(|&w| (i, w))
            })
        })
        .collect();

    for (loser, winner) in losers {
        // chase to the root so every duplicate points at the first occurrence
        let mut root = winner;

        while let Some(earlier) = plan[root] {
            root = earlier;
        }

        plan[loser] = Some(root);
    }

    plan
}

/// Copies the key (or value) bytes of `addrs` out of `buffer` into one
/// contiguous array, preserving order.
pub(crate) fn gather(buffer: &[u8], dsize: usize, addrs: &[SlotAddr]) -> Vec<u8> {
    let mut out = vec![0; addrs.len() * dsize];

    if dsize == 0 {
        return out;
    }

    out.par_chunks_mut(dsize)
        .zip(addrs.par_iter())
        .for_each(|(dst, addr)| dst.copy_from_slice(nth(buffer, dsize, addr.index())));

    out
}

/// Gathers the keys and values of every slot in `addrs`.
pub(crate) fn extract(slab: &SlabBuffer, addrs: &[SlotAddr]) -> (Vec<u8>, Vec<u8>) {
    rayon::join(
        || gather(slab.key_buffer(), slab.dsize_key(), addrs),
        || gather(slab.value_buffer(), slab.dsize_value(), addrs),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::policy::{BytewiseEq, DefaultHashBuilder};

    fn keys_of(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn shape_mismatch_is_reported() {
        assert!(check_shape(2, &[0; 8], 4, Some(&[0; 8]), 4).is_ok());
        assert!(check_shape(2, &[0; 8], 4, None, 4).is_ok());

        assert_eq!(
            check_shape(2, &[0; 7], 4, None, 4),
            Err(Error::BatchShape {
                what: "keys",
                expected: 8,
                actual: 7,
            })
        );

        assert_eq!(
            check_shape(2, &[0; 8], 4, Some(&[0; 4]), 4),
            Err(Error::BatchShape {
                what: "values",
                expected: 8,
                actual: 4,
            })
        );
    }

    #[test]
    fn first_occurrence_wins() {
        let keys = keys_of(&[7, 3, 7, 9, 3, 7]);
        let hashes = hash_keys(&DefaultHashBuilder::default(), &keys, 4);

        let plan = first_occurrences(&keys, 4, &hashes, &BytewiseEq);

        assert_eq!(plan, vec![None, None, Some(0), None, Some(1), Some(0)]);
    }

    #[test]
    fn colliding_hashes_are_told_apart_by_equality() {
        let keys = keys_of(&[1, 2, 1, 2]);
        let hashes = vec![42; 4];

        let plan = first_occurrences(&keys, 4, &hashes, &BytewiseEq);

        assert_eq!(plan, vec![None, None, Some(0), Some(1)]);
    }

    #[test]
    fn unique_batch_has_no_losers() {
        let keys = keys_of(&(0..1000).collect::<Vec<_>>());
        let hashes = hash_keys(&DefaultHashBuilder::default(), &keys, 4);

        assert!(first_occurrences(&keys, 4, &hashes, &BytewiseEq)
            .iter()
            .all(Option::is_none));
    }

    #[test]
    fn gather_preserves_order() {
        let buffer = keys_of(&[10, 11, 12, 13]);
        let addrs = [SlotAddr::new(3), SlotAddr::new(0), SlotAddr::new(2)];

        assert_eq!(gather(&buffer, 4, &addrs), keys_of(&[13, 10, 12]));
        assert!(gather(&buffer, 0, &addrs).is_empty());
    }
}
