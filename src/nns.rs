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

//! Datasets that nearest neighbor indices are built over.
//!
//! A dataset is a row-major `[rows, cols]` matrix of a single element type,
//! living on some device. An [`NnsIndex`] borrows one and answers questions
//! about its layout; it never modifies it.

use crate::{
    device::Device,
    error::{Error, Result},
    hashmap::HashmapBuilder,
};

use std::fmt;

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    Float32,
    Float64,
    Int32,
    Int64,
    UInt8,
    Bool,
}

impl Dtype {
    pub fn byte_size(self) -> usize {
        match self {
            Dtype::Float32 | Dtype::Int32 => 4,
            Dtype::Float64 | Dtype::Int64 => 8,
            Dtype::UInt8 | Dtype::Bool => 1,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dtype::Float32 => "Float32",
            Dtype::Float64 => "Float64",
            Dtype::Int32 => "Int32",
            Dtype::Int64 => "Int64",
            Dtype::UInt8 => "UInt8",
            Dtype::Bool => "Bool",
        };

        f.write_str(name)
    }
}

/// The read-only view of a dataset an index needs.
pub trait Dataset {
    fn shape(&self) -> &[usize];

    fn dtype(&self) -> Dtype;

    fn device(&self) -> Device;

    /// Row-major element bytes.
    fn as_bytes(&self) -> &[u8];
}

/// An owned row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseDataset {
    shape: [usize; 2],
    dtype: Dtype,
    device: Device,
    bytes: Vec<u8>,
}

impl DenseDataset {
    pub fn new(
        rows: usize,
        cols: usize,
        dtype: Dtype,
        device: Device,
        bytes: Vec<u8>,
    ) -> Result<Self> {
        let expected = rows * cols * dtype.byte_size();

        if bytes.len() != expected {
            return Err(Error::BatchShape {
                what: "dataset",
                expected,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            shape: [rows, cols],
            dtype,
            device,
            bytes,
        })
    }

    /// A host dataset of `Float32` points.
    pub fn from_f32_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut bytes = Vec::with_capacity(rows.len() * cols * 4);

        for row in rows {
            let row = row.as_ref();

            if row.len() != cols {
                return Err(Error::BatchShape {
                    what: "dataset row",
                    expected: cols,
                    actual: row.len(),
                });
            }

            bytes.extend(row.iter().flat_map(|x| x.to_le_bytes()));
        }

        Self::new(rows.len(), cols, Dtype::Float32, Device::cpu(), bytes)
    }
}

impl Dataset for DenseDataset {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> Dtype {
        self.dtype
    }

    fn device(&self) -> Device {
        self.device
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Shared state of nearest neighbor indices: the dataset being searched.
#[derive(Debug)]
pub struct NnsIndex<'a, D: ?Sized> {
    dataset: &'a D,
}

impl<'a, D: Dataset + ?Sized> NnsIndex<'a, D> {
    /// Fails unless `dataset` is two-dimensional with as many bytes as its
    /// shape and element type call for.
    pub fn new(dataset: &'a D) -> Result<Self> {
        let shape = dataset.shape();

        if shape.len() != 2 {
            return Err(Error::Config(format!(
                "dataset must be two-dimensional, got shape {:?}",
                shape
            )));
        }

        let expected = shape[0] * shape[1] * dataset.dtype().byte_size();
        let actual = dataset.as_bytes().len();

        if expected != actual {
            return Err(Error::BatchShape {
                what: "dataset",
                expected,
                actual,
            });
        }

        Ok(Self { dataset })
    }

    pub fn dataset(&self) -> &'a D {
        self.dataset
    }

    /// Number of columns in each point.
    pub fn dimension(&self) -> usize {
        self.dataset.shape()[1]
    }

    /// Number of points.
    pub fn dataset_size(&self) -> usize {
        self.dataset.shape()[0]
    }

    pub fn dtype(&self) -> Dtype {
        self.dataset.dtype()
    }

    pub fn device(&self) -> Device {
        self.dataset.device()
    }

    /// Bytes in one point.
    pub fn row_size(&self) -> usize {
        self.dimension() * self.dtype().byte_size()
    }

    /// Every point, back to back; a batch of keys for a map from
    /// [`hashmap_builder`](NnsIndex::hashmap_builder).
    pub fn rows(&self) -> &'a [u8] {
        self.dataset.as_bytes()
    }

    /// A builder for maps keyed by points of this dataset, on the dataset's
    /// device, with room for every point.
    pub fn hashmap_builder(&self, dsize_value: usize) -> HashmapBuilder {
        HashmapBuilder::new(self.row_size(), dsize_value)
            .init_capacity(self.dataset_size().max(1))
            .device(self.device())
    }
}
