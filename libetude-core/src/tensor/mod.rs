// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `tensor` module implements typed multi-dimensional buffers and their operations.
//!
//! A [`Tensor`] couples reference-counted byte storage with a shape, byte strides, and an element
//! [`DataType`]. View operations (reshape, slice, transpose, permute) share the parent's storage;
//! payload bytes are guarded by a read-write lock so concurrent readers may share a tensor while
//! writers get exclusive access. Storage is drawn from a [`SmartManager`] so pool budgeting,
//! reuse, and leak auditing apply to tensor data.

mod dtype;
pub mod ops;
pub mod quant;

pub use dtype::{bf16_to_f32, f16_to_f32, f32_to_bf16, f32_to_f16, DataType};

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::errors::{invalid_argument_error, unsupported_error, Result};
use crate::mem::{PoolAlloc, SmartAlloc, SmartManager, SmartManagerOptions};

/// The maximum number of tensor dimensions.
pub const MAX_DIMS: usize = 8;

/// A shape or stride vector. Never spills to the heap because `ndim <= MAX_DIMS`.
pub type Shape = SmallVec<[usize; MAX_DIMS]>;

static DEFAULT_MANAGER: Lazy<Arc<SmartManager>> = Lazy::new(|| {
    let manager = SmartManager::new(SmartManagerOptions::default())
        .expect("default manager options are valid");
    Arc::new(manager)
});

/// The process-default allocation manager used by tensor constructors that do not name one.
pub fn default_manager() -> &'static Arc<SmartManager> {
    &DEFAULT_MANAGER
}

struct Storage {
    bytes: RwLock<Vec<u8>>,
    manager: Option<Arc<SmartManager>>,
    reservation: Option<PoolAlloc>,
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let (Some(manager), Some(reservation)) = (self.manager.take(), self.reservation.take())
        {
            let buf = std::mem::take(self.bytes.get_mut());
            manager.free(SmartAlloc::from_raw(buf, reservation));
        }
    }
}

/// A dense multi-dimensional typed buffer.
#[derive(Clone)]
pub struct Tensor {
    storage: Arc<Storage>,
    dtype: DataType,
    shape: Shape,
    strides: Shape,
    offset: usize,
    name: Option<String>,
}

impl Tensor {
    /// Creates an uninitialized tensor from the process-default manager.
    pub fn new(dtype: DataType, shape: &[usize]) -> Result<Tensor> {
        Tensor::new_in(default_manager(), dtype, shape)
    }

    /// Creates an uninitialized tensor whose storage is drawn from `manager`.
    pub fn new_in(manager: &Arc<SmartManager>, dtype: DataType, shape: &[usize]) -> Result<Tensor> {
        let shape = check_shape(shape)?;
        let size: usize = shape.iter().product();

        let (buf, reservation) = manager.alloc(dtype.byte_len(size).max(1))?.into_raw();

        let storage = Storage {
            bytes: RwLock::new(buf),
            manager: Some(Arc::clone(manager)),
            reservation: Some(reservation),
        };

        let strides = row_major_strides(&shape, dtype);

        Ok(Tensor {
            storage: Arc::new(storage),
            dtype,
            shape,
            strides,
            offset: 0,
            name: None,
        })
    }

    /// Creates a zero-filled tensor.
    pub fn zeros(dtype: DataType, shape: &[usize]) -> Result<Tensor> {
        Tensor::zeros_in(default_manager(), dtype, shape)
    }

    pub fn zeros_in(
        manager: &Arc<SmartManager>,
        dtype: DataType,
        shape: &[usize],
    ) -> Result<Tensor> {
        let tensor = Tensor::new_in(manager, dtype, shape)?;
        tensor.storage.bytes.write().iter_mut().for_each(|byte| *byte = 0);
        Ok(tensor)
    }

    /// Creates an `f32` tensor filled with `value`.
    pub fn full(shape: &[usize], value: f32) -> Result<Tensor> {
        let tensor = Tensor::new(DataType::F32, shape)?;
        tensor.fill(value)?;
        Ok(tensor)
    }

    /// Creates an `f32` tensor from a row-major slice.
    pub fn from_f32(shape: &[usize], data: &[f32]) -> Result<Tensor> {
        let tensor = Tensor::new(DataType::F32, shape)?;
        if tensor.size() != data.len() {
            return invalid_argument_error("data length does not match shape");
        }
        tensor.write_f32_values(data)?;
        Ok(tensor)
    }

    /// Creates an `f32` tensor of uniform random values in `[lo, hi)`.
    pub fn uniform(shape: &[usize], lo: f32, hi: f32, seed: u64) -> Result<Tensor> {
        if !(lo < hi) {
            return invalid_argument_error("uniform range is empty");
        }

        let tensor = Tensor::new(DataType::F32, shape)?;
        let mut rng = prng::Xoshiro128pp::new(seed);
        let data: Vec<f32> =
            (0..tensor.size()).map(|_| lo + (hi - lo) * rng.next_f32()).collect();
        tensor.write_f32_values(&data)?;
        Ok(tensor)
    }

    /// Creates an `f32` tensor of normally distributed values via the Box-Muller transform.
    pub fn normal(shape: &[usize], mean: f32, std: f32, seed: u64) -> Result<Tensor> {
        if std < 0.0 {
            return invalid_argument_error("standard deviation must be non-negative");
        }

        let tensor = Tensor::new(DataType::F32, shape)?;
        let mut rng = prng::Xoshiro128pp::new(seed);

        let mut data = Vec::with_capacity(tensor.size());
        while data.len() < tensor.size() {
            let u1 = rng.next_f32().max(f32::MIN_POSITIVE);
            let u2 = rng.next_f32();

            let radius = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f32::consts::PI * u2;

            data.push(mean + std * radius * theta.cos());
            if data.len() < tensor.size() {
                data.push(mean + std * radius * theta.sin());
            }
        }

        tensor.write_f32_values(&data)?;
        Ok(tensor)
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Byte strides per dimension.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Total element count.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Total payload size in bytes.
    pub fn data_size(&self) -> usize {
        self.dtype.byte_len(self.size())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    pub fn with_name(mut self, name: &str) -> Tensor {
        self.set_name(name);
        self
    }

    /// The number of tensors (views included) sharing this tensor's storage.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.storage)
    }

    /// Whether another tensor aliases the same storage.
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Whether the layout is row-major contiguous. Packed types are contiguous by construction.
    pub fn is_contiguous(&self) -> bool {
        if self.dtype.is_packed() {
            return true;
        }
        self.strides == row_major_strides(&self.shape, self.dtype)
    }

    /// Fills an `f32` tensor with a scalar.
    pub fn fill(&self, value: f32) -> Result<()> {
        if self.dtype != DataType::F32 {
            return unsupported_error("fill requires an f32 tensor");
        }
        let data = vec![value; self.size()];
        self.write_f32_values(&data)
    }

    /// Returns a reshaped view sharing this tensor's storage.
    ///
    /// A non-contiguous source is first copied into a contiguous tensor.
    pub fn reshape(&self, new_shape: &[usize]) -> Result<Tensor> {
        let new_shape = check_shape(new_shape)?;

        if new_shape.iter().product::<usize>() != self.size() {
            return invalid_argument_error("reshape changes element count");
        }

        let base = if self.is_contiguous() { self.clone() } else { self.to_contiguous()? };

        let strides = row_major_strides(&new_shape, base.dtype);
        Ok(Tensor { shape: new_shape, strides, name: None, ..base })
    }

    /// Returns a sliced view. `starts`/`ends` give a half-open range per dimension; ends are
    /// clamped to the dimension size and empty ranges are rejected.
    pub fn slice(&self, starts: &[usize], ends: &[usize]) -> Result<Tensor> {
        if self.dtype.is_packed() {
            return unsupported_error("packed tensors cannot be sliced");
        }
        if starts.len() != self.ndim() || ends.len() != self.ndim() {
            return invalid_argument_error("slice bounds must cover every dimension");
        }

        let mut shape = Shape::new();
        let mut offset = self.offset;

        for dim in 0..self.ndim() {
            let end = ends[dim].min(self.shape[dim]);
            if starts[dim] >= end {
                return invalid_argument_error("slice range is empty");
            }

            shape.push(end - starts[dim]);
            offset += starts[dim] * self.strides[dim];
        }

        Ok(Tensor {
            storage: Arc::clone(&self.storage),
            dtype: self.dtype,
            shape,
            strides: self.strides.clone(),
            offset,
            name: None,
        })
    }

    /// Returns a view with the last two dimensions exchanged.
    pub fn transpose(&self) -> Result<Tensor> {
        if self.ndim() < 2 {
            return invalid_argument_error("transpose requires at least two dimensions");
        }
        self.transpose_axes(self.ndim() - 2, self.ndim() - 1)
    }

    /// Returns a view with dimensions `a` and `b` exchanged.
    pub fn transpose_axes(&self, a: usize, b: usize) -> Result<Tensor> {
        if self.dtype.is_packed() {
            return unsupported_error("packed tensors cannot be transposed");
        }
        if a >= self.ndim() || b >= self.ndim() {
            return invalid_argument_error("transpose axis out of range");
        }

        let mut view = self.clone();
        view.shape.swap(a, b);
        view.strides.swap(a, b);
        view.name = None;
        Ok(view)
    }

    /// Returns a view with dimensions reordered by `perm`.
    pub fn permute(&self, perm: &[usize]) -> Result<Tensor> {
        if self.dtype.is_packed() {
            return unsupported_error("packed tensors cannot be permuted");
        }
        if perm.len() != self.ndim() {
            return invalid_argument_error("permutation must cover every dimension");
        }

        let mut seen = [false; MAX_DIMS];
        for &axis in perm {
            if axis >= self.ndim() || seen[axis] {
                return invalid_argument_error("invalid permutation");
            }
            seen[axis] = true;
        }

        let mut view = self.clone();
        view.shape = perm.iter().map(|&axis| self.shape[axis]).collect();
        view.strides = perm.iter().map(|&axis| self.strides[axis]).collect();
        view.name = None;
        Ok(view)
    }

    /// Returns a view with a size-1 dimension inserted at `axis`.
    pub fn expand_dims(&self, axis: usize) -> Result<Tensor> {
        if axis > self.ndim() {
            return invalid_argument_error("expand axis out of range");
        }
        if self.ndim() == MAX_DIMS {
            return invalid_argument_error("tensor already has the maximum dimensionality");
        }

        let mut view = self.clone();
        let stride = if axis < self.ndim() {
            self.strides[axis]
        }
        else {
            self.dtype.elem_size()
        };
        view.shape.insert(axis, 1);
        view.strides.insert(axis, stride);
        view.name = None;
        Ok(view)
    }

    /// Returns a view with the given size-1 dimension removed, or all of them when `axis` is
    /// `None`. A tensor never squeezes below one dimension.
    pub fn squeeze(&self, axis: Option<usize>) -> Result<Tensor> {
        let mut view = self.clone();
        view.name = None;

        match axis {
            Some(axis) => {
                if axis >= self.ndim() {
                    return invalid_argument_error("squeeze axis out of range");
                }
                if self.shape[axis] != 1 {
                    return invalid_argument_error("squeeze axis is not of size one");
                }
                if self.ndim() > 1 {
                    view.shape.remove(axis);
                    view.strides.remove(axis);
                }
            }
            None => {
                let mut shape = Shape::new();
                let mut strides = Shape::new();
                for dim in 0..self.ndim() {
                    if self.shape[dim] != 1 {
                        shape.push(self.shape[dim]);
                        strides.push(self.strides[dim]);
                    }
                }
                if shape.is_empty() {
                    shape.push(1);
                    strides.push(self.dtype.elem_size());
                }
                view.shape = shape;
                view.strides = strides;
            }
        }

        Ok(view)
    }

    /// Copies this tensor into a new contiguous tensor of the same dtype.
    pub fn to_contiguous(&self) -> Result<Tensor> {
        if self.dtype != DataType::F32 {
            return unsupported_error("copy requires an f32 tensor");
        }

        let data = self.read_f32_values()?;
        let out = match &self.storage.manager {
            Some(manager) => Tensor::new_in(manager, self.dtype, &self.shape)?,
            None => Tensor::new(self.dtype, &self.shape)?,
        };
        out.write_f32_values(&data)?;
        Ok(out)
    }

    /// Converts to another element type, clamping out-of-range integer targets.
    ///
    /// Quantized integer types carry scale information and are produced by the
    /// [`quant`] module instead.
    pub fn astype(&self, dtype: DataType) -> Result<Tensor> {
        if self.dtype != DataType::F32 {
            return unsupported_error("conversion source must be f32");
        }

        let values = self.read_f32_values()?;
        let out = Tensor::new(dtype, &self.shape)?;

        {
            let mut bytes = out.storage.bytes.write();
            match dtype {
                DataType::F32 => {
                    for (i, &v) in values.iter().enumerate() {
                        bytes[i * 4..i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
                    }
                }
                DataType::Bf16 => {
                    for (i, &v) in values.iter().enumerate() {
                        bytes[i * 2..i * 2 + 2].copy_from_slice(&f32_to_bf16(v).to_ne_bytes());
                    }
                }
                DataType::F16 => {
                    for (i, &v) in values.iter().enumerate() {
                        bytes[i * 2..i * 2 + 2].copy_from_slice(&f32_to_f16(v).to_ne_bytes());
                    }
                }
                DataType::Int32 => {
                    for (i, &v) in values.iter().enumerate() {
                        let v = v.round().clamp(i32::MIN as f32, i32::MAX as f32) as i32;
                        bytes[i * 4..i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
                    }
                }
                DataType::Int64 => {
                    for (i, &v) in values.iter().enumerate() {
                        let v = v.round().clamp(i64::MIN as f32, i64::MAX as f32) as i64;
                        bytes[i * 8..i * 8 + 8].copy_from_slice(&v.to_ne_bytes());
                    }
                }
                DataType::Uint8 => {
                    for (i, &v) in values.iter().enumerate() {
                        bytes[i] = v.round().clamp(0.0, 255.0) as u8;
                    }
                }
                DataType::Int8 | DataType::Int4 => {
                    return unsupported_error("use quantization for sub-byte integer targets");
                }
            }
        }

        Ok(out)
    }

    /// Reads every element as `f32` in row-major order, widening or casting as needed.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match self.dtype {
            DataType::F32 => self.read_f32_values(),
            _ => {
                if !self.is_contiguous() {
                    return unsupported_error("non-f32 read requires a contiguous tensor");
                }

                let bytes = self.storage.bytes.read();
                let bytes = &bytes[self.offset..];
                let size = self.size();

                let values = match self.dtype {
                    DataType::Bf16 => (0..size)
                        .map(|i| {
                            bf16_to_f32(u16::from_ne_bytes([bytes[i * 2], bytes[i * 2 + 1]]))
                        })
                        .collect(),
                    DataType::F16 => (0..size)
                        .map(|i| {
                            f16_to_f32(u16::from_ne_bytes([bytes[i * 2], bytes[i * 2 + 1]]))
                        })
                        .collect(),
                    DataType::Int8 => (0..size).map(|i| bytes[i] as i8 as f32).collect(),
                    DataType::Uint8 => (0..size).map(|i| bytes[i] as f32).collect(),
                    DataType::Int4 => (0..size)
                        .map(|i| {
                            let byte = bytes[i / 2];
                            let nibble =
                                if i % 2 == 0 { byte & 0x0f } else { byte >> 4 };
                            nibble as f32
                        })
                        .collect(),
                    DataType::Int32 => (0..size)
                        .map(|i| {
                            i32::from_ne_bytes(
                                bytes[i * 4..i * 4 + 4].try_into().unwrap(),
                            ) as f32
                        })
                        .collect(),
                    DataType::Int64 => (0..size)
                        .map(|i| {
                            i64::from_ne_bytes(
                                bytes[i * 8..i * 8 + 8].try_into().unwrap(),
                            ) as f32
                        })
                        .collect(),
                    DataType::F32 => unreachable!(),
                };

                Ok(values)
            }
        }
    }

    /// Reads one element of an `f32` tensor.
    pub fn get_f32(&self, index: &[usize]) -> Result<f32> {
        if self.dtype != DataType::F32 {
            return unsupported_error("element access requires an f32 tensor");
        }
        if index.len() != self.ndim() {
            return invalid_argument_error("index rank does not match tensor");
        }

        let mut offset = self.offset;
        for dim in 0..self.ndim() {
            if index[dim] >= self.shape[dim] {
                return invalid_argument_error("index out of range");
            }
            offset += index[dim] * self.strides[dim];
        }

        let bytes = self.storage.bytes.read();
        Ok(f32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap()))
    }

    /// Gathers the tensor's `f32` elements into a row-major vector, honouring strides.
    pub(crate) fn read_f32_values(&self) -> Result<Vec<f32>> {
        if self.dtype != DataType::F32 {
            return unsupported_error("expected an f32 tensor");
        }

        let bytes = self.storage.bytes.read();
        let mut values = Vec::with_capacity(self.size());

        for_each_offset(&self.shape, &self.strides, self.offset, |offset| {
            values.push(f32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap()));
        });

        Ok(values)
    }

    /// Scatters row-major `f32` values into the tensor, honouring strides.
    pub(crate) fn write_f32_values(&self, values: &[f32]) -> Result<()> {
        if self.dtype != DataType::F32 {
            return unsupported_error("expected an f32 tensor");
        }
        if values.len() != self.size() {
            return invalid_argument_error("value count does not match tensor size");
        }

        let mut bytes = self.storage.bytes.write();
        let mut next = 0;

        for_each_offset(&self.shape, &self.strides, self.offset, |offset| {
            bytes[offset..offset + 4].copy_from_slice(&values[next].to_ne_bytes());
            next += 1;
        });

        Ok(())
    }

    /// Gathers elements as `f32` after broadcasting this tensor to `out_shape`.
    pub(crate) fn read_broadcast_f32(&self, out_shape: &[usize]) -> Result<Vec<f32>> {
        if self.dtype != DataType::F32 {
            return unsupported_error("expected an f32 tensor");
        }

        let strides = broadcast_strides(&self.shape, &self.strides, out_shape)?;
        let bytes = self.storage.bytes.read();

        let mut values = Vec::with_capacity(out_shape.iter().product());
        for_each_offset(out_shape, &strides, self.offset, |offset| {
            values.push(f32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap()));
        });

        Ok(values)
    }

    /// Direct read access to the tensor's raw bytes. The view covers the whole storage; callers
    /// apply `offset` and strides themselves.
    pub(crate) fn with_bytes<R>(&self, f: impl FnOnce(&[u8], usize) -> R) -> R {
        let bytes = self.storage.bytes.read();
        f(&bytes, self.offset)
    }

    /// Direct write access to the tensor's raw bytes.
    pub(crate) fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8], usize) -> R) -> R {
        let mut bytes = self.storage.bytes.write();
        f(&mut bytes, self.offset)
    }

    pub(crate) fn manager(&self) -> Option<&Arc<SmartManager>> {
        self.storage.manager.as_ref()
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("dtype", &self.dtype)
            .field("shape", &self.shape.as_slice())
            .field("name", &self.name)
            .finish()
    }
}

fn check_shape(shape: &[usize]) -> Result<Shape> {
    if shape.is_empty() || shape.len() > MAX_DIMS {
        return invalid_argument_error("tensor rank must be between 1 and 8");
    }
    if shape.iter().any(|&dim| dim == 0) {
        return invalid_argument_error("tensor dimensions must be positive");
    }
    Ok(Shape::from_slice(shape))
}

fn row_major_strides(shape: &[usize], dtype: DataType) -> Shape {
    let mut strides = Shape::from_elem(0, shape.len());

    let mut stride = dtype.elem_size();
    for dim in (0..shape.len()).rev() {
        strides[dim] = stride;
        stride *= shape[dim];
    }

    strides
}

/// Computes the broadcast result shape of two shapes by trailing alignment.
pub(crate) fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Shape> {
    let ndim = a.len().max(b.len());
    let mut out = Shape::from_elem(1, ndim);

    for i in 0..ndim {
        let da = if i < ndim - a.len() { 1 } else { a[i - (ndim - a.len())] };
        let db = if i < ndim - b.len() { 1 } else { b[i - (ndim - b.len())] };

        if da != db && da != 1 && db != 1 {
            return invalid_argument_error("shapes are not broadcast-compatible");
        }
        out[i] = da.max(db);
    }

    Ok(out)
}

/// Effective strides for iterating a tensor as if it had `out_shape`: broadcast dimensions get a
/// zero stride.
fn broadcast_strides(shape: &[usize], strides: &[usize], out_shape: &[usize]) -> Result<Shape> {
    if out_shape.len() < shape.len() {
        return invalid_argument_error("broadcast target has lower rank");
    }

    let lead = out_shape.len() - shape.len();
    let mut out = Shape::from_elem(0, out_shape.len());

    for i in 0..out_shape.len() {
        if i < lead {
            continue;
        }

        let dim = shape[i - lead];
        if dim == out_shape[i] {
            out[i] = strides[i - lead];
        }
        else if dim == 1 {
            out[i] = 0;
        }
        else {
            return invalid_argument_error("shapes are not broadcast-compatible");
        }
    }

    Ok(out)
}

/// Visits the byte offset of every element of `shape` in row-major order.
fn for_each_offset(
    shape: &[usize],
    strides: &[usize],
    base: usize,
    mut f: impl FnMut(usize),
) {
    let ndim = shape.len();
    let mut index = [0usize; MAX_DIMS];
    let mut offset = base;

    loop {
        f(offset);

        // Odometer increment over the trailing dimension first.
        let mut dim = ndim;
        loop {
            if dim == 0 {
                return;
            }
            dim -= 1;

            index[dim] += 1;
            offset += strides[dim];

            if index[dim] < shape[dim] {
                break;
            }

            offset -= strides[dim] * shape[dim];
            index[dim] = 0;
        }
    }
}

mod prng {
    //! The xoshiro128++ pseudo-random number generator used by the tensor initializers.

    #[inline]
    fn split_mix_64(x: &mut u64) -> u64 {
        *x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = *x;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// `Xoshiro128pp` implements the xoshiro128++ pseudo-random number generator.
    ///
    /// Statistically strong and very fast, though not cryptographically secure; for seeding
    /// tensor initializers it is more than sufficient. The 64-bit seed is spread over the state
    /// via SplitMix64.
    pub struct Xoshiro128pp {
        s: [u32; 4],
    }

    impl Xoshiro128pp {
        pub fn new(mut seed: u64) -> Self {
            let a = split_mix_64(&mut seed);
            let b = split_mix_64(&mut seed);

            Xoshiro128pp {
                s: [
                    (a & 0xffff_ffff) as u32,
                    (a >> 32) as u32,
                    (b & 0xffff_ffff) as u32,
                    (b >> 32) as u32,
                ],
            }
        }

        #[inline(always)]
        fn rotl(x: u32, k: u32) -> u32 {
            (x << k) | (x >> (32 - k))
        }

        #[inline]
        pub fn next(&mut self) -> u32 {
            let x = self.s[0].wrapping_add(self.s[3]);
            let result = Self::rotl(x, 7).wrapping_add(self.s[0]);

            let t = self.s[1] << 9;

            self.s[2] ^= self.s[0];
            self.s[3] ^= self.s[1];
            self.s[1] ^= self.s[2];
            self.s[0] ^= self.s[3];

            self.s[2] ^= t;
            self.s[3] = Self::rotl(self.s[3], 11);

            result
        }

        /// A uniform value in `[0, 1)` with 24 bits of precision.
        #[inline]
        pub fn next_f32(&mut self) -> f32 {
            (self.next() >> 8) as f32 * (1.0 / (1u32 << 24) as f32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{broadcast_shape, DataType, Tensor};
    use crate::errors::ErrorKind;

    #[test]
    fn verify_strides_and_sizes() {
        let t = Tensor::zeros(DataType::F32, &[2, 3, 4]).unwrap();
        assert_eq!(t.size(), 24);
        assert_eq!(t.data_size(), 96);
        assert_eq!(t.strides(), &[48, 16, 4]);
        assert!(t.is_contiguous());
    }

    #[test]
    fn verify_shape_validation() {
        assert_eq!(
            Tensor::zeros(DataType::F32, &[]).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            Tensor::zeros(DataType::F32, &[2, 0]).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            Tensor::zeros(DataType::F32, &[1; 9]).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn verify_from_f32_round_trip() {
        let t = Tensor::from_f32(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(t.to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(t.get_f32(&[1, 2]).unwrap(), 6.0);
    }

    #[test]
    fn verify_views_share_storage() {
        let t = Tensor::from_f32(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(t.ref_count(), 1);

        let view = t.reshape(&[3, 2]).unwrap();
        assert_eq!(t.ref_count(), 2);
        assert!(view.shares_storage(&t));

        drop(view);
        assert_eq!(t.ref_count(), 1);
    }

    #[test]
    fn verify_transpose_gather() {
        let t = Tensor::from_f32(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let tt = t.transpose().unwrap();

        assert_eq!(tt.shape(), &[3, 2]);
        assert!(!tt.is_contiguous());
        assert_eq!(tt.to_f32_vec().unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn verify_reshape_of_transpose_copies() {
        let t = Tensor::from_f32(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let tt = t.transpose().unwrap();

        let r = tt.reshape(&[6]).unwrap();
        assert!(!r.shares_storage(&t));
        assert_eq!(r.to_f32_vec().unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn verify_slice() {
        let t = Tensor::from_f32(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();

        let s = t.slice(&[0, 1], &[2, 3]).unwrap();
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.to_f32_vec().unwrap(), vec![2.0, 3.0, 5.0, 6.0]);

        // Ends clamp to the dimension size.
        let clamped = t.slice(&[0, 0], &[2, 100]).unwrap();
        assert_eq!(clamped.shape(), &[2, 3]);

        // Empty ranges are rejected.
        assert!(t.slice(&[1, 0], &[1, 3]).is_err());
    }

    #[test]
    fn verify_expand_and_squeeze() {
        let t = Tensor::from_f32(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();

        let e = t.expand_dims(0).unwrap();
        assert_eq!(e.shape(), &[1, 2, 3]);

        let s = e.squeeze(Some(0)).unwrap();
        assert_eq!(s.shape(), &[2, 3]);

        let all = e.squeeze(None).unwrap();
        assert_eq!(all.shape(), &[2, 3]);
    }

    #[test]
    fn verify_broadcast_shape() {
        assert_eq!(broadcast_shape(&[2, 3], &[3]).unwrap().as_slice(), &[2, 3]);
        assert_eq!(broadcast_shape(&[2, 1], &[1, 4]).unwrap().as_slice(), &[2, 4]);
        assert_eq!(broadcast_shape(&[5], &[5]).unwrap().as_slice(), &[5]);
        assert!(broadcast_shape(&[2, 3], &[4]).is_err());
    }

    #[test]
    fn verify_uniform_range_and_determinism() {
        let a = Tensor::uniform(&[64], -1.0, 1.0, 42).unwrap();
        let b = Tensor::uniform(&[64], -1.0, 1.0, 42).unwrap();

        assert_eq!(a.to_f32_vec().unwrap(), b.to_f32_vec().unwrap());
        assert!(a.to_f32_vec().unwrap().iter().all(|&x| x >= -1.0 && x < 1.0));
    }

    #[test]
    fn verify_normal_moments() {
        let t = Tensor::normal(&[4096], 0.0, 1.0, 7).unwrap();
        let values = t.to_f32_vec().unwrap();

        let mean: f32 = values.iter().sum::<f32>() / values.len() as f32;
        let var: f32 =
            values.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / values.len() as f32;

        assert!(mean.abs() < 0.1);
        assert!((var - 1.0).abs() < 0.2);
    }

    #[test]
    fn verify_astype_bf16() {
        let t = Tensor::from_f32(&[4], &[1.0, -2.5, 0.0, 100.0]).unwrap();
        let b = t.astype(DataType::Bf16).unwrap();

        assert_eq!(b.dtype(), DataType::Bf16);
        assert_eq!(b.to_f32_vec().unwrap(), vec![1.0, -2.5, 0.0, 100.0]);
    }

    #[test]
    fn verify_astype_integer_clamps() {
        let t = Tensor::from_f32(&[3], &[-5.0, 300.0, 12.4]).unwrap();
        let u = t.astype(DataType::Uint8).unwrap();
        assert_eq!(u.to_f32_vec().unwrap(), vec![0.0, 255.0, 12.0]);
    }
}
