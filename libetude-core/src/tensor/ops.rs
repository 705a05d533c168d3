// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Element-wise, reduction, and linear-algebra operations over `f32` tensors.
//!
//! Operations never partially apply: every input is validated and gathered before the first byte
//! of output is written. Output-producing variants allocate the result from the first operand's
//! manager; `*_assign` variants write back into their first operand and are rejected when the
//! broadcast result would not fit it.

use crate::errors::{internal_error, invalid_argument_error, unsupported_error, Result};
use crate::kernel::{self, KernelFn};

use super::{broadcast_shape, DataType, Shape, Tensor};

fn require_f32(tensor: &Tensor) -> Result<()> {
    if tensor.dtype() != DataType::F32 {
        return unsupported_error("operation requires f32 tensors");
    }
    Ok(())
}

fn alloc_like(reference: &Tensor, shape: &[usize]) -> Result<Tensor> {
    match reference.manager() {
        Some(manager) => Tensor::new_in(manager, DataType::F32, shape),
        None => Tensor::new(DataType::F32, shape),
    }
}

fn binary_kernel(name: &'static str, len: usize) -> Result<fn(&[f32], &[f32], &mut [f32])> {
    match kernel::global().select(name, len).map(|desc| desc.func) {
        Some(KernelFn::BinaryF32(func)) => Ok(func),
        _ => internal_error("no kernel registered for binary operation"),
    }
}

fn scalar_kernel(name: &'static str, len: usize) -> Result<fn(&[f32], f32, &mut [f32])> {
    match kernel::global().select(name, len).map(|desc| desc.func) {
        Some(KernelFn::ScalarF32(func)) => Ok(func),
        _ => internal_error("no kernel registered for scalar operation"),
    }
}

fn binary_op(name: &'static str, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    require_f32(a)?;
    require_f32(b)?;

    let shape = broadcast_shape(a.shape(), b.shape())?;

    let va = a.read_broadcast_f32(&shape)?;
    let vb = b.read_broadcast_f32(&shape)?;

    let mut out = vec![0.0f32; va.len()];
    binary_kernel(name, out.len())?(&va, &vb, &mut out);

    let result = alloc_like(a, &shape)?;
    result.write_f32_values(&out)?;
    Ok(result)
}

fn binary_op_assign(name: &'static str, a: &Tensor, b: &Tensor) -> Result<()> {
    require_f32(a)?;
    require_f32(b)?;

    let shape = broadcast_shape(a.shape(), b.shape())?;
    if shape.as_slice() != a.shape() {
        return invalid_argument_error("in-place operation would broadcast its destination");
    }

    let va = a.read_f32_values()?;
    let vb = b.read_broadcast_f32(&shape)?;

    let mut out = vec![0.0f32; va.len()];
    binary_kernel(name, out.len())?(&va, &vb, &mut out);

    a.write_f32_values(&out)
}

/// `a + b` with broadcasting.
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    binary_op("vector_add_f32", a, b)
}

/// `a += b`. Rejected when broadcasting would grow `a`.
pub fn add_assign(a: &Tensor, b: &Tensor) -> Result<()> {
    binary_op_assign("vector_add_f32", a, b)
}

/// `a - b` with broadcasting.
pub fn sub(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    binary_op("vector_sub_f32", a, b)
}

/// `a -= b`. Rejected when broadcasting would grow `a`.
pub fn sub_assign(a: &Tensor, b: &Tensor) -> Result<()> {
    binary_op_assign("vector_sub_f32", a, b)
}

/// `a * b` with broadcasting.
pub fn mul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    binary_op("vector_mul_f32", a, b)
}

/// `a *= b`. Rejected when broadcasting would grow `a`.
pub fn mul_assign(a: &Tensor, b: &Tensor) -> Result<()> {
    binary_op_assign("vector_mul_f32", a, b)
}

/// `a / b` with broadcasting. Division by zero yields zero.
pub fn div(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    binary_op("vector_div_f32", a, b)
}

/// `a /= b`. Rejected when broadcasting would grow `a`.
pub fn div_assign(a: &Tensor, b: &Tensor) -> Result<()> {
    binary_op_assign("vector_div_f32", a, b)
}

fn scalar_op(name: &'static str, a: &Tensor, scalar: f32) -> Result<Tensor> {
    require_f32(a)?;

    let va = a.read_f32_values()?;
    let mut out = vec![0.0f32; va.len()];
    scalar_kernel(name, out.len())?(&va, scalar, &mut out);

    let result = alloc_like(a, a.shape())?;
    result.write_f32_values(&out)?;
    Ok(result)
}

fn scalar_op_assign(name: &'static str, a: &Tensor, scalar: f32) -> Result<()> {
    require_f32(a)?;

    let va = a.read_f32_values()?;
    let mut out = vec![0.0f32; va.len()];
    scalar_kernel(name, out.len())?(&va, scalar, &mut out);

    a.write_f32_values(&out)
}

/// `a + s` element-wise.
pub fn add_scalar(a: &Tensor, scalar: f32) -> Result<Tensor> {
    scalar_op("vector_add_scalar_f32", a, scalar)
}

/// `a += s` element-wise, in place.
pub fn add_scalar_assign(a: &Tensor, scalar: f32) -> Result<()> {
    scalar_op_assign("vector_add_scalar_f32", a, scalar)
}

/// `a * s` element-wise.
pub fn mul_scalar(a: &Tensor, scalar: f32) -> Result<Tensor> {
    scalar_op("vector_mul_scalar_f32", a, scalar)
}

/// `a *= s` element-wise, in place.
pub fn mul_scalar_assign(a: &Tensor, scalar: f32) -> Result<()> {
    scalar_op_assign("vector_mul_scalar_f32", a, scalar)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Reduce {
    Sum,
    Mean,
    Max,
    Min,
}

fn reduce(op: Reduce, a: &Tensor, axis: Option<usize>, keepdims: bool) -> Result<Tensor> {
    require_f32(a)?;

    let values = a.read_f32_values()?;

    let (axis, full) = match axis {
        Some(axis) => {
            if axis >= a.ndim() {
                return invalid_argument_error("reduction axis out of range");
            }
            (axis, false)
        }
        None => (0, true),
    };

    let (outer, len, inner, mut out_shape) = if full {
        let mut shape = Shape::new();
        if keepdims {
            shape.extend(std::iter::repeat(1).take(a.ndim()));
        }
        else {
            shape.push(1);
        }
        (1usize, a.size(), 1usize, shape)
    }
    else {
        let outer: usize = a.shape()[..axis].iter().product();
        let inner: usize = a.shape()[axis + 1..].iter().product();

        let mut shape = Shape::from_slice(a.shape());
        if keepdims {
            shape[axis] = 1;
        }
        else if shape.len() > 1 {
            shape.remove(axis);
        }
        else {
            shape[0] = 1;
        }

        (outer, a.shape()[axis], inner, shape)
    };

    if out_shape.is_empty() {
        out_shape.push(1);
    }

    let mut out = vec![0.0f32; outer * inner];

    for o in 0..outer {
        for i in 0..inner {
            let mut acc = match op {
                Reduce::Sum | Reduce::Mean => 0.0f32,
                Reduce::Max => f32::NEG_INFINITY,
                Reduce::Min => f32::INFINITY,
            };

            for j in 0..len {
                let value = values[o * len * inner + j * inner + i];
                acc = match op {
                    Reduce::Sum | Reduce::Mean => acc + value,
                    Reduce::Max => acc.max(value),
                    Reduce::Min => acc.min(value),
                };
            }

            if op == Reduce::Mean {
                acc /= len as f32;
            }

            out[o * inner + i] = acc;
        }
    }

    let result = alloc_like(a, &out_shape)?;
    result.write_f32_values(&out)?;
    Ok(result)
}

/// Sums over `axis`, or over every element when `axis` is `None`.
pub fn sum(a: &Tensor, axis: Option<usize>, keepdims: bool) -> Result<Tensor> {
    reduce(Reduce::Sum, a, axis, keepdims)
}

/// Arithmetic mean over `axis`, or over every element when `axis` is `None`.
pub fn mean(a: &Tensor, axis: Option<usize>, keepdims: bool) -> Result<Tensor> {
    reduce(Reduce::Mean, a, axis, keepdims)
}

/// Maximum over `axis`, or over every element when `axis` is `None`.
pub fn max(a: &Tensor, axis: Option<usize>, keepdims: bool) -> Result<Tensor> {
    reduce(Reduce::Max, a, axis, keepdims)
}

/// Minimum over `axis`, or over every element when `axis` is `None`.
pub fn min(a: &Tensor, axis: Option<usize>, keepdims: bool) -> Result<Tensor> {
    reduce(Reduce::Min, a, axis, keepdims)
}

/// Two-dimensional matrix multiply: `A[m,k] * B[k,n] = C[m,n]`.
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    require_f32(a)?;
    require_f32(b)?;

    if a.ndim() != 2 || b.ndim() != 2 {
        return invalid_argument_error("matmul operands must be two-dimensional");
    }

    let (m, k) = (a.shape()[0], a.shape()[1]);
    let (k2, n) = (b.shape()[0], b.shape()[1]);

    if k != k2 {
        return invalid_argument_error("matmul inner dimensions disagree");
    }

    let va = a.read_f32_values()?;
    let vb = b.read_f32_values()?;
    let mut out = vec![0.0f32; m * n];

    match kernel::global().select("matmul_f32", m * k * n).map(|desc| desc.func) {
        Some(KernelFn::MatMulF32(func)) => func(&va, &vb, &mut out, m, k, n),
        _ => return internal_error("no kernel registered for matmul"),
    }

    let result = alloc_like(a, &[m, n])?;
    result.write_f32_values(&out)?;
    Ok(result)
}

/// Softmax along `axis` with the axis maximum subtracted before exponentiation.
pub fn softmax(a: &Tensor, axis: usize) -> Result<Tensor> {
    require_f32(a)?;

    if axis >= a.ndim() {
        return invalid_argument_error("softmax axis out of range");
    }

    let mut values = a.read_f32_values()?;

    let len = a.shape()[axis];
    let outer: usize = a.shape()[..axis].iter().product();
    let inner: usize = a.shape()[axis + 1..].iter().product();

    let func = match kernel::global().select("softmax_f32", len).map(|desc| desc.func) {
        Some(KernelFn::SoftmaxF32(func)) => func,
        _ => return internal_error("no kernel registered for softmax"),
    };

    let mut row = vec![0.0f32; len];
    for o in 0..outer {
        for i in 0..inner {
            for j in 0..len {
                row[j] = values[o * len * inner + j * inner + i];
            }

            func(&mut row);

            for j in 0..len {
                values[o * len * inner + j * inner + i] = row[j];
            }
        }
    }

    let result = alloc_like(a, a.shape())?;
    result.write_f32_values(&values)?;
    Ok(result)
}

/// Concatenates tensors along `axis`. Every operand must share the same shape outside `axis`.
pub fn concat(tensors: &[&Tensor], axis: usize) -> Result<Tensor> {
    let first = match tensors.first() {
        Some(first) => *first,
        None => return invalid_argument_error("concat requires at least one tensor"),
    };

    require_f32(first)?;
    if axis >= first.ndim() {
        return invalid_argument_error("concat axis out of range");
    }

    let mut axis_total = 0;
    for tensor in tensors {
        require_f32(tensor)?;
        if tensor.ndim() != first.ndim() {
            return invalid_argument_error("concat operands disagree on rank");
        }
        for dim in 0..first.ndim() {
            if dim != axis && tensor.shape()[dim] != first.shape()[dim] {
                return invalid_argument_error("concat operands disagree outside the axis");
            }
        }
        axis_total += tensor.shape()[axis];
    }

    let mut out_shape = Shape::from_slice(first.shape());
    out_shape[axis] = axis_total;

    let outer: usize = first.shape()[..axis].iter().product();
    let inner: usize = first.shape()[axis + 1..].iter().product();

    let gathered: Vec<Vec<f32>> =
        tensors.iter().map(|t| t.read_f32_values()).collect::<Result<_>>()?;

    let mut out = Vec::with_capacity(axis_total * outer * inner);
    for o in 0..outer {
        for (t, values) in tensors.iter().zip(&gathered) {
            let span = t.shape()[axis] * inner;
            out.extend_from_slice(&values[o * span..(o + 1) * span]);
        }
    }

    let result = alloc_like(first, &out_shape)?;
    result.write_f32_values(&out)?;
    Ok(result)
}
