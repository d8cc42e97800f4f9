//! Reference CPU kernels.
//!
//! Every kernel reads its operands off the stack, computes into a fresh buffer and
//! writes the result through the output handle with [`Tensor::assign`]. Operands are
//! copied out before the write so a kernel whose output aliases an input still works.

use anyhow::{bail, ensure, Result};
use opshim::ivalue::arg;
use opshim::{DType, Dispatcher, Shape, Stack, Tensor, TensorData};

use crate::schemas;

/// Registers the reference schemas and kernels with `dispatcher`.
///
/// Also runs for every dispatcher built with `Dispatcher::with_registered_kernels`,
/// including the global one.
pub fn register_cpu_kernels(dispatcher: &Dispatcher) -> Result<()> {
    for schema in schemas::all() {
        dispatcher.register_schema(schema)?;
    }
    dispatcher.register_kernel(schemas::ADD, DType::F32, "add_f32", op_add)?;
    dispatcher.register_kernel(schemas::ADD, DType::I32, "add_i32", op_add)?;
    dispatcher.register_kernel(schemas::RELU, DType::F32, "relu_f32", op_relu)?;
    dispatcher.register_kernel(schemas::SCALE, DType::F32, "scale_f32", op_scale)?;
    dispatcher.register_kernel(schemas::SUM, DType::F32, "sum_f32", op_sum)?;
    dispatcher.register_kernel(
        schemas::SCALED_SUM,
        DType::F32,
        "scaled_sum_f32",
        op_scaled_sum,
    )?;
    log::trace!("registered reference cpu kernels");
    Ok(())
}

fn tensor_at(stack: &Stack, index: usize) -> Result<&Tensor> {
    arg(stack, index)?.as_tensor()
}

fn expect_same_shape(op: &str, lhs: &Shape, rhs: &Shape) -> Result<()> {
    ensure!(
        lhs == rhs,
        "{op}: shape mismatch {:?} vs {:?}",
        lhs.dims(),
        rhs.dims()
    );
    Ok(())
}

fn op_add(stack: &mut Stack) -> Result<()> {
    let lhs = tensor_at(stack, 0)?;
    let rhs = tensor_at(stack, 1)?;
    let shape = lhs.shape();
    expect_same_shape("add", &shape, &rhs.shape())?;

    let result = match (lhs.data(), rhs.data()) {
        (TensorData::F32(a), TensorData::F32(b)) => {
            TensorData::F32(a.iter().zip(&b).map(|(x, y)| x + y).collect())
        }
        (TensorData::I32(a), TensorData::I32(b)) => {
            TensorData::I32(a.iter().zip(&b).map(|(x, y)| x.wrapping_add(*y)).collect())
        }
        (a, b) => bail!("add: dtype mismatch {} vs {}", a.dtype(), b.dtype()),
    };
    tensor_at(stack, 2)?.assign(shape, result)
}

fn op_relu(stack: &mut Stack) -> Result<()> {
    let input = tensor_at(stack, 0)?;
    let shape = input.shape();
    let values = input.to_f32_vec()?;
    let result: Vec<f32> = values.iter().map(|&x| x.max(0.0)).collect();
    tensor_at(stack, 1)?.assign(shape, TensorData::F32(result))
}

fn op_scale(stack: &mut Stack) -> Result<()> {
    let input = tensor_at(stack, 0)?;
    let alpha = arg(stack, 1)?.as_double()? as f32;
    let shape = input.shape();
    let result: Vec<f32> = input.to_f32_vec()?.iter().map(|&x| x * alpha).collect();
    tensor_at(stack, 2)?.assign(shape, TensorData::F32(result))
}

fn op_sum(stack: &mut Stack) -> Result<()> {
    let (shape, result) = accumulate("sum", arg(stack, 0)?.as_tensor_list()?)?;
    tensor_at(stack, 1)?.assign(shape, TensorData::F32(result))
}

fn op_scaled_sum(stack: &mut Stack) -> Result<()> {
    let (shape, mut result) = accumulate("scaled_sum", arg(stack, 0)?.as_tensor_list()?)?;
    let scale = arg(stack, 1)?.as_double()? as f32;
    for value in &mut result {
        *value *= scale;
    }
    tensor_at(stack, 2)?.assign(shape, TensorData::F32(result))
}

/// Elementwise sum of same-shape `f32` tensors.
fn accumulate(op: &str, inputs: &[Tensor]) -> Result<(Shape, Vec<f32>)> {
    let Some((first, rest)) = inputs.split_first() else {
        bail!("{op}: expects at least one input");
    };
    let shape = first.shape();
    let mut acc = first.to_f32_vec()?;
    for input in rest {
        expect_same_shape(op, &shape, &input.shape())?;
        for (total, value) in acc.iter_mut().zip(input.to_f32_vec()?) {
            *total += value;
        }
    }
    Ok((shape, acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opshim::IValue;

    fn f32_tensor(values: &[f32]) -> Tensor {
        Tensor::from_vec([values.len()], values.to_vec()).unwrap()
    }

    #[test]
    fn add_handles_aliased_output() {
        let a = f32_tensor(&[1.0, 2.0]);
        let mut stack = vec![
            IValue::Tensor(a.clone()),
            IValue::Tensor(a.clone()),
            IValue::Tensor(a.clone()),
        ];
        op_add(&mut stack).unwrap();
        assert_eq!(a.to_f32_vec().unwrap(), vec![2.0, 4.0]);
    }

    #[test]
    fn add_rejects_mixed_dtypes() {
        let mut stack = vec![
            IValue::Tensor(f32_tensor(&[1.0])),
            IValue::Tensor(Tensor::from_i32([1], vec![1]).unwrap()),
            IValue::Tensor(Tensor::empty()),
        ];
        let err = op_add(&mut stack).unwrap_err();
        assert!(err.to_string().contains("dtype mismatch"), "{err}");
    }

    #[test]
    fn accumulate_requires_matching_shapes() {
        let err = accumulate("sum", &[f32_tensor(&[1.0]), f32_tensor(&[1.0, 2.0])]).unwrap_err();
        assert!(err.to_string().contains("shape mismatch"), "{err}");
    }

    #[test]
    fn relu_clamps_negatives() {
        let out = Tensor::empty();
        let mut stack = vec![
            IValue::Tensor(f32_tensor(&[-1.0, 0.5])),
            IValue::Tensor(out.clone()),
        ];
        op_relu(&mut stack).unwrap();
        assert_eq!(out.to_f32_vec().unwrap(), vec![0.0, 0.5]);
    }
}
