//! Boxed dispatch values and the positional call stack handed to kernels.

use std::fmt;

use anyhow::{anyhow, Result};

use crate::tensor::{DType, Tensor};

/// Ordered argument list passed to a kernel invocation.
pub type Stack = Vec<IValue>;

/// A boxed argument value on a [`Stack`].
#[derive(Debug, Clone)]
pub enum IValue {
    Tensor(Tensor),
    TensorList(Vec<Tensor>),
    Double(f64),
    Int(i64),
    Bool(bool),
    String(String),
    IntList(Vec<i64>),
    DoubleList(Vec<f64>),
    None,
}

/// Kind tag of an [`IValue`]; schemas declare argument slots in these terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IValueKind {
    Tensor,
    TensorList,
    Double,
    Int,
    Bool,
    String,
    IntList,
    DoubleList,
    None,
}

impl IValueKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            IValueKind::Tensor => 0,
            IValueKind::TensorList => 1,
            IValueKind::Double => 2,
            IValueKind::Int => 3,
            IValueKind::Bool => 4,
            IValueKind::String => 5,
            IValueKind::IntList => 6,
            IValueKind::DoubleList => 7,
            IValueKind::None => 8,
        }
    }
}

impl fmt::Display for IValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IValueKind::Tensor => "Tensor",
            IValueKind::TensorList => "Tensor[]",
            IValueKind::Double => "float",
            IValueKind::Int => "int",
            IValueKind::Bool => "bool",
            IValueKind::String => "str",
            IValueKind::IntList => "int[]",
            IValueKind::DoubleList => "float[]",
            IValueKind::None => "None",
        };
        f.write_str(name)
    }
}

impl IValue {
    pub fn kind(&self) -> IValueKind {
        match self {
            IValue::Tensor(_) => IValueKind::Tensor,
            IValue::TensorList(_) => IValueKind::TensorList,
            IValue::Double(_) => IValueKind::Double,
            IValue::Int(_) => IValueKind::Int,
            IValue::Bool(_) => IValueKind::Bool,
            IValue::String(_) => IValueKind::String,
            IValue::IntList(_) => IValueKind::IntList,
            IValue::DoubleList(_) => IValueKind::DoubleList,
            IValue::None => IValueKind::None,
        }
    }

    pub fn as_tensor(&self) -> Result<&Tensor> {
        match self {
            IValue::Tensor(tensor) => Ok(tensor),
            other => Err(kind_error(IValueKind::Tensor, other)),
        }
    }

    pub fn as_tensor_list(&self) -> Result<&[Tensor]> {
        match self {
            IValue::TensorList(tensors) => Ok(tensors),
            other => Err(kind_error(IValueKind::TensorList, other)),
        }
    }

    pub fn as_double(&self) -> Result<f64> {
        match self {
            IValue::Double(value) => Ok(*value),
            other => Err(kind_error(IValueKind::Double, other)),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            IValue::Int(value) => Ok(*value),
            other => Err(kind_error(IValueKind::Int, other)),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            IValue::Bool(value) => Ok(*value),
            other => Err(kind_error(IValueKind::Bool, other)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            IValue::String(value) => Ok(value),
            other => Err(kind_error(IValueKind::String, other)),
        }
    }

    pub fn as_int_list(&self) -> Result<&[i64]> {
        match self {
            IValue::IntList(values) => Ok(values),
            other => Err(kind_error(IValueKind::IntList, other)),
        }
    }

    pub fn as_double_list(&self) -> Result<&[f64]> {
        match self {
            IValue::DoubleList(values) => Ok(values),
            other => Err(kind_error(IValueKind::DoubleList, other)),
        }
    }

    /// First tensor reachable from this value, looking inside tensor lists.
    pub(crate) fn first_tensor_dtype(&self) -> Option<DType> {
        match self {
            IValue::Tensor(tensor) => Some(tensor.dtype()),
            IValue::TensorList(tensors) => tensors.first().map(Tensor::dtype),
            _ => None,
        }
    }
}

/// Structural equality; tensors compare by storage identity.
impl PartialEq for IValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (IValue::Tensor(a), IValue::Tensor(b)) => a.same_storage(b),
            (IValue::TensorList(a), IValue::TensorList(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_storage(y))
            }
            (IValue::Double(a), IValue::Double(b)) => a.to_bits() == b.to_bits(),
            (IValue::Int(a), IValue::Int(b)) => a == b,
            (IValue::Bool(a), IValue::Bool(b)) => a == b,
            (IValue::String(a), IValue::String(b)) => a == b,
            (IValue::IntList(a), IValue::IntList(b)) => a == b,
            (IValue::DoubleList(a), IValue::DoubleList(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (IValue::None, IValue::None) => true,
            _ => false,
        }
    }
}

fn kind_error(expected: IValueKind, found: &IValue) -> anyhow::Error {
    anyhow!("expected {} on stack, found {}", expected, found.kind())
}

impl From<Tensor> for IValue {
    fn from(tensor: Tensor) -> Self {
        IValue::Tensor(tensor)
    }
}

impl From<Vec<Tensor>> for IValue {
    fn from(tensors: Vec<Tensor>) -> Self {
        IValue::TensorList(tensors)
    }
}

impl From<f64> for IValue {
    fn from(value: f64) -> Self {
        IValue::Double(value)
    }
}

impl From<i64> for IValue {
    fn from(value: i64) -> Self {
        IValue::Int(value)
    }
}

impl From<bool> for IValue {
    fn from(value: bool) -> Self {
        IValue::Bool(value)
    }
}

impl From<String> for IValue {
    fn from(value: String) -> Self {
        IValue::String(value)
    }
}

/// Pushes each value onto `stack` in order.
pub fn push<I>(stack: &mut Stack, values: I)
where
    I: IntoIterator,
    I::Item: Into<IValue>,
{
    stack.extend(values.into_iter().map(Into::into));
}

/// Returns the stack slot at `index` or an error naming the missing position.
pub fn arg(stack: &Stack, index: usize) -> Result<&IValue> {
    stack
        .get(index)
        .ok_or_else(|| anyhow!("stack has {} values, no argument at {}", stack.len(), index))
}

/// Stable digest of a stack's static shape.
///
/// Each slot contributes its kind and tensors add their dtype. A tensor list adds the
/// dtype of its first element (the one [`DispatchKey`](crate::dispatcher::DispatchKey)
/// reads) followed by the sorted set of element dtypes. List length is left out so
/// variadic invocations of any arity share a signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StackSignature([u8; 16]);

impl StackSignature {
    pub fn of(stack: &Stack) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"opshim:stack-signature:v1");
        hasher.update(&(stack.len() as u64).to_le_bytes());
        for value in stack {
            hasher.update(&[value.kind().tag()]);
            match value {
                IValue::Tensor(tensor) => {
                    hasher.update(&[tensor.dtype().tag()]);
                }
                IValue::TensorList(tensors) => {
                    let leading = tensors.first().map_or(u8::MAX, |t| t.dtype().tag());
                    let mut dtypes: Vec<u8> = tensors.iter().map(|t| t.dtype().tag()).collect();
                    dtypes.sort_unstable();
                    dtypes.dedup();
                    hasher.update(&[leading, dtypes.len() as u8]);
                    hasher.update(&dtypes);
                }
                _ => {}
            }
        }
        let hash = hasher.finalize();
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&hash.as_bytes()[..16]);
        StackSignature(raw)
    }
}
