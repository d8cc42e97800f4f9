//! Host-backed tensor handle with shared, interior-mutable storage.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, ensure, Result};

use super::{dtype::DType, shape::Shape};

/// Typed element buffer backing a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I32(Vec<i32>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::I32(_) => DType::I32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(values) => values.len(),
            TensorData::I32(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Storage {
    shape: Shape,
    data: TensorData,
}

/// Handle onto shared tensor storage.
///
/// Cloning the handle aliases the same storage; use [`Tensor::deep_clone`] for a copy.
/// Kernels receive handles for their output slots and write through them with
/// [`Tensor::assign`], so results are visible to every holder of the handle.
#[derive(Clone)]
pub struct Tensor {
    storage: Arc<RwLock<Storage>>,
}

impl Tensor {
    fn from_parts(shape: Shape, data: TensorData) -> Self {
        Tensor {
            storage: Arc::new(RwLock::new(Storage { shape, data })),
        }
    }

    /// Constructs an `F32` tensor from raw values, validating the length against the shape.
    pub fn from_vec(shape: impl Into<Shape>, data: Vec<f32>) -> Result<Self> {
        let shape = shape.into();
        check_len(&shape, data.len())?;
        Ok(Self::from_parts(shape, TensorData::F32(data)))
    }

    /// Constructs an `I32` tensor, ensuring the payload matches the expected element count.
    pub fn from_i32(shape: impl Into<Shape>, data: Vec<i32>) -> Result<Self> {
        let shape = shape.into();
        check_len(&shape, data.len())?;
        Ok(Self::from_parts(shape, TensorData::I32(data)))
    }

    /// Returns a zero-initialized `F32` tensor of the requested shape.
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let len = shape.num_elements();
        Self::from_parts(shape, TensorData::F32(vec![0.0; len]))
    }

    /// Rank-0 `F32` tensor.
    pub fn scalar(value: f32) -> Self {
        Self::from_parts(Shape::scalar(), TensorData::F32(vec![value]))
    }

    /// Zero-element `F32` tensor, used for freshly created output blobs.
    pub fn empty() -> Self {
        Self::from_parts(Shape::new([0]), TensorData::F32(Vec::new()))
    }

    pub fn shape(&self) -> Shape {
        self.read().shape.clone()
    }

    pub fn dtype(&self) -> DType {
        self.read().data.dtype()
    }

    pub fn num_elements(&self) -> usize {
        self.read().data.len()
    }

    /// Snapshot of the element buffer.
    pub fn data(&self) -> TensorData {
        self.read().data.clone()
    }

    /// Copies the values out as `f32`, failing for any other dtype.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match &self.read().data {
            TensorData::F32(values) => Ok(values.clone()),
            other => bail!("expected f32 tensor, found {}", other.dtype()),
        }
    }

    /// Copies the values out as `i32`, failing for any other dtype.
    pub fn to_i32_vec(&self) -> Result<Vec<i32>> {
        match &self.read().data {
            TensorData::I32(values) => Ok(values.clone()),
            other => bail!("expected i32 tensor, found {}", other.dtype()),
        }
    }

    /// Replaces shape and contents in place; every alias of this handle observes the write.
    pub fn assign(&self, shape: impl Into<Shape>, data: TensorData) -> Result<()> {
        let shape = shape.into();
        check_len(&shape, data.len())?;
        let mut storage = self.write();
        storage.shape = shape;
        storage.data = data;
        Ok(())
    }

    /// Returns a new handle owning a copy of the storage.
    pub fn deep_clone(&self) -> Tensor {
        let storage = self.read();
        Self::from_parts(storage.shape.clone(), storage.data.clone())
    }

    /// Whether both handles alias the same storage.
    pub fn same_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    fn read(&self) -> RwLockReadGuard<'_, Storage> {
        self.storage.read().expect("tensor storage lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Storage> {
        self.storage.write().expect("tensor storage lock poisoned")
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = self.read();
        f.debug_struct("Tensor")
            .field("shape", &storage.shape.dims())
            .field("dtype", &storage.data.dtype())
            .finish()
    }
}

fn check_len(shape: &Shape, len: usize) -> Result<()> {
    ensure!(
        len == shape.num_elements(),
        "tensor data length ({}) does not match shape {:?}",
        len,
        shape.dims()
    );
    Ok(())
}
