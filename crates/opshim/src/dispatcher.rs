//! Kernel dispatcher: maps an operator name and a call stack to one registered kernel.
//!
//! Kernels are registered per operator schema and keyed by the dtype of the first tensor
//! on the stack. A catch-all kernel, when present, answers for any key without a
//! dedicated entry. Crates can contribute kernels to every dispatcher built with
//! [`Dispatcher::with_registered_kernels`] (including the global one) by adding a
//! registrar to [`KERNEL_REGISTRARS`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use anyhow::{anyhow, Result};
use thiserror::Error;

use crate::ivalue::{IValueKind, Stack};
use crate::schema::OpSchema;
use crate::tensor::DType;

/// Registration hooks run once for every dispatcher built with
/// [`Dispatcher::with_registered_kernels`].
#[linkme::distributed_slice]
pub static KERNEL_REGISTRARS: [fn(&Dispatcher) -> Result<()>] = [..];

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("operator {0} has no registered schema")]
    UnknownOperator(String),
    #[error("schema for {op} already registered with a different signature: {existing}")]
    SchemaConflict { op: String, existing: String },
    #[error("{op} expects {expected} stack values, got {found}")]
    StackArity {
        op: String,
        expected: usize,
        found: usize,
    },
    #[error("{op} argument {index} ({argument}) expects {expected}, got {found}")]
    StackKind {
        op: String,
        index: usize,
        argument: String,
        expected: IValueKind,
        found: IValueKind,
    },
    #[error("no kernel registered for {op} with dispatch key {key}")]
    NoKernel { op: String, key: DispatchKey },
    #[error("cached kernel {cached} for {op} no longer matches dispatcher choice {resolved}")]
    KernelMismatch {
        op: String,
        cached: String,
        resolved: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchKey {
    DType(DType),
    CatchAll,
}

impl DispatchKey {
    /// Key for a stack: dtype of the first tensor, searching inside tensor lists.
    pub fn of(stack: &Stack) -> Self {
        stack
            .iter()
            .find_map(|value| value.first_tensor_dtype())
            .map(DispatchKey::DType)
            .unwrap_or(DispatchKey::CatchAll)
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchKey::DType(dtype) => write!(f, "{dtype}"),
            DispatchKey::CatchAll => f.write_str("catch-all"),
        }
    }
}

/// Kernel body: reads its arguments from the stack and writes outputs through tensor handles.
pub type KernelFn = dyn Fn(&mut Stack) -> Result<()> + Send + Sync;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KernelId(u64);

/// Resolved kernel handle. Cheap to clone.
#[derive(Clone)]
pub struct OpKernel {
    id: KernelId,
    name: Arc<str>,
    func: Arc<KernelFn>,
}

impl OpKernel {
    pub fn id(&self) -> KernelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, stack: &mut Stack) -> Result<()> {
        (self.func)(stack)
    }
}

impl fmt::Debug for OpKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpKernel")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

struct OperatorEntry {
    schema: Arc<OpSchema>,
    kernels: HashMap<DispatchKey, OpKernel>,
}

pub struct Dispatcher {
    operators: RwLock<HashMap<String, OperatorEntry>>,
    next_kernel_id: AtomicU64,
}

static GLOBAL_DISPATCHER: OnceLock<Arc<Dispatcher>> = OnceLock::new();

impl Dispatcher {
    /// Creates an empty dispatcher with no schemas or kernels.
    pub fn new() -> Self {
        Dispatcher {
            operators: RwLock::new(HashMap::new()),
            next_kernel_id: AtomicU64::new(0),
        }
    }

    /// Creates a dispatcher populated by every linked [`KERNEL_REGISTRARS`] entry.
    ///
    /// Fails on the first registrar error. [`Dispatcher::global`] runs the same
    /// registrars but tolerates failures.
    pub fn with_registered_kernels() -> Result<Self> {
        let dispatcher = Dispatcher::new();
        dispatcher.run_registrars(&KERNEL_REGISTRARS, true)?;
        Ok(dispatcher)
    }

    /// Process-wide dispatcher, populated from the linked registrars on first use.
    ///
    /// Unlike [`Dispatcher::with_registered_kernels`] this cannot fail: a registrar that
    /// errors is logged at `warn` and skipped, and its operators stay unregistered while
    /// every other registrar still runs.
    pub fn global() -> Arc<Dispatcher> {
        Arc::clone(GLOBAL_DISPATCHER.get_or_init(|| {
            let dispatcher = Dispatcher::new();
            if let Err(err) = dispatcher.run_registrars(&KERNEL_REGISTRARS, false) {
                log::warn!("{err:#}");
            }
            Arc::new(dispatcher)
        }))
    }

    /// Runs `registrars` in order. With `fail_fast` the first error aborts; otherwise
    /// every registrar runs and the failures are reported together.
    fn run_registrars(
        &self,
        registrars: &[fn(&Dispatcher) -> Result<()>],
        fail_fast: bool,
    ) -> Result<()> {
        let mut failures = Vec::new();
        for (index, registrar) in registrars.iter().enumerate() {
            if let Err(err) = registrar(self) {
                let err = err.context(format!("kernel registrar #{index} failed"));
                if fail_fast {
                    return Err(err);
                }
                failures.push(format!("{err:#}"));
            }
        }
        log::trace!(
            "dispatcher populated from {} kernel registrars ({} failed)",
            registrars.len(),
            failures.len()
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(failures.join("; ")))
        }
    }

    /// Fails with [`DispatchError::SchemaConflict`] when `schema` could not be registered
    /// because a different schema already owns its name. Registers nothing.
    pub fn check_schema(&self, schema: &OpSchema) -> Result<()> {
        let operators = self.operators.read().unwrap();
        match operators.get(schema.name()) {
            Some(entry) if *entry.schema != *schema => Err(conflict(schema, &entry.schema)),
            _ => Ok(()),
        }
    }

    /// Registers `schema`. Registering an identical schema twice is a no-op.
    pub fn register_schema(&self, schema: OpSchema) -> Result<Arc<OpSchema>> {
        let mut operators = self.operators.write().unwrap();
        if let Some(entry) = operators.get(schema.name()) {
            if *entry.schema != schema {
                return Err(conflict(&schema, &entry.schema));
            }
            return Ok(Arc::clone(&entry.schema));
        }
        let schema = Arc::new(schema);
        operators.insert(
            schema.name().to_string(),
            OperatorEntry {
                schema: Arc::clone(&schema),
                kernels: HashMap::new(),
            },
        );
        Ok(schema)
    }

    pub fn schema(&self, op: &str) -> Option<Arc<OpSchema>> {
        let operators = self.operators.read().unwrap();
        operators.get(op).map(|entry| Arc::clone(&entry.schema))
    }

    pub fn has_operator(&self, op: &str) -> bool {
        self.operators.read().unwrap().contains_key(op)
    }

    /// Registers a kernel for stacks whose first tensor has `dtype`.
    ///
    /// Replaces any kernel previously registered for the same operator and dtype.
    pub fn register_kernel<F>(
        &self,
        op: &str,
        dtype: DType,
        name: impl Into<Arc<str>>,
        func: F,
    ) -> Result<KernelId>
    where
        F: Fn(&mut Stack) -> Result<()> + Send + Sync + 'static,
    {
        self.insert_kernel(op, DispatchKey::DType(dtype), name.into(), Arc::new(func))
    }

    /// Registers a kernel used when no dtype-specific kernel matches.
    pub fn register_catch_all<F>(
        &self,
        op: &str,
        name: impl Into<Arc<str>>,
        func: F,
    ) -> Result<KernelId>
    where
        F: Fn(&mut Stack) -> Result<()> + Send + Sync + 'static,
    {
        self.insert_kernel(op, DispatchKey::CatchAll, name.into(), Arc::new(func))
    }

    fn insert_kernel(
        &self,
        op: &str,
        key: DispatchKey,
        name: Arc<str>,
        func: Arc<KernelFn>,
    ) -> Result<KernelId> {
        let mut operators = self.operators.write().unwrap();
        let entry = operators
            .get_mut(op)
            .ok_or_else(|| DispatchError::UnknownOperator(op.to_string()))?;
        let id = KernelId(self.next_kernel_id.fetch_add(1, Ordering::Relaxed));
        entry.kernels.insert(key, OpKernel { id, name, func });
        Ok(id)
    }

    /// Resolves the kernel for `stack`: validates it against the schema, then picks the
    /// kernel for the stack's dispatch key, falling back to the catch-all kernel.
    pub fn lookup(&self, op: &str, stack: &Stack) -> Result<OpKernel> {
        let operators = self.operators.read().unwrap();
        let entry = operators
            .get(op)
            .ok_or_else(|| DispatchError::UnknownOperator(op.to_string()))?;
        entry.schema.validate_stack(stack)?;
        let key = DispatchKey::of(stack);
        entry
            .kernels
            .get(&key)
            .or_else(|| entry.kernels.get(&DispatchKey::CatchAll))
            .cloned()
            .ok_or_else(|| {
                DispatchError::NoKernel {
                    op: op.to_string(),
                    key,
                }
                .into()
            })
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn conflict(schema: &OpSchema, existing: &OpSchema) -> anyhow::Error {
    DispatchError::SchemaConflict {
        op: schema.name().to_string(),
        existing: existing.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivalue::IValue;
    use crate::schema::ArgumentSchema;
    use crate::tensor::Tensor;

    fn relu_dispatcher() -> Dispatcher {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register_schema(OpSchema::new(
                "Relu",
                [ArgumentSchema::tensor("x")],
                ["out"],
            ))
            .unwrap();
        dispatcher
    }

    fn stack_of(dtype: DType) -> Stack {
        let x = match dtype {
            DType::F32 => Tensor::zeros([2]),
            DType::I32 => Tensor::from_i32([2], vec![0, 0]).unwrap(),
        };
        vec![IValue::Tensor(x), IValue::Tensor(Tensor::empty())]
    }

    #[test]
    fn lookup_prefers_dtype_kernel_over_catch_all() {
        let dispatcher = relu_dispatcher();
        let f32_id = dispatcher
            .register_kernel("Relu", DType::F32, "relu_f32", |_| Ok(()))
            .unwrap();
        let any_id = dispatcher
            .register_catch_all("Relu", "relu_any", |_| Ok(()))
            .unwrap();

        assert_eq!(dispatcher.lookup("Relu", &stack_of(DType::F32)).unwrap().id(), f32_id);
        assert_eq!(dispatcher.lookup("Relu", &stack_of(DType::I32)).unwrap().id(), any_id);
    }

    #[test]
    fn lookup_without_matching_kernel_fails() {
        let dispatcher = relu_dispatcher();
        dispatcher
            .register_kernel("Relu", DType::F32, "relu_f32", |_| Ok(()))
            .unwrap();
        let err = dispatcher.lookup("Relu", &stack_of(DType::I32)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DispatchError>(),
            Some(DispatchError::NoKernel {
                key: DispatchKey::DType(DType::I32),
                ..
            })
        ));
    }

    #[test]
    fn kernels_require_a_schema() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .register_kernel("Missing", DType::F32, "k", |_| Ok(()))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DispatchError>(),
            Some(DispatchError::UnknownOperator(name)) if name == "Missing"
        ));
    }

    #[test]
    fn conflicting_schema_is_rejected() {
        let dispatcher = relu_dispatcher();
        dispatcher
            .register_schema(OpSchema::new("Relu", [ArgumentSchema::tensor("x")], ["out"]))
            .expect("identical schema is accepted");
        let err = dispatcher
            .register_schema(OpSchema::new("Relu", [ArgumentSchema::tensor_list("xs")], ["out"]))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DispatchError>(),
            Some(DispatchError::SchemaConflict { .. })
        ));
    }

    #[test]
    fn reregistering_replaces_kernel_with_new_id() {
        let dispatcher = relu_dispatcher();
        let first = dispatcher
            .register_kernel("Relu", DType::F32, "v1", |_| Ok(()))
            .unwrap();
        let second = dispatcher
            .register_kernel("Relu", DType::F32, "v2", |_| Ok(()))
            .unwrap();
        assert_ne!(first, second);
        let kernel = dispatcher.lookup("Relu", &stack_of(DType::F32)).unwrap();
        assert_eq!(kernel.name(), "v2");
    }

    #[test]
    fn empty_stack_keys_to_catch_all() {
        assert_eq!(DispatchKey::of(&Vec::new()), DispatchKey::CatchAll);
        let list = vec![IValue::TensorList(Vec::new()), IValue::Double(1.0)];
        assert_eq!(DispatchKey::of(&list), DispatchKey::CatchAll);
    }

    fn register_relu(dispatcher: &Dispatcher) -> Result<()> {
        let schema = OpSchema::new("Relu", [ArgumentSchema::tensor("x")], ["out"]);
        dispatcher.register_schema(schema)?;
        Ok(())
    }

    fn register_broken(dispatcher: &Dispatcher) -> Result<()> {
        dispatcher.register_kernel("Missing", DType::F32, "k", |_| Ok(()))?;
        Ok(())
    }

    fn register_sum(dispatcher: &Dispatcher) -> Result<()> {
        dispatcher.register_schema(OpSchema::new(
            "Sum",
            [ArgumentSchema::tensor_list("xs")],
            ["out"],
        ))?;
        Ok(())
    }

    const REGISTRARS: [fn(&Dispatcher) -> Result<()>; 3] =
        [register_relu, register_broken, register_sum];

    #[test]
    fn fail_fast_registration_stops_at_first_error() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher.run_registrars(&REGISTRARS, true).unwrap_err();
        assert!(format!("{err:#}").contains("registrar #1"), "{err:#}");
        assert!(dispatcher.has_operator("Relu"));
        assert!(!dispatcher.has_operator("Sum"));
    }

    #[test]
    fn tolerant_registration_runs_every_registrar() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher.run_registrars(&REGISTRARS, false).unwrap_err();
        assert!(err.to_string().contains("registrar #1"), "{err}");
        assert!(dispatcher.has_operator("Relu"));
        assert!(dispatcher.has_operator("Sum"));
    }
}
