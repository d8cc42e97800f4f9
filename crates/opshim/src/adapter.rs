//! Operator adapter exposing a dispatcher kernel as a legacy operator.
//!
//! The adapter owns no kernel logic and no tensor storage. At construction it checks the
//! operator definition against the kernel schema and parses its static parameters; on
//! every run it lays out a call stack in the kernel's positional convention and invokes
//! the kernel the dispatcher resolved for that stack.
//!
//! Stack layout:
//!
//! * [`InputMode::Fixed`]: `inputs[0..k], params[0..p], outputs[0..m]`
//! * [`InputMode::Variadic`]: `[inputs as one tensor list], params[0..p], outputs[0..m]`
//!
//! Outputs are passed as tensor handles aliasing the workspace blobs; kernels write
//! through them in place and nothing is copied back after the call.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use lru::LruCache;
use thiserror::Error;

use crate::dispatcher::{DispatchError, Dispatcher, OpKernel};
use crate::ivalue::{IValue, IValueKind, Stack, StackSignature};
use crate::operator::{Operator, OperatorBase};
use crate::operator_def::{ArgumentHelper, OperatorDef};
use crate::parameter::{ParameterDef, ParameterSet};
use crate::schema::OpSchema;
use crate::workspace::Workspace;

/// Construction-time failures. An operator that hits one of these is never created.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("operator {op} requires parameter {name}, which has no default")]
    MissingParameter { op: String, name: String },
    #[error(
        "schema {schema} declares {arguments} arguments, fewer than {outputs} outputs plus {parameters} parameters"
    )]
    ArityUnderflow {
        schema: String,
        arguments: usize,
        outputs: usize,
        parameters: usize,
    },
    #[error("operator {op} expects {expected} inputs, definition lists {found}")]
    InputCount {
        op: String,
        expected: usize,
        found: usize,
    },
    #[error("operator {op} expects {expected} outputs, definition lists {found}")]
    OutputCount {
        op: String,
        expected: usize,
        found: usize,
    },
    #[error("schema {schema} cannot take variadic input: needs exactly one leading Tensor[] slot")]
    VariadicSlot { schema: String },
    #[error("schema {schema} slot {index} ({argument}) is {expected}, input mode supplies {found}")]
    InputSlot {
        schema: String,
        index: usize,
        argument: String,
        expected: IValueKind,
        found: IValueKind,
    },
    #[error("schema {schema} slot {index} ({argument}) is {expected}, parameter {parameter} is {found}")]
    ParameterSlot {
        schema: String,
        index: usize,
        argument: String,
        parameter: String,
        expected: IValueKind,
        found: IValueKind,
    },
    #[error("blob {0} does not exist in the workspace")]
    MissingBlob(String),
    #[error("no operator registered under {0}")]
    UnknownOperator(String),
}

/// How operator inputs are laid out on the call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// One stack slot per declared input, in positional order.
    Fixed,
    /// All available inputs collected into a single tensor list slot.
    Variadic,
}

/// Static description of an adapter specialization: kernel schema, input mode and
/// parameter list.
#[derive(Debug, Clone)]
pub struct AdapterSpec {
    pub schema: OpSchema,
    pub mode: InputMode,
    pub parameters: &'static [ParameterDef],
}

impl AdapterSpec {
    pub fn new(schema: OpSchema, mode: InputMode, parameters: &'static [ParameterDef]) -> Self {
        AdapterSpec {
            schema,
            mode,
            parameters,
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.parameters.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.schema.num_outputs()
    }

    /// Stack slots left for inputs: arguments minus outputs minus parameters.
    pub fn num_inputs(&self) -> Result<usize, ConfigError> {
        self.schema
            .num_arguments()
            .checked_sub(self.num_outputs())
            .and_then(|rest| rest.checked_sub(self.num_parameters()))
            .ok_or_else(|| ConfigError::ArityUnderflow {
                schema: self.schema.name().to_string(),
                arguments: self.schema.num_arguments(),
                outputs: self.num_outputs(),
                parameters: self.num_parameters(),
            })
    }

    /// Checks the input slots and parameter kinds against the schema.
    fn validate(&self) -> Result<usize, ConfigError> {
        let num_inputs = self.num_inputs()?;
        let slots = self.schema.arguments();
        let schema = || self.schema.name().to_string();

        let supplied = match self.mode {
            InputMode::Fixed => IValueKind::Tensor,
            InputMode::Variadic => {
                if num_inputs != 1 {
                    return Err(ConfigError::VariadicSlot { schema: schema() });
                }
                IValueKind::TensorList
            }
        };
        for (index, slot) in slots[..num_inputs].iter().enumerate() {
            if slot.kind != supplied {
                return Err(ConfigError::InputSlot {
                    schema: schema(),
                    index,
                    argument: slot.name.clone(),
                    expected: slot.kind,
                    found: supplied,
                });
            }
        }

        for (offset, param) in self.parameters.iter().enumerate() {
            let index = num_inputs + offset;
            let slot = &slots[index];
            let found = param.kind().ivalue_kind();
            if slot.kind != found {
                return Err(ConfigError::ParameterSlot {
                    schema: schema(),
                    index,
                    argument: slot.name.clone(),
                    parameter: param.name().to_string(),
                    expected: slot.kind,
                    found,
                });
            }
        }
        Ok(num_inputs)
    }
}

/// Kernels this adapter has resolved, keyed by stack signature.
struct KernelCache {
    entries: LruCache<StackSignature, OpKernel>,
    resolutions: usize,
}

impl KernelCache {
    fn new(capacity: NonZeroUsize) -> Self {
        KernelCache {
            entries: LruCache::new(capacity),
            resolutions: 0,
        }
    }
}

/// Legacy operator backed by a dispatcher kernel.
pub struct KernelOperatorAdapter {
    base: OperatorBase,
    schema: Arc<OpSchema>,
    mode: InputMode,
    num_inputs: usize,
    parameters: ParameterSet,
    dispatcher: Arc<Dispatcher>,
    kernels: KernelCache,
    verify_cached_kernels: bool,
}

impl KernelOperatorAdapter {
    /// Validates `def` against `spec`, parses parameters and resolves blobs.
    ///
    /// Every configuration problem surfaces here and `run` never re-validates. Only once
    /// all checks pass are output blobs created and the schema registered with the
    /// workspace dispatcher, so a rejected operator leaves both untouched.
    pub fn new(def: &OperatorDef, ws: &mut Workspace, spec: AdapterSpec) -> Result<Self> {
        let num_inputs = spec.validate()?;
        let op = def.display_name();

        if spec.mode == InputMode::Fixed && def.inputs.len() != num_inputs {
            return Err(ConfigError::InputCount {
                op: op.to_string(),
                expected: num_inputs,
                found: def.inputs.len(),
            }
            .into());
        }
        if def.outputs.len() != spec.num_outputs() {
            return Err(ConfigError::OutputCount {
                op: op.to_string(),
                expected: spec.num_outputs(),
                found: def.outputs.len(),
            }
            .into());
        }

        let parameters = ParameterSet::parse(op, spec.parameters, &ArgumentHelper::new(def))?;
        let dispatcher = Arc::clone(ws.dispatcher());
        dispatcher.check_schema(&spec.schema)?;
        let config = *ws.config();
        let capacity = NonZeroUsize::new(config.kernel_cache_capacity)
            .ok_or_else(|| anyhow!("kernel cache capacity must be greater than zero"))?;
        let base = OperatorBase::new(def, ws)?;
        let schema = dispatcher.register_schema(spec.schema)?;

        Ok(KernelOperatorAdapter {
            base,
            schema,
            mode: spec.mode,
            num_inputs,
            parameters,
            dispatcher,
            kernels: KernelCache::new(capacity),
            verify_cached_kernels: config.verify_cached_kernels,
        })
    }

    pub fn schema(&self) -> &OpSchema {
        &self.schema
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Input slots in the kernel schema (1 in variadic mode).
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.schema.num_outputs()
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Number of times this adapter asked the dispatcher to resolve a kernel.
    pub fn resolution_count(&self) -> usize {
        self.kernels.resolutions
    }

    /// Lays out the call stack for the current inputs and outputs.
    pub fn build_stack(&self) -> Stack {
        let inputs = self.base.inputs();
        let mut stack = Stack::with_capacity(
            self.num_inputs + self.parameters.len() + self.base.output_size(),
        );
        match self.mode {
            InputMode::Fixed => stack.extend(inputs.iter().cloned().map(IValue::Tensor)),
            InputMode::Variadic => stack.push(IValue::TensorList(inputs.to_vec())),
        }
        stack.extend(self.parameters.values().iter().cloned());
        stack.extend(self.base.outputs().iter().cloned().map(IValue::Tensor));
        log::trace!(
            "{}: built stack of {} values for {}",
            self.base.def().display_name(),
            stack.len(),
            self.schema.name()
        );
        stack
    }

    fn kernel_for(&mut self, stack: &Stack) -> Result<OpKernel> {
        let signature = StackSignature::of(stack);
        if let Some(cached) = self.kernels.entries.get(&signature).cloned() {
            if self.verify_cached_kernels {
                let resolved = self.dispatcher.lookup(self.schema.name(), stack)?;
                if resolved.id() != cached.id() {
                    return Err(DispatchError::KernelMismatch {
                        op: self.schema.name().to_string(),
                        cached: cached.name().to_string(),
                        resolved: resolved.name().to_string(),
                    }
                    .into());
                }
            }
            return Ok(cached);
        }

        let kernel = self.dispatcher.lookup(self.schema.name(), stack)?;
        self.kernels.resolutions += 1;
        log::debug!(
            "{}: resolved kernel {} for {}",
            self.base.def().display_name(),
            kernel.name(),
            self.schema.name()
        );
        self.kernels.entries.put(signature, kernel.clone());
        Ok(kernel)
    }
}

impl Operator for KernelOperatorAdapter {
    fn def(&self) -> &OperatorDef {
        self.base.def()
    }

    fn run(&mut self) -> Result<bool> {
        let mut stack = self.build_stack();
        let kernel = self.kernel_for(&stack)?;
        kernel.call(&mut stack)?;
        Ok(true)
    }
}

impl fmt::Debug for KernelOperatorAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelOperatorAdapter")
            .field("op", &self.base.def().display_name())
            .field("schema", &self.schema.name())
            .field("mode", &self.mode)
            .field("parameters", &self.parameters)
            .field("resolutions", &self.kernels.resolutions)
            .finish()
    }
}
