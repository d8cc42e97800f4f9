//! Kernel-side operator schemas.
//!
//! A schema is the positional signature a kernel expects: its argument slots in order,
//! with the output slots trailing. Adapters derive their input count from it.

use std::fmt;

use crate::dispatcher::DispatchError;
use crate::ivalue::{IValueKind, Stack};

/// One positional argument slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentSchema {
    pub name: String,
    pub kind: IValueKind,
}

impl ArgumentSchema {
    pub fn new(name: impl Into<String>, kind: IValueKind) -> Self {
        ArgumentSchema {
            name: name.into(),
            kind,
        }
    }

    pub fn tensor(name: impl Into<String>) -> Self {
        Self::new(name, IValueKind::Tensor)
    }

    pub fn tensor_list(name: impl Into<String>) -> Self {
        Self::new(name, IValueKind::TensorList)
    }

    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, IValueKind::Double)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpSchema {
    name: String,
    arguments: Vec<ArgumentSchema>,
    num_outputs: usize,
}

impl OpSchema {
    /// Builds a schema from leading arguments followed by `outputs` tensor slots.
    pub fn new<I, O, S>(name: impl Into<String>, arguments: I, outputs: O) -> Self
    where
        I: IntoIterator<Item = ArgumentSchema>,
        O: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut arguments: Vec<ArgumentSchema> = arguments.into_iter().collect();
        let before = arguments.len();
        arguments.extend(outputs.into_iter().map(ArgumentSchema::tensor));
        let num_outputs = arguments.len() - before;
        OpSchema {
            name: name.into(),
            arguments,
            num_outputs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All positional slots, outputs included.
    pub fn arguments(&self) -> &[ArgumentSchema] {
        &self.arguments
    }

    pub fn num_arguments(&self) -> usize {
        self.arguments.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    /// Checks that `stack` fills every slot with a value of the declared kind.
    pub fn validate_stack(&self, stack: &Stack) -> Result<(), DispatchError> {
        if stack.len() != self.arguments.len() {
            return Err(DispatchError::StackArity {
                op: self.name.clone(),
                expected: self.arguments.len(),
                found: stack.len(),
            });
        }
        for (index, (slot, value)) in self.arguments.iter().zip(stack).enumerate() {
            if slot.kind != value.kind() {
                return Err(DispatchError::StackKind {
                    op: self.name.clone(),
                    index,
                    argument: slot.name.clone(),
                    expected: slot.kind,
                    found: value.kind(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for OpSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let split = self.arguments.len() - self.num_outputs;
        write!(f, "{}(", self.name)?;
        for (index, arg) in self.arguments[..split].iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", arg.kind, arg.name)?;
        }
        f.write_str(") -> (")?;
        for (index, arg) in self.arguments[split..].iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&arg.name)?;
        }
        f.write_str(")")
    }
}

/// A type naming a kernel schema, used as the first argument of the registration macros.
pub trait OpSchemaDef {
    fn schema() -> OpSchema;
}
