//! Runs kernels registered with a typed dispatcher as named operators of a legacy,
//! definition-driven execution engine.
//!
//! The pieces, bottom up:
//!
//! * [`tensor`]: shared tensor handles that operators and kernels alias.
//! * [`ivalue`]: boxed values and the positional [`Stack`] kernels consume.
//! * [`schema`] and [`dispatcher`]: kernel signatures and the name + dtype lookup.
//! * [`operator_def`] and [`parameter`]: operator definitions and their static parameters.
//! * [`workspace`], [`operator`], [`net`]: the legacy engine's blobs, operators and nets.
//! * [`adapter`]: [`KernelOperatorAdapter`], which marshals an operator's inputs,
//!   parameters and outputs onto a stack and calls the dispatcher's kernel.
//! * [`registry`]: name → constructor registry and the `register_kernel_operator*` macros.

pub use linkme;

pub mod adapter;
pub mod config;
pub mod dispatcher;
pub mod ivalue;
pub mod net;
pub mod operator;
pub mod operator_def;
pub mod parameter;
pub mod registry;
pub mod schema;
pub mod tensor;
pub mod workspace;

pub use adapter::{AdapterSpec, ConfigError, InputMode, KernelOperatorAdapter};
pub use config::BridgeConfig;
pub use dispatcher::{DispatchError, DispatchKey, Dispatcher, OpKernel};
pub use ivalue::{IValue, IValueKind, Stack, StackSignature};
pub use net::{NetDef, SimpleNet};
pub use operator::{Operator, OperatorBase};
pub use operator_def::{Argument, ArgumentError, ArgumentHelper, ArgumentValue, OperatorDef};
pub use parameter::{ParamDefault, ParamKind, ParameterDef, ParameterSet};
pub use registry::OperatorRegistry;
pub use schema::{ArgumentSchema, OpSchema, OpSchemaDef};
pub use tensor::{DType, Shape, Tensor, TensorData};
pub use workspace::Workspace;
