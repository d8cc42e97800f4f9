//! String-keyed operator registry.
//!
//! Operators are registered by name with a constructor. Crates contribute operators to
//! every registry built with [`OperatorRegistry::with_registered_operators`] (including
//! the global one) through [`OPERATOR_REGISTRARS`]; the `register_kernel_operator*`
//! macros add such registrars for kernel-backed adapters.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use anyhow::Result;

use crate::adapter::{AdapterSpec, ConfigError, KernelOperatorAdapter};
use crate::operator::Operator;
use crate::operator_def::OperatorDef;
use crate::workspace::Workspace;

/// Factory producing an operator instance for a definition.
pub type OperatorConstructor =
    Box<dyn Fn(&OperatorDef, &mut Workspace) -> Result<Box<dyn Operator>> + Send + Sync>;

/// Registration hooks run once for every registry built with
/// [`OperatorRegistry::with_registered_operators`].
#[linkme::distributed_slice]
pub static OPERATOR_REGISTRARS: [fn(&OperatorRegistry)] = [..];

pub struct OperatorRegistry {
    constructors: RwLock<HashMap<String, OperatorConstructor>>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<OperatorRegistry>> = OnceLock::new();

impl OperatorRegistry {
    pub fn new() -> Self {
        OperatorRegistry {
            constructors: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry populated by every linked [`OPERATOR_REGISTRARS`] entry.
    pub fn with_registered_operators() -> Self {
        let registry = OperatorRegistry::new();
        for registrar in OPERATOR_REGISTRARS {
            registrar(&registry);
        }
        log::trace!(
            "operator registry populated with {} operators",
            registry.constructors.read().unwrap().len()
        );
        registry
    }

    pub fn global() -> Arc<OperatorRegistry> {
        Arc::clone(
            GLOBAL_REGISTRY.get_or_init(|| Arc::new(OperatorRegistry::with_registered_operators())),
        )
    }

    /// Registers `constructor` under `name`, replacing any previous registration.
    pub fn register<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&OperatorDef, &mut Workspace) -> Result<Box<dyn Operator>> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut constructors = self.constructors.write().unwrap();
        if constructors.insert(name.clone(), Box::new(constructor)).is_some() {
            log::debug!("operator {name} re-registered");
        }
    }

    /// Registers a kernel-backed adapter; `spec` is called for each constructed instance.
    pub fn register_adapter<S>(&self, name: impl Into<String>, spec: S)
    where
        S: Fn() -> AdapterSpec + Send + Sync + 'static,
    {
        self.register(name, move |def, ws| {
            let adapter = KernelOperatorAdapter::new(def, ws, spec())?;
            Ok(Box::new(adapter) as Box<dyn Operator>)
        });
    }

    /// Constructs the operator registered under `def.op_type`.
    pub fn create(&self, def: &OperatorDef, ws: &mut Workspace) -> Result<Box<dyn Operator>> {
        let constructors = self.constructors.read().unwrap();
        let constructor = constructors
            .get(&def.op_type)
            .ok_or_else(|| ConfigError::UnknownOperator(def.op_type.clone()))?;
        constructor(def, ws)
    }

    pub fn has_operator(&self, name: &str) -> bool {
        self.constructors.read().unwrap().contains_key(name)
    }

    /// Registered operator names in sorted order.
    pub fn list_operators(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Implementation detail of the registration macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __register_kernel_operator {
    ($schema:ty, $name:expr, $mode:ident, [$($param:expr),* $(,)?]) => {
        const _: () = {
            const PARAMETERS: &[$crate::parameter::ParameterDef] = &[$($param),*];

            fn register(registry: &$crate::registry::OperatorRegistry) {
                registry.register_adapter($name, || {
                    $crate::adapter::AdapterSpec::new(
                        <$schema as $crate::schema::OpSchemaDef>::schema(),
                        $crate::adapter::InputMode::$mode,
                        PARAMETERS,
                    )
                });
            }

            #[$crate::linkme::distributed_slice($crate::registry::OPERATOR_REGISTRARS)]
            #[linkme(crate = $crate::linkme)]
            static REGISTRAR: fn(&$crate::registry::OperatorRegistry) = register;
        };
    };
}

/// Exposes the kernel schema `$schema` as operator `$name` with fixed inputs and no
/// parameters.
///
/// ```ignore
/// register_kernel_operator!(AddSchema, "Add");
/// ```
#[macro_export]
macro_rules! register_kernel_operator {
    ($schema:ty, $name:expr $(,)?) => {
        $crate::__register_kernel_operator!($schema, $name, Fixed, []);
    };
}

/// Fixed inputs plus a static parameter list of [`ParameterDef`](crate::parameter::ParameterDef)s.
///
/// ```ignore
/// register_kernel_operator_with_parameters!(ScaleSchema, "Scale", [ParameterDef::float("alpha", 1.0)]);
/// ```
#[macro_export]
macro_rules! register_kernel_operator_with_parameters {
    ($schema:ty, $name:expr, [$($param:expr),* $(,)?] $(,)?) => {
        $crate::__register_kernel_operator!($schema, $name, Fixed, [$($param),*]);
    };
}

/// All inputs collected into the schema's leading tensor-list slot; no parameters.
#[macro_export]
macro_rules! register_kernel_operator_with_array_input {
    ($schema:ty, $name:expr $(,)?) => {
        $crate::__register_kernel_operator!($schema, $name, Variadic, []);
    };
}

/// Tensor-list input plus a static parameter list.
#[macro_export]
macro_rules! register_kernel_operator_with_array_input_and_parameters {
    ($schema:ty, $name:expr, [$($param:expr),* $(,)?] $(,)?) => {
        $crate::__register_kernel_operator!($schema, $name, Variadic, [$($param),*]);
    };
}
