//! Named blob storage and the execution context operators are created in.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::adapter::ConfigError;
use crate::config::BridgeConfig;
use crate::dispatcher::Dispatcher;
use crate::operator_def::OperatorDef;
use crate::registry::OperatorRegistry;
use crate::tensor::Tensor;

/// Holds named tensors plus the dispatcher and configuration that operators created in
/// this workspace use.
pub struct Workspace {
    blobs: HashMap<String, Tensor>,
    dispatcher: Arc<Dispatcher>,
    config: BridgeConfig,
}

impl Workspace {
    /// Workspace bound to the global dispatcher and the environment configuration.
    pub fn new() -> Self {
        Self::with_dispatcher(Dispatcher::global())
    }

    pub fn with_dispatcher(dispatcher: Arc<Dispatcher>) -> Self {
        Workspace {
            blobs: HashMap::new(),
            dispatcher,
            config: BridgeConfig::global(),
        }
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Returns the blob named `name`, inserting an empty tensor when absent.
    pub fn create_blob(&mut self, name: &str) -> Tensor {
        self.blobs
            .entry(name.to_string())
            .or_insert_with(Tensor::empty)
            .clone()
    }

    pub fn get_blob(&self, name: &str) -> Option<Tensor> {
        self.blobs.get(name).cloned()
    }

    pub fn blob(&self, name: &str) -> Result<Tensor> {
        self.get_blob(name)
            .ok_or_else(|| ConfigError::MissingBlob(name.to_string()).into())
    }

    /// Binds `name` to `tensor`, replacing the previous handle.
    ///
    /// Operators created earlier keep the handle they resolved at construction.
    pub fn set_blob(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.blobs.insert(name.into(), tensor);
    }

    pub fn has_blob(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }

    pub fn remove_blob(&mut self, name: &str) -> Option<Tensor> {
        self.blobs.remove(name)
    }

    /// Blob names in sorted order.
    pub fn blob_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Creates the operator described by `def` through the global registry and runs it once.
    pub fn run_operator_once(&mut self, def: &OperatorDef) -> Result<()> {
        self.run_operator_once_with(&OperatorRegistry::global(), def)
    }

    pub fn run_operator_once_with(
        &mut self,
        registry: &OperatorRegistry,
        def: &OperatorDef,
    ) -> Result<()> {
        let mut op = registry.create(def, self)?;
        if !op.run()? {
            bail!("operator {} reported failure", def.display_name());
        }
        Ok(())
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}
