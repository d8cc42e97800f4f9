//! Legacy operator interface and the blob bookkeeping shared by implementations.

use anyhow::Result;

use crate::operator_def::OperatorDef;
use crate::tensor::Tensor;
use crate::workspace::Workspace;

/// An operator instance created from an [`OperatorDef`] inside a [`Workspace`].
pub trait Operator: Send {
    fn def(&self) -> &OperatorDef;

    /// Runs the operator once; `Ok(false)` reports a soft failure to the caller.
    fn run(&mut self) -> Result<bool>;
}

/// Resolves an operator's input and output blobs once, at construction.
///
/// Inputs must already exist in the workspace; outputs are created when missing. The
/// base keeps tensor handles, so later writes through them land in the workspace blobs.
#[derive(Debug)]
pub struct OperatorBase {
    def: OperatorDef,
    inputs: Vec<Tensor>,
    outputs: Vec<Tensor>,
}

impl OperatorBase {
    pub fn new(def: &OperatorDef, ws: &mut Workspace) -> Result<Self> {
        let inputs = def
            .inputs
            .iter()
            .map(|name| ws.blob(name))
            .collect::<Result<Vec<_>>>()?;
        let outputs = def.outputs.iter().map(|name| ws.create_blob(name)).collect();
        Ok(OperatorBase {
            def: def.clone(),
            inputs,
            outputs,
        })
    }

    pub fn def(&self) -> &OperatorDef {
        &self.def
    }

    pub fn input(&self, index: usize) -> &Tensor {
        &self.inputs[index]
    }

    pub fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    pub fn input_size(&self) -> usize {
        self.inputs.len()
    }

    pub fn output(&self, index: usize) -> &Tensor {
        &self.outputs[index]
    }

    pub fn outputs(&self) -> &[Tensor] {
        &self.outputs
    }

    pub fn output_size(&self) -> usize {
        self.outputs.len()
    }
}
