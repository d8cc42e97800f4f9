//! Sequential nets: ordered operator lists run against one workspace.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::operator::Operator;
use crate::operator_def::OperatorDef;
use crate::registry::OperatorRegistry;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetDef {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "op")]
    pub ops: Vec<OperatorDef>,
}

impl NetDef {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("failed to parse net definition")
    }
}

/// Operators of a net, created once and run in definition order.
pub struct SimpleNet {
    name: String,
    ops: Vec<Box<dyn Operator>>,
}

impl SimpleNet {
    /// Creates every operator up front; a construction failure names the offending op.
    pub fn new(net: &NetDef, registry: &OperatorRegistry, ws: &mut Workspace) -> Result<Self> {
        let ops = net
            .ops
            .iter()
            .enumerate()
            .map(|(index, def)| {
                registry.create(def, ws).with_context(|| {
                    format!(
                        "net {}: failed to create operator #{index} ({}: {})",
                        net.name,
                        def.display_name(),
                        def.op_type
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SimpleNet {
            name: net.name.clone(),
            ops,
        })
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Runs operators in order, stopping at the first error or soft failure.
    pub fn run(&mut self) -> Result<bool> {
        for (index, op) in self.ops.iter_mut().enumerate() {
            let ok = op.run().with_context(|| {
                format!(
                    "net {}: operator #{index} ({}: {}) failed",
                    self.name,
                    op.def().display_name(),
                    op.def().op_type
                )
            })?;
            if !ok {
                log::debug!("net {}: operator #{index} reported failure", self.name);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Workspace {
    /// Builds `net` against this workspace with the global registry and runs it once.
    pub fn run_net_once(&mut self, net: &NetDef) -> Result<bool> {
        self.run_net_once_with(&OperatorRegistry::global(), net)
    }

    pub fn run_net_once_with(&mut self, registry: &OperatorRegistry, net: &NetDef) -> Result<bool> {
        SimpleNet::new(net, registry, self)?.run()
    }
}
