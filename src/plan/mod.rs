//! Compiled plan types (§3, §4.3).

pub mod compiler;
pub mod explain;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::blueprint::JoinFn;
use crate::typed::TypeTag;

pub use compiler::{compile, PlanCompiler};
pub use explain::{PlanExplain, PlanExplainRecord};

/// A node kind in a compiled plan, mirroring [`crate::blueprint::node::NodeBody`]
/// but with `outputType` resolved.
pub enum PlanNodeKind {
    Step { module_type: String },
    Join { join_fn: Arc<dyn JoinFn> },
}

/// One node in a [`PlanTemplate`].
pub struct PlanNode {
    pub kind: PlanNodeKind,
    pub name: String,
    pub stage_name: Option<String>,
    pub output_type: TypeTag,
}

impl PlanNode {
    pub fn is_join(&self) -> bool {
        matches!(self.kind, PlanNodeKind::Join { .. })
    }
}

/// The compiled, type-checked, hashed form of a [`crate::blueprint::Blueprint`].
pub struct PlanTemplate {
    pub flow_name: String,
    pub nodes: Vec<PlanNode>,
    /// `name -> index`, handed to a fresh [`crate::context::FlowContext`]
    /// per request so join functions can look up prior outcomes by name.
    pub node_index: FxHashMap<String, usize>,
    /// 16-uppercase-hex-digit-rendering 64-bit fingerprint, stable across
    /// runs for the same `(flowName, [nodeKind, name, stageName,
    /// moduleType, outputType])` sequence.
    pub plan_hash: u64,
}

impl PlanTemplate {
    pub fn plan_hash_hex(&self) -> String {
        format!("{:016X}", self.plan_hash)
    }

    pub fn stage_node_indices(&self, stage: &str) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.stage_name.as_deref() == Some(stage))
            .map(|(i, _)| i)
            .collect()
    }
}
