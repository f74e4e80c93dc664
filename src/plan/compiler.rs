//! The plan compiler (§4.3): turns a [`Blueprint`] + [`ModuleCatalog`] pair
//! into a [`PlanTemplate`] with a deterministic `planHash`.
//!
//! Grounded on `graphs/compilation.rs`'s `impl GraphBuilder { fn compile
//! (self) -> App }`, generalized with the type-checking and hashing the
//! teacher's graph compiler reserves for "future work".

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};

use crate::blueprint::{Blueprint, NodeBody};
use crate::error::PlanCompileError;
use crate::plan::{PlanNode, PlanNodeKind, PlanTemplate};
use crate::registry::ModuleCatalog;

/// Stateless compiler: `compile(blueprint, catalog) -> PlanTemplate`.
pub struct PlanCompiler;

impl PlanCompiler {
    pub fn compile(blueprint: &Blueprint, catalog: &ModuleCatalog) -> Result<PlanTemplate, PlanCompileError> {
        compile(blueprint, catalog)
    }
}

/// Compile `blueprint` against `catalog`. See module docs.
pub fn compile(blueprint: &Blueprint, catalog: &ModuleCatalog) -> Result<PlanTemplate, PlanCompileError> {
    let mut nodes = Vec::with_capacity(blueprint.nodes.len());
    let mut node_index = FxHashMap::default();

    let mut current_type = blueprint.request_type;
    let mut stage_entry_type = current_type;
    let mut active_stage: Option<&str> = None;

    for (i, bn) in blueprint.nodes.iter().enumerate() {
        if bn.stage_name.as_deref() != active_stage {
            active_stage = bn.stage_name.as_deref();
            stage_entry_type = current_type;
        }

        let (kind, output_type) = match &bn.body {
            NodeBody::Step { module_type } => {
                let Some(args_type) = catalog.args_type(module_type) else {
                    return Err(PlanCompileError::UnregisteredModuleType {
                        flow: blueprint.flow_name.clone(),
                        node: bn.name.clone(),
                        module_type: module_type.clone(),
                    });
                };
                let expected_input = if bn.stage_name.is_some() { stage_entry_type } else { current_type };
                if args_type != expected_input {
                    return Err(PlanCompileError::InputTypeMismatch {
                        flow: blueprint.flow_name.clone(),
                        node: bn.name.clone(),
                        expected: expected_input.name().to_string(),
                        actual: args_type.name().to_string(),
                    });
                }
                let response_type = catalog
                    .response_type(module_type)
                    .expect("catalog entry presence already checked via args_type");
                if bn.stage_name.is_none() {
                    current_type = response_type;
                }
                (PlanNodeKind::Step { module_type: module_type.clone() }, response_type)
            }
            NodeBody::Join { join_fn } => {
                let output_type = join_fn.output_type();
                current_type = output_type;
                (PlanNodeKind::Join { join_fn: join_fn.clone() }, output_type)
            }
        };

        node_index.insert(bn.name.clone(), i);
        nodes.push(PlanNode {
            kind,
            name: bn.name.clone(),
            stage_name: bn.stage_name.clone(),
            output_type,
        });
    }

    if !nodes.last().map(PlanNode::is_join).unwrap_or(false) {
        return Err(PlanCompileError::StructuralViolation {
            flow: blueprint.flow_name.clone(),
            reason: "terminal node must be a join".to_string(),
        });
    }

    let plan_hash = compute_plan_hash(&blueprint.flow_name, &nodes);

    Ok(PlanTemplate {
        flow_name: blueprint.flow_name.clone(),
        nodes,
        node_index,
        plan_hash,
    })
}

/// A stable 64-bit fingerprint of `(flowName, [nodeKind, name, stageName,
/// moduleType, outputType])`. Uses `FxHasher` rather than the standard
/// library's `RandomState`-seeded default, since the spec requires the
/// hash to be reproducible across process restarts for the same input —
/// `FxHasher`'s output depends only on its input bytes, not a per-process
/// random seed.
fn compute_plan_hash(flow_name: &str, nodes: &[PlanNode]) -> u64 {
    let mut hasher = FxHasher::default();
    flow_name.hash(&mut hasher);
    for node in nodes {
        match &node.kind {
            PlanNodeKind::Step { module_type } => {
                "step".hash(&mut hasher);
                Some(module_type.as_str()).hash(&mut hasher);
            }
            PlanNodeKind::Join { .. } => {
                "join".hash(&mut hasher);
                None::<&str>.hash(&mut hasher);
            }
        }
        node.name.hash(&mut hasher);
        node.stage_name.hash(&mut hasher);
        node.output_type.name().hash(&mut hasher);
    }
    hasher.finish()
}
