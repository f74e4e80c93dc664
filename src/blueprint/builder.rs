//! The fluent blueprint builder (§4.2).
//!
//! Grounded on the teacher's `GraphBuilder`: consuming, `#[must_use]`
//! methods that return `Self`, validation deferred to a single terminal
//! `build()` call rather than failing eagerly on each method.

use std::collections::HashSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::blueprint::node::{BlueprintNode, JoinFn, NodeBody, StageContract, TypedJoinFn};
use crate::blueprint::Blueprint;
use crate::context::FlowContext;
use crate::error::RegistrationError;
use crate::outcome::Outcome;
use crate::typed::TypeTag;

/// A builder scoped to the body of one `.stage(...)` call: every `.step`
/// added here is stamped with the enclosing stage's name.
pub struct StageScope {
    stage_name: String,
    nodes: Vec<BlueprintNode>,
}

impl StageScope {
    #[must_use]
    pub fn step(mut self, name: impl Into<String>, module_type: impl Into<String>) -> Self {
        self.nodes.push(BlueprintNode {
            name: name.into(),
            body: NodeBody::Step { module_type: module_type.into() },
            stage_name: Some(self.stage_name.clone()),
        });
        self
    }
}

/// Fluent, consuming builder for a [`Blueprint`].
pub struct BlueprintBuilder {
    flow_name: String,
    nodes: Vec<BlueprintNode>,
    stage_contracts: FxHashMap<String, StageContract>,
    response_type: TypeTag,
    request_type: TypeTag,
}

impl BlueprintBuilder {
    /// Start a builder for a flow `Req -> Resp`.
    #[must_use]
    pub fn new<Req: 'static, Resp: 'static>(flow_name: impl Into<String>) -> Self {
        Self {
            flow_name: flow_name.into(),
            nodes: Vec::new(),
            stage_contracts: FxHashMap::default(),
            response_type: TypeTag::of::<Resp>(),
            request_type: TypeTag::of::<Req>(),
        }
    }

    /// Add a plain step outside any stage.
    #[must_use]
    pub fn step(mut self, name: impl Into<String>, module_type: impl Into<String>) -> Self {
        self.nodes.push(BlueprintNode {
            name: name.into(),
            body: NodeBody::Step { module_type: module_type.into() },
            stage_name: None,
        });
        self
    }

    /// Add a contiguous stage: every step added inside `body` shares
    /// `name` as its `stageName` and is subject to `contract` (if any) at
    /// execution time.
    #[must_use]
    pub fn stage(
        mut self,
        name: impl Into<String>,
        contract: Option<StageContract>,
        body: impl FnOnce(StageScope) -> StageScope,
    ) -> Self {
        let name = name.into();
        let scope = body(StageScope { stage_name: name.clone(), nodes: Vec::new() });
        if let Some(contract) = contract {
            self.stage_contracts.insert(name.clone(), contract);
        }
        self.nodes.extend(scope.nodes);
        self
    }

    /// Add a join node. `join_fn` reads prior outcomes off the
    /// [`FlowContext`] and produces this node's outcome.
    #[must_use]
    pub fn join<TOut, F>(mut self, name: impl Into<String>, join_fn: F) -> Self
    where
        TOut: Send + Sync + 'static,
        F: Fn(&FlowContext) -> Outcome<TOut> + Send + Sync + 'static,
    {
        let join_fn: Arc<dyn JoinFn> = Arc::new(TypedJoinFn::new(join_fn));
        self.nodes.push(BlueprintNode {
            name: name.into(),
            body: NodeBody::Join { join_fn },
            stage_name: None,
        });
        self
    }

    /// Finalize the blueprint. Enforces: unique node names, a non-empty
    /// node list, and that the terminal node is a join whose output type
    /// matches the flow's declared response type.
    pub fn build(self) -> Result<Blueprint, RegistrationError> {
        if self.nodes.is_empty() {
            return Err(RegistrationError::InvalidBlueprint {
                flow: self.flow_name,
                reason: "blueprint has no nodes".to_string(),
            });
        }

        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(RegistrationError::InvalidBlueprint {
                    flow: self.flow_name,
                    reason: format!("duplicate node name '{}'", node.name),
                });
            }
        }

        let terminal = self.nodes.last().expect("checked non-empty above");
        match &terminal.body {
            NodeBody::Join { join_fn } => {
                if join_fn.output_type() != self.response_type {
                    return Err(RegistrationError::InvalidBlueprint {
                        flow: self.flow_name,
                        reason: format!(
                            "terminal join '{}' produces '{}' but flow declares response type '{}'",
                            terminal.name,
                            join_fn.output_type(),
                            self.response_type,
                        ),
                    });
                }
            }
            NodeBody::Step { .. } => {
                return Err(RegistrationError::InvalidBlueprint {
                    flow: self.flow_name,
                    reason: "terminal node must be a join".to_string(),
                });
            }
        }

        Ok(Blueprint {
            flow_name: self.flow_name,
            nodes: self.nodes,
            stage_contracts: self.stage_contracts,
            request_type: self.request_type,
            response_type: self.response_type,
        })
    }
}
