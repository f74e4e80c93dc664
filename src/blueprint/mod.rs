//! Static flow topology (§3, §4.2).

mod builder;
pub mod node;

pub use builder::{BlueprintBuilder, StageScope};
pub use node::{BlueprintNode, JoinFn, NodeBody, StageContract, TypedJoinFn};

use rustc_hash::FxHashMap;

use crate::typed::TypeTag;

/// An immutable, ordered list of nodes defining a flow's topology.
///
/// # Invariants
/// - Node names are unique within the flow.
/// - The final node is a [`NodeBody::Join`] whose output type equals the
///   flow's declared response type.
///
/// Built exclusively via [`BlueprintBuilder::build`], which enforces both.
pub struct Blueprint {
    pub flow_name: String,
    pub nodes: Vec<BlueprintNode>,
    pub stage_contracts: FxHashMap<String, StageContract>,
    pub request_type: TypeTag,
    pub response_type: TypeTag,
}

impl Blueprint {
    /// Stage name at a given node index, if the node belongs to a stage.
    pub fn stage_name_at(&self, index: usize) -> Option<&str> {
        self.nodes[index].stage_name.as_deref()
    }

    /// All node indices belonging to the stage named `stage`, in
    /// declaration order.
    pub fn stage_node_indices(&self, stage: &str) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.stage_name.as_deref() == Some(stage))
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Outcome;

    #[test]
    fn builds_minimal_flow_with_step_then_join() {
        let bp = BlueprintBuilder::new::<u32, u32>("f")
            .step("double", "Doubler")
            .join("combine", |_ctx| Outcome::ok(0u32))
            .build()
            .unwrap();
        assert_eq!(bp.nodes.len(), 2);
        assert!(bp.nodes[1].is_join());
    }

    #[test]
    fn rejects_duplicate_node_names() {
        let err = BlueprintBuilder::new::<u32, u32>("f")
            .step("a", "T")
            .step("a", "T")
            .join("j", |_ctx| Outcome::ok(0u32))
            .build()
            .unwrap_err();
        assert!(matches!(err, crate::error::RegistrationError::InvalidBlueprint { .. }));
    }

    #[test]
    fn rejects_non_join_terminal() {
        let err = BlueprintBuilder::new::<u32, u32>("f")
            .step("a", "T")
            .build()
            .unwrap_err();
        assert!(matches!(err, crate::error::RegistrationError::InvalidBlueprint { .. }));
    }

    #[test]
    fn rejects_response_type_mismatch() {
        let err = BlueprintBuilder::new::<u32, u32>("f")
            .join("j", |_ctx| Outcome::ok("not-a-u32".to_string()))
            .build()
            .unwrap_err();
        assert!(matches!(err, crate::error::RegistrationError::InvalidBlueprint { .. }));
    }

    #[test]
    fn stage_stamps_step_names() {
        let bp = BlueprintBuilder::new::<u32, u32>("f")
            .stage("s1", None, |s| s.step("a", "TA").step("b", "TB"))
            .join("j", |_ctx| Outcome::ok(0u32))
            .build()
            .unwrap();
        assert_eq!(bp.stage_name_at(0), Some("s1"));
        assert_eq!(bp.stage_name_at(1), Some("s1"));
        assert_eq!(bp.stage_node_indices("s1"), vec![0, 1]);
    }
}
