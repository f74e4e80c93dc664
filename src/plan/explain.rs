//! `PlanExplain`: one record per compiled node, for tooling consumers
//! (out of scope here beyond exposing the structured data).

use crate::plan::{PlanNode, PlanNodeKind, PlanTemplate};

#[derive(Debug, Clone, serde::Serialize)]
pub struct PlanExplainRecord {
    pub kind: &'static str, // "step" | "join"
    pub name: String,
    pub stage_name: Option<String>,
    pub module_type: Option<String>,
    pub output_type: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PlanExplain {
    pub flow_name: String,
    pub plan_hash: String,
    pub records: Vec<PlanExplainRecord>,
}

impl PlanExplain {
    pub fn from_plan(plan: &PlanTemplate) -> Self {
        let records = plan
            .nodes
            .iter()
            .map(|node: &PlanNode| PlanExplainRecord {
                kind: if node.is_join() { "join" } else { "step" },
                name: node.name.clone(),
                stage_name: node.stage_name.clone(),
                module_type: match &node.kind {
                    PlanNodeKind::Step { module_type } => Some(module_type.clone()),
                    PlanNodeKind::Join { .. } => None,
                },
                output_type: node.output_type.name().to_string(),
            })
            .collect();
        Self {
            flow_name: plan.flow_name.clone(),
            plan_hash: plan.plan_hash_hex(),
            records,
        }
    }
}
