//! `PatchDocument` wire format (schemaVersion `"v1"`), reproduced from §3/§6
//! of the specification as `serde`-derived types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level patch document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchDocument {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    #[serde(default)]
    pub limits: Option<Limits>,
    #[serde(default)]
    pub flows: BTreeMap<String, FlowPatch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default, rename = "moduleConcurrency")]
    pub module_concurrency: Option<ModuleConcurrencyLimits>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleConcurrencyLimits {
    #[serde(default, rename = "maxInFlight")]
    pub max_in_flight: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowPatch {
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub stages: Option<BTreeMap<String, StagePatch>>,
    #[serde(default)]
    pub experiments: Option<Vec<ExperimentEntry>>,
    #[serde(default)]
    pub qos: Option<QosOverlay>,
    #[serde(default)]
    pub emergency: Option<EmergencyOverlay>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentEntry {
    pub layer: String,
    pub variant: String,
    pub patch: FlowPatch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QosOverlay {
    #[serde(default)]
    pub tiers: BTreeMap<String, QosTierOverlay>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosTierOverlay {
    pub patch: FlowPatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyOverlay {
    pub reason: String,
    pub operator: String,
    #[serde(rename = "ttl_minutes")]
    pub ttl_minutes: i64,
    pub patch: FlowPatch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagePatch {
    #[serde(default, rename = "fanoutMax")]
    pub fanout_max: Option<u32>,
    #[serde(default)]
    pub modules: Option<Vec<ModuleSpec>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub id: String,
    #[serde(default, rename = "use")]
    pub use_: Option<String>,
    #[serde(default)]
    pub with: Option<Value>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default, rename = "limitKey")]
    pub limit_key: Option<String>,
    #[serde(default)]
    pub gate: Option<Gate>,
    #[serde(default)]
    pub shadow: Option<Shadow>,
    #[serde(default, rename = "memoKey")]
    pub memo_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shadow {
    pub sample: f64,
}

/// `Gate = ExperimentGate{layer,in[]} | Selector{selector:name} | All[...] |
/// Any[...] | Not(gate)`, tagged on the wire by a `type` discriminant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Gate {
    ExperimentGate { layer: String, #[serde(rename = "in")] r#in: Vec<String> },
    Selector { selector: String },
    All { gates: Vec<Gate> },
    Any { gates: Vec<Gate> },
    Not { gate: Box<Gate> },
}
