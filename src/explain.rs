//! `ExecExplain`: the structured, per-request telemetry record the engine
//! produces when explain recording is enabled on a [`crate::context::FlowContext`].
//!
//! Field shapes mirror §3/§6 of the specification verbatim; rendering this
//! into a wire JSON format (version stamping, redaction of sensitive
//! parameter leaves) is an exporter's job, out of scope for this crate —
//! but the redaction *rule* itself (which leaves are sensitive) is data the
//! core must expose deterministically, so [`redact_sensitive_leaves`] lives
//! here rather than in a downstream exporter.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::outcome::OutcomeKind;
use crate::patch::evaluator::EffectiveParams;
use crate::qos::QosTier;

/// Requested/effective verbosity of explain recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainLevel {
    /// No recording: `FlowContext::explain` stays `None`.
    Off,
    /// Per-node and per-stage-module records, no params tree.
    Summary,
    /// Summary plus the attributed effective-params tree.
    Full,
}

/// One plain (non-stage) node's execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub kind: &'static str, // "step" | "join"
    pub name: String,
    pub stage_name: Option<String>,
    pub module_type: Option<String>,
    pub duration_ms: u64,
    pub outcome_kind: OutcomeKind,
    pub outcome_code: Option<String>,
}

/// One stage-fan-out member's execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageModuleRecord {
    pub id: String,
    pub module_type: String,
    pub limit_key: String,
    pub priority: i32,
    pub duration_ms: u64,
    pub outcome_kind: OutcomeKind,
    pub outcome_code: Option<String>,
    pub gate_decision_code: Option<&'static str>,
    pub gate_reason_code: Option<&'static str>,
    pub gate_selector_name: Option<String>,
    pub is_shadow: bool,
    pub shadow_sample_bps: u16,
    pub is_override: bool,
    pub memo_hit: bool,
}

/// The complete per-request telemetry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecExplain {
    pub flow_name: String,
    pub requested_level: ExplainLevel,
    pub effective_level: ExplainLevel,
    pub plan_hash: String,
    pub config_version: u64,
    pub overlays_applied: Vec<crate::patch::evaluator::OverlayApplied>,
    pub variants: Vec<(String, String)>, // sorted by key on export
    pub qos_tier: QosTier,
    pub qos_reason_code: Option<String>,
    pub qos_signals: Option<Vec<(String, String)>>, // sorted by key on export
    pub flow_duration_ms: u64,
    pub nodes: Vec<NodeRecord>,
    pub stage_modules: Vec<StageModuleRecord>,
    pub emergency_ignored_reason_code: Option<String>,
    pub effective_params: Option<EffectiveParams>,
}

/// Regex-free sensitivity check: keys containing `token`, `password`,
/// `secret`, or `api_key`/`api-key`/`apikey` (case-insensitive), matching
/// `/token|password|secret|api[_-]?key/i` from §6.
fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    if lower.contains("token") || lower.contains("password") || lower.contains("secret") {
        return true;
    }
    if let Some(idx) = lower.find("api") {
        let rest = &lower[idx + 3..];
        let rest = rest.strip_prefix('_').or_else(|| rest.strip_prefix('-')).unwrap_or(rest);
        if rest.starts_with("key") {
            return true;
        }
    }
    false
}

/// Recursively replace sensitive leaf values with `"[REDACTED]"`, matching
/// §6's effective-params export rule.
pub fn redact_sensitive_leaves(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if is_sensitive_key(k) && !matches!(v, Value::Object(_) | Value::Array(_)) {
                    out.insert(k.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(k.clone(), redact_sensitive_leaves(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_leaves).collect()),
        other => other.clone(),
    }
}

/// Mutable accumulator the engine appends to while walking a plan; frozen
/// into an [`ExecExplain`] at flow completion.
#[derive(Default)]
pub struct ExecExplainBuilder {
    pub nodes: Vec<NodeRecord>,
    pub stage_modules: Vec<StageModuleRecord>,
    pub emergency_ignored_reason_code: Option<String>,
}

/// Shared, lock-guarded handle stored on [`crate::context::FlowContext`].
pub type ExecExplainSink = Arc<Mutex<ExecExplainBuilder>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_matching_leaves_only() {
        let input = serde_json::json!({
            "apiKey": "abc123",
            "api_key": "abc123",
            "api-key": "abc123",
            "nested": { "password": "hunter2", "ok": "visible" },
            "tokens": "irrelevant-container-name-but-matches-token",
            "fine": "kept",
        });
        let out = redact_sensitive_leaves(&input);
        assert_eq!(out["apiKey"], "[REDACTED]");
        assert_eq!(out["api_key"], "[REDACTED]");
        assert_eq!(out["api-key"], "[REDACTED]");
        assert_eq!(out["nested"]["password"], "[REDACTED]");
        assert_eq!(out["nested"]["ok"], "visible");
        assert_eq!(out["fine"], "kept");
    }
}
