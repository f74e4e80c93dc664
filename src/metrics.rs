//! Metrics instrument names (§6) and the emission helpers the engine calls.
//!
//! Telemetry *backends* are out of scope for this crate (§1); what the core
//! owns is emitting structured `tracing` events carrying the instrument
//! name as the event message and its tags as structured fields, matching
//! the precedent set by [`crate::config::lkg::LkgConfigProvider`]'s
//! `rorchestrator.config.lkg.fallbacks` event. A downstream metrics layer
//! subscribes to these events and turns them into real instruments; this
//! crate never links a metrics backend directly.

use tracing::{event, Level};

use crate::outcome::OutcomeKind;
use crate::qos::QosTier;

pub const FLOW_OUTCOMES: &str = "rorchestrator.flow.outcomes";
pub const FLOW_LATENCY_MS: &str = "rorchestrator.flow.latency.ms";
pub const STEP_OUTCOMES: &str = "rorchestrator.step.outcomes";
pub const STEP_LATENCY_MS: &str = "rorchestrator.step.latency.ms";
pub const STEP_SKIPPED_REASONS: &str = "rorchestrator.step.skipped.reasons";
pub const JOIN_OUTCOMES: &str = "rorchestrator.join.outcomes";
pub const JOIN_LATENCY_MS: &str = "rorchestrator.join.latency.ms";
pub const QOS_TIER_SELECTED: &str = "rorchestrator.qos.tier.selected";
pub const CONFIG_LKG_FALLBACKS: &str = "rorchestrator.config.lkg.fallbacks";

/// Replace high-cardinality skip/outcome codes with `"OTHER"` before they
/// become a metrics tag (§4.8: "any code matching >5 consecutive digits,
/// containing a ':', or exceeding 64 chars is replaced with `OTHER`").
pub fn cardinality_filter(code: &str) -> &str {
    if code.len() > 64 || code.contains(':') || has_long_digit_run(code) {
        "OTHER"
    } else {
        code
    }
}

fn has_long_digit_run(code: &str) -> bool {
    let mut run = 0;
    for c in code.chars() {
        if c.is_ascii_digit() {
            run += 1;
            if run > 5 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

pub fn record_flow_outcome(flow_name: &str, outcome_kind: OutcomeKind, duration_ms: u64) {
    event!(Level::INFO, flow_name, outcome_kind = %outcome_kind, duration_ms, FLOW_OUTCOMES);
    event!(Level::INFO, flow_name, duration_ms, FLOW_LATENCY_MS);
}

#[allow(clippy::too_many_arguments)]
pub fn record_step_outcome(
    flow_name: &str,
    module_type: Option<&str>,
    outcome_kind: OutcomeKind,
    skip_code: Option<&str>,
    duration_ms: u64,
) {
    event!(
        Level::DEBUG,
        flow_name,
        module_type,
        outcome_kind = %outcome_kind,
        duration_ms,
        STEP_OUTCOMES
    );
    event!(Level::DEBUG, flow_name, module_type, duration_ms, STEP_LATENCY_MS);
    if let Some(code) = skip_code {
        let tag = cardinality_filter(code);
        event!(Level::DEBUG, flow_name, module_type, skip_code = tag, STEP_SKIPPED_REASONS);
    }
}

pub fn record_join_outcome(flow_name: &str, outcome_kind: OutcomeKind, duration_ms: u64) {
    event!(Level::DEBUG, flow_name, outcome_kind = %outcome_kind, duration_ms, JOIN_OUTCOMES);
    event!(Level::DEBUG, flow_name, duration_ms, JOIN_LATENCY_MS);
}

pub fn record_qos_tier_selected(flow_name: &str, qos_tier: QosTier) {
    event!(Level::DEBUG, flow_name, qos_tier = qos_tier.wire_name(), QOS_TIER_SELECTED);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_codes_pass_through() {
        assert_eq!(cardinality_filter("GATE_FALSE"), "GATE_FALSE");
    }

    #[test]
    fn codes_with_colons_are_filtered() {
        assert_eq!(cardinality_filter("tenant:12345"), "OTHER");
    }

    #[test]
    fn codes_with_long_digit_runs_are_filtered() {
        assert_eq!(cardinality_filter("ERROR_123456"), "OTHER");
        assert_eq!(cardinality_filter("ERROR_1234"), "ERROR_1234");
    }

    #[test]
    fn overlong_codes_are_filtered() {
        let long = "x".repeat(65);
        assert_eq!(cardinality_filter(&long), "OTHER");
        let ok = "x".repeat(64);
        assert_eq!(cardinality_filter(&ok), ok);
    }
}
