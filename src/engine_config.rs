//! Process-wide orchestration defaults that live outside any `PatchDocument`
//! (default QoS tier, default explain level, default deadline grace).
//!
//! Grounded on the teacher's `RuntimeConfig`/`EventBusConfig` split:
//! a `Default` impl that resolves from `.env`/process environment via
//! `dotenvy`, plus consuming `with_*` builder methods for programmatic
//! overrides, matching `RuntimeConfig::new`/`RuntimeConfig::with_event_bus`.

use std::time::Duration;

use crate::explain::ExplainLevel;
use crate::qos::QosTier;

/// Process-wide defaults handed to a [`crate::host::FlowHost`] at
/// bootstrap. Unlike [`crate::patch::document::PatchDocument`], these
/// values are not per-request-overlayable — they set the *fallback*
/// behavior a request falls back to when nothing in the overlay chain
/// says otherwise.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub default_qos_tier: QosTier,
    pub default_explain_level: ExplainLevel,
    pub default_deadline_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        dotenvy::dotenv().ok();
        Self {
            default_qos_tier: QosTier::Full,
            default_explain_level: Self::resolve_explain_level(),
            default_deadline_grace: Self::resolve_deadline_grace(),
        }
    }
}

impl EngineConfig {
    fn resolve_explain_level() -> ExplainLevel {
        match std::env::var("RORCHESTRATOR_EXPLAIN_LEVEL").ok().as_deref() {
            Some("summary") => ExplainLevel::Summary,
            Some("full") => ExplainLevel::Full,
            _ => ExplainLevel::Off,
        }
    }

    fn resolve_deadline_grace() -> Duration {
        let millis = std::env::var("RORCHESTRATOR_DEADLINE_GRACE_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        Duration::from_millis(millis)
    }

    #[must_use]
    pub fn with_default_qos_tier(mut self, tier: QosTier) -> Self {
        self.default_qos_tier = tier;
        self
    }

    #[must_use]
    pub fn with_default_explain_level(mut self, level: ExplainLevel) -> Self {
        self.default_explain_level = level;
        self
    }

    #[must_use]
    pub fn with_default_deadline_grace(mut self, grace: Duration) -> Self {
        self.default_deadline_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods_override_in_place() {
        let cfg = EngineConfig::default()
            .with_default_qos_tier(QosTier::Conserve)
            .with_default_explain_level(ExplainLevel::Summary)
            .with_default_deadline_grace(Duration::from_millis(250));
        assert_eq!(cfg.default_qos_tier, QosTier::Conserve);
        assert_eq!(cfg.default_explain_level, ExplainLevel::Summary);
        assert_eq!(cfg.default_deadline_grace, Duration::from_millis(250));
    }
}
