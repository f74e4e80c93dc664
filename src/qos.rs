//! QoS tier selection.
//!
//! Resolves Open Question 2 from the design notes: the source exposes both
//! a legacy tier-only provider and a richer decision-returning one. This
//! crate requires the richer [`QosDecision`] shape; [`LegacyQosProvider`]
//! adapts old-style providers by returning `{tier, reason_code: None,
//! signals: None}`.

use async_trait::async_trait;

use crate::context::FlowContext;

/// Coarse degradation setting, wire names per §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QosTier {
    Full,
    Conserve,
    Emergency,
    Fallback,
}

impl Default for QosTier {
    fn default() -> Self {
        QosTier::Full
    }
}

impl QosTier {
    pub fn wire_name(self) -> &'static str {
        match self {
            QosTier::Full => "full",
            QosTier::Conserve => "conserve",
            QosTier::Emergency => "emergency",
            QosTier::Fallback => "fallback",
        }
    }
}

/// A QoS tier selection plus optional diagnostic signals.
#[derive(Debug, Clone)]
pub struct QosDecision {
    pub tier: QosTier,
    pub reason_code: Option<String>,
    pub signals: Option<Vec<(String, String)>>,
}

impl QosDecision {
    pub fn tier_only(tier: QosTier) -> Self {
        Self {
            tier,
            reason_code: None,
            signals: None,
        }
    }
}

/// Selects a QoS tier for a flow execution. [`crate::host::FlowHost`]
/// defaults to [`QosTier::Full`] when no provider is configured.
#[async_trait]
pub trait QosProvider: Send + Sync {
    async fn select(&self, flow_name: &str, ctx: &FlowContext) -> QosDecision;
}

/// The older `IQosTierProvider`-shaped interface: tier only.
#[async_trait]
pub trait LegacyQosProvider: Send + Sync {
    async fn select_tier(&self, flow_name: &str, ctx: &FlowContext) -> QosTier;
}

/// Adapts any [`LegacyQosProvider`] into a full [`QosProvider`].
pub struct LegacyQosAdapter<P>(pub P);

#[async_trait]
impl<P: LegacyQosProvider> QosProvider for LegacyQosAdapter<P> {
    async fn select(&self, flow_name: &str, ctx: &FlowContext) -> QosDecision {
        QosDecision::tier_only(self.0.select_tier(flow_name, ctx).await)
    }
}
