//! Gate evaluation (§4.5): admits or skips a stage-fan-out module based on
//! experiment variants and/or caller-supplied selector predicates.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::context::FlowContext;
use crate::patch::document::Gate;

/// Why a [`GateDecision`] came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReasonCode {
    VariantMatch,
    VariantMismatch,
    SelectorTrue,
    SelectorFalse,
    SelectorMissing,
}

impl GateReasonCode {
    pub fn wire(self) -> &'static str {
        match self {
            GateReasonCode::VariantMatch => "VARIANT_MATCH",
            GateReasonCode::VariantMismatch => "VARIANT_MISMATCH",
            GateReasonCode::SelectorTrue => "SELECTOR_TRUE",
            GateReasonCode::SelectorFalse => "SELECTOR_FALSE",
            GateReasonCode::SelectorMissing => "SELECTOR_MISSING",
        }
    }
}

/// The result of evaluating a [`Gate`] against one request's variants and
/// selector registry.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub allowed: bool,
    pub code: &'static str, // "GATE_TRUE" | "GATE_FALSE"
    pub reason_code: GateReasonCode,
    pub selector_name: Option<String>,
}

impl GateDecision {
    fn leaf(allowed: bool, reason_code: GateReasonCode, selector_name: Option<String>) -> Self {
        Self {
            allowed,
            code: if allowed { "GATE_TRUE" } else { "GATE_FALSE" },
            reason_code,
            selector_name,
        }
    }
}

/// A caller-supplied predicate bank: `selector name -> predicate(FlowContext) -> bool`.
pub type SelectorPredicate = Arc<dyn Fn(&FlowContext) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct SelectorRegistry {
    selectors: FxHashMap<String, SelectorPredicate>,
}

impl SelectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_selector(mut self, name: impl Into<String>, predicate: SelectorPredicate) -> Self {
        self.selectors.insert(name.into(), predicate);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SelectorPredicate> {
        self.selectors.get(name)
    }
}

/// Evaluate `gate` against the request's effective variants and (optional)
/// selector registry. Short-circuits: `All` stops at the first deny, `Any`
/// stops at the first allow, `Not` inverts its child's `allowed` flag
/// while carrying the child's reason code forward.
pub fn evaluate_gate(
    gate: &Gate,
    variants: &BTreeMap<String, String>,
    selectors: Option<&SelectorRegistry>,
    ctx: &FlowContext,
) -> GateDecision {
    match gate {
        Gate::ExperimentGate { layer, r#in } => match variants.get(layer) {
            Some(variant) if r#in.iter().any(|v| v == variant) => {
                GateDecision::leaf(true, GateReasonCode::VariantMatch, None)
            }
            _ => GateDecision::leaf(false, GateReasonCode::VariantMismatch, None),
        },
        Gate::Selector { selector } => match selectors.and_then(|r| r.get(selector)) {
            Some(predicate) => {
                let allowed = predicate(ctx);
                let reason = if allowed {
                    GateReasonCode::SelectorTrue
                } else {
                    GateReasonCode::SelectorFalse
                };
                GateDecision::leaf(allowed, reason, Some(selector.clone()))
            }
            None => GateDecision::leaf(false, GateReasonCode::SelectorMissing, Some(selector.clone())),
        },
        Gate::All { gates } => {
            let mut last = GateDecision::leaf(true, GateReasonCode::VariantMatch, None);
            for child in gates {
                last = evaluate_gate(child, variants, selectors, ctx);
                if !last.allowed {
                    return last;
                }
            }
            last
        }
        Gate::Any { gates } => {
            let mut last = GateDecision::leaf(false, GateReasonCode::VariantMismatch, None);
            for child in gates {
                last = evaluate_gate(child, variants, selectors, ctx);
                if last.allowed {
                    return last;
                }
            }
            last
        }
        Gate::Not { gate } => {
            let inner = evaluate_gate(gate, variants, selectors, ctx);
            GateDecision::leaf(!inner.allowed, inner.reason_code, inner.selector_name)
        }
    }
}
