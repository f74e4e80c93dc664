//! Runtime configuration patches (§3, §4.4): the wire document, gate
//! evaluation, merge helpers, and the per-request evaluator.

pub mod document;
pub mod evaluator;
pub mod gate;
pub mod merge;

pub use document::{EmergencyOverlay, ExperimentEntry, FlowPatch, Gate, Limits, ModuleSpec, PatchDocument, QosOverlay, Shadow, StagePatch};
pub use evaluator::{EvaluatedFlow, EvaluatedStage, ModuleDecision, OverlayApplied, OverlayLayer, PatchEvaluator};
pub use gate::{evaluate_gate, GateDecision, GateReasonCode, SelectorPredicate, SelectorRegistry};
