//! Structural (programmer) errors.
//!
//! These surface as `Err(...)` from synchronous APIs — registration,
//! blueprint/plan compilation, patch parsing, config validation, and entry
//! validation in [`crate::host::FlowHost::execute`]. They are distinct from
//! [`crate::outcome::Outcome`], which encodes *runtime* failures a flow can
//! recover from; see the crate-level docs for the split.

use thiserror::Error;

#[cfg(feature = "diagnostics")]
use miette::Diagnostic;

/// Errors raised while registering flows or modules into a
/// [`crate::registry::FlowRegistry`] / [`crate::registry::ModuleCatalog`].
#[derive(Debug, Error)]
#[cfg_attr(feature = "diagnostics", derive(Diagnostic))]
pub enum RegistrationError {
    #[error("flow '{0}' is already registered")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(rorchestrator::flow_already_registered)))]
    FlowAlreadyRegistered(String),

    #[error("module type '{0}' is already registered")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(rorchestrator::module_already_registered)))]
    ModuleAlreadyRegistered(String),

    #[error("blueprint '{flow}' is invalid: {reason}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(rorchestrator::invalid_blueprint)))]
    InvalidBlueprint { flow: String, reason: String },
}

/// Errors raised while compiling a [`crate::blueprint::Blueprint`] into a
/// [`crate::plan::PlanTemplate`].
#[derive(Debug, Error)]
#[cfg_attr(feature = "diagnostics", derive(Diagnostic))]
pub enum PlanCompileError {
    #[error("flow '{flow}': node '{node}' uses unregistered module type '{module_type}'")]
    #[cfg_attr(feature = "diagnostics", diagnostic(
        code(rorchestrator::plan_compile_failed),
        help("register the module type with the ModuleCatalog before compiling this flow")
    ))]
    UnregisteredModuleType {
        flow: String,
        node: String,
        module_type: String,
    },

    #[error("flow '{flow}': node '{node}' expects input type '{expected}' but predecessor produces '{actual}'")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(rorchestrator::plan_compile_failed)))]
    InputTypeMismatch {
        flow: String,
        node: String,
        expected: String,
        actual: String,
    },

    #[error("flow '{flow}': {reason}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(rorchestrator::plan_compile_failed)))]
    StructuralViolation { flow: String, reason: String },
}

/// Errors raised synchronously at the top of
/// [`crate::host::FlowHost::execute`], before any node runs.
#[derive(Debug, Error)]
#[cfg_attr(feature = "diagnostics", derive(Diagnostic))]
pub enum FlowHostError {
    #[error("flow '{0}' is not registered")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(rorchestrator::flow_not_registered)))]
    FlowNotRegistered(String),

    #[error("flow '{flow}' signature mismatch: registry expects {expected}, caller passed {actual}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(rorchestrator::flow_signature_mismatch)))]
    SignatureMismatch {
        flow: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("FlowContext has a zero or missing deadline")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(rorchestrator::missing_deadline)))]
    MissingDeadline,

    #[error(transparent)]
    #[cfg_attr(feature = "diagnostics", diagnostic(transparent))]
    PlanCompile(#[from] PlanCompileError),

    #[error("no usable configuration snapshot is available for flow '{flow}'")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(rorchestrator::config_unavailable)))]
    ConfigUnavailable { flow: String },
}
