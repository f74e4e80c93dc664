//! `FlowRegistry` and `ModuleCatalog` (§3): write-once-then-frozen maps
//! populated during bootstrap, read many times per request thereafter.
//!
//! Grounded on the teacher's treatment of `App`'s `nodes`/`edges` as
//! immutable once `GraphBuilder::compile()` runs — registration here is a
//! step earlier (pre-compile), but the same "build once, read forever"
//! shape applies, implemented with `parking_lot::RwLock` over an
//! `FxHashMap` rather than requiring an explicit freeze call.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::blueprint::Blueprint;
use crate::error::RegistrationError;
use crate::module::{Module, ModuleFactory};
use crate::typed::TypeTag;

/// One shape-binding problem reported by a [`ParamsDecoder`]/[`ArgsDecoder`]:
/// whether the field was unrecognized or simply failed to bind against its
/// declared type, plus the field's path (relative to the decoded value) and
/// a human-readable message. The config validator maps `kind` to the
/// matching `CFG_*` finding code (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeIssueKind {
    BindFailed,
    UnknownField,
}

#[derive(Debug, Clone)]
pub struct ShapeIssue {
    pub kind: ShapeIssueKind,
    pub field: String,
    pub message: String,
}

/// A per-flow params decoder — the reflection-free replacement for
/// runtime type-shape binding (design notes, §9): `decode(jsonValue) ->
/// Result<Params, FindingList>`, represented here as a boxed function
/// returning either success or the list of shape issues found. The config
/// validator is the sole caller: it delegates every flow's `params` shape
/// check to this closure rather than reimplementing per-flow binding
/// generically.
pub type ParamsDecoder = Arc<dyn Fn(&Value) -> Result<(), Vec<ShapeIssue>> + Send + Sync>;

/// Same contract as [`ParamsDecoder`], keyed by module type name instead of
/// flow name: binds a `with` value against a module's declared args shape.
/// A catalog entry with no `ArgsDecoder` is treated as free-form (any JSON
/// shape accepted), which suppresses `CFG_MODULE_ARGS_UNKNOWN_FIELD` per §6.
pub type ArgsDecoder = Arc<dyn Fn(&Value) -> Result<(), Vec<ShapeIssue>> + Send + Sync>;

/// One [`FlowRegistry`] entry.
pub struct FlowRegistration {
    pub blueprint: Arc<Blueprint>,
    pub request_type: TypeTag,
    pub response_type: TypeTag,
    pub params_decoder: Option<ParamsDecoder>,
    pub default_params: Option<Value>,
}

/// `flowName -> FlowRegistration`. Write-once during bootstrap; duplicate
/// registration fails.
#[derive(Default)]
pub struct FlowRegistry {
    entries: FxHashMap<String, Arc<FlowRegistration>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `blueprint` under its own `flow_name`. Fails if a flow
    /// with that name is already registered.
    pub fn register(
        &mut self,
        blueprint: Blueprint,
        params_decoder: Option<ParamsDecoder>,
        default_params: Option<Value>,
    ) -> Result<(), RegistrationError> {
        let name = blueprint.flow_name.clone();
        if self.entries.contains_key(&name) {
            return Err(RegistrationError::FlowAlreadyRegistered(name));
        }
        let request_type = blueprint.request_type;
        let response_type = blueprint.response_type;
        self.entries.insert(
            name,
            Arc::new(FlowRegistration {
                blueprint: Arc::new(blueprint),
                request_type,
                response_type,
                params_decoder,
                default_params,
            }),
        );
        Ok(())
    }

    pub fn get(&self, flow_name: &str) -> Option<Arc<FlowRegistration>> {
        self.entries.get(flow_name).cloned()
    }

    pub fn contains(&self, flow_name: &str) -> bool {
        self.entries.contains_key(flow_name)
    }
}

/// One [`ModuleCatalog`] entry.
struct CatalogEntry {
    args_type: TypeTag,
    response_type: TypeTag,
    factory: Arc<dyn ModuleFactory>,
    args_decoder: Option<ArgsDecoder>,
}

/// `typeName -> (argsType, responseType, factory)`. Write-once during
/// bootstrap; duplicate registration fails; lookup with a mismatching
/// signature fails with a type-mismatch error.
#[derive(Default)]
pub struct ModuleCatalog {
    entries: FxHashMap<String, CatalogEntry>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        args_type: TypeTag,
        response_type: TypeTag,
        factory: impl ModuleFactory + 'static,
    ) -> Result<(), RegistrationError> {
        self.register_with_args_decoder(type_name, args_type, response_type, factory, None)
    }

    /// As [`Self::register`], additionally attaching an [`ArgsDecoder`] the
    /// config validator uses to shape-check this module type's `with`
    /// field (§6's `CFG_MODULE_ARGS_*` finding codes). Pass `None` for a
    /// module whose args type accepts any JSON shape.
    pub fn register_with_args_decoder(
        &mut self,
        type_name: impl Into<String>,
        args_type: TypeTag,
        response_type: TypeTag,
        factory: impl ModuleFactory + 'static,
        args_decoder: Option<ArgsDecoder>,
    ) -> Result<(), RegistrationError> {
        let type_name = type_name.into();
        if self.entries.contains_key(&type_name) {
            return Err(RegistrationError::ModuleAlreadyRegistered(type_name));
        }
        self.entries.insert(
            type_name,
            CatalogEntry {
                args_type,
                response_type,
                factory: Arc::new(factory),
                args_decoder,
            },
        );
        Ok(())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn args_type(&self, type_name: &str) -> Option<TypeTag> {
        self.entries.get(type_name).map(|e| e.args_type)
    }

    pub fn response_type(&self, type_name: &str) -> Option<TypeTag> {
        self.entries.get(type_name).map(|e| e.response_type)
    }

    /// Build a fresh [`Module`] instance for `type_name`.
    pub fn create(&self, type_name: &str) -> Option<Arc<dyn Module>> {
        self.entries.get(type_name).map(|e| e.factory.create())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::BlueprintBuilder;
    use crate::outcome::Outcome;

    #[test]
    fn duplicate_flow_registration_fails() {
        let mut reg = FlowRegistry::new();
        let bp = || {
            BlueprintBuilder::new::<u32, u32>("f")
                .join("j", |_ctx| Outcome::ok(0u32))
                .build()
                .unwrap()
        };
        reg.register(bp(), None, None).unwrap();
        let err = reg.register(bp(), None, None).unwrap_err();
        assert!(matches!(err, RegistrationError::FlowAlreadyRegistered(_)));
    }
}
