//! Blueprint node/stage types (§3).

use std::sync::Arc;

use crate::context::FlowContext;
use crate::outcome::Outcome;
use crate::typed::{AnyBox, TypeTag};

/// What a join function does: read prior node outcomes off the
/// [`FlowContext`] and produce this node's (type-erased) outcome.
pub trait JoinFn: Send + Sync {
    fn call(&self, ctx: &FlowContext) -> Outcome<AnyBox>;
    fn output_type(&self) -> TypeTag;
}

/// Adapts a strongly-typed `Fn(&FlowContext) -> Outcome<TOut>` into a
/// type-erased [`JoinFn`].
pub struct TypedJoinFn<TOut, F> {
    f: F,
    _marker: std::marker::PhantomData<fn() -> TOut>,
}

impl<TOut, F> TypedJoinFn<TOut, F>
where
    TOut: Send + Sync + 'static,
    F: Fn(&FlowContext) -> Outcome<TOut> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<TOut, F> JoinFn for TypedJoinFn<TOut, F>
where
    TOut: Send + Sync + 'static,
    F: Fn(&FlowContext) -> Outcome<TOut> + Send + Sync,
{
    fn call(&self, ctx: &FlowContext) -> Outcome<AnyBox> {
        match (self.f)(ctx) {
            Outcome::Unspecified => Outcome::Unspecified,
            Outcome::Ok(v) => Outcome::Ok(crate::typed::box_value(v)),
            Outcome::Error(c) => Outcome::Error(c),
            Outcome::Timeout(c) => Outcome::Timeout(c),
            Outcome::Skipped(c) => Outcome::Skipped(c),
            Outcome::Fallback(v, c) => Outcome::Fallback(crate::typed::box_value(v), c),
            Outcome::Canceled(c) => Outcome::Canceled(c),
        }
    }

    fn output_type(&self) -> TypeTag {
        TypeTag::of::<TOut>()
    }
}

/// A node's behavior: a single-module step, or a join that combines prior
/// outcomes.
pub enum NodeBody {
    Step { module_type: String },
    Join { join_fn: Arc<dyn JoinFn> },
}

/// One node in a [`super::Blueprint`].
pub struct BlueprintNode {
    pub name: String,
    pub body: NodeBody,
    pub stage_name: Option<String>,
}

impl BlueprintNode {
    pub fn is_join(&self) -> bool {
        matches!(self.body, NodeBody::Join { .. })
    }
}

/// Per-stage declaration: contiguous bounds on what a stage's effective
/// module list may contain, recorded at build time and enforced later
/// against effective configuration (§4.2).
#[derive(Debug, Clone, Default)]
pub struct StageContract {
    pub allow_dynamic_modules: bool,
    pub allow_shadow_modules: bool,
    pub allowed_module_types: Option<Vec<String>>,
    pub fanout_min: Option<u32>,
    pub fanout_max: Option<u32>,
}
