//! The `Module` extension point: a typed computation unit `Args → Outcome<Resp>`
//! supplied by a [`crate::registry::ModuleCatalog`].
//!
//! Grounded on the teacher's `Node` trait (`async fn run(&self, snapshot,
//! ctx) -> Result<NodePartial, NodeError>`): a single async trait method,
//! a context struct carrying per-invocation identity plus a handle back to
//! the shared request state. The difference from `Node` is intentional —
//! modules are heterogeneous across the catalog (different `Args`/`Resp`
//! per type name), so the trait boundary is type-erased via
//! [`crate::typed::AnyBox`], with [`TypedModule`] restoring ergonomic,
//! strongly-typed authoring.
//!
//! Modules never return a `Result`: every non-fatal failure is encoded as
//! an [`Outcome`] variant directly, matching §7 of the crate's error
//! model. A module that panics is a fatal error and is allowed to unwind;
//! the engine does not call `catch_unwind` around module execution.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::FlowContext;
use crate::outcome::Outcome;
use crate::typed::{AnyBox, TypeTag};

/// Per-invocation context passed to a module's `execute`.
pub struct ModuleContext {
    /// The module's input: the original request for the first node in a
    /// flow, or the preceding node's output otherwise.
    pub args: AnyBox,
    /// The node name (step) or module-spec id (stage fan-out member).
    pub module_id: String,
    /// The module's registered catalog type name.
    pub type_name: String,
    /// Shared per-request state: cancellation, deadline, node outcomes.
    pub flow: Arc<FlowContext>,
}

impl ModuleContext {
    /// Downcast [`Self::args`] to the expected argument type.
    ///
    /// Returns `None` on a type mismatch; the plan compiler is responsible
    /// for ensuring this never happens for a correctly compiled plan, so a
    /// `None` here indicates an engine bug, not a runtime outcome.
    pub fn args_as<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::downcast::<T>(self.args.clone()).ok()
    }
}

/// A type-erased, catalog-registered computation unit.
#[async_trait]
pub trait Module: Send + Sync {
    /// The type identity of the argument this module expects.
    fn args_type(&self) -> TypeTag;
    /// The type identity of the value this module produces.
    fn response_type(&self) -> TypeTag;
    /// Run the module to completion, producing a type-erased outcome.
    async fn execute(&self, ctx: ModuleContext) -> Outcome<AnyBox>;
}

/// A factory that builds a fresh [`Module`] instance per flow execution,
/// matching the catalog entry `factory(serviceProvider) → Module`.
pub trait ModuleFactory: Send + Sync {
    fn create(&self) -> Arc<dyn Module>;
}

impl<F> ModuleFactory for F
where
    F: Fn() -> Arc<dyn Module> + Send + Sync,
{
    fn create(&self) -> Arc<dyn Module> {
        (self)()
    }
}

/// Adapts a strongly-typed async closure `Fn(Arc<Args>, ModuleContext) ->
/// Outcome<Resp>` into a type-erased [`Module`], so module authors never
/// touch [`crate::typed::AnyBox`] directly.
pub struct TypedModule<Args, Resp, F> {
    f: F,
    _marker: std::marker::PhantomData<fn(Args) -> Resp>,
}

impl<Args, Resp, F, Fut> TypedModule<Args, Resp, F>
where
    Args: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
    F: Fn(Arc<Args>, ModuleContext) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome<Resp>> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<Args, Resp, F, Fut> Module for TypedModule<Args, Resp, F>
where
    Args: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
    F: Fn(Arc<Args>, ModuleContext) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome<Resp>> + Send,
{
    fn args_type(&self) -> TypeTag {
        TypeTag::of::<Args>()
    }

    fn response_type(&self) -> TypeTag {
        TypeTag::of::<Resp>()
    }

    async fn execute(&self, ctx: ModuleContext) -> Outcome<AnyBox> {
        let Some(args) = ctx.args_as::<Args>() else {
            return Outcome::error("ARGS_TYPE_MISMATCH");
        };
        let module_id = ctx.module_id.clone();
        let type_name = ctx.type_name.clone();
        let flow = ctx.flow.clone();
        let inner_ctx = ModuleContext {
            args: ctx.args.clone(),
            module_id,
            type_name,
            flow,
        };
        match (self.f)(args, inner_ctx).await {
            Outcome::Unspecified => Outcome::Unspecified,
            Outcome::Ok(v) => Outcome::Ok(crate::typed::box_value(v)),
            Outcome::Error(c) => Outcome::Error(c),
            Outcome::Timeout(c) => Outcome::Timeout(c),
            Outcome::Skipped(c) => Outcome::Skipped(c),
            Outcome::Fallback(v, c) => Outcome::Fallback(crate::typed::box_value(v), c),
            Outcome::Canceled(c) => Outcome::Canceled(c),
        }
    }
}
