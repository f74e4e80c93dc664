//! # rorchestrator: flow orchestration core
//!
//! A staged, fan-out execution core over typed modules: flows are compiled
//! once into a [`plan::PlanTemplate`], then walked per request with
//! layered configuration overlays, gating, deadlines, bulkheads, and a
//! last-known-good config fallback.
//!
//! ## Core concepts
//!
//! - **Blueprint**: the static, immutable topology of a flow — an ordered
//!   list of steps, stages, and a terminal join — built with
//!   [`blueprint::BlueprintBuilder`].
//! - **PlanTemplate**: a [`blueprint::Blueprint`] compiled against a
//!   [`registry::ModuleCatalog`], type-checked and fingerprinted with a
//!   stable `planHash`.
//! - **PatchEvaluator**: merges a JSON overlay document (base, experiment,
//!   QoS, emergency layers) into the per-request effective configuration.
//! - **FlowHost**: the single entrypoint — looks up a flow, resolves its
//!   plan, selects a QoS tier, evaluates the overlay, and walks the plan
//!   via the [`engine::ExecutionEngine`].
//! - **Outcome**: the result algebra every module, step, stage member, and
//!   join produces — distinct from `Result`, which is reserved for
//!   structural (programmer) errors raised before a flow runs.
//!
//! ## Error model
//!
//! Two independent channels, never converted into one another:
//!
//! - [`outcome::Outcome<T>`] — a runtime result a flow can recover from
//!   (non-fatal failure, timeout, skip, degraded fallback, cancellation).
//!   Every plan node resolves to exactly one `Outcome`.
//! - [`error`] — `thiserror`-derived structural errors
//!   ([`error::RegistrationError`], [`error::PlanCompileError`],
//!   [`error::FlowHostError`]) raised synchronously by registration, plan
//!   compilation, and [`host::FlowHost::execute`]'s entry validation. These
//!   are programmer/operational errors, not flow outcomes.
//!
//! A module that panics is a fatal error and is allowed to unwind; the
//! engine never wraps module execution in `catch_unwind`.
//!
//! ## Quick start
//!
//! ```
//! use rorchestrator::blueprint::BlueprintBuilder;
//! use rorchestrator::module::{ModuleContext, TypedModule};
//! use rorchestrator::outcome::Outcome;
//! use rorchestrator::registry::{FlowRegistry, ModuleCatalog};
//! use rorchestrator::typed::{downcast_value, TypeTag};
//! use std::sync::Arc;
//!
//! let mut catalog = ModuleCatalog::new();
//! catalog
//!     .register("Double", TypeTag::of::<u32>(), TypeTag::of::<u32>(), || {
//!         Arc::new(TypedModule::new(|args: Arc<u32>, _ctx: ModuleContext| async move {
//!             Outcome::ok(*args * 2)
//!         })) as Arc<dyn rorchestrator::module::Module>
//!     })
//!     .unwrap();
//!
//! let mut registry = FlowRegistry::new();
//! let blueprint = BlueprintBuilder::new::<u32, u32>("double")
//!     .step("d", "Double")
//!     .join("j", |ctx| {
//!         ctx.try_get_node_outcome("d")
//!             .and_then(|o| o.value().cloned())
//!             .and_then(|v| downcast_value::<u32>(&v).copied())
//!             .map(Outcome::ok)
//!             .unwrap_or_else(|| Outcome::error("JOIN_MISSING_INPUT"))
//!     })
//!     .build()
//!     .unwrap();
//! registry.register(blueprint, None, None).unwrap();
//! ```
//!
//! ## Module guide
//!
//! - [`blueprint`] — static flow topology and its fluent builder
//! - [`plan`] — the compiled, hashed `PlanTemplate`
//! - [`registry`] — `FlowRegistry`/`ModuleCatalog`, write-once bootstrap maps
//! - [`module`] — the `Module` extension point and `TypedModule` adapter
//! - [`patch`] — patch document, merge, gate evaluation, and the evaluator
//! - [`config`] — config snapshots, providers, LKG fallback, validation
//! - [`context`] — per-request `FlowContext`: cancellation, deadline, memo
//! - [`engine`] — the execution engine: plain nodes and stage fan-out
//! - [`engine_config`] — process-wide defaults (`EngineConfig`)
//! - [`host`] — `FlowHost`, the top-level `execute` entrypoint
//! - [`outcome`] — the `Outcome<T>` result algebra
//! - [`typed`] — reflection-free type identity and value boxing
//! - [`qos`] — QoS tier selection
//! - [`bulkhead`] — process-wide concurrency-limiting semaphores
//! - [`cancellation`] — a minimal cooperative cancellation signal
//! - [`explain`] — structured per-request execution telemetry
//! - [`metrics`] — instrument name constants and emission helpers
//! - [`error`] — structural (programmer) error types

pub mod blueprint;
pub mod bulkhead;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod engine;
pub mod engine_config;
pub mod error;
pub mod explain;
pub mod host;
pub mod metrics;
pub mod module;
pub mod outcome;
pub mod patch;
pub mod plan;
pub mod qos;
pub mod registry;
pub mod typed;
