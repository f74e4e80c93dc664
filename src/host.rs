//! `FlowHost` (§4.6): the single entrypoint that wires a [`FlowRegistry`],
//! a [`ModuleCatalog`], a [`ConfigProvider`], an optional [`QosProvider`],
//! and the stateless plan compiler into one `execute` call.
//!
//! Grounded on the teacher's `App`: built once (after a `GraphBuilder`
//! compiles its nodes) and then driven many times concurrently via
//! `App::invoke`/`App::run`. `FlowHost` plays the same role — `new`
//! freezes the registry and catalog it's handed, and `execute` is safe to
//! call from as many concurrent tasks as the caller likes.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::config::provider::ConfigProvider;
use crate::context::FlowContext;
use crate::engine::ExecutionEngine;
use crate::engine_config::EngineConfig;
use crate::error::FlowHostError;
use crate::explain::{ExecExplain, ExplainLevel};
use crate::outcome::Outcome;
use crate::patch::evaluator::PatchEvaluator;
use crate::patch::gate::SelectorRegistry;
use crate::plan::{compile, PlanTemplate};
use crate::qos::QosProvider;
use crate::registry::{FlowRegistry, ModuleCatalog};
use crate::bulkhead::Bulkhead;
use crate::typed::{box_value, downcast_value, TypeTag};

type PlanCacheKey = (String, u64);

/// One slot in the single-flight plan cache: either a future compilation
/// other callers should await, or a finished, reusable plan. Shaped the
/// same way [`crate::context::FlowContext`]'s per-request memo table is —
/// a `tokio::sync::broadcast` channel that losers subscribe to, with the
/// lead caller publishing the result once and caching it for everyone
/// after.
enum PlanSlot {
    Pending(tokio::sync::broadcast::Sender<Arc<PlanTemplate>>),
    Done(Arc<PlanTemplate>),
}

/// Outcome of [`FlowHost::resolve_plan`]'s single-flight lookup.
enum PlanLookup {
    Ready(Arc<PlanTemplate>),
    Lead,
    Wait(tokio::sync::broadcast::Receiver<Arc<PlanTemplate>>),
}

struct Inner {
    registry: FlowRegistry,
    catalog: Arc<ModuleCatalog>,
    config: Arc<dyn ConfigProvider>,
    qos: Option<Arc<dyn QosProvider>>,
    evaluator: PatchEvaluator,
    engine: ExecutionEngine,
    plan_cache: Mutex<FxHashMap<PlanCacheKey, PlanSlot>>,
    engine_config: EngineConfig,
}

/// The process-wide orchestration entrypoint. Cheap to clone: every field
/// is `Arc`'d or lock-guarded internally, so handing a clone to each
/// request-handling task is the intended usage, matching how the teacher
/// hands `Arc<App>` to its own request-serving tasks.
#[derive(Clone)]
pub struct FlowHost {
    inner: Arc<Inner>,
}

impl FlowHost {
    /// Freeze `registry` and `catalog` and pair them with the given
    /// collaborators. `selectors` feeds gate evaluation during stage
    /// fan-out; `qos` defaults flow execution to [`EngineConfig`]'s
    /// `default_qos_tier` when absent, per §4.6 step 4. Uses
    /// `EngineConfig::default()`; use [`Self::with_engine_config`] to
    /// override process-wide defaults explicitly.
    pub fn new(
        registry: FlowRegistry,
        catalog: ModuleCatalog,
        config: Arc<dyn ConfigProvider>,
        qos: Option<Arc<dyn QosProvider>>,
        selectors: Option<Arc<SelectorRegistry>>,
    ) -> Self {
        Self::with_engine_config(registry, catalog, config, qos, selectors, EngineConfig::default())
    }

    /// As [`Self::new`], but with an explicit [`EngineConfig`] instead of
    /// one resolved from the process environment.
    pub fn with_engine_config(
        registry: FlowRegistry,
        catalog: ModuleCatalog,
        config: Arc<dyn ConfigProvider>,
        qos: Option<Arc<dyn QosProvider>>,
        selectors: Option<Arc<SelectorRegistry>>,
        engine_config: EngineConfig,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let engine = ExecutionEngine::new(catalog.clone(), Arc::new(Bulkhead::new()), selectors);
        Self {
            inner: Arc::new(Inner {
                registry,
                catalog,
                config,
                qos,
                evaluator: PatchEvaluator::new(),
                engine,
                plan_cache: Mutex::new(FxHashMap::default()),
                engine_config,
            }),
        }
    }

    /// Run `flow_name` against `req`, producing `Outcome<Resp>`.
    ///
    /// Fails synchronously (before any node runs) on: an unregistered flow
    /// name, a `Req`/`Resp` type mismatch against the flow's registered
    /// signature, an unavailable configuration snapshot, or a structural
    /// plan-compilation error. All of these are programmer/operational
    /// errors, not flow outcomes — see the crate-level docs for the split
    /// this mirrors.
    #[instrument(skip(self, req, ctx), fields(flow = flow_name), err)]
    pub async fn execute<Req, Resp>(
        &self,
        flow_name: &str,
        req: Req,
        ctx: &Arc<FlowContext>,
    ) -> Result<Outcome<Resp>, FlowHostError>
    where
        Req: Send + Sync + 'static,
        Resp: Send + Sync + Clone + 'static,
    {
        let registration = self
            .inner
            .registry
            .get(flow_name)
            .ok_or_else(|| FlowHostError::FlowNotRegistered(flow_name.to_string()))?;

        let req_type = TypeTag::of::<Req>();
        let resp_type = TypeTag::of::<Resp>();
        if registration.request_type != req_type {
            return Err(FlowHostError::SignatureMismatch {
                flow: flow_name.to_string(),
                expected: registration.request_type.name(),
                actual: req_type.name(),
            });
        }
        if registration.response_type != resp_type {
            return Err(FlowHostError::SignatureMismatch {
                flow: flow_name.to_string(),
                expected: registration.response_type.name(),
                actual: resp_type.name(),
            });
        }

        let snapshot = match ctx.cached_config_snapshot() {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = self
                    .inner
                    .config
                    .get_snapshot(flow_name)
                    .await
                    .map_err(|_| FlowHostError::ConfigUnavailable {
                        flow: flow_name.to_string(),
                    })?;
                ctx.cache_config_snapshot(snapshot.clone());
                snapshot
            }
        };

        let plan = self
            .resolve_plan(flow_name, &registration.blueprint, snapshot.config_version)
            .await?;

        let qos_decision = match &self.inner.qos {
            Some(provider) => provider.select(flow_name, ctx).await,
            None => crate::qos::QosDecision::tier_only(self.inner.engine_config.default_qos_tier),
        };

        let evaluated = self
            .inner
            .evaluator
            .evaluate(
                flow_name,
                &snapshot,
                &ctx.request_options.variants,
                qos_decision.tier,
                chrono::Utc::now(),
            )
            .map_err(|_| FlowHostError::ConfigUnavailable {
                flow: flow_name.to_string(),
            })?;

        let flow_start = Instant::now();
        let outcome = self
            .inner
            .engine
            .execute(
                &plan,
                &registration.blueprint,
                box_value(req),
                ctx,
                &evaluated,
                qos_decision.tier,
            )
            .await;
        let flow_duration_ms = flow_start.elapsed().as_millis() as u64;

        if let Some(sink) = &ctx.explain {
            let builder = std::mem::take(&mut *sink.lock());
            let explain = ExecExplain {
                flow_name: flow_name.to_string(),
                requested_level: ExplainLevel::Full,
                effective_level: ExplainLevel::Full,
                plan_hash: plan.plan_hash_hex(),
                config_version: snapshot.config_version,
                overlays_applied: evaluated.overlays_applied.clone(),
                variants: ctx.request_options.variants.clone().into_iter().collect(),
                qos_tier: qos_decision.tier,
                qos_reason_code: qos_decision.reason_code.clone(),
                qos_signals: qos_decision.signals.clone(),
                flow_duration_ms,
                nodes: builder.nodes,
                stage_modules: builder.stage_modules,
                emergency_ignored_reason_code: builder.emergency_ignored_reason_code.or_else(|| {
                    evaluated.emergency_ignored_reason_code.clone()
                }),
                effective_params: evaluated.effective_params.clone(),
            };
            ctx.publish_explain(explain);
        }

        Ok(match outcome {
            Outcome::Unspecified => Outcome::Unspecified,
            Outcome::Ok(value) => Outcome::Ok(downcast_resp::<Resp>(value)),
            Outcome::Error(code) => Outcome::Error(code),
            Outcome::Timeout(code) => Outcome::Timeout(code),
            Outcome::Skipped(code) => Outcome::Skipped(code),
            Outcome::Fallback(value, code) => Outcome::Fallback(downcast_resp::<Resp>(value), code),
            Outcome::Canceled(code) => Outcome::Canceled(code),
        })
    }

    /// Resolve `flow_name`'s plan for `config_version`, compiling on a
    /// cache miss. Concurrent callers racing for the same
    /// `(flow_name, config_version)` share a single compilation: the
    /// first caller compiles, subsequent callers subscribe to its
    /// broadcast and receive the same `Arc<PlanTemplate>`.
    #[instrument(skip(self, blueprint), fields(flow = flow_name, config_version), err)]
    async fn resolve_plan(
        &self,
        flow_name: &str,
        blueprint: &crate::blueprint::Blueprint,
        config_version: u64,
    ) -> Result<Arc<PlanTemplate>, FlowHostError> {
        let key: PlanCacheKey = (flow_name.to_string(), config_version);

        loop {
            let lookup = {
                let mut cache = self.inner.plan_cache.lock();
                match cache.get(&key) {
                    Some(PlanSlot::Done(plan)) => PlanLookup::Ready(plan.clone()),
                    Some(PlanSlot::Pending(tx)) => PlanLookup::Wait(tx.subscribe()),
                    None => {
                        let (tx, _rx) = tokio::sync::broadcast::channel(1);
                        cache.insert(key.clone(), PlanSlot::Pending(tx));
                        PlanLookup::Lead
                    }
                }
            };

            match lookup {
                PlanLookup::Ready(plan) => return Ok(plan),
                PlanLookup::Wait(mut rx) => match rx.recv().await {
                    Ok(plan) => return Ok(plan),
                    // Leader's compile failed and its sender was dropped
                    // without publishing; fall through and try to lead.
                    Err(_) => continue,
                },
                PlanLookup::Lead => {
                    let result = compile(blueprint, &self.inner.catalog).map(Arc::new);
                    let mut cache = self.inner.plan_cache.lock();
                    match &result {
                        Ok(plan) => {
                            if let Some(PlanSlot::Pending(tx)) = cache.get(&key) {
                                let _ = tx.send(plan.clone());
                            }
                            cache.insert(key, PlanSlot::Done(plan.clone()));
                        }
                        Err(_) => {
                            cache.remove(&key);
                        }
                    }
                    return result.map_err(FlowHostError::from);
                }
            }
        }
    }
}

fn downcast_resp<Resp: Send + Sync + Clone + 'static>(value: crate::typed::AnyBox) -> Resp {
    downcast_value::<Resp>(&value)
        .unwrap_or_else(|| {
            panic!(
                "engine produced a value whose type disagreed with the plan-compile-checked response type {}",
                std::any::type_name::<Resp>()
            )
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::BlueprintBuilder;
    use crate::cancellation::CancellationToken;
    use crate::config::provider::StaticConfigProvider;
    use crate::config::snapshot::{ConfigSnapshot, SnapshotMeta, SnapshotSource};
    use crate::context::RequestOptions;
    use crate::module::{ModuleContext, TypedModule};
    use crate::registry::FlowRegistry;
    use std::time::Duration;

    fn snapshot(patch_json: &str, config_version: u64) -> ConfigSnapshot {
        ConfigSnapshot {
            config_version,
            patch_json: patch_json.to_string(),
            meta: SnapshotMeta {
                source: SnapshotSource::Static,
                timestamp_utc: chrono::Utc::now(),
                lkg_evidence: None,
            },
        }
    }

    fn ctx() -> Arc<FlowContext> {
        let node_index: FxHashMap<String, usize> =
            [("d".to_string(), 0), ("j".to_string(), 1)].into_iter().collect();
        Arc::new(FlowContext::new(
            2,
            node_index,
            Instant::now() + Duration::from_secs(30),
            CancellationToken::new(),
            RequestOptions::default(),
            false,
        ))
    }

    fn doubling_host() -> FlowHost {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register(
                "Double",
                TypeTag::of::<u32>(),
                TypeTag::of::<u32>(),
                || {
                    Arc::new(TypedModule::new(|args: Arc<u32>, _ctx: ModuleContext| async move {
                        Outcome::ok(*args * 2)
                    })) as Arc<dyn crate::module::Module>
                },
            )
            .unwrap();

        let mut registry = FlowRegistry::new();
        let blueprint = BlueprintBuilder::new::<u32, u32>("double")
            .step("d", "Double")
            .join("j", |ctx| {
                ctx.try_get_node_outcome("d")
                    .and_then(|o| o.value().cloned())
                    .and_then(|v| downcast_value::<u32>(&v).copied())
                    .map(Outcome::ok)
                    .unwrap_or_else(|| Outcome::error("JOIN_MISSING_INPUT"))
            })
            .build()
            .unwrap();
        registry.register(blueprint, None, None).unwrap();

        let config = Arc::new(StaticConfigProvider(snapshot("{}", 1)));
        FlowHost::new(registry, catalog, config, None, None)
    }

    #[tokio::test]
    async fn executes_a_registered_flow_end_to_end() {
        let host = doubling_host();
        let outcome = host
            .execute::<u32, u32>("double", 21, &ctx())
            .await
            .unwrap();
        match outcome {
            Outcome::Ok(v) => assert_eq!(v, 42),
            other => panic!("expected Ok(42), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unregistered_flow_is_a_structural_error() {
        let host = doubling_host();
        let err = host.execute::<u32, u32>("missing", 1, &ctx()).await.unwrap_err();
        assert!(matches!(err, FlowHostError::FlowNotRegistered(_)));
    }

    #[tokio::test]
    async fn signature_mismatch_is_a_structural_error() {
        let host = doubling_host();
        let err = host
            .execute::<String, u32>("double", "nope".to_string(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowHostError::SignatureMismatch { .. }));
    }

    #[tokio::test]
    async fn concurrent_executions_share_one_plan_compilation() {
        let host = doubling_host();
        let runs = (0..8).map(|_| {
            let host = host.clone();
            tokio::spawn(async move { host.execute::<u32, u32>("double", 5, &ctx()).await })
        });
        for run in runs {
            let outcome = run.await.unwrap().unwrap();
            assert!(matches!(outcome, Outcome::Ok(10)));
        }
    }
}
