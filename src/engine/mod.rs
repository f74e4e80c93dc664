//! The execution engine (§4.8): a sequential walk over a compiled plan that
//! runs stage fan-out concurrently, honoring gating, priority/fanout trim,
//! bulkheads, memoization, shadow execution, and deadline/cancellation.

mod stage;

use std::sync::Arc;
use std::time::Instant;

use crate::blueprint::Blueprint;
use crate::bulkhead::Bulkhead;
use crate::context::FlowContext;
use crate::explain::NodeRecord;
use crate::metrics;
use crate::outcome::Outcome;
use crate::patch::evaluator::EvaluatedFlow;
use crate::patch::gate::SelectorRegistry;
use crate::plan::{PlanNodeKind, PlanTemplate};
use crate::qos::QosTier;
use crate::registry::ModuleCatalog;
use crate::typed::AnyBox;

/// What the engine should do after a plain (non-stage) node finishes.
enum Continuation {
    /// Keep walking with this value threaded as the next node's args.
    Advance(AnyBox),
    /// Stop the walk now and return this as the flow's outcome.
    Terminate(Outcome<AnyBox>),
}

/// Walks one [`PlanTemplate`] to completion for one request.
///
/// Holds the shared, process-wide collaborators a stage fan-out needs
/// (the module catalog, the bulkhead, the optional selector registry); the
/// plan, blueprint, and evaluated overlay are all per-call.
pub struct ExecutionEngine {
    catalog: Arc<ModuleCatalog>,
    bulkhead: Arc<Bulkhead>,
    selectors: Option<Arc<SelectorRegistry>>,
}

impl ExecutionEngine {
    pub fn new(catalog: Arc<ModuleCatalog>, bulkhead: Arc<Bulkhead>, selectors: Option<Arc<SelectorRegistry>>) -> Self {
        Self { catalog, bulkhead, selectors }
    }

    /// Run `plan` against `request`, with `evaluated` supplying the
    /// per-request overlay and `qos_tier` the selected degradation level.
    pub async fn execute(
        &self,
        plan: &PlanTemplate,
        blueprint: &Blueprint,
        request: AnyBox,
        ctx: &Arc<FlowContext>,
        evaluated: &EvaluatedFlow,
        qos_tier: QosTier,
    ) -> Outcome<AnyBox> {
        metrics::record_qos_tier_selected(&plan.flow_name, qos_tier);

        let flow_start = Instant::now();
        let mut current_value = request;
        let mut i = 0;

        while i < plan.nodes.len() {
            if let Some(guard) = self.pre_node_guard(ctx) {
                return guard;
            }

            let node = &plan.nodes[i];
            if let Some(stage_name) = node.stage_name.clone() {
                let indices = plan.stage_node_indices(&stage_name);
                stage::run_stage(
                    &self.catalog,
                    &self.bulkhead,
                    self.selectors.as_ref(),
                    plan,
                    blueprint,
                    &stage_name,
                    evaluated,
                    &current_value,
                    ctx,
                    &plan.flow_name,
                )
                .await;
                i = indices.into_iter().max().map(|last| last + 1).unwrap_or(i + 1);

                if let Some(outcome) = self.post_stage_guard(ctx) {
                    return outcome;
                }
                continue;
            }

            let is_terminal = i + 1 == plan.nodes.len();
            let start = Instant::now();
            let outcome = self.run_plain_node(node, &current_value, ctx).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            ctx.record_node_outcome(i, outcome.clone());
            self.record_node_explain(ctx, node, &outcome, duration_ms);
            self.emit_node_metrics(&plan.flow_name, node, &outcome, duration_ms);

            match self.post_node_continuation(ctx, outcome, is_terminal) {
                Continuation::Advance(value) => {
                    current_value = value;
                    i += 1;
                }
                Continuation::Terminate(outcome) => {
                    metrics::record_flow_outcome(&plan.flow_name, outcome.kind(), flow_start.elapsed().as_millis() as u64);
                    return outcome;
                }
            }
        }

        // Plan compilation guarantees a non-empty plan whose terminal node is
        // a join, so the loop above always returns via `Continuation::Terminate`
        // on the last iteration; this is unreachable for a correctly compiled plan.
        let outcome = Outcome::error("PLAN_EXHAUSTED_WITHOUT_TERMINAL");
        metrics::record_flow_outcome(&plan.flow_name, outcome.kind(), flow_start.elapsed().as_millis() as u64);
        outcome
    }

    fn pre_node_guard(&self, ctx: &FlowContext) -> Option<Outcome<AnyBox>> {
        if ctx.is_cancelled() {
            return Some(Outcome::canceled("UPSTREAM_CANCELED"));
        }
        if ctx.deadline_exceeded() {
            return Some(Outcome::timeout("DEADLINE_EXCEEDED"));
        }
        None
    }

    /// After a stage fan-out, there is no singular node outcome to coerce,
    /// but a deadline/cancellation crossing during the fan-out still ends
    /// the flow.
    fn post_stage_guard(&self, ctx: &FlowContext) -> Option<Outcome<AnyBox>> {
        if ctx.is_cancelled() {
            return Some(Outcome::canceled("UPSTREAM_CANCELED"));
        }
        if ctx.deadline_exceeded() {
            return Some(Outcome::timeout("DEADLINE_EXCEEDED"));
        }
        None
    }

    async fn run_plain_node(&self, node: &crate::plan::PlanNode, args: &AnyBox, ctx: &Arc<FlowContext>) -> Outcome<AnyBox> {
        match &node.kind {
            PlanNodeKind::Step { module_type } => {
                let Some(module) = self.catalog.create(module_type) else {
                    return Outcome::error("MODULE_TYPE_NOT_REGISTERED");
                };
                let module_ctx = crate::module::ModuleContext {
                    args: args.clone(),
                    module_id: node.name.clone(),
                    type_name: module_type.clone(),
                    flow: ctx.clone(),
                };
                module.execute(module_ctx).await
            }
            PlanNodeKind::Join { join_fn } => join_fn.call(ctx),
        }
    }

    /// §4.8 "Deadline semantics within a node": a node that returned
    /// normally but whose deadline has since passed (or whose context was
    /// cancelled mid-execution) still terminates the flow with
    /// `Timeout`/`Canceled`, even though its own recorded outcome keeps the
    /// real return value. A non-value outcome (anything but `Ok`/`Fallback`)
    /// also ends the walk early: the next node's args type is the previous
    /// node's declared output type, which only a value-carrying outcome can
    /// supply.
    fn post_node_continuation(&self, ctx: &FlowContext, outcome: Outcome<AnyBox>, is_terminal: bool) -> Continuation {
        if ctx.is_cancelled() {
            return Continuation::Terminate(Outcome::canceled("UPSTREAM_CANCELED"));
        }
        if ctx.deadline_exceeded() {
            return Continuation::Terminate(Outcome::timeout("DEADLINE_EXCEEDED"));
        }
        if is_terminal {
            return Continuation::Terminate(outcome);
        }
        match outcome.value().cloned() {
            Some(value) => Continuation::Advance(value),
            None => Continuation::Terminate(outcome),
        }
    }

    fn record_node_explain(&self, ctx: &FlowContext, node: &crate::plan::PlanNode, outcome: &Outcome<AnyBox>, duration_ms: u64) {
        let Some(sink) = &ctx.explain else {
            return;
        };
        let (kind, module_type) = match &node.kind {
            PlanNodeKind::Step { module_type } => ("step", Some(module_type.clone())),
            PlanNodeKind::Join { .. } => ("join", None),
        };
        sink.lock().nodes.push(NodeRecord {
            kind,
            name: node.name.clone(),
            stage_name: node.stage_name.clone(),
            module_type,
            duration_ms,
            outcome_kind: outcome.kind(),
            outcome_code: outcome.code().map(str::to_string),
        });
    }

    fn emit_node_metrics(&self, flow_name: &str, node: &crate::plan::PlanNode, outcome: &Outcome<AnyBox>, duration_ms: u64) {
        match &node.kind {
            PlanNodeKind::Step { module_type } => {
                let skip_code = matches!(outcome, Outcome::Skipped(_)).then(|| outcome.code()).flatten();
                metrics::record_step_outcome(flow_name, Some(module_type.as_str()), outcome.kind(), skip_code, duration_ms);
            }
            PlanNodeKind::Join { .. } => {
                metrics::record_join_outcome(flow_name, outcome.kind(), duration_ms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::BlueprintBuilder;
    use crate::context::test_support::{context_with_nodes, fixture_context};
    use crate::module::{ModuleContext, TypedModule};
    use crate::patch::evaluator::EvaluatedFlow;
    use crate::registry::ModuleCatalog;
    use crate::typed::{box_value, TypeTag};
    use std::collections::BTreeMap;

    fn empty_evaluated_flow() -> EvaluatedFlow {
        EvaluatedFlow {
            config_version: 1,
            effective_params: None,
            stages: BTreeMap::new(),
            overlays_applied: Vec::new(),
            emergency_ignored_reason_code: None,
            limits: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn plain_step_then_join_advances_and_terminates() {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register("Double", TypeTag::of::<u32>(), TypeTag::of::<u32>(), || {
                Arc::new(TypedModule::new(|args: Arc<u32>, _ctx: ModuleContext| async move { Outcome::ok(*args * 2) }))
                    as Arc<dyn crate::module::Module>
            })
            .unwrap();
        let blueprint = BlueprintBuilder::new::<u32, u32>("f")
            .step("double", "Double")
            .join("combine", |ctx| match ctx.try_get_node_outcome("double") {
                Some(Outcome::Ok(v)) => Outcome::ok(*crate::typed::downcast_value::<u32>(&v).unwrap()),
                _ => Outcome::error("MISSING_UPSTREAM"),
            })
            .build()
            .unwrap();
        let plan = crate::plan::compile(&blueprint, &catalog).unwrap();

        let ctx = Arc::new(context_with_nodes(&["double", "combine"]));
        let engine = ExecutionEngine::new(Arc::new(catalog), Arc::new(Bulkhead::new()), None);
        let outcome = engine
            .execute(&plan, &blueprint, box_value(21u32), &ctx, &empty_evaluated_flow(), QosTier::Full)
            .await;
        match outcome {
            Outcome::Ok(v) => assert_eq!(*crate::typed::downcast_value::<u32>(&v).unwrap(), 42),
            other => panic!("expected Ok(42), got outcome kind {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn step_error_short_circuits_before_join() {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register("Fails", TypeTag::of::<u32>(), TypeTag::of::<u32>(), || {
                Arc::new(TypedModule::new(|_args: Arc<u32>, _ctx: ModuleContext| async move {
                    Outcome::<u32>::error("BOOM")
                })) as Arc<dyn crate::module::Module>
            })
            .unwrap();
        let blueprint = BlueprintBuilder::new::<u32, u32>("f")
            .step("a", "Fails")
            .join("j", |_ctx| Outcome::ok(0u32))
            .build()
            .unwrap();
        let plan = crate::plan::compile(&blueprint, &catalog).unwrap();

        let ctx = Arc::new(fixture_context());
        let engine = ExecutionEngine::new(Arc::new(catalog), Arc::new(Bulkhead::new()), None);
        let outcome = engine
            .execute(&plan, &blueprint, box_value(1u32), &ctx, &empty_evaluated_flow(), QosTier::Full)
            .await;
        assert_eq!(outcome.code(), Some("BOOM"));
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_any_node_runs() {
        let catalog = ModuleCatalog::new();
        let blueprint = BlueprintBuilder::new::<u32, u32>("f").join("j", |_ctx| Outcome::ok(7u32)).build().unwrap();
        let plan = crate::plan::compile(&blueprint, &catalog).unwrap();

        let ctx = fixture_context();
        ctx.cancellation.cancel();
        let ctx = Arc::new(ctx);
        let engine = ExecutionEngine::new(Arc::new(catalog), Arc::new(Bulkhead::new()), None);
        let outcome = engine
            .execute(&plan, &blueprint, box_value(1u32), &ctx, &empty_evaluated_flow(), QosTier::Full)
            .await;
        assert_eq!(outcome.kind(), crate::outcome::OutcomeKind::Canceled);
        assert_eq!(outcome.code(), Some("UPSTREAM_CANCELED"));
    }
}
