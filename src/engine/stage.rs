//! Stage fan-out (§4.8 "Stage node"): resolves a stage's effective module
//! list, filters/trims/gates it, then runs the survivors concurrently under
//! the bulkhead and per-request memo table.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;

use crate::blueprint::Blueprint;
use crate::bulkhead::{Bulkhead, BulkheadDenied};
use crate::context::{FlowContext, MemoAcquisition};
use crate::explain::StageModuleRecord;
use crate::metrics;
use crate::outcome::Outcome;
use crate::patch::evaluator::{EvaluatedFlow, EvaluatedStage, ModuleDecision};
use crate::patch::gate::{evaluate_gate, GateDecision, SelectorRegistry};
use crate::plan::{PlanNodeKind, PlanTemplate};
use crate::registry::ModuleCatalog;
use crate::typed::AnyBox;

/// One member of a stage's effective module list, tying a [`ModuleDecision`]
/// back to the blueprint node it overrides (if any).
struct StageMember {
    plan_index: Option<usize>,
    is_override: bool,
    decision: ModuleDecision,
}

/// Merge the blueprint's declared step nodes for `stage_name` with the
/// patch-evaluated stage (§4.8: "the merged modules ... intersected with the
/// blueprint's declared step nodes"). A module id not present in the
/// blueprint is only kept when the stage's contract allows dynamic modules;
/// shadow modules similarly require `allow_shadow_modules` (defaulting to
/// allowed, since most stages have no contract at all).
fn effective_stage_members(
    blueprint: &Blueprint,
    plan: &PlanTemplate,
    stage_name: &str,
    evaluated_stage: Option<&EvaluatedStage>,
) -> (Vec<StageMember>, Vec<StageMember>) {
    let mut order = Vec::new();
    let mut by_id = rustc_hash::FxHashMap::default();

    for idx in plan.stage_node_indices(stage_name) {
        let node = &plan.nodes[idx];
        let PlanNodeKind::Step { module_type } = &node.kind else {
            continue;
        };
        order.push(node.name.clone());
        by_id.insert(
            node.name.clone(),
            StageMember {
                plan_index: Some(idx),
                is_override: false,
                decision: ModuleDecision {
                    id: node.name.clone(),
                    module_type: Some(module_type.clone()),
                    params: None,
                    enabled: true,
                    disabled_by_emergency: false,
                    priority: 0,
                    limit_key: None,
                    gate: None,
                    shadow_sample_bps: None,
                    memo_key: None,
                },
            },
        );
    }

    let contract = blueprint.stage_contracts.get(stage_name);
    let allow_dynamic = contract.map(|c| c.allow_dynamic_modules).unwrap_or(false);
    let allow_shadow = contract.map(|c| c.allow_shadow_modules).unwrap_or(true);

    let mut shadow_members = Vec::new();

    if let Some(stage) = evaluated_stage {
        for decision in &stage.modules {
            if let Some(existing) = by_id.get_mut(&decision.id) {
                existing.is_override = true;
                existing.decision = decision.clone();
            } else if allow_dynamic {
                order.push(decision.id.clone());
                by_id.insert(
                    decision.id.clone(),
                    StageMember { plan_index: None, is_override: true, decision: decision.clone() },
                );
            }
        }
        if allow_shadow {
            shadow_members = stage
                .shadow_modules
                .iter()
                .cloned()
                .map(|decision| StageMember { plan_index: None, is_override: true, decision })
                .collect();
        }
    }

    let main_members = order.into_iter().filter_map(|id| by_id.remove(&id)).collect();
    (main_members, shadow_members)
}

fn resolve_limit_key(decision: &ModuleDecision) -> String {
    decision
        .limit_key
        .clone()
        .or_else(|| decision.module_type.clone())
        .unwrap_or_else(|| decision.id.clone())
}

/// Preliminary admission decision from the eligibility filter, before the
/// priority/fanout trim.
enum Eligibility {
    Eligible { gate: Option<GateDecision> },
    Skip { code: &'static str, gate: Option<GateDecision> },
}

fn evaluate_eligibility(
    decision: &ModuleDecision,
    variants: &std::collections::BTreeMap<String, String>,
    selectors: Option<&SelectorRegistry>,
    ctx: &FlowContext,
) -> Eligibility {
    if !decision.enabled {
        return Eligibility::Skip { code: "DISABLED", gate: None };
    }
    match &decision.gate {
        Some(gate) => {
            let decision = evaluate_gate(gate, variants, selectors, ctx);
            if decision.allowed {
                Eligibility::Eligible { gate: Some(decision) }
            } else {
                Eligibility::Skip { code: "GATE_FALSE", gate: Some(decision) }
            }
        }
        None => Eligibility::Eligible { gate: None },
    }
}

/// The outcome of running (or skipping) one main-list stage member, plus
/// everything needed to populate its [`StageModuleRecord`].
struct MemberResult {
    plan_index: Option<usize>,
    decision: ModuleDecision,
    is_override: bool,
    limit_key: String,
    gate: Option<GateDecision>,
    outcome: Outcome<AnyBox>,
    duration_ms: u64,
    memo_hit: bool,
}

#[allow(clippy::too_many_arguments)]
async fn run_member(
    catalog: Arc<ModuleCatalog>,
    bulkhead: Arc<Bulkhead>,
    ctx: Arc<FlowContext>,
    flow_name: String,
    stage_name: String,
    current_value: AnyBox,
    limit_key: String,
    configured_capacity: Option<u32>,
    decision: ModuleDecision,
) -> (Outcome<AnyBox>, u64, bool) {
    let start = Instant::now();

    if let Some(memo_key) = &decision.memo_key {
        match ctx.memo_acquire(&flow_name, &stage_name, memo_key).await {
            MemoAcquisition::Hit(outcome) => {
                return (outcome, start.elapsed().as_millis() as u64, true);
            }
            MemoAcquisition::LeadFailed | MemoAcquisition::Lead(_) => {}
        }
    }

    let Some(module_type) = decision.module_type.clone() else {
        let outcome = Outcome::error("MODULE_TYPE_MISSING");
        if let Some(memo_key) = &decision.memo_key {
            ctx.publish_memo(&flow_name, &stage_name, memo_key, outcome.clone());
        }
        return (outcome, start.elapsed().as_millis() as u64, false);
    };

    let permit = bulkhead
        .acquire(&limit_key, configured_capacity, &ctx.cancellation, ctx.deadline)
        .await;
    let outcome = match permit {
        Err(BulkheadDenied::DeadlineExceeded) => Outcome::skipped("BULKHEAD_TIMEOUT"),
        Err(BulkheadDenied::Canceled) => Outcome::canceled("UPSTREAM_CANCELED"),
        Ok(permit) => match catalog.create(&module_type) {
            Some(module) => {
                let module_ctx = crate::module::ModuleContext {
                    args: current_value,
                    module_id: decision.id.clone(),
                    type_name: module_type,
                    flow: ctx.clone(),
                };
                let result = module.execute(module_ctx).await;
                drop(permit);
                result
            }
            None => {
                drop(permit);
                Outcome::error("MODULE_TYPE_NOT_REGISTERED")
            }
        },
    };

    if let Some(memo_key) = &decision.memo_key {
        ctx.publish_memo(&flow_name, &stage_name, memo_key, outcome.clone());
    }

    (outcome, start.elapsed().as_millis() as u64, false)
}

/// Run one stage to completion: resolve the effective module list, filter,
/// trim, fan out the survivors, record node outcomes / `ExecExplain` /
/// metrics, and best-effort-fire shadow modules.
#[allow(clippy::too_many_arguments)]
pub(super) async fn run_stage(
    catalog: &Arc<ModuleCatalog>,
    bulkhead: &Arc<Bulkhead>,
    selectors: Option<&Arc<SelectorRegistry>>,
    plan: &PlanTemplate,
    blueprint: &Blueprint,
    stage_name: &str,
    evaluated: &EvaluatedFlow,
    current_value: &AnyBox,
    ctx: &Arc<FlowContext>,
    flow_name: &str,
) {
    let evaluated_stage = evaluated.stages.get(stage_name);
    let (main_members, shadow_members) = effective_stage_members(blueprint, plan, stage_name, evaluated_stage);
    let variants = &ctx.request_options.variants;

    let mut eligible = Vec::new();
    let mut finished: Vec<MemberResult> = Vec::new();

    for member in main_members {
        let limit_key = resolve_limit_key(&member.decision);
        match evaluate_eligibility(&member.decision, variants, selectors.map(Arc::as_ref), ctx) {
            Eligibility::Skip { code, gate } => finished.push(MemberResult {
                plan_index: member.plan_index,
                decision: member.decision,
                is_override: member.is_override,
                limit_key,
                gate,
                outcome: Outcome::skipped(code),
                duration_ms: 0,
                memo_hit: false,
            }),
            Eligibility::Eligible { gate } => eligible.push((member, limit_key, gate)),
        }
    }

    // Priority desc, declaration order asc (stable sort preserves ties).
    eligible.sort_by(|(a, ..), (b, ..)| b.decision.priority.cmp(&a.decision.priority));

    let fanout_max = evaluated_stage.and_then(|s| s.fanout_max).filter(|&m| m > 0).map(|m| m as usize);
    let selected_count = fanout_max.unwrap_or(eligible.len()).min(eligible.len());

    let mut selected = Vec::with_capacity(selected_count);
    for (i, (member, limit_key, gate)) in eligible.into_iter().enumerate() {
        if i < selected_count {
            selected.push((member, limit_key, gate));
        } else {
            finished.push(MemberResult {
                plan_index: member.plan_index,
                decision: member.decision,
                is_override: member.is_override,
                limit_key,
                gate,
                outcome: Outcome::skipped("FANOUT_TRIM"),
                duration_ms: 0,
                memo_hit: false,
            });
        }
    }

    let limits = &evaluated.limits;
    let selected_futures = selected.into_iter().map(|(member, limit_key, gate)| {
        let configured_capacity = limits.get(&limit_key).copied();
        let fut = run_member(
            catalog.clone(),
            bulkhead.clone(),
            ctx.clone(),
            flow_name.to_string(),
            stage_name.to_string(),
            current_value.clone(),
            limit_key.clone(),
            configured_capacity,
            member.decision.clone(),
        );
        async move {
            let (outcome, duration_ms, memo_hit) = fut.await;
            MemberResult {
                plan_index: member.plan_index,
                decision: member.decision,
                is_override: member.is_override,
                limit_key,
                gate,
                outcome,
                duration_ms,
                memo_hit,
            }
        }
    });
    finished.extend(join_all(selected_futures).await);

    // Re-establish declaration order: members that never ran (skipped early)
    // were pushed before selected ones finished.
    finished.sort_by_key(|r| member_order_key(&r.decision.id, plan, stage_name));

    for result in finished {
        if let Some(idx) = result.plan_index {
            ctx.record_node_outcome(idx, result.outcome.clone());
        }
        metrics::record_step_outcome(
            flow_name,
            result.decision.module_type.as_deref(),
            result.outcome.kind(),
            matches!(result.outcome, Outcome::Skipped(_)).then(|| result.outcome.code()).flatten(),
            result.duration_ms,
        );
        if let Some(sink) = &ctx.explain {
            sink.lock().stage_modules.push(StageModuleRecord {
                id: result.decision.id.clone(),
                module_type: result.decision.module_type.clone().unwrap_or_default(),
                limit_key: result.limit_key,
                priority: result.decision.priority,
                duration_ms: result.duration_ms,
                outcome_kind: result.outcome.kind(),
                outcome_code: result.outcome.code().map(str::to_string),
                gate_decision_code: result.gate.as_ref().map(|g| g.code),
                gate_reason_code: result.gate.as_ref().map(|g| g.reason_code.wire()),
                gate_selector_name: result.gate.as_ref().and_then(|g| g.selector_name.clone()),
                is_shadow: false,
                shadow_sample_bps: result.decision.shadow_sample_bps.unwrap_or(0),
                is_override: result.is_override,
                memo_hit: result.memo_hit,
            });
        }
    }

    for member in shadow_members {
        spawn_shadow(catalog.clone(), bulkhead.clone(), ctx.clone(), flow_name.to_string(), stage_name.to_string(), current_value.clone(), member);
    }
}

/// Declaration order is the blueprint's node order for plan-backed members
/// and appended-patch order otherwise; since both lists were built
/// preserving that order already, looking the id back up against the plan
/// is enough to re-sort after `join_all` scrambled it.
fn member_order_key(id: &str, plan: &PlanTemplate, stage_name: &str) -> usize {
    plan.stage_node_indices(stage_name)
        .into_iter()
        .find(|&i| plan.nodes[i].name == id)
        .unwrap_or(usize::MAX)
}

fn spawn_shadow(
    catalog: Arc<ModuleCatalog>,
    bulkhead: Arc<Bulkhead>,
    ctx: Arc<FlowContext>,
    flow_name: String,
    stage_name: String,
    current_value: AnyBox,
    member: StageMember,
) {
    tokio::spawn(async move {
        let limit_key = resolve_limit_key(&member.decision);
        let configured_capacity = None;
        let (outcome, duration_ms, memo_hit) = run_member(
            catalog,
            bulkhead,
            ctx.clone(),
            flow_name.clone(),
            stage_name,
            current_value,
            limit_key.clone(),
            configured_capacity,
            member.decision.clone(),
        )
        .await;
        metrics::record_step_outcome(
            &flow_name,
            member.decision.module_type.as_deref(),
            outcome.kind(),
            matches!(outcome, Outcome::Skipped(_)).then(|| outcome.code()).flatten(),
            duration_ms,
        );
        if let Some(sink) = &ctx.explain {
            sink.lock().stage_modules.push(StageModuleRecord {
                id: member.decision.id.clone(),
                module_type: member.decision.module_type.clone().unwrap_or_default(),
                limit_key,
                priority: member.decision.priority,
                duration_ms,
                outcome_kind: outcome.kind(),
                outcome_code: outcome.code().map(str::to_string),
                gate_decision_code: None,
                gate_reason_code: None,
                gate_selector_name: None,
                is_shadow: true,
                shadow_sample_bps: member.decision.shadow_sample_bps.unwrap_or(0),
                is_override: member.is_override,
                memo_hit,
            });
        }
    });
}
