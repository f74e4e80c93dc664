//! Benchmarks for the execution engine's stage fan-out.
//!
//! Measures wall-clock cost of running a single stage with an increasing
//! number of concurrent fan-out members through the full eligibility /
//! bulkhead / memo pipeline, with no configured limits (unbounded
//! semaphores) and no gates, so the benchmark isolates fan-out overhead
//! from gating/trim cost.

use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rorchestrator::blueprint::BlueprintBuilder;
use rorchestrator::bulkhead::Bulkhead;
use rorchestrator::cancellation::CancellationToken;
use rorchestrator::context::{FlowContext, RequestOptions};
use rorchestrator::engine::ExecutionEngine;
use rorchestrator::module::{Module, ModuleContext, TypedModule};
use rorchestrator::outcome::Outcome;
use rorchestrator::patch::evaluator::EvaluatedFlow;
use rorchestrator::plan::compile;
use rorchestrator::registry::ModuleCatalog;
use rorchestrator::typed::TypeTag;
use std::collections::BTreeMap;

fn noop_factory() -> impl Fn() -> Arc<dyn Module> {
    || {
        Arc::new(TypedModule::new(|args: Arc<u32>, _ctx: ModuleContext| async move {
            Outcome::ok(*args)
        })) as Arc<dyn Module>
    }
}

fn empty_evaluated(config_version: u64) -> EvaluatedFlow {
    EvaluatedFlow {
        config_version,
        effective_params: None,
        stages: BTreeMap::new(),
        overlays_applied: Vec::new(),
        emergency_ignored_reason_code: None,
        limits: BTreeMap::new(),
    }
}

fn bench_stage_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("stage_fanout");

    for member_count in [1usize, 8, 32, 128] {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register("NoOp", TypeTag::of::<u32>(), TypeTag::of::<u32>(), noop_factory())
            .unwrap();

        let mut builder = BlueprintBuilder::new::<u32, u32>("bench_fanout").stage("s", None, |mut scope| {
            for i in 0..member_count {
                scope = scope.step(format!("m{i}"), "NoOp");
            }
            scope
        });
        builder = builder.join("j", |_ctx| Outcome::ok(0u32));
        let blueprint = builder.build().unwrap();
        let plan = compile(&blueprint, &catalog).unwrap();
        let catalog = Arc::new(catalog);
        let engine = ExecutionEngine::new(catalog.clone(), Arc::new(Bulkhead::new()), None);
        let evaluated = empty_evaluated(1);

        group.bench_with_input(BenchmarkId::from_parameter(member_count), &member_count, |b, _| {
            b.to_async(&rt).iter(|| async {
                let ctx = Arc::new(FlowContext::new(
                    plan.nodes.len(),
                    plan.node_index.clone(),
                    Instant::now() + Duration::from_secs(30),
                    CancellationToken::new(),
                    RequestOptions::default(),
                    false,
                ));
                engine
                    .execute(&plan, &blueprint, rorchestrator::typed::box_value(0u32), &ctx, &evaluated, Default::default())
                    .await
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_stage_fanout);
criterion_main!(benches);
