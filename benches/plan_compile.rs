//! Benchmarks for plan compilation.
//!
//! Measures the cost of compiling a [`Blueprint`] into a `PlanTemplate` —
//! type-checking each node against the module catalog and computing the
//! deterministic `planHash` — as a function of flow length.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rorchestrator::blueprint::BlueprintBuilder;
use rorchestrator::module::{Module, ModuleContext, TypedModule};
use rorchestrator::outcome::Outcome;
use rorchestrator::plan::compile;
use rorchestrator::registry::ModuleCatalog;
use rorchestrator::typed::TypeTag;

fn identity_factory() -> impl Fn() -> Arc<dyn Module> {
    || {
        Arc::new(TypedModule::new(|args: Arc<u32>, _ctx: ModuleContext| async move {
            Outcome::ok(*args)
        })) as Arc<dyn Module>
    }
}

fn build_linear_blueprint(step_count: usize) -> (rorchestrator::blueprint::Blueprint, ModuleCatalog) {
    let mut catalog = ModuleCatalog::new();
    catalog
        .register("Identity", TypeTag::of::<u32>(), TypeTag::of::<u32>(), identity_factory())
        .unwrap();

    let mut builder = BlueprintBuilder::new::<u32, u32>("bench_linear");
    for i in 0..step_count {
        builder = builder.step(format!("step_{i}"), "Identity");
    }
    let blueprint = builder.join("j", |_ctx| Outcome::ok(0u32)).build().unwrap();
    (blueprint, catalog)
}

fn bench_plan_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_compile");
    for step_count in [1usize, 8, 32, 128] {
        let (blueprint, catalog) = build_linear_blueprint(step_count);
        group.bench_with_input(BenchmarkId::from_parameter(step_count), &step_count, |b, _| {
            b.iter(|| compile(&blueprint, &catalog).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_plan_compile);
criterion_main!(benches);
