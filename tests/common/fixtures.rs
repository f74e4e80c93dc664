#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rorchestrator::blueprint::Blueprint;
use rorchestrator::cancellation::CancellationToken;
use rorchestrator::config::{ConfigSnapshot, SnapshotMeta, SnapshotSource};
use rorchestrator::context::{FlowContext, RequestOptions};
use rorchestrator::registry::ModuleCatalog;

/// A `ConfigSnapshot` built from raw `patch_json`, stamped "now" and
/// `SnapshotSource::Static` — the shape every test that doesn't care about
/// LKG provenance wants.
pub fn snapshot(patch_json: &str, config_version: u64) -> ConfigSnapshot {
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

/// As [`snapshot`], but with `timestamp_utc` backdated by `minutes_ago` —
/// for exercising emergency-overlay TTL expiry without sleeping real time.
pub fn snapshot_adopted_minutes_ago(patch_json: &str, config_version: u64, minutes_ago: i64) -> ConfigSnapshot {
    let mut snap = snapshot(patch_json, config_version);
    snap.meta.timestamp_utc -= chrono::Duration::minutes(minutes_ago);
    snap
}

/// A deadline far enough out that no test should ever trip it by accident.
pub fn generous_deadline() -> Instant {
    Instant::now() + Duration::from_secs(30)
}

/// A deadline that has already passed, for exercising pre-node guards.
pub fn expired_deadline() -> Instant {
    Instant::now() - Duration::from_millis(1)
}

/// A `FlowContext` sized and indexed for `blueprint` compiled against
/// `catalog` — mirrors the indexing `FlowHost::execute` would assign, so
/// join functions that call `try_get_node_outcome` resolve correctly.
/// Uses a generous deadline, no cancellation, default request options, and
/// explain recording off.
pub fn context_for(blueprint: &Blueprint, catalog: &ModuleCatalog) -> FlowContext {
    context_for_with(blueprint, catalog, generous_deadline(), CancellationToken::new(), RequestOptions::default(), false)
}

/// As [`context_for`], with every per-request knob exposed.
pub fn context_for_with(
    blueprint: &Blueprint,
    catalog: &ModuleCatalog,
    deadline: Instant,
    cancellation: CancellationToken,
    request_options: RequestOptions,
    explain_enabled: bool,
) -> FlowContext {
    let plan = rorchestrator::plan::compile(blueprint, catalog).expect("test blueprint compiles against test catalog");
    FlowContext::new(plan.nodes.len(), plan.node_index.clone(), deadline, cancellation, request_options, explain_enabled)
}

/// Build a `layer -> variant` map from pairs, for `RequestOptions::variants`.
pub fn variants(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
