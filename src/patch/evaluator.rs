//! The patch evaluator (§4.4): turns a raw patch document plus a request's
//! variants/QoS tier into an [`EvaluatedFlow`] the engine can walk.
//!
//! Parses each distinct `configVersion` exactly once and caches the parsed
//! document behind a `parking_lot::RwLock`-guarded map, matching the
//! teacher's `ReducerRegistry`'s read-mostly, write-rare access pattern —
//! many concurrent requests evaluate the same snapshot; none should pay to
//! re-parse it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::snapshot::ConfigSnapshot;
use crate::patch::document::{Gate, ModuleSpec, PatchDocument, Shadow, StagePatch};
use crate::patch::merge::deep_merge_attributed;
use crate::qos::QosTier;

/// Which overlay layer last touched a leaf, in merge order (later layers
/// win ties). Recorded on [`ExecExplain`](crate::explain::ExecExplain) so a
/// request's effective configuration is auditable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayLayer {
    Base,
    Experiment,
    Qos,
    Emergency,
}

/// One applied overlay: which layer, and a human-readable label (e.g. the
/// experiment `layer:variant` pair, the QoS tier name, or the emergency
/// reason).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayApplied {
    pub layer: OverlayLayer,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct ModuleDecision {
    pub id: String,
    pub module_type: Option<String>,
    pub params: Option<Value>,
    pub enabled: bool,
    pub disabled_by_emergency: bool,
    pub priority: i32,
    pub limit_key: Option<String>,
    pub gate: Option<Gate>,
    /// Shadow sample in basis points (0..=10000); `None` means "not a shadow
    /// module" (`shadow.sample <= 0` or no `shadow` entry at all).
    pub shadow_sample_bps: Option<u16>,
    pub memo_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EvaluatedStage {
    pub fanout_max: Option<u32>,
    pub modules: Vec<ModuleDecision>,
    pub shadow_modules: Vec<ModuleDecision>,
}

/// The flow's merged `params` tree plus per-leaf source attribution (§3
/// "effective params tree with per-leaf source attribution"; §4.4 step 6
/// "Leaves are attributed to the highest-precedence layer that set them").
/// `attribution` maps a leaf path (dot-separated, array indices in
/// brackets — the same path shape [`crate::patch::merge::deep_merge_attributed`]
/// records) to the overlay layer that last wrote it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveParams {
    pub value: Value,
    pub attribution: BTreeMap<String, OverlayLayer>,
}

#[derive(Debug, Clone)]
pub struct EvaluatedFlow {
    pub config_version: u64,
    pub effective_params: Option<EffectiveParams>,
    pub stages: BTreeMap<String, EvaluatedStage>,
    pub overlays_applied: Vec<OverlayApplied>,
    pub emergency_ignored_reason_code: Option<String>,
    /// `limitKey -> maxInFlight`, copied from the patch document's
    /// top-level `limits.moduleConcurrency.maxInFlight` (§3); consulted by
    /// [`crate::bulkhead::Bulkhead`] the first time a `limitKey` is seen.
    pub limits: BTreeMap<String, u32>,
}

/// `shadow.sample` (`0.0..=1.0`) to basis points (`0..=10000`), per §4.4
/// step 6: `round(sample * 10000)` clamped to the valid range. Returns
/// `None` when `sample <= 0`, i.e. "not a shadow module".
fn shadow_sample_bps(shadow: &Option<Shadow>) -> Option<u16> {
    let sample = shadow.as_ref()?.sample;
    if sample <= 0.0 {
        return None;
    }
    let bps = (sample * 10_000.0).round().clamp(0.0, 10_000.0);
    Some(bps as u16)
}

struct ParsedPatchDocument {
    document: Arc<PatchDocument>,
}

/// Caches parsed [`PatchDocument`]s by `configVersion` and evaluates merged,
/// per-request flow configuration.
#[derive(Default)]
pub struct PatchEvaluator {
    cache: parking_lot::RwLock<FxHashMap<u64, Arc<ParsedPatchDocument>>>,
}

impl PatchEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse-or-fetch `snapshot.patch_json`, caching by `config_version`.
    fn parsed(&self, snapshot: &ConfigSnapshot) -> Result<Arc<PatchDocument>, serde_json::Error> {
        if let Some(hit) = self.cache.read().get(&snapshot.config_version) {
            return Ok(hit.document.clone());
        }
        let document: PatchDocument = serde_json::from_str(&snapshot.patch_json)?;
        let document = Arc::new(document);
        self.cache.write().insert(
            snapshot.config_version,
            Arc::new(ParsedPatchDocument { document: document.clone() }),
        );
        Ok(document)
    }

    /// Evaluate `flow_name`'s effective configuration for one request,
    /// applying overlays in order base -> matching experiments -> QoS tier
    /// -> emergency (if not TTL-expired), per §4.4.
    pub fn evaluate(
        &self,
        flow_name: &str,
        snapshot: &ConfigSnapshot,
        variants: &BTreeMap<String, String>,
        qos: QosTier,
        now: DateTime<Utc>,
    ) -> Result<EvaluatedFlow, serde_json::Error> {
        let document = self.parsed(snapshot)?;
        let mut overlays_applied = Vec::new();
        let limits = document
            .limits
            .as_ref()
            .and_then(|l| l.module_concurrency.as_ref())
            .map(|m| m.max_in_flight.clone())
            .unwrap_or_default();

        let Some(flow_patch) = document.flows.get(flow_name) else {
            return Ok(EvaluatedFlow {
                config_version: snapshot.config_version,
                effective_params: None,
                stages: BTreeMap::new(),
                overlays_applied,
                emergency_ignored_reason_code: None,
                limits,
            });
        };

        let mut params: Option<Value> = None;
        let mut attribution: BTreeMap<String, OverlayLayer> = BTreeMap::new();
        let mut stages: BTreeMap<String, StagePatch> = BTreeMap::new();
        merge_overlay(&mut params, &mut attribution, OverlayLayer::Base, &mut stages, &flow_patch.params, &flow_patch.stages);
        overlays_applied.push(OverlayApplied {
            layer: OverlayLayer::Base,
            label: "base".to_string(),
        });

        if let Some(experiments) = &flow_patch.experiments {
            for entry in experiments {
                if variants.get(&entry.layer).map(String::as_str) == Some(entry.variant.as_str()) {
                    merge_overlay(&mut params, &mut attribution, OverlayLayer::Experiment, &mut stages, &entry.patch.params, &entry.patch.stages);
                    overlays_applied.push(OverlayApplied {
                        layer: OverlayLayer::Experiment,
                        label: format!("{}:{}", entry.layer, entry.variant),
                    });
                }
            }
        }

        if let Some(qos_overlay) = &flow_patch.qos {
            if let Some(tier_overlay) = qos_overlay.tiers.get(qos.wire_name()) {
                merge_overlay(&mut params, &mut attribution, OverlayLayer::Qos, &mut stages, &tier_overlay.patch.params, &tier_overlay.patch.stages);
                overlays_applied.push(OverlayApplied {
                    layer: OverlayLayer::Qos,
                    label: qos.wire_name().to_string(),
                });
            }
        }

        // Modules the emergency layer explicitly disabled, per `(stage, id)`,
        // recorded before the merge folds their `enabled` flag away.
        let mut emergency_disabled: std::collections::HashSet<(String, String)> = std::collections::HashSet::new();
        let mut emergency_ignored_reason_code = None;
        if let Some(emergency) = &flow_patch.emergency {
            let adopted_at = snapshot.meta.timestamp_utc;
            let expires_at = adopted_at + chrono::Duration::minutes(emergency.ttl_minutes);
            if now < expires_at {
                if let Some(overlay_stages) = &emergency.patch.stages {
                    for (stage_name, stage_patch) in overlay_stages {
                        for module in stage_patch.modules.iter().flatten() {
                            if module.enabled == Some(false) {
                                emergency_disabled.insert((stage_name.clone(), module.id.clone()));
                            }
                        }
                    }
                }
                merge_overlay(&mut params, &mut attribution, OverlayLayer::Emergency, &mut stages, &emergency.patch.params, &emergency.patch.stages);
                overlays_applied.push(OverlayApplied {
                    layer: OverlayLayer::Emergency,
                    label: emergency.reason.clone(),
                });
            } else {
                emergency_ignored_reason_code = Some("EMERGENCY_TTL_EXPIRED".to_string());
            }
        }

        let evaluated_stages = stages
            .into_iter()
            .map(|(stage_name, patch)| {
                let (modules, shadow_modules) = patch
                    .modules
                    .unwrap_or_default()
                    .into_iter()
                    .map(|spec| ModuleDecision {
                        id: spec.id.clone(),
                        module_type: spec.use_.clone(),
                        params: spec.with.clone(),
                        enabled: spec.enabled.unwrap_or(true),
                        disabled_by_emergency: emergency_disabled.contains(&(stage_name.clone(), spec.id.clone())),
                        priority: spec.priority.unwrap_or(0),
                        limit_key: spec.limit_key.clone(),
                        gate: spec.gate.clone(),
                        shadow_sample_bps: shadow_sample_bps(&spec.shadow),
                        memo_key: spec.memo_key.clone(),
                    })
                    .partition(|m| m.shadow_sample_bps.is_none());
                (
                    stage_name,
                    EvaluatedStage {
                        fanout_max: patch.fanout_max,
                        modules,
                        shadow_modules,
                    },
                )
            })
            .collect();

        Ok(EvaluatedFlow {
            config_version: snapshot.config_version,
            effective_params: params.map(|value| EffectiveParams { value, attribution }),
            stages: evaluated_stages,
            overlays_applied,
            emergency_ignored_reason_code,
            limits,
        })
    }
}

/// Merge one overlay `layer`'s `params`/`stages` onto the accumulated
/// `params`/`stages`, recording the leaf-path -> layer attribution of every
/// `params` leaf the overlay touched (later calls overwrite earlier
/// attribution for the same path, so the map always reflects the
/// highest-precedence layer per §4.4 step 5).
fn merge_overlay(
    params: &mut Option<Value>,
    attribution: &mut BTreeMap<String, OverlayLayer>,
    layer: OverlayLayer,
    stages: &mut BTreeMap<String, StagePatch>,
    overlay_params: &Option<Value>,
    overlay_stages: &Option<BTreeMap<String, StagePatch>>,
) {
    if let Some(overlay_params) = overlay_params {
        let mut touched = Vec::new();
        let base = params.clone().unwrap_or(Value::Object(serde_json::Map::new()));
        *params = Some(deep_merge_attributed(&base, overlay_params, "overlay", "", &mut touched));
        for (path, _) in touched {
            attribution.insert(path, layer);
        }
    }
    if let Some(overlay_stages) = overlay_stages {
        for (stage_name, overlay_stage) in overlay_stages {
            let entry = stages.entry(stage_name.clone()).or_default();
            if overlay_stage.fanout_max.is_some() {
                entry.fanout_max = overlay_stage.fanout_max;
            }
            if let Some(overlay_modules) = &overlay_stage.modules {
                let mut merged: Vec<ModuleSpec> = entry.modules.clone().unwrap_or_default();
                for module in overlay_modules {
                    if let Some(existing) = merged.iter_mut().find(|m| m.id == module.id) {
                        merge_module_spec(existing, module);
                    } else {
                        merged.push(module.clone());
                    }
                }
                entry.modules = Some(merged);
            }
        }
    }
}

/// Field-wise merge of two [`ModuleSpec`]s sharing an `id`: every `Some`
/// field on `overlay` replaces the corresponding field on `base`; `with`
/// (params) deep-merges rather than replaces.
fn merge_module_spec(base: &mut ModuleSpec, overlay: &ModuleSpec) {
    if overlay.use_.is_some() {
        base.use_ = overlay.use_.clone();
    }
    if let Some(overlay_with) = &overlay.with {
        let mut touched = Vec::new();
        let current = base.with.clone().unwrap_or(Value::Object(serde_json::Map::new()));
        base.with = Some(deep_merge_attributed(&current, overlay_with, "overlay", "", &mut touched));
    }
    if overlay.enabled.is_some() {
        base.enabled = overlay.enabled;
    }
    if overlay.priority.is_some() {
        base.priority = overlay.priority;
    }
    if overlay.limit_key.is_some() {
        base.limit_key = overlay.limit_key.clone();
    }
    if overlay.gate.is_some() {
        base.gate = overlay.gate.clone();
    }
    if overlay.shadow.is_some() {
        base.shadow = overlay.shadow.clone();
    }
    if overlay.memo_key.is_some() {
        base.memo_key = overlay.memo_key.clone();
    }
}
