//! The config validator: structural-shape and cross-referential checks
//! over a raw patch document, producing the exhaustive validation-finding
//! codes from §6 instead of throwing.
//!
//! Basic JSON shape (is `flows` an object? is `modules` an array?) is
//! checked directly against [`serde_json::Value`] rather than delegated to
//! `serde`'s derive machinery, because the spec requires shape violations
//! to be collected as findings (severity `error`/`warn`/`info`) rather than
//! to abort parsing — a `#[derive(Deserialize)]` failure is an all-or-
//! nothing `Err`, which is the right behavior for truly malformed JSON
//! (`CFG_PARSE_ERROR`) but the wrong one for "this flow's shape is a
//! little off, tell me everything that's wrong with it".

use std::collections::{BTreeSet, HashSet};

use serde_json::Value;

use crate::registry::{FlowRegistry, ModuleCatalog, ParamsDecoder, ShapeIssue, ShapeIssueKind};

/// Severity of a [`ValidationFinding`]. Ordered `Error < Warn < Info` to
/// match the deterministic sort order required by §5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error,
    Warn,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ValidationFinding {
    pub severity: Severity,
    pub code: &'static str,
    pub path: String,
    pub message: String,
}

impl ValidationFinding {
    fn new(severity: Severity, code: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// The result of validating a patch document: a deterministically ordered
/// finding list, and `is_valid` = the logical AND of "no finding at
/// severity `Error`".
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub findings: Vec<ValidationFinding>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        !self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    fn push(&mut self, severity: Severity, code: &'static str, path: impl Into<String>, message: impl Into<String>) {
        self.findings.push(ValidationFinding::new(severity, code, path, message));
    }

    fn sort(&mut self) {
        self.findings.sort_by(|a, b| {
            (a.severity, a.code, a.path.as_str(), a.message.as_str()).cmp(&(
                b.severity,
                b.code,
                b.path.as_str(),
                b.message.as_str(),
            ))
        });
    }
}

const MODULE_ID_PATTERN_CHARS: &str = "abcdefghijklmnopqrstuvwxyz0123456789_";

fn is_valid_module_id_format(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| MODULE_ID_PATTERN_CHARS.contains(c))
}

/// Turn a decoder's [`ShapeIssue`] list into findings at `path`, mapping
/// `ShapeIssueKind::BindFailed` / `UnknownField` to the caller-supplied
/// finding codes (distinct for flow `params` vs. module `with`, per §6).
fn push_shape_issues(report: &mut ValidationReport, path: &str, issues: Vec<ShapeIssue>, bind_failed_code: &'static str, unknown_field_code: &'static str) {
    for issue in issues {
        let issue_path = if issue.field.is_empty() { path.to_string() } else { format!("{path}.{}", issue.field) };
        match issue.kind {
            ShapeIssueKind::BindFailed => report.push(Severity::Error, bind_failed_code, issue_path, issue.message),
            ShapeIssueKind::UnknownField => report.push(Severity::Error, unknown_field_code, issue_path, issue.message),
        }
    }
}

/// Validate `schemaVersion` plus the full `flows` tree against `registry`
/// (for flow/stage existence) and `catalog` (for module-type existence).
/// `registry` may report a flow's declared stage contract set via
/// `stage_names`, supplied by the caller since stage contracts live on the
/// blueprint, not the registry entry directly.
pub fn validate(
    raw: &Value,
    registry: &FlowRegistry,
    catalog: &ModuleCatalog,
    stage_names: impl Fn(&str) -> Option<Vec<String>>,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    let Some(obj) = raw.as_object() else {
        report.push(Severity::Error, "CFG_PARSE_ERROR", "$", "patch document must be a JSON object");
        return report;
    };

    match obj.get("schemaVersion").and_then(Value::as_str) {
        Some("v1") => {}
        _ => {
            report.push(
                Severity::Error,
                "CFG_SCHEMA_VERSION_UNSUPPORTED",
                "$.schemaVersion",
                "only schemaVersion \"v1\" is supported",
            );
            report.sort();
            return report;
        }
    }

    for key in obj.keys() {
        if key != "schemaVersion" && key != "limits" && key != "flows" {
            report.push(Severity::Error, "CFG_UNKNOWN_FIELD", format!("$.{key}"), format!("unknown top-level field '{key}'"));
        }
    }

    match obj.get("flows") {
        None => {}
        Some(Value::Object(flows)) => {
            for (flow_name, flow_patch) in flows {
                let path = format!("$.flows.{flow_name}");
                let Some(registration) = registry.get(flow_name) else {
                    report.push(Severity::Error, "CFG_FLOW_NOT_REGISTERED", path.clone(), format!("flow '{flow_name}' is not registered"));
                    continue;
                };
                let Some(flow_obj) = flow_patch.as_object() else {
                    report.push(Severity::Error, "CFG_FLOW_PATCH_NOT_OBJECT", path, format!("flow patch for '{flow_name}' must be an object"));
                    continue;
                };
                validate_flow_patch(
                    &mut report,
                    &path,
                    flow_obj,
                    flow_name,
                    catalog,
                    &stage_names(flow_name),
                    registration.params_decoder.as_ref(),
                );
            }
        }
        Some(_) => {
            report.push(Severity::Error, "CFG_FLOWS_NOT_OBJECT", "$.flows", "flows must be an object");
        }
    }

    report.sort();
    report
}

fn validate_flow_patch(
    report: &mut ValidationReport,
    path: &str,
    flow_obj: &serde_json::Map<String, Value>,
    flow_name: &str,
    catalog: &ModuleCatalog,
    known_stages: &Option<Vec<String>>,
    params_decoder: Option<&ParamsDecoder>,
) {
    for key in flow_obj.keys() {
        if !matches!(key.as_str(), "params" | "stages" | "experiments" | "qos" | "emergency") {
            report.push(Severity::Error, "CFG_UNKNOWN_FIELD", format!("{path}.{key}"), format!("unknown field '{key}' on flow '{flow_name}'"));
        }
    }

    if let Some(decoder) = params_decoder {
        let params_value = flow_obj.get("params").cloned().unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        if let Err(issues) = decoder(&params_value) {
            push_shape_issues(report, &format!("{path}.params"), issues, "CFG_PARAMS_BIND_FAILED", "CFG_PARAMS_UNKNOWN_FIELD");
        }
    }

    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut duplicate_ids: BTreeSet<String> = BTreeSet::new();

    match flow_obj.get("stages") {
        None => {}
        Some(Value::Object(stages)) => {
            for (stage_name, stage_patch) in stages {
                let stage_path = format!("{path}.stages.{stage_name}");
                if let Some(known) = known_stages {
                    if !known.iter().any(|s| s == stage_name) {
                        report.push(Severity::Error, "CFG_STAGE_NOT_IN_BLUEPRINT", stage_path.clone(), format!("stage '{stage_name}' is not declared in the flow's blueprint"));
                        continue;
                    }
                }
                let Some(stage_obj) = stage_patch.as_object() else {
                    report.push(Severity::Error, "CFG_STAGE_PATCH_NOT_OBJECT", stage_path, format!("stage patch for '{stage_name}' must be an object"));
                    continue;
                };
                validate_stage_patch(report, &stage_path, stage_obj, catalog, &mut seen_ids, &mut duplicate_ids);
            }
        }
        Some(_) => {
            report.push(Severity::Error, "CFG_STAGES_NOT_OBJECT", format!("{path}.stages"), "stages must be an object");
        }
    }

    for id in &duplicate_ids {
        report.push(Severity::Error, "CFG_MODULE_ID_DUPLICATE", format!("{path}.stages.*.modules[id={id}]"), format!("module id '{id}' is duplicated across stages of flow '{flow_name}'"));
    }

    match flow_obj.get("experiments") {
        None => {}
        Some(Value::Array(items)) => {
            let mut seen_layer_variant: HashSet<(String, String)> = HashSet::new();
            for (i, item) in items.iter().enumerate() {
                let exp_path = format!("{path}.experiments[{i}]");
                let Some(exp_obj) = item.as_object() else {
                    report.push(Severity::Error, "CFG_EXPERIMENT_MAPPING_INVALID", exp_path, "experiment entry must be an object");
                    continue;
                };
                let layer = exp_obj.get("layer").and_then(Value::as_str).filter(|s| !s.is_empty());
                let variant = exp_obj.get("variant").and_then(Value::as_str).filter(|s| !s.is_empty());
                match (layer, variant) {
                    (Some(layer), Some(variant)) => {
                        let key = (layer.to_string(), variant.to_string());
                        if !seen_layer_variant.insert(key) {
                            report.push(Severity::Error, "CFG_EXPERIMENT_MAPPING_DUPLICATE", exp_path.clone(), format!("duplicate experiment mapping layer='{layer}' variant='{variant}'"));
                        }
                    }
                    _ => {
                        report.push(Severity::Error, "CFG_EXPERIMENT_MAPPING_INVALID", exp_path.clone(), "experiment entry requires non-empty 'layer' and 'variant'");
                    }
                }
                if !matches!(exp_obj.get("patch"), Some(Value::Object(_))) {
                    report.push(Severity::Error, "CFG_EXPERIMENT_PATCH_INVALID", format!("{exp_path}.patch"), "experiment patch must be an object");
                }
            }
        }
        Some(_) => {
            report.push(Severity::Error, "CFG_EXPERIMENT_MAPPING_INVALID", format!("{path}.experiments"), "experiments must be an array");
        }
    }
}

fn validate_stage_patch(
    report: &mut ValidationReport,
    path: &str,
    stage_obj: &serde_json::Map<String, Value>,
    catalog: &ModuleCatalog,
    seen_ids: &mut HashSet<String>,
    duplicate_ids: &mut BTreeSet<String>,
) {
    for key in stage_obj.keys() {
        if !matches!(key.as_str(), "fanoutMax" | "modules") {
            report.push(Severity::Error, "CFG_UNKNOWN_FIELD", format!("{path}.{key}"), format!("unknown field '{key}' on stage"));
        }
    }

    match stage_obj.get("modules") {
        None => {}
        Some(Value::Array(modules)) => {
            for (i, module) in modules.iter().enumerate() {
                let module_path = format!("{path}.modules[{i}]");
                let Some(module_obj) = module.as_object() else {
                    report.push(Severity::Error, "CFG_MODULE_ID_MISSING", module_path, "module spec must be an object");
                    continue;
                };
                let id = module_obj.get("id").and_then(Value::as_str);
                match id {
                    None | Some("") => {
                        report.push(Severity::Error, "CFG_MODULE_ID_MISSING", module_path.clone(), "module spec requires a non-empty 'id'");
                    }
                    Some(id) => {
                        if !seen_ids.insert(id.to_string()) {
                            duplicate_ids.insert(id.to_string());
                        }
                        if !is_valid_module_id_format(id) {
                            report.push(Severity::Warn, "CFG_MODULE_ID_INVALID_FORMAT", module_path.clone(), format!("module id '{id}' should match [a-z0-9_]+"));
                        }
                    }
                }

                if let Some(use_type) = module_obj.get("use").and_then(Value::as_str) {
                    if !catalog.contains(use_type) {
                        report.push(Severity::Error, "CFG_MODULE_TYPE_NOT_REGISTERED", format!("{module_path}.use"), format!("module type '{use_type}' is not registered"));
                    } else if let Some(args_decoder) = catalog.args_decoder(use_type) {
                        match module_obj.get("with") {
                            None => {
                                report.push(Severity::Error, "CFG_MODULE_ARGS_MISSING", format!("{module_path}.with"), format!("module type '{use_type}' requires 'with'"));
                            }
                            Some(with_value) => {
                                if let Err(issues) = args_decoder(with_value) {
                                    push_shape_issues(report, &format!("{module_path}.with"), issues, "CFG_MODULE_ARGS_BIND_FAILED", "CFG_MODULE_ARGS_UNKNOWN_FIELD");
                                }
                            }
                        }
                    }
                } else if module_obj.contains_key("use") {
                    report.push(Severity::Error, "CFG_MODULE_TYPE_MISSING", format!("{module_path}.use"), "module 'use' must be a string");
                }

                if let Some(gate) = module_obj.get("gate") {
                    validate_gate(report, &format!("{module_path}.gate"), gate);
                }
            }
        }
        Some(_) => {
            report.push(Severity::Error, "CFG_MODULES_NOT_ARRAY", format!("{path}.modules"), "modules must be an array");
        }
    }
}

fn validate_gate(report: &mut ValidationReport, path: &str, gate: &Value) {
    let Some(obj) = gate.as_object() else {
        report.push(Severity::Error, "CFG_GATE_UNKNOWN_TYPE", path.to_string(), "gate must be an object");
        return;
    };
    match obj.get("type").and_then(Value::as_str) {
        Some("experimentGate") => {
            let layer_ok = obj.get("layer").and_then(Value::as_str).is_some_and(|s| !s.is_empty());
            let in_ok = matches!(obj.get("in"), Some(Value::Array(items)) if !items.is_empty());
            if !layer_ok || !in_ok {
                report.push(Severity::Error, "CFG_GATE_EXPERIMENT_INVALID", path.to_string(), "experimentGate requires non-empty 'layer' and non-empty 'in'");
            }
        }
        Some("selector") => {
            if !obj.get("selector").and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
                report.push(Severity::Error, "CFG_GATE_UNKNOWN_TYPE", path.to_string(), "selector gate requires non-empty 'selector'");
            }
        }
        Some("all") | Some("any") => {
            match obj.get("gates") {
                Some(Value::Array(items)) if !items.is_empty() => {
                    for (i, child) in items.iter().enumerate() {
                        validate_gate(report, &format!("{path}.gates[{i}]"), child);
                    }
                }
                _ => {
                    report.push(Severity::Error, "CFG_GATE_EMPTY_COMPOSITE", path.to_string(), "composite gates require at least one child");
                }
            }
        }
        Some("not") => match obj.get("gate") {
            Some(child) => validate_gate(report, &format!("{path}.gate"), child),
            None => report.push(Severity::Error, "CFG_GATE_UNKNOWN_TYPE", path.to_string(), "'not' gate requires a child 'gate'"),
        },
        _ => {
            report.push(Severity::Error, "CFG_GATE_UNKNOWN_TYPE", path.to_string(), "unknown gate 'type'");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::BlueprintBuilder;
    use crate::outcome::Outcome;

    fn registry_with_flow(name: &str) -> FlowRegistry {
        let mut reg = FlowRegistry::new();
        let bp = BlueprintBuilder::new::<u32, u32>(name)
            .join("j", |_ctx| Outcome::ok(0u32))
            .build()
            .unwrap();
        reg.register(bp, None, None).unwrap();
        reg
    }

    #[test]
    fn unsupported_schema_version_is_fatal_finding() {
        let raw = serde_json::json!({ "schemaVersion": "v2", "flows": {} });
        let report = validate(&raw, &FlowRegistry::new(), &ModuleCatalog::new(), |_| None);
        assert!(!report.is_valid());
        assert_eq!(report.findings[0].code, "CFG_SCHEMA_VERSION_UNSUPPORTED");
    }

    #[test]
    fn unregistered_flow_is_error() {
        let raw = serde_json::json!({ "schemaVersion": "v1", "flows": { "missing": {} } });
        let report = validate(&raw, &FlowRegistry::new(), &ModuleCatalog::new(), |_| None);
        assert!(!report.is_valid());
        assert!(report.findings.iter().any(|f| f.code == "CFG_FLOW_NOT_REGISTERED"));
    }

    #[test]
    fn duplicate_module_ids_reported_on_all_occurrences() {
        let reg = registry_with_flow("f");
        let raw = serde_json::json!({
            "schemaVersion": "v1",
            "flows": {
                "f": {
                    "stages": {
                        "s1": { "modules": [ { "id": "dup" }, { "id": "dup" } ] }
                    }
                }
            }
        });
        let report = validate(&raw, &reg, &ModuleCatalog::new(), |_| Some(vec!["s1".to_string()]));
        assert!(report.findings.iter().any(|f| f.code == "CFG_MODULE_ID_DUPLICATE"));
    }

    #[test]
    fn empty_composite_gate_is_error() {
        let reg = registry_with_flow("f");
        let raw = serde_json::json!({
            "schemaVersion": "v1",
            "flows": {
                "f": {
                    "stages": {
                        "s1": { "modules": [ { "id": "m", "gate": { "type": "all", "gates": [] } } ] }
                    }
                }
            }
        });
        let report = validate(&raw, &reg, &ModuleCatalog::new(), |_| Some(vec!["s1".to_string()]));
        assert!(report.findings.iter().any(|f| f.code == "CFG_GATE_EMPTY_COMPOSITE"));
    }

    #[test]
    fn unknown_flow_level_field_is_error() {
        let reg = registry_with_flow("f");
        let raw = serde_json::json!({
            "schemaVersion": "v1",
            "flows": { "f": { "bogus": 1 } }
        });
        let report = validate(&raw, &reg, &ModuleCatalog::new(), |_| Some(vec![]));
        assert!(report.findings.iter().any(|f| f.code == "CFG_UNKNOWN_FIELD" && f.path == "$.flows.f.bogus"));
    }

    #[test]
    fn unknown_stage_level_field_is_error() {
        let reg = registry_with_flow("f");
        let raw = serde_json::json!({
            "schemaVersion": "v1",
            "flows": { "f": { "stages": { "s1": { "bogus": 1 } } } }
        });
        let report = validate(&raw, &reg, &ModuleCatalog::new(), |_| Some(vec!["s1".to_string()]));
        assert!(report.findings.iter().any(|f| f.code == "CFG_UNKNOWN_FIELD" && f.path == "$.flows.f.stages.s1.bogus"));
    }

    fn registry_with_params_decoder(name: &str) -> FlowRegistry {
        let mut reg = FlowRegistry::new();
        let bp = BlueprintBuilder::new::<u32, u32>(name)
            .join("j", |_ctx| Outcome::ok(0u32))
            .build()
            .unwrap();
        let decoder: ParamsDecoder = std::sync::Arc::new(|value: &Value| {
            let Some(obj) = value.as_object() else {
                return Err(vec![ShapeIssue {
                    kind: ShapeIssueKind::BindFailed,
                    field: String::new(),
                    message: "params must be an object".to_string(),
                }]);
            };
            let mut issues = Vec::new();
            for key in obj.keys() {
                if key != "limit" {
                    issues.push(ShapeIssue {
                        kind: ShapeIssueKind::UnknownField,
                        field: key.clone(),
                        message: format!("unknown params field '{key}'"),
                    });
                }
            }
            if let Some(limit) = obj.get("limit") {
                if !limit.is_u64() {
                    issues.push(ShapeIssue {
                        kind: ShapeIssueKind::BindFailed,
                        field: "limit".to_string(),
                        message: "'limit' must be an unsigned integer".to_string(),
                    });
                }
            }
            if issues.is_empty() {
                Ok(())
            } else {
                Err(issues)
            }
        });
        reg.register(bp, Some(decoder), None).unwrap();
        reg
    }

    #[test]
    fn params_unknown_field_reported_via_decoder() {
        let reg = registry_with_params_decoder("f");
        let raw = serde_json::json!({
            "schemaVersion": "v1",
            "flows": { "f": { "params": { "limit": 1, "surprise": true } } }
        });
        let report = validate(&raw, &reg, &ModuleCatalog::new(), |_| Some(vec![]));
        assert!(report.findings.iter().any(|f| f.code == "CFG_PARAMS_UNKNOWN_FIELD" && f.path == "$.flows.f.params.surprise"));
    }

    #[test]
    fn params_bind_failure_reported_via_decoder() {
        let reg = registry_with_params_decoder("f");
        let raw = serde_json::json!({
            "schemaVersion": "v1",
            "flows": { "f": { "params": { "limit": "not a number" } } }
        });
        let report = validate(&raw, &reg, &ModuleCatalog::new(), |_| Some(vec![]));
        assert!(report.findings.iter().any(|f| f.code == "CFG_PARAMS_BIND_FAILED" && f.path == "$.flows.f.params.limit"));
    }

    struct NoopFactory;
    impl crate::module::ModuleFactory for NoopFactory {
        fn create(&self) -> std::sync::Arc<dyn crate::module::Module> {
            unimplemented!("not invoked by validator tests")
        }
    }

    fn catalog_with_args_decoder(type_name: &str) -> ModuleCatalog {
        let mut catalog = ModuleCatalog::new();
        let decoder: crate::registry::ArgsDecoder = std::sync::Arc::new(|value: &Value| {
            let Some(obj) = value.as_object() else {
                return Err(vec![ShapeIssue {
                    kind: ShapeIssueKind::BindFailed,
                    field: String::new(),
                    message: "with must be an object".to_string(),
                }]);
            };
            if obj.contains_key("url") {
                Ok(())
            } else {
                Err(vec![ShapeIssue {
                    kind: ShapeIssueKind::BindFailed,
                    field: "url".to_string(),
                    message: "'url' is required".to_string(),
                }])
            }
        });
        catalog
            .register_with_args_decoder(
                type_name,
                crate::typed::TypeTag::of::<Value>(),
                crate::typed::TypeTag::of::<Value>(),
                NoopFactory,
                Some(decoder),
            )
            .unwrap();
        catalog
    }

    #[test]
    fn module_args_missing_is_error() {
        let reg = registry_with_flow("f");
        let catalog = catalog_with_args_decoder("http");
        let raw = serde_json::json!({
            "schemaVersion": "v1",
            "flows": { "f": { "stages": { "s1": { "modules": [ { "id": "m", "use": "http" } ] } } } }
        });
        let report = validate(&raw, &reg, &catalog, |_| Some(vec!["s1".to_string()]));
        assert!(report.findings.iter().any(|f| f.code == "CFG_MODULE_ARGS_MISSING"));
    }

    #[test]
    fn module_args_bind_failed_is_error() {
        let reg = registry_with_flow("f");
        let catalog = catalog_with_args_decoder("http");
        let raw = serde_json::json!({
            "schemaVersion": "v1",
            "flows": { "f": { "stages": { "s1": { "modules": [ { "id": "m", "use": "http", "with": { "path": "/x" } } ] } } } }
        });
        let report = validate(&raw, &reg, &catalog, |_| Some(vec!["s1".to_string()]));
        assert!(report.findings.iter().any(|f| f.code == "CFG_MODULE_ARGS_BIND_FAILED"));
    }
}
