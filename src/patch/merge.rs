//! Deep JSON merge with per-leaf source attribution (§4.4): objects merge
//! key-by-key recursively, arrays and scalars are replaced wholesale by the
//! overlay. Attribution records which overlay layer last touched each
//! leaf path, for `ExecExplain.overlaysApplied` and for effective-params
//! export.

use serde_json::Value;

/// Merge `overlay` onto `base`, returning the merged value. Pure: neither
/// input is modified.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut out = base_map.clone();
            for (k, v) in overlay_map {
                let merged = match out.get(k) {
                    Some(existing) => deep_merge(existing, v),
                    None => v.clone(),
                };
                out.insert(k.clone(), merged);
            }
            Value::Object(out)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Merge `overlay` onto `base` like [`deep_merge`], additionally recording
/// every leaf path `overlay` touched (dot-separated, array indices in
/// brackets) into `touched`, tagged with `layer`.
pub fn deep_merge_attributed(base: &Value, overlay: &Value, layer: &str, prefix: &str, touched: &mut Vec<(String, String)>) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut out = base_map.clone();
            for (k, v) in overlay_map {
                let child_prefix = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                let merged = match out.get(k) {
                    Some(existing) => deep_merge_attributed(existing, v, layer, &child_prefix, touched),
                    None => {
                        record_leaves(v, layer, &child_prefix, touched);
                        v.clone()
                    }
                };
                out.insert(k.clone(), merged);
            }
            Value::Object(out)
        }
        (_, overlay) => {
            record_leaves(overlay, layer, prefix, touched);
            overlay.clone()
        }
    }
}

fn record_leaves(value: &Value, layer: &str, prefix: &str, touched: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                let child = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                record_leaves(v, layer, &child, touched);
            }
        }
        _ => touched.push((prefix.to_string(), layer.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_objects_merge_recursively() {
        let base = serde_json::json!({ "a": { "x": 1, "y": 2 }, "b": 1 });
        let overlay = serde_json::json!({ "a": { "y": 3, "z": 4 } });
        let merged = deep_merge(&base, &overlay);
        assert_eq!(merged, serde_json::json!({ "a": { "x": 1, "y": 3, "z": 4 }, "b": 1 }));
    }

    #[test]
    fn arrays_are_replaced_not_concatenated() {
        let base = serde_json::json!({ "a": [1, 2, 3] });
        let overlay = serde_json::json!({ "a": [9] });
        let merged = deep_merge(&base, &overlay);
        assert_eq!(merged, serde_json::json!({ "a": [9] }));
    }

    #[test]
    fn attribution_records_every_touched_leaf() {
        let base = serde_json::json!({ "a": { "x": 1 } });
        let overlay = serde_json::json!({ "a": { "x": 2, "y": 3 } });
        let mut touched = Vec::new();
        let merged = deep_merge_attributed(&base, &overlay, "qos", "", &mut touched);
        assert_eq!(merged, serde_json::json!({ "a": { "x": 2, "y": 3 } }));
        assert!(touched.contains(&("a.x".to_string(), "qos".to_string())));
        assert!(touched.contains(&("a.y".to_string(), "qos".to_string())));
    }
}
