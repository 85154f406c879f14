//! JSON merge patch (RFC 7396) creation
//!
//! `json_patch::merge` applies a merge patch; this module produces one from
//! two documents so that `merge(old, create_merge_patch(old, new)) == new`.

use serde_json::{Map, Value};

/// Merge patch turning `old` into `new`.
///
/// Members missing from `new` become `null`, nested objects are diffed
/// recursively and every other changed value (arrays included) is replaced.
pub fn create_merge_patch(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => Value::Object(diff_objects(old, new)),
        _ => new.clone(),
    }
}

fn diff_objects(old: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, new_value) in new {
        match old.get(key) {
            Some(old_value) if old_value == new_value => {}
            Some(old_value @ Value::Object(_)) if new_value.is_object() => {
                patch.insert(key.clone(), create_merge_patch(old_value, new_value));
            }
            _ => {
                patch.insert(key.clone(), new_value.clone());
            }
        }
    }

    for key in old.keys() {
        if !new.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    patch
}

/// True when a merge patch changes nothing
pub fn is_empty_patch(patch: &Value) -> bool {
    matches!(patch, Value::Object(map) if map.is_empty())
}
