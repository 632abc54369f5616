//! Dotted-path access over a JSON state tree.
//!
//! Flow and team state are plain `serde_json::Value` trees. Profile rules
//! address them with paths like `team.work_modules` or
//! `state.flags.consecutive_no_tool_call_count`. Lookups on absent paths
//! return `None`; they never panic and never error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resolve a dotted path against a JSON tree. `None` when any segment
/// is missing or a non-object is traversed.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in path.split('.') {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

/// Set a value at a dotted path, creating intermediate objects as needed.
/// A non-object intermediate is replaced by an object.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let mut cur = root;
    let segs: Vec<&str> = path.split('.').collect();
    for (i, seg) in segs.iter().enumerate() {
        if !cur.is_object() {
            *cur = Value::Object(Default::default());
        }
        let map = cur.as_object_mut().unwrap();
        if i == segs.len() - 1 {
            map.insert((*seg).to_string(), value);
            return;
        }
        cur = map
            .entry((*seg).to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
}

/// Add `by` to the number at `path`. Absent or non-numeric values count
/// as zero.
pub fn increment_path(root: &mut Value, path: &str, by: i64) {
    let current = resolve_path(root, path)
        .and_then(Value::as_i64)
        .unwrap_or(0);
    set_path(root, path, Value::from(current + by));
}

/// Append `value` to the array at `path`. Absent or non-array values are
/// replaced by a fresh array first.
pub fn append_path(root: &mut Value, path: &str, value: Value) {
    match resolve_path(root, path) {
        Some(Value::Array(_)) => {}
        _ => set_path(root, path, Value::Array(Vec::new())),
    }
    // Re-walk mutably; the path is guaranteed to exist as an array now.
    let mut cur = root;
    for seg in path.split('.') {
        cur = cur.as_object_mut().unwrap().get_mut(seg).unwrap();
    }
    cur.as_array_mut().unwrap().push(value);
}

// ── Declarative patches ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    Set,
    Increment,
    Append,
}

/// One `update_state` operation from an observer action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatePatch {
    pub op: PatchOp,
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

/// Apply a patch to the tree. `increment` treats a missing `value` as 1.
pub fn apply_patch(root: &mut Value, patch: &StatePatch) {
    match patch.op {
        PatchOp::Set => set_path(root, &patch.path, patch.value.clone()),
        PatchOp::Increment => {
            let by = patch.value.as_i64().unwrap_or(1);
            increment_path(root, &patch.path, by);
        }
        PatchOp::Append => append_path(root, &patch.path, patch.value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_nested() {
        let v = json!({"team": {"shared_context": {"topic": "rust"}}});
        assert_eq!(
            resolve_path(&v, "team.shared_context.topic"),
            Some(&json!("rust"))
        );
    }

    #[test]
    fn resolve_absent_is_none() {
        let v = json!({"team": {}});
        assert!(resolve_path(&v, "team.work_modules.wm_x").is_none());
        assert!(resolve_path(&v, "nope").is_none());
    }

    #[test]
    fn resolve_through_scalar_is_none() {
        let v = json!({"a": 3});
        assert!(resolve_path(&v, "a.b").is_none());
    }

    #[test]
    fn set_creates_intermediates() {
        let mut v = json!({});
        set_path(&mut v, "state.flags.count", json!(2));
        assert_eq!(resolve_path(&v, "state.flags.count"), Some(&json!(2)));
    }

    #[test]
    fn set_replaces_scalar_intermediate() {
        let mut v = json!({"state": 1});
        set_path(&mut v, "state.flags.x", json!(true));
        assert_eq!(resolve_path(&v, "state.flags.x"), Some(&json!(true)));
    }

    #[test]
    fn increment_from_absent() {
        let mut v = json!({});
        increment_path(&mut v, "flags.stalls", 1);
        increment_path(&mut v, "flags.stalls", 1);
        assert_eq!(resolve_path(&v, "flags.stalls"), Some(&json!(2)));
    }

    #[test]
    fn append_builds_array() {
        let mut v = json!({});
        append_path(&mut v, "log", json!("a"));
        append_path(&mut v, "log", json!("b"));
        assert_eq!(resolve_path(&v, "log"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn apply_patch_variants() {
        let mut v = json!({});
        apply_patch(
            &mut v,
            &StatePatch {
                op: PatchOp::Set,
                path: "flags.x".into(),
                value: json!(7),
            },
        );
        apply_patch(
            &mut v,
            &StatePatch {
                op: PatchOp::Increment,
                path: "flags.x".into(),
                value: Value::Null,
            },
        );
        apply_patch(
            &mut v,
            &StatePatch {
                op: PatchOp::Append,
                path: "items".into(),
                value: json!("first"),
            },
        );
        assert_eq!(resolve_path(&v, "flags.x"), Some(&json!(8)));
        assert_eq!(resolve_path(&v, "items"), Some(&json!(["first"])));
    }

    #[test]
    fn patch_deserializes_from_profile_yaml_shape() {
        let p: StatePatch = serde_json::from_value(json!({
            "op": "increment",
            "path": "state.flags.consecutive_no_progress_turns"
        }))
        .unwrap();
        assert_eq!(p.op, PatchOp::Increment);
        assert!(p.value.is_null());
    }
}
