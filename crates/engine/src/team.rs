//! Team state — the only mutable state shared across flows in a run.
//!
//! A JSON tree behind one `RwLock`. Tools mutate it inside a single
//! [`TeamState::update`] call; no nested locking. Canonical paths:
//! `team.work_modules` (ordered list), `team.profiles_list_instance_ids`,
//! `team.shared_context`.

use parking_lot::RwLock;
use serde_json::{json, Value};

use rt_domain::work::WorkModule;

pub struct TeamState {
    root: RwLock<Value>,
}

impl TeamState {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(json!({
                "work_modules": [],
                "profiles_list_instance_ids": [],
                "shared_context": {},
            })),
        }
    }

    /// Snapshot the whole tree (for state views and dumps).
    pub fn snapshot(&self) -> Value {
        self.root.read().clone()
    }

    /// Read under the lock without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.root.read())
    }

    /// The team-state lock: one mutation per tool invocation.
    pub fn update<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        f(&mut self.root.write())
    }

    // ── Work module helpers ────────────────────────────────────────
    // Modules live as an ordered JSON array so creation order survives
    // serialization. Lookups scan; plans are small.

    pub fn modules(&self) -> Vec<WorkModule> {
        self.with(|root| modules_of(root))
    }

    pub fn get_module(&self, module_id: &str) -> Option<WorkModule> {
        self.modules().into_iter().find(|m| m.module_id == module_id)
    }

    /// Mutate one module in place. Returns false when the id is unknown.
    pub fn update_module(&self, module_id: &str, f: impl FnOnce(&mut WorkModule)) -> bool {
        self.update(|root| {
            let Some(arr) = root
                .get_mut("work_modules")
                .and_then(Value::as_array_mut)
            else {
                return false;
            };
            for slot in arr.iter_mut() {
                let Ok(mut module) = serde_json::from_value::<WorkModule>(slot.clone()) else {
                    continue;
                };
                if module.module_id == module_id {
                    f(&mut module);
                    *slot = serde_json::to_value(&module).unwrap_or(Value::Null);
                    return true;
                }
            }
            false
        })
    }

    pub fn push_module(&self, module: &WorkModule) {
        self.update(|root| {
            if let Some(arr) = root.get_mut("work_modules").and_then(Value::as_array_mut) {
                arr.push(serde_json::to_value(module).unwrap_or(Value::Null));
            }
        });
    }

    pub fn set_profiles_list(&self, names: &[String]) {
        self.update(|root| {
            root["profiles_list_instance_ids"] = json!(names);
        });
    }

    pub fn profiles_list(&self) -> Vec<String> {
        self.with(|root| {
            root.get("profiles_list_instance_ids")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default()
        })
    }
}

/// Deserialize the module list out of a team tree.
pub fn modules_of(root: &Value) -> Vec<WorkModule> {
    root.get("work_modules")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

impl Default for TeamState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_domain::work::ModuleStatus;

    #[test]
    fn fresh_state_has_canonical_paths() {
        let team = TeamState::new();
        let snap = team.snapshot();
        assert!(snap["work_modules"].is_array());
        assert!(snap["profiles_list_instance_ids"].is_array());
        assert!(snap["shared_context"].is_object());
    }

    #[test]
    fn module_round_trip_preserves_order() {
        let team = TeamState::new();
        team.push_module(&WorkModule::new("wm_b", "second?", "no, first pushed"));
        team.push_module(&WorkModule::new("wm_a", "pushed later", ""));

        let modules = team.modules();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].module_id, "wm_b");
        assert_eq!(modules[1].module_id, "wm_a");
    }

    #[test]
    fn update_module_in_place() {
        let team = TeamState::new();
        team.push_module(&WorkModule::new("wm_1", "Research", ""));

        let found = team.update_module("wm_1", |m| {
            m.status = ModuleStatus::InProgress;
            m.assigned_profile_name = Some("associate_websearcher".into());
        });
        assert!(found);

        let m = team.get_module("wm_1").unwrap();
        assert_eq!(m.status, ModuleStatus::InProgress);
        assert_eq!(
            m.assigned_profile_name.as_deref(),
            Some("associate_websearcher")
        );
    }

    #[test]
    fn update_unknown_module_returns_false() {
        let team = TeamState::new();
        assert!(!team.update_module("wm_ghost", |_| {}));
    }

    #[test]
    fn profiles_list_round_trip() {
        let team = TeamState::new();
        team.set_profiles_list(&["a".into(), "b".into()]);
        assert_eq!(team.profiles_list(), vec!["a".to_string(), "b".to_string()]);
    }
}
