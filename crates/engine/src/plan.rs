//! Planning subsystem — the `manage_work_modules` tool.

use serde::Deserialize;
use serde_json::{json, Value};

use rt_domain::tool::ToolResult;
use rt_domain::work::{fresh_module_id, ModuleStatus, WorkModule};

use crate::bus::RunEvent;
use crate::registry::{Tool, ToolContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum PlanAction {
    Add {
        name: String,
        #[serde(default)]
        description: String,
    },
    Update {
        module_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        status: Option<ModuleStatus>,
    },
    Delete {
        module_id: String,
    },
}

#[derive(Debug, Deserialize)]
struct Params {
    actions: Vec<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ManageWorkModules;

#[async_trait::async_trait]
impl Tool for ManageWorkModules {
    fn name(&self) -> &str {
        "manage_work_modules"
    }

    fn description(&self) -> &str {
        "Create, update, or deprecate work modules in the shared plan. \
         Each action is one of add {name, description}, update {module_id, \
         name?, description?, status?}, delete {module_id}."
    }

    fn toolset(&self) -> &str {
        "planning"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "actions": {
                    "type": "array",
                    "description": "Plan operations, applied in order",
                    "items": { "type": "object" }
                }
            },
            "required": ["actions"]
        })
    }

    async fn invoke(&self, params: Value, ctx: &ToolContext) -> rt_domain::Result<ToolResult> {
        let params: Params = serde_json::from_value(params)?;

        // One lock acquisition for the whole batch. Per-action failures
        // are reported in the payload; the rest still apply.
        let results = ctx.run.team.update(|root| {
            params
                .actions
                .iter()
                .map(|raw| apply_action(root, raw))
                .collect::<Vec<Value>>()
        });

        ctx.run.bus.publish(RunEvent::WorkModulesUpdate {
            modules: ctx.run.team.modules(),
        });

        Ok(ToolResult::ok(json!({ "results": results })))
    }
}

fn apply_action(root: &mut Value, raw: &Value) -> Value {
    let action: PlanAction = match serde_json::from_value(raw.clone()) {
        Ok(a) => a,
        Err(e) => return json!({ "ok": false, "error": format!("malformed action: {e}") }),
    };

    match action {
        PlanAction::Add { name, description } => {
            let module = WorkModule::new(fresh_module_id(&name), name, description);
            let entry = serde_json::to_value(&module).unwrap_or(Value::Null);
            if let Some(arr) = root.get_mut("work_modules").and_then(Value::as_array_mut) {
                arr.push(entry);
            }
            json!({ "ok": true, "module_id": module.module_id, "status": "pending" })
        }
        PlanAction::Update {
            module_id,
            name,
            description,
            status,
        } => with_module(root, &module_id, |module| {
            // Completed modules are frozen except for deprecation.
            if module.status == ModuleStatus::Completed
                && status != Some(ModuleStatus::Deprecated)
            {
                return json!({
                    "ok": false,
                    "module_id": module.module_id,
                    "error": "module completed; only deprecation is allowed",
                });
            }
            if let Some(name) = name {
                module.name = name;
            }
            if let Some(description) = description {
                module.description = description;
            }
            if let Some(status) = status {
                module.status = status;
            }
            json!({ "ok": true, "module_id": module.module_id })
        }),
        PlanAction::Delete { module_id } => with_module(root, &module_id, |module| {
            module.status = ModuleStatus::Deprecated;
            json!({ "ok": true, "module_id": module.module_id, "status": "deprecated" })
        }),
    }
}

/// Run `f` against the module with the given id, writing the mutation
/// back. Unknown ids produce a per-action error payload.
fn with_module(
    root: &mut Value,
    module_id: &str,
    f: impl FnOnce(&mut WorkModule) -> Value,
) -> Value {
    let Some(arr) = root.get_mut("work_modules").and_then(Value::as_array_mut) else {
        return json!({ "ok": false, "module_id": module_id, "error": "no work modules" });
    };
    for slot in arr.iter_mut() {
        let Ok(mut module) = serde_json::from_value::<WorkModule>(slot.clone()) else {
            continue;
        };
        if module.module_id == module_id {
            let result = f(&mut module);
            if result.get("ok").and_then(Value::as_bool) == Some(true) {
                *slot = serde_json::to_value(&module).unwrap_or(Value::Null);
            }
            return result;
        }
    }
    json!({ "ok": false, "module_id": module_id, "error": "module not found" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::TeamState;

    fn apply(team: &TeamState, actions: Value) -> Vec<Value> {
        team.update(|root| {
            actions
                .as_array()
                .unwrap()
                .iter()
                .map(|raw| apply_action(root, raw))
                .collect()
        })
    }

    #[test]
    fn add_creates_pending_module_with_fresh_id() {
        let team = TeamState::new();
        let results = apply(
            &team,
            json!([{ "action": "add", "name": "Research T", "description": "dig" }]),
        );
        assert_eq!(results[0]["ok"], true);

        let id = results[0]["module_id"].as_str().unwrap().to_string();
        assert!(id.starts_with("wm_"));
        let module = team.get_module(&id).unwrap();
        assert_eq!(module.name, "Research T");
        assert_eq!(module.status, ModuleStatus::Pending);
    }

    #[test]
    fn update_unknown_id_errors_but_others_apply() {
        let team = TeamState::new();
        let results = apply(
            &team,
            json!([
                { "action": "update", "module_id": "wm_ghost", "name": "x" },
                { "action": "add", "name": "Real work" },
            ]),
        );
        assert_eq!(results[0]["ok"], false);
        assert_eq!(results[1]["ok"], true);
        assert_eq!(team.modules().len(), 1);
    }

    #[test]
    fn delete_is_a_soft_delete() {
        let team = TeamState::new();
        let results = apply(&team, json!([{ "action": "add", "name": "To go" }]));
        let id = results[0]["module_id"].as_str().unwrap().to_string();

        let results = apply(&team, json!([{ "action": "delete", "module_id": id }]));
        assert_eq!(results[0]["ok"], true);

        // Still present, historically addressable.
        let module = team.get_module(&id).unwrap();
        assert_eq!(module.status, ModuleStatus::Deprecated);
    }

    #[test]
    fn completed_module_only_deprecates() {
        let team = TeamState::new();
        let results = apply(&team, json!([{ "action": "add", "name": "Done" }]));
        let id = results[0]["module_id"].as_str().unwrap().to_string();
        team.update_module(&id, |m| m.status = ModuleStatus::Completed);

        let results = apply(
            &team,
            json!([{ "action": "update", "module_id": id, "status": "pending" }]),
        );
        assert_eq!(results[0]["ok"], false);

        let results = apply(
            &team,
            json!([{ "action": "update", "module_id": id, "status": "deprecated" }]),
        );
        assert_eq!(results[0]["ok"], true);
        assert_eq!(
            team.get_module(&id).unwrap().status,
            ModuleStatus::Deprecated
        );
    }

    #[test]
    fn malformed_action_reports_without_poisoning_batch() {
        let team = TeamState::new();
        let results = apply(
            &team,
            json!([
                { "action": "launch_missiles" },
                { "action": "add", "name": "ok" },
            ]),
        );
        assert_eq!(results[0]["ok"], false);
        assert_eq!(results[1]["ok"], true);
    }
}
