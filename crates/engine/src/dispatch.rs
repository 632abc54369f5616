//! Dispatch subsystem — the `dispatch_submodules` tool.
//!
//! Validates a batch of assignments all-or-nothing, spawns one child
//! Associate flow per module (bounded by the run's semaphore), waits
//! for every child, attaches deliverables, and reports an aggregated
//! outcome map. Invoking it ends the Principal's turn.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use rt_domain::tool::ToolResult;
use rt_domain::work::{Deliverable, ModuleStatus};
use rt_profiles::AgentType;

use crate::bus::RunEvent;
use crate::flow::{FlowRunner, FlowTermination, InboxItem};
use crate::registry::{Tool, ToolContext};
use crate::run::RunContext;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
struct Assignment {
    #[serde(default)]
    module_id_to_assign: Option<String>,
    #[serde(default)]
    agent_profile_logical_name: Option<String>,
    #[serde(default)]
    assigned_role_name: Option<String>,
    #[serde(default)]
    assignment_specific_instructions: Option<String>,
    #[serde(default)]
    inherit_deliverables_from: Vec<String>,
    #[serde(default)]
    inherit_messages_from: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Params {
    assignments: Vec<Assignment>,
    #[serde(default)]
    shared_context_for_all_assignments: Option<Value>,
}

/// A fully validated assignment, ready to spawn.
struct ValidAssignment {
    module_id: String,
    profile_name: String,
    role_name: String,
    instructions: String,
    inherit_deliverables_from: Vec<String>,
    inherit_messages_from: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DispatchSubmodules;

#[async_trait::async_trait]
impl Tool for DispatchSubmodules {
    fn name(&self) -> &str {
        "dispatch_submodules"
    }

    fn description(&self) -> &str {
        "Assign pending work modules to Associate agents and run them in \
         parallel. Blocks until every assigned Associate finishes, then \
         reports per-module outcomes."
    }

    fn toolset(&self) -> &str {
        "dispatch"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "assignments": {
                    "type": "array",
                    "description": "One entry per module to dispatch",
                    "items": {
                        "type": "object",
                        "properties": {
                            "module_id_to_assign": { "type": "string" },
                            "agent_profile_logical_name": { "type": "string" },
                            "assigned_role_name": { "type": "string" },
                            "assignment_specific_instructions": { "type": "string" },
                            "inherit_deliverables_from": { "type": "array" },
                            "inherit_messages_from": { "type": "array" }
                        }
                    }
                },
                "shared_context_for_all_assignments": {
                    "type": "object",
                    "description": "Injected into every child's first prompt"
                }
            },
            "required": ["assignments"]
        })
    }

    fn ends_turn(&self) -> bool {
        true
    }

    async fn invoke(&self, params: Value, ctx: &ToolContext) -> rt_domain::Result<ToolResult> {
        let params: Params = serde_json::from_value(params)?;
        if params.assignments.is_empty() {
            return Ok(ToolResult::error("no assignments given"));
        }

        // ── Validate everything before touching state ─────────────
        let (valid, errors) = validate_assignments(&ctx.run, &params.assignments);
        if !errors.is_empty() {
            return Ok(ToolResult {
                payload: json!({ "errors": errors }),
                ok: false,
                error_message: Some("dispatch rejected; no module was changed".into()),
            });
        }

        // ── Transition modules and spawn children ─────────────────
        let mut handles = Vec::with_capacity(valid.len());
        for assignment in valid {
            let flow_id = format!(
                "flow_{}_{}",
                assignment.profile_name,
                &Uuid::new_v4().simple().to_string()[..8]
            );

            ctx.run.team.update_module(&assignment.module_id, |m| {
                m.status = ModuleStatus::InProgress;
                m.assigned_profile_name = Some(assignment.profile_name.clone());
                m.assigned_role_name = Some(assignment.role_name.clone());
                m.messages_ref = Some(flow_id.clone());
            });

            ctx.run.bus.publish(RunEvent::DispatchStart {
                module_id: assignment.module_id.clone(),
                flow_id: flow_id.clone(),
                profile: assignment.profile_name.clone(),
            });

            let runner = build_child(
                &ctx.run,
                &assignment,
                &flow_id,
                params.shared_context_for_all_assignments.as_ref(),
            )?;

            let run = ctx.run.clone();
            let module_id = assignment.module_id.clone();
            let child_flow_id = flow_id.clone();
            handles.push(tokio::spawn(async move {
                // Bounded parallelism; a queued child may be cancelled
                // before it ever gets a permit.
                let termination = tokio::select! {
                    permit = run.dispatch_permits.clone().acquire_owned() => {
                        let _permit = permit.expect("dispatch semaphore closed");
                        if run.cancel.is_cancelled() {
                            FlowTermination::Cancelled
                        } else {
                            runner.run().await
                        }
                    }
                    _ = run.cancel.cancelled() => FlowTermination::Cancelled,
                };
                (module_id, child_flow_id, termination)
            }));
        }

        ctx.run.bus.publish(RunEvent::WorkModulesUpdate {
            modules: ctx.run.team.modules(),
        });

        // ── Wait for the whole batch ──────────────────────────────
        let mut outcomes: HashMap<String, String> = HashMap::new();
        for handle in handles {
            let (module_id, flow_id, termination) = match handle.await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "child flow task failed");
                    continue;
                }
            };
            let outcome = settle_module(&ctx.run, &module_id, &flow_id, &termination);
            outcomes.insert(module_id, outcome);
        }

        ctx.run.bus.publish(RunEvent::WorkModulesUpdate {
            modules: ctx.run.team.modules(),
        });
        ctx.run.bus.publish(RunEvent::DispatchComplete {
            outcomes: outcomes.clone(),
        });

        Ok(ToolResult::ok(json!({ "outcomes": outcomes })))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn validate_assignments(
    run: &Arc<RunContext>,
    assignments: &[Assignment],
) -> (Vec<ValidAssignment>, Vec<Value>) {
    let mut valid = Vec::new();
    let mut errors = Vec::new();
    let mut claimed: Vec<String> = Vec::new();

    for a in assignments {
        let module_id = a.module_id_to_assign.clone().unwrap_or_default();
        let mut reject = |reason: &str| {
            errors.push(json!({ "module_id": module_id, "reason": reason }));
        };

        if module_id.is_empty() {
            reject("missing module_id_to_assign");
            continue;
        }
        if claimed.contains(&module_id) {
            reject("module assigned twice in one call");
            continue;
        }

        let Some(module) = run.team.get_module(&module_id) else {
            reject("module not found");
            continue;
        };
        if !module.status.is_dispatchable() {
            reject("module not dispatchable");
            continue;
        }

        let Some(profile_name) = a.agent_profile_logical_name.clone() else {
            reject("missing agent_profile_logical_name");
            continue;
        };
        let is_known_associate = run
            .profiles
            .resolve(&profile_name)
            .map(|p| p.agent_type == Some(AgentType::Associate))
            .unwrap_or(false);
        if !is_known_associate {
            reject("unknown profile");
            continue;
        }

        let Some(role_name) = a.assigned_role_name.clone() else {
            reject("missing assigned_role_name");
            continue;
        };
        let Some(instructions) = a.assignment_specific_instructions.clone() else {
            reject("missing assignment_specific_instructions");
            continue;
        };

        claimed.push(module_id.clone());
        valid.push(ValidAssignment {
            module_id,
            profile_name,
            role_name,
            instructions,
            inherit_deliverables_from: a.inherit_deliverables_from.clone(),
            inherit_messages_from: a.inherit_messages_from.clone(),
        });
    }

    (valid, errors)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Child construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_child(
    run: &Arc<RunContext>,
    assignment: &ValidAssignment,
    flow_id: &str,
    shared_context: Option<&Value>,
) -> rt_domain::Result<FlowRunner> {
    let profile = run.profiles.resolve(&assignment.profile_name)?;
    let mut runner = FlowRunner::new(run.clone(), profile, flow_id);

    if let Some(shared) = shared_context {
        if !shared.is_null() {
            runner.push_inbox(InboxItem {
                source: "shared_context".into(),
                payload: shared.clone(),
                ingestor_id: "shared_context_block".into(),
                consumption_policy: Default::default(),
            });
        }
    }

    runner.push_inbox(InboxItem::text(
        "assignment",
        format!(
            "You are acting as '{}'. Your assignment:\n{}",
            assignment.role_name, assignment.instructions
        ),
    ));

    // Inherited deliverables: summaries only.
    for source_id in &assignment.inherit_deliverables_from {
        if let Some(module) = run.team.get_module(source_id) {
            let payloads: Vec<Value> = module
                .deliverables
                .iter()
                .filter(|d| !d.is_error)
                .map(|d| d.payload.clone())
                .collect();
            if !payloads.is_empty() {
                runner.push_inbox(
                    InboxItem {
                        source: format!("deliverables_of_{source_id}"),
                        payload: Value::Array(payloads),
                        ingestor_id: "json_block".into(),
                        consumption_policy: Default::default(),
                    },
                );
            }
        }
    }

    // Inherited messages: the full transcript of the referenced flows.
    for source_id in &assignment.inherit_messages_from {
        let Some(source_flow) = run
            .team
            .get_module(source_id)
            .and_then(|m| m.messages_ref)
        else {
            continue;
        };
        if let Some(messages) = run.archived_messages(&source_flow) {
            let transcript = messages
                .iter()
                .filter(|m| !m.content.is_empty())
                .map(|m| format!("{:?}: {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n");
            runner.push_inbox(InboxItem::text(
                format!("messages_of_{source_id}"),
                transcript,
            ));
        }
    }

    Ok(runner)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settlement
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Attach the child's deliverable and move the module to review.
/// Returns the outcome string for the aggregate map.
fn settle_module(
    run: &Arc<RunContext>,
    module_id: &str,
    flow_id: &str,
    termination: &FlowTermination,
) -> String {
    let findings = run.take_findings(flow_id);

    let (deliverable, outcome) = match (findings, termination) {
        (Some(payload), _) => (
            Deliverable {
                payload,
                submitted_by_flow: flow_id.to_string(),
                submitted_at: chrono::Utc::now(),
                is_error: false,
            },
            "submitted".to_string(),
        ),
        (None, FlowTermination::Cancelled) => (
            Deliverable {
                payload: json!({ "error": "cancelled" }),
                submitted_by_flow: flow_id.to_string(),
                submitted_at: chrono::Utc::now(),
                is_error: true,
            },
            "cancelled".to_string(),
        ),
        (None, termination) => {
            let reason = termination
                .error_message()
                .unwrap_or_else(|| "no deliverable submitted".into());
            (
                Deliverable {
                    payload: json!({ "error": reason }),
                    submitted_by_flow: flow_id.to_string(),
                    submitted_at: chrono::Utc::now(),
                    is_error: true,
                },
                format!("error: {reason}"),
            )
        }
    };

    run.team.update_module(module_id, |m| {
        m.deliverables.push(deliverable);
        m.status = ModuleStatus::PendingReview;
    });

    outcome
}
