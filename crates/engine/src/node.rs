//! The turn engine — executes exactly one turn for one flow.
//!
//! Order within a turn: pre-turn observers → prompt assembly → LLM call
//! → record message → tool execution → post-turn observers → flow
//! decider. Observers and decider rules are declarative
//! `{condition, action}` pairs from the profile.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use rt_domain::error::{Error, Result};
use rt_domain::state::{apply_patch, set_path, StatePatch};
use rt_domain::tool::ChatMessage;
use rt_profiles::{
    EffectiveProfile, FlowAction, FlowOutcome, InboxItemDef, ObserverAction, ObserverRule,
};
use rt_providers::ChatRequest;

use crate::bus::RunEvent;
use crate::eval;
use crate::flow::{FlowState, FlowTermination, InboxItem};
use crate::ingest::DEFAULT_INGESTOR;
use crate::llm::{self, CallOpts};
use crate::prompt::{self, PromptInputs};
use crate::registry::ToolContext;
use crate::run::RunContext;
use crate::team::TeamState;

pub enum TurnVerdict {
    /// Take another turn.
    Continue,
    /// The flow is done.
    End(FlowTermination),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State view
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-only snapshot the evaluator sees: the flow under `state.*`, the
/// shared tree under `team.*`.
pub fn state_view(state: &FlowState, team: &TeamState) -> Value {
    let mut s = state.vars.clone();
    s["current_action"] = state
        .current_action
        .as_ref()
        .and_then(|c| serde_json::to_value(c).ok())
        .unwrap_or(Value::Null);
    s["turn_count"] = json!(state.turn_count);
    s["messages_count"] = json!(state.messages.len());
    s["inbox_count"] = json!(state.inbox.len());
    json!({ "state": s, "team": team.snapshot() })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run_turn(
    ctx: &Arc<RunContext>,
    profile: &Arc<EffectiveProfile>,
    state: &mut FlowState,
) -> Result<TurnVerdict> {
    // ── 1. Pre-turn observers ────────────────────────────────────
    if let Some(end) = apply_observers(&profile.pre_turn_observers, profile, state, ctx)? {
        return Ok(TurnVerdict::End(end));
    }

    // ── 2. Assemble prompt (consumes inbox) ──────────────────────
    let view = state_view(state, &ctx.team);
    let inputs = PromptInputs {
        registry: &ctx.registry,
        ingestors: &ctx.ingestors,
        tool_context: ctx.take_tool_context(&state.flow_id),
    };
    let messages = prompt::assemble(profile, state, &view, &inputs)?;

    // ── 3. LLM call ──────────────────────────────────────────────
    let provider = ctx.providers.resolve(&profile.llm_config_ref)?;
    let model = ctx
        .config
        .llm_config(&profile.llm_config_ref)
        .map(|c| c.model.clone())
        .unwrap_or_default();
    let req = ChatRequest {
        messages,
        tools: ctx.registry.definitions_for(&profile.tool_access_policy),
        model,
        temperature: None,
        max_tokens: None,
    };
    let opts = CallOpts {
        timeout: Duration::from_millis(ctx.config.engine.llm_call_timeout_ms),
        max_retries: ctx.config.engine.llm_max_retries,
    };

    match llm::call(&provider, &req, &opts, &ctx.cancel, &ctx.bus, &state.flow_id).await {
        Ok(response) => {
            if ctx.cancel.is_cancelled() {
                return Ok(TurnVerdict::End(FlowTermination::Cancelled));
            }
            set_path(&mut state.vars, "flags.last_llm_error", Value::Null);

            // ── 4. Record message ────────────────────────────────
            let mut msg = ChatMessage::assistant(response.content.clone());
            if !response.reasoning_content.is_empty() {
                msg.reasoning_content = Some(response.reasoning_content.clone());
            }
            state.current_action = response.tool_calls.first().cloned();
            msg.tool_call = state.current_action.clone();
            state.messages.push(msg);
        }
        Err(Error::Cancelled) => return Ok(TurnVerdict::End(FlowTermination::Cancelled)),
        Err(Error::EmptyResponse) => {
            // Ends the turn but not the flow: the decider translates
            // this into a self-reflection injection via the error flag
            // and the absent current_action.
            tracing::warn!(flow_id = %state.flow_id, "LLM returned an empty response");
            set_path(
                &mut state.vars,
                "flags.last_llm_error",
                Value::String("empty_response".into()),
            );
            state.current_action = None;
        }
        Err(e @ (Error::LlmTimeout(_) | Error::LlmTransport(_) | Error::Http(_))) => {
            // Retries are already exhausted at this point.
            tracing::warn!(flow_id = %state.flow_id, error = %e, "LLM call failed");
            return Ok(TurnVerdict::End(FlowTermination::Error(e.to_string())));
        }
        Err(e) => return Err(e),
    }

    // ── 5. Execute tool ──────────────────────────────────────────
    let mut turn_closed_by_tool = false;
    if let Some(call) = state.current_action.clone() {
        ctx.bus.publish(RunEvent::ToolCall {
            flow_id: state.flow_id.clone(),
            call: call.clone(),
        });

        let tool_ctx = ToolContext {
            run: ctx.clone(),
            flow_id: state.flow_id.clone(),
            profile: profile.clone(),
        };
        let result = ctx
            .registry
            .invoke(&call.tool_name, call.arguments.clone(), &tool_ctx)
            .await;

        ctx.bus.publish(RunEvent::ToolResult {
            flow_id: state.flow_id.clone(),
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            ok: result.ok,
            payload: result.payload.clone(),
        });
        state.messages.push(ChatMessage::tool_result(&call, &result));

        if let Some(tool) = ctx.registry.get(&call.tool_name) {
            if result.ok && tool.ends_flow() {
                return Ok(TurnVerdict::End(FlowTermination::Success));
            }
            // Applies whether the invocation succeeded or errored.
            turn_closed_by_tool = tool.ends_turn();
        }

        if ctx.cancel.is_cancelled() {
            return Ok(TurnVerdict::End(FlowTermination::Cancelled));
        }
    }

    // ── 6. Post-turn observers ───────────────────────────────────
    // A turn-ending tool closes the turn here: observers are skipped
    // and only the flow decision remains.
    if !turn_closed_by_tool {
        if let Some(end) = apply_observers(&profile.post_turn_observers, profile, state, ctx)? {
            return Ok(TurnVerdict::End(end));
        }
    }

    // ── 7. Flow decider ──────────────────────────────────────────
    decide(profile, state, ctx)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn apply_observers(
    rules: &[ObserverRule],
    profile: &EffectiveProfile,
    state: &mut FlowState,
    ctx: &RunContext,
) -> Result<Option<FlowTermination>> {
    for rule in rules {
        // Rebuilt per rule so earlier updates are visible.
        let view = state_view(state, &ctx.team);
        if !eval::eval_condition(&rule.condition, &view)? {
            continue;
        }
        tracing::debug!(observer = %rule.id, "observer fired");
        match &rule.action {
            ObserverAction::AddToInbox { item } => {
                let item = materialize_item(item, profile, &view)?;
                state.inbox.push_back(item);
            }
            ObserverAction::UpdateState { updates } => {
                for patch in updates {
                    apply_scoped_patch(patch, state, ctx);
                }
            }
            ObserverAction::EndAgentTurn {
                outcome,
                error_message,
            } => {
                return Ok(Some(terminate(*outcome, error_message.as_deref())));
            }
        }
    }
    Ok(None)
}

fn terminate(outcome: FlowOutcome, error_message: Option<&str>) -> FlowTermination {
    match outcome {
        FlowOutcome::Success => FlowTermination::Success,
        FlowOutcome::Error => FlowTermination::Error(
            error_message.unwrap_or("ended by profile rule").to_string(),
        ),
    }
}

/// Route a patch to the flow tree (`state.`) or the team tree (`team.`).
fn apply_scoped_patch(patch: &StatePatch, state: &mut FlowState, ctx: &RunContext) {
    if let Some(rest) = patch.path.strip_prefix("state.") {
        let scoped = StatePatch {
            op: patch.op,
            path: rest.to_string(),
            value: patch.value.clone(),
        };
        apply_patch(&mut state.vars, &scoped);
    } else if let Some(rest) = patch.path.strip_prefix("team.") {
        let scoped = StatePatch {
            op: patch.op,
            path: rest.to_string(),
            value: patch.value.clone(),
        };
        ctx.team.update(|root| apply_patch(root, &scoped));
    } else {
        tracing::warn!(path = %patch.path, "unscoped state patch applied to flow state");
        apply_patch(&mut state.vars, patch);
    }
}

/// Turn a declarative inbox item into a runtime one: resolve the text
/// definition reference, render templates against the view.
fn materialize_item(
    def: &InboxItemDef,
    profile: &EffectiveProfile,
    view: &Value,
) -> Result<InboxItem> {
    let raw = if let Some(ref key) = def.content_key {
        profile
            .text_definition(key)
            .ok_or_else(|| Error::Config(format!("unknown text definition '{key}'")))?
            .to_string()
    } else {
        def.content.clone().unwrap_or_default()
    };

    Ok(InboxItem {
        source: def.source.clone(),
        payload: Value::String(eval::render_template(&raw, view)),
        ingestor_id: def
            .ingestor_id
            .clone()
            .unwrap_or_else(|| DEFAULT_INGESTOR.to_string()),
        consumption_policy: def.consumption_policy,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flow decider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn decide(
    profile: &EffectiveProfile,
    state: &mut FlowState,
    ctx: &RunContext,
) -> Result<TurnVerdict> {
    for rule in &profile.flow_decider {
        let view = state_view(state, &ctx.team);
        if !eval::eval_condition(&rule.condition, &view)? {
            continue;
        }
        tracing::debug!(rule = %rule.id, "flow decision");
        return Ok(match &rule.action {
            FlowAction::ContinueWithTool => TurnVerdict::Continue,
            FlowAction::LoopWithInboxItem {
                content_key,
                source,
            } => {
                let text = profile.text_definition(content_key).ok_or_else(|| {
                    Error::Config(format!("unknown text definition '{content_key}'"))
                })?;
                let rendered = eval::render_template(text, &view);
                state.inbox.push_back(InboxItem::text(
                    source.clone().unwrap_or_else(|| "flow_decider".into()),
                    rendered,
                ));
                TurnVerdict::Continue
            }
            FlowAction::EndAgentTurn {
                outcome,
                error_message,
            } => TurnVerdict::End(terminate(*outcome, error_message.as_deref())),
        });
    }

    // Unreachable for validated profiles (catch-all enforced at
    // resolution); kept as a hard stop for hand-built ones.
    Ok(TurnVerdict::End(FlowTermination::Error(
        "flow decider reached no decision".into(),
    )))
}
