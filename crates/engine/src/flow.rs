//! Flow runner — one agent's sequential turn loop within a run.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::Instrument;

use rt_domain::tool::{ChatMessage, ToolCall};
use rt_profiles::{ConsumptionPolicy, EffectiveProfile};

use crate::bus::{EndState, RunEvent};
use crate::node;
use crate::run::RunContext;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Terminal outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowTermination {
    Success,
    Error(String),
    Cancelled,
}

impl FlowTermination {
    pub fn end_state(&self) -> EndState {
        match self {
            Self::Success => EndState::Success,
            Self::Error(_) => EndState::Error,
            Self::Cancelled => EndState::Cancelled,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Error(msg) => Some(msg.clone()),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A queued piece of synthetic context for the next turn's prompt.
#[derive(Debug, Clone)]
pub struct InboxItem {
    pub source: String,
    pub payload: Value,
    pub ingestor_id: String,
    pub consumption_policy: ConsumptionPolicy,
}

impl InboxItem {
    pub fn text(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            payload: Value::String(text.into()),
            ingestor_id: crate::ingest::DEFAULT_INGESTOR.into(),
            consumption_policy: ConsumptionPolicy::ConsumeOnRead,
        }
    }

    pub fn persistent(mut self) -> Self {
        self.consumption_policy = ConsumptionPolicy::Persistent;
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flow state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-agent, per-run mutable state. Only its own flow task touches it.
pub struct FlowState {
    pub flow_id: String,
    pub profile_name: String,
    pub messages: Vec<ChatMessage>,
    /// The tool call the agent emitted this turn, if any.
    pub current_action: Option<ToolCall>,
    pub inbox: VecDeque<InboxItem>,
    /// Observer-managed tree (`state.flags.*` paths land here).
    pub vars: Value,
    pub turn_count: u32,
}

impl FlowState {
    pub fn new(flow_id: impl Into<String>, profile_name: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            profile_name: profile_name.into(),
            messages: Vec::new(),
            current_action: None,
            inbox: VecDeque::new(),
            vars: json!({"flags": {}}),
            turn_count: 0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flow runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FlowRunner {
    ctx: Arc<RunContext>,
    profile: Arc<EffectiveProfile>,
    state: FlowState,
}

impl FlowRunner {
    pub fn new(ctx: Arc<RunContext>, profile: Arc<EffectiveProfile>, flow_id: impl Into<String>) -> Self {
        let profile_name = profile.name.clone();
        Self {
            ctx,
            profile,
            state: FlowState::new(flow_id, profile_name),
        }
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.state.messages.push(message);
    }

    pub fn push_inbox(&mut self, item: InboxItem) {
        self.state.inbox.push_back(item);
    }

    pub fn flow_id(&self) -> &str {
        &self.state.flow_id
    }

    /// Drive the flow until a terminal outcome, cancellation, or the
    /// max-turns cap. Publishes `FlowEnd` and archives the message
    /// history on the run.
    pub async fn run(mut self) -> FlowTermination {
        let span = tracing::info_span!(
            "flow",
            flow_id = %self.state.flow_id,
            profile = %self.profile.name,
        );

        let termination = async {
            let max_turns = self.ctx.config.engine.max_turns_per_flow;
            loop {
                if self.ctx.cancel.is_cancelled() {
                    return FlowTermination::Cancelled;
                }
                if self.state.turn_count >= max_turns {
                    tracing::warn!(turns = self.state.turn_count, "turn cap reached");
                    return FlowTermination::Error("max_turns_exceeded".into());
                }
                self.state.turn_count += 1;

                match node::run_turn(&self.ctx, &self.profile, &mut self.state).await {
                    Ok(node::TurnVerdict::Continue) => continue,
                    Ok(node::TurnVerdict::End(termination)) => return termination,
                    Err(e) => {
                        tracing::warn!(error = %e, "turn failed");
                        return FlowTermination::Error(e.to_string());
                    }
                }
            }
        }
        .instrument(span)
        .await;

        tracing::debug!(
            flow_id = %self.state.flow_id,
            outcome = ?termination.end_state(),
            turns = self.state.turn_count,
            "flow ended"
        );

        self.ctx
            .archive_flow(&self.state.flow_id, self.state.messages.clone());
        self.ctx.bus.publish(RunEvent::FlowEnd {
            flow_id: self.state.flow_id.clone(),
            outcome: termination.end_state(),
            error: termination.error_message(),
        });

        termination
    }
}
