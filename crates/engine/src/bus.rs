//! Per-run event bus — streams frames to external subscribers.
//!
//! Publishers never block: each subscriber owns a bounded buffer, and a
//! subscriber that falls behind is closed (slow consumer) instead of
//! back-pressuring the run.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use rt_domain::stream::StreamEvent;
use rt_domain::tool::ToolCall;
use rt_domain::work::WorkModule;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a run or flow finished, as reported on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndState {
    Success,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    #[serde(rename = "llm_chunk")]
    LlmChunk {
        flow_id: String,
        frame: StreamEvent,
    },

    /// The aggregated assistant message for one turn.
    #[serde(rename = "llm_response")]
    LlmResponse {
        flow_id: String,
        content: String,
        reasoning_content: String,
        tool_calls: Vec<ToolCall>,
    },

    #[serde(rename = "tool_call")]
    ToolCall { flow_id: String, call: ToolCall },

    #[serde(rename = "tool_result")]
    ToolResult {
        flow_id: String,
        call_id: String,
        tool_name: String,
        ok: bool,
        payload: serde_json::Value,
    },

    #[serde(rename = "work_modules_update")]
    WorkModulesUpdate { modules: Vec<WorkModule> },

    #[serde(rename = "dispatch_start")]
    DispatchStart {
        module_id: String,
        flow_id: String,
        profile: String,
    },

    /// Aggregated over one dispatch batch; module id → outcome.
    #[serde(rename = "dispatch_complete")]
    DispatchComplete { outcomes: HashMap<String, String> },

    #[serde(rename = "flow_end")]
    FlowEnd {
        flow_id: String,
        outcome: EndState,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "run_end")]
    RunEnd {
        run_id: Uuid,
        outcome: EndState,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<RunEvent>,
}

pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: Mutex<u64>,
    buffer: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
            buffer,
        }
    }

    /// Attach a new subscriber. Events published after this call arrive
    /// in publish order.
    pub fn subscribe(&self) -> mpsc::Receiver<RunEvent> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.subscribers.lock().push(Subscriber { id, tx });
        rx
    }

    /// Broadcast an event. Never blocks: a subscriber whose buffer is
    /// full is dropped (its receiver observes channel close).
    pub fn publish(&self, event: RunEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(subscriber_id = sub.id, "dropping slow consumer");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
