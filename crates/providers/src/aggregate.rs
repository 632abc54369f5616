//! Folds a stream of deltas into one final assistant response.

use rt_domain::stream::{StreamEvent, Usage};
use rt_domain::tool::ToolCall;

/// The fully aggregated result of one streaming call.
#[derive(Debug, Clone, Default)]
pub struct AggregatedResponse {
    pub content: String,
    pub reasoning_content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

/// Feed [`StreamEvent`]s in arrival order, then take the final response.
///
/// Works with adapters that emit `ToolCallFinished` and, as a fallback,
/// assembles calls that only ever arrived as started + argument deltas
/// (an aborted stream leaves calls unfinished).
#[derive(Default)]
pub struct ResponseAggregator {
    response: AggregatedResponse,
    // call_id → (tool_name, argument buffer), for unfinished calls.
    partial: Vec<(String, String, String)>,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ContentDelta { text } => self.response.content.push_str(text),
            StreamEvent::ReasoningDelta { text } => {
                self.response.reasoning_content.push_str(text)
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                self.partial
                    .push((call_id.clone(), tool_name.clone(), String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some(slot) = self.partial.iter_mut().find(|p| &p.0 == call_id) {
                    slot.2.push_str(delta);
                }
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                self.partial.retain(|p| &p.0 != call_id);
                self.response.tool_calls.push(ToolCall {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    arguments: arguments.clone(),
                });
            }
            StreamEvent::Done {
                usage,
                finish_reason,
            } => {
                if usage.is_some() {
                    self.response.usage = usage.clone();
                }
                if finish_reason.is_some() {
                    self.response.finish_reason = finish_reason.clone();
                }
            }
            StreamEvent::Error { .. } => {}
        }
    }

    /// Finalize, salvaging any unfinished tool calls whose argument
    /// buffers parse as JSON.
    pub fn finish(mut self) -> AggregatedResponse {
        for (call_id, tool_name, args) in self.partial.drain(..) {
            let arguments = if args.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                match serde_json::from_str(&args) {
                    Ok(v) => v,
                    Err(_) => continue, // truncated mid-stream; drop it
                }
            };
            self.response.tool_calls.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }
        self.response
    }
}
