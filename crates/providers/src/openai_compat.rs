//! OpenAI-compatible adapter.
//!
//! Works with any endpoint following the OpenAI chat-completions
//! contract with SSE streaming, including reasoning-capable models that
//! emit `reasoning_content` deltas.

use serde_json::Value;

use rt_domain::config::LlmConfig;
use rt_domain::error::{Error, Result};
use rt_domain::stream::{BoxStream, StreamEvent, Usage};
use rt_domain::tool::{ChatMessage, Role, ToolDefinition};

use crate::sse::{event_stream, from_reqwest};
use crate::traits::{ChatRequest, LlmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    endpoint_url: String,
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Build an adapter from a resolved `llm_config_ref`.
    pub fn from_config(id: impl Into<String>, cfg: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: id.into(),
            endpoint_url: cfg.endpoint_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            default_model: cfg.model.clone(),
            client,
        })
    }

    fn authed_post(&self) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(&self.endpoint_url)
            .header("Content-Type", "application/json");
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();
        let model = if req.model.is_empty() {
            self.default_model.clone()
        } else {
            req.model.clone()
        };

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_wire(msg: &ChatMessage) -> Value {
    match msg.role {
        Role::System => serde_json::json!({"role": "system", "content": msg.content}),
        Role::User => serde_json::json!({"role": "user", "content": msg.content}),
        Role::Assistant => {
            let mut obj = serde_json::json!({"role": "assistant"});
            obj["content"] = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            if let Some(ref tc) = msg.tool_call {
                obj["tool_calls"] = serde_json::json!([{
                    "id": tc.call_id,
                    "type": "function",
                    "function": {
                        "name": tc.tool_name,
                        "arguments": tc.arguments.to_string(),
                    }
                }]);
            }
            obj
        }
        Role::Tool => {
            let call_id = msg
                .tool_result
                .as_ref()
                .map(|r| r.call_id.clone())
                .unwrap_or_default();
            serde_json::json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": msg.content,
            })
        }
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE delta parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

/// Per-stream tool-call assembly: OpenAI-style endpoints announce a call
/// (index + id + name) in one chunk and stream its argument string in
/// follow-up chunks keyed only by index. Completed calls are flushed as
/// `ToolCallFinished` when the choice finishes.
#[derive(Default)]
struct StreamState {
    // index → (call_id, tool_name, argument buffer)
    calls: Vec<(u64, String, String, String)>,
    flushed: bool,
}

impl StreamState {
    /// Parse one SSE `data:` payload into stream events.
    fn parse_data(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data.trim() == "[DONE]" {
            let mut events = self.flush_tool_calls();
            if !self.flushed {
                self.flushed = true;
                events.push(Ok(StreamEvent::Done {
                    usage: None,
                    finish_reason: Some("stop".into()),
                }));
            }
            return events;
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        // Usage-only chunk (stream_options.include_usage).
        let Some(choice) = choice else {
            if let Some(usage) = v.get("usage").and_then(parse_usage) {
                return vec![Ok(StreamEvent::Done {
                    usage: Some(usage),
                    finish_reason: None,
                })];
            }
            return Vec::new();
        };

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            let mut events = self.flush_tool_calls();
            self.flushed = true;
            events.push(Ok(StreamEvent::Done {
                usage: v.get("usage").and_then(parse_usage),
                finish_reason: Some(fr.to_string()),
            }));
            return events;
        }

        let delta = choice.get("delta").unwrap_or(&Value::Null);
        let mut events = Vec::new();

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for tc in tc_arr {
                let idx = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                if let Some(id) = tc.get("id").and_then(|i| i.as_str()) {
                    let name = tc
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(|n| n.as_str())
                        .unwrap_or("");
                    events.push(Ok(StreamEvent::ToolCallStarted {
                        call_id: id.to_string(),
                        tool_name: name.to_string(),
                    }));
                    self.calls
                        .push((idx, id.to_string(), name.to_string(), String::new()));
                }
                if let Some(args) = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|a| a.as_str())
                {
                    if !args.is_empty() {
                        if let Some(slot) = self.calls.iter_mut().find(|c| c.0 == idx) {
                            slot.3.push_str(args);
                            events.push(Ok(StreamEvent::ToolCallDelta {
                                call_id: slot.1.clone(),
                                delta: args.to_string(),
                            }));
                        }
                    }
                }
            }
        }

        if let Some(text) = delta.get("reasoning_content").and_then(|t| t.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::ReasoningDelta {
                    text: text.to_string(),
                }));
            }
        }

        if let Some(text) = delta.get("content").and_then(|t| t.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::ContentDelta {
                    text: text.to_string(),
                }));
            }
        }

        events
    }

    fn flush_tool_calls(&mut self) -> Vec<Result<StreamEvent>> {
        let mut calls = std::mem::take(&mut self.calls);
        calls.sort_by_key(|c| c.0);
        calls
            .into_iter()
            .map(|(_, call_id, tool_name, args)| {
                let arguments: Value = if args.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&args).unwrap_or_else(|e| {
                        tracing::warn!(
                            call_id = %call_id,
                            tool = %tool_name,
                            error = %e,
                            "tool call arguments are not valid JSON; defaulting to empty object"
                        );
                        Value::Object(Default::default())
                    })
                };
                Ok(StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                })
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_body(req);

        tracing::debug!(provider = %self.id, url = %self.endpoint_url, "chat stream request");

        let resp = self
            .authed_post()
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.unwrap_or_default();
            return Err(Error::LlmTransport(format!(
                "HTTP {} - {}",
                status.as_u16(),
                err_text
            )));
        }

        let mut state = StreamState::default();
        Ok(event_stream(resp, move |data| state.parse_data(data)))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_domain::tool::{ToolCall, ToolResult};

    #[test]
    fn assistant_with_tool_call_serializes_arguments_as_string() {
        let mut msg = ChatMessage::assistant("let me check");
        msg.tool_call = Some(ToolCall {
            call_id: "call_1".into(),
            tool_name: "manage_work_modules".into(),
            arguments: serde_json::json!({"actions": []}),
        });
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["role"], "assistant");
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"],
            "{\"actions\":[]}"
        );
    }

    #[test]
    fn tool_message_carries_call_id() {
        let call = ToolCall {
            call_id: "call_9".into(),
            tool_name: "finish_flow".into(),
            arguments: serde_json::json!({}),
        };
        let msg = ChatMessage::tool_result(&call, &ToolResult::ok(serde_json::json!("done")));
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["tool_call_id"], "call_9");
    }

    #[test]
    fn content_delta_parses() {
        let mut state = StreamState::default();
        let events = state.parse_data(r#"{"choices":[{"delta":{"content":"hel"}}]}"#);
        assert!(matches!(
            events[0],
            Ok(StreamEvent::ContentDelta { ref text }) if text == "hel"
        ));
    }

    #[test]
    fn reasoning_delta_parses() {
        let mut state = StreamState::default();
        let events = state.parse_data(r#"{"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#);
        assert!(matches!(
            events[0],
            Ok(StreamEvent::ReasoningDelta { ref text }) if text == "hmm"
        ));
    }

    #[test]
    fn tool_call_assembles_across_chunks() {
        let mut state = StreamState::default();
        let start = state.parse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"dispatch_submodules","arguments":""}}]}}]}"#,
        );
        assert!(matches!(
            start[0],
            Ok(StreamEvent::ToolCallStarted { ref tool_name, .. }) if tool_name == "dispatch_submodules"
        ));

        let mid = state.parse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"assignments\""}}]}}]}"#,
        );
        assert!(matches!(
            mid[0],
            Ok(StreamEvent::ToolCallDelta { ref call_id, .. }) if call_id == "call_a"
        ));
        let _ = state.parse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":[]}"}}]}}]}"#,
        );

        let end = state.parse_data(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        match &end[0] {
            Ok(StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            }) => {
                assert_eq!(call_id, "call_a");
                assert_eq!(tool_name, "dispatch_submodules");
                assert_eq!(arguments, &serde_json::json!({"assignments": []}));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(end[1], Ok(StreamEvent::Done { .. })));
    }

    #[test]
    fn malformed_tool_arguments_default_to_empty_object() {
        let mut state = StreamState::default();
        let _ = state.parse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"finish_flow","arguments":"not json"}}]}}]}"#,
        );
        let end = state.parse_data("[DONE]");
        match &end[0] {
            Ok(StreamEvent::ToolCallFinished { arguments, .. }) => {
                assert_eq!(arguments, &serde_json::json!({}));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn done_sentinel_parses() {
        let mut state = StreamState::default();
        let events = state.parse_data("[DONE]");
        assert!(matches!(events[0], Ok(StreamEvent::Done { .. })));
    }

    #[test]
    fn done_not_duplicated_after_finish_reason() {
        let mut state = StreamState::default();
        let first = state.parse_data(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        assert!(matches!(first[0], Ok(StreamEvent::Done { .. })));
        let second = state.parse_data("[DONE]");
        assert!(second.is_empty());
    }

    #[test]
    fn usage_only_chunk_parses_as_done() {
        let mut state = StreamState::default();
        let events = state.parse_data(
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        );
        match &events[0] {
            Ok(StreamEvent::Done { usage: Some(u), .. }) => {
                assert_eq!(u.total_tokens, 15);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
