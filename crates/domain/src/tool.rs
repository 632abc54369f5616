use serde::{Deserialize, Serialize};

/// A tool invocation emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Outcome of one tool invocation.
///
/// Schema violations and handler failures land here with `ok = false`;
/// they never surface as `Err` to the turn loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub payload: serde_json::Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolResult {
    pub fn ok(payload: serde_json::Value) -> Self {
        Self {
            payload,
            ok: true,
            error_message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            payload: serde_json::Value::Null,
            ok: false,
            error_message: Some(message.into()),
        }
    }
}

/// Record of a completed tool invocation attached to a chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub call_id: String,
    pub tool_name: String,
    pub payload: serde_json::Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn in a flow's message history.
///
/// Flat on purpose: a message either carries plain content, an assistant
/// content + tool-call pair, or a tool-result record. The wire adapters
/// in `rt-providers` translate to provider formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResultRecord>,
}

// ── Convenience constructors ───────────────────────────────────────

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            reasoning_content: None,
            tool_call: None,
            tool_result: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            reasoning_content: None,
            tool_call: None,
            tool_result: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            reasoning_content: None,
            tool_call: None,
            tool_result: None,
        }
    }

    pub fn tool_result(call: &ToolCall, result: &ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.payload.to_string(),
            reasoning_content: None,
            tool_call: None,
            tool_result: Some(ToolResultRecord {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                payload: result.payload.clone(),
                ok: result.ok,
                error_message: result.error_message.clone(),
            }),
        }
    }

    /// Whether this assistant message counts as progress: any content,
    /// tool call, or reasoning at all.
    pub fn is_empty_response(&self) -> bool {
        self.content.is_empty()
            && self.tool_call.is_none()
            && self
                .reasoning_content
                .as_deref()
                .unwrap_or("")
                .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_response_detection() {
        let mut msg = ChatMessage::assistant("");
        assert!(msg.is_empty_response());

        msg.reasoning_content = Some("thinking about it".into());
        assert!(!msg.is_empty_response());

        let mut msg = ChatMessage::assistant("");
        msg.tool_call = Some(ToolCall {
            call_id: "c1".into(),
            tool_name: "finish_flow".into(),
            arguments: serde_json::json!({}),
        });
        assert!(!msg.is_empty_response());

        let msg = ChatMessage::assistant("hello");
        assert!(!msg.is_empty_response());
    }

    #[test]
    fn tool_result_constructors() {
        let ok = ToolResult::ok(serde_json::json!({"n": 1}));
        assert!(ok.ok);
        assert!(ok.error_message.is_none());

        let err = ToolResult::error("bad params");
        assert!(!err.ok);
        assert_eq!(err.error_message.as_deref(), Some("bad params"));
        assert!(err.payload.is_null());
    }

    #[test]
    fn tool_result_message_carries_record() {
        let call = ToolCall {
            call_id: "c9".into(),
            tool_name: "manage_work_modules".into(),
            arguments: serde_json::json!({"actions": []}),
        };
        let result = ToolResult::ok(serde_json::json!({"results": []}));
        let msg = ChatMessage::tool_result(&call, &result);
        assert_eq!(msg.role, Role::Tool);
        let rec = msg.tool_result.unwrap();
        assert_eq!(rec.call_id, "c9");
        assert_eq!(rec.tool_name, "manage_work_modules");
        assert!(rec.ok);
    }
}
