//! Tool registry — exposes schemas to the LLM and dispatches calls.

use std::sync::Arc;

use serde_json::Value;

use rt_domain::tool::{ToolDefinition, ToolResult};
use rt_profiles::{EffectiveProfile, ToolAccessPolicy};

use crate::run::RunContext;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the calling flow receives alongside the parameters.
#[derive(Clone)]
pub struct ToolContext {
    pub run: Arc<RunContext>,
    pub flow_id: String,
    pub profile: Arc<EffectiveProfile>,
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Toolset tag for profile access policies.
    fn toolset(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;

    /// Whether invoking this tool closes the agent's turn: post-turn
    /// observers are skipped and the flow decider runs next. Applies
    /// even when the invocation returns an error result.
    fn ends_turn(&self) -> bool {
        false
    }

    /// Whether a successful invocation terminates the whole flow.
    fn ends_flow(&self) -> bool {
        false
    }

    /// Execute. Errors are contained by the registry and surface as
    /// `ToolResult { ok: false }`.
    async fn invoke(&self, params: Value, ctx: &ToolContext) -> rt_domain::Result<ToolResult>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-only after boot; registration order is the prompt order.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry pre-loaded with the built-in planning, dispatch,
    /// submission, reporting, and control tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::plan::ManageWorkModules));
        registry.register(Arc::new(crate::dispatch::DispatchSubmodules));
        registry.register(Arc::new(crate::tools::GenerateMessageSummary));
        registry.register(Arc::new(crate::tools::GenerateMarkdownReport));
        registry.register(Arc::new(crate::tools::FinishFlow));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if self.tools.iter().any(|t| t.name() == tool.name()) {
            tracing::warn!(tool = tool.name(), "duplicate tool registration ignored");
            return;
        }
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// The prompt-visible subset for a profile's access policy.
    pub fn visible_for(&self, policy: &ToolAccessPolicy) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .filter(|t| policy.allows(t.name(), t.toolset()))
            .cloned()
            .collect()
    }

    /// Definitions for the chat-completion `tools` parameter.
    pub fn definitions_for(&self, policy: &ToolAccessPolicy) -> Vec<ToolDefinition> {
        self.visible_for(policy)
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Human-readable tool list for the system prompt.
    pub fn render_prompt_for(&self, policy: &ToolAccessPolicy) -> String {
        let visible = self.visible_for(policy);
        if visible.is_empty() {
            return "(no tools available)".into();
        }
        visible
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Validate parameters against the schema and dispatch. Violations
    /// and handler errors come back as `ok = false`, never as `Err`:
    /// schema failures as [`rt_domain::Error::ToolSchema`], handler
    /// failures as [`rt_domain::Error::ToolHandler`].
    pub async fn invoke(&self, name: &str, params: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::error(format!("unknown tool: {name}"));
        };

        if let Err(reason) = validate_params(&tool.parameters_schema(), &params) {
            let err = rt_domain::Error::ToolSchema(reason);
            tracing::debug!(tool = name, error = %err, "rejecting tool call parameters");
            return ToolResult::error(err.to_string());
        }

        match tool.invoke(params, ctx).await {
            Ok(result) => result,
            Err(e) => {
                let err = match e {
                    e @ (rt_domain::Error::ToolSchema(_) | rt_domain::Error::ToolHandler(_)) => e,
                    other => rt_domain::Error::ToolHandler(other.to_string()),
                };
                tracing::warn!(tool = name, error = %err, "tool handler failed");
                ToolResult::error(err.to_string())
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Check the parts of JSON Schema the tool definitions use: the
/// top-level object shape, `required` members, and primitive `type`
/// tags on declared properties.
pub fn validate_params(schema: &Value, params: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !params.is_object() {
        return Err("parameters must be an object".into());
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if params.get(key).is_none() {
                return Err(format!("missing required parameter '{key}'"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop_schema) in props {
            let Some(value) = params.get(key) else { continue };
            let Some(expected) = prop_schema.get("type").and_then(Value::as_str) else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "integer" | "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(format!("parameter '{key}' must be of type {expected}"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "actions": { "type": "array" },
                "note": { "type": "string" },
            },
            "required": ["actions"]
        })
    }

    #[test]
    fn valid_params_pass() {
        assert!(validate_params(&schema(), &json!({"actions": []})).is_ok());
        assert!(validate_params(&schema(), &json!({"actions": [], "note": "x"})).is_ok());
    }

    #[test]
    fn missing_required_rejected() {
        let err = validate_params(&schema(), &json!({"note": "x"})).unwrap_err();
        assert!(err.contains("actions"));
    }

    #[test]
    fn wrong_type_rejected() {
        let err = validate_params(&schema(), &json!({"actions": "oops"})).unwrap_err();
        assert!(err.contains("array"));
    }

    #[test]
    fn non_object_params_rejected() {
        assert!(validate_params(&schema(), &json!("just a string")).is_err());
    }

    #[test]
    fn undeclared_extra_keys_tolerated() {
        assert!(validate_params(&schema(), &json!({"actions": [], "extra": 1})).is_ok());
    }
}
