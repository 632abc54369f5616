//! Built-in submission, reporting, and control tools.

use serde_json::{json, Value};

use rt_domain::tool::ToolResult;

use crate::registry::{Tool, ToolContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// generate_message_summary — Associate submission
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GenerateMessageSummary;

#[async_trait::async_trait]
impl Tool for GenerateMessageSummary {
    fn name(&self) -> &str {
        "generate_message_summary"
    }

    fn description(&self) -> &str {
        "Submit your findings for the module you were assigned. Calling \
         this finishes your work; calling it again replaces the previous \
         submission."
    }

    fn toolset(&self) -> &str {
        "submission"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "current_associate_findings": {
                    "type": "string",
                    "description": "The complete findings to hand back"
                }
            },
            "required": ["current_associate_findings"]
        })
    }

    fn ends_turn(&self) -> bool {
        true
    }

    fn ends_flow(&self) -> bool {
        true
    }

    async fn invoke(&self, params: Value, ctx: &ToolContext) -> rt_domain::Result<ToolResult> {
        let findings = params
            .get("current_associate_findings")
            .cloned()
            .unwrap_or(Value::Null);
        ctx.run.submit_findings(&ctx.flow_id, findings);
        Ok(ToolResult::ok(json!({ "status": "submitted" })))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// generate_markdown_report — Principal synthesis artifact
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GenerateMarkdownReport;

#[async_trait::async_trait]
impl Tool for GenerateMarkdownReport {
    fn name(&self) -> &str {
        "generate_markdown_report"
    }

    fn description(&self) -> &str {
        "Store the final synthesized report for the user as a markdown \
         artifact."
    }

    fn toolset(&self) -> &str {
        "reporting"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "principal_final_synthesis": {
                    "type": "string",
                    "description": "The complete report, markdown formatted"
                }
            },
            "required": ["principal_final_synthesis"]
        })
    }

    async fn invoke(&self, params: Value, ctx: &ToolContext) -> rt_domain::Result<ToolResult> {
        let report = params
            .get("principal_final_synthesis")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        ctx.run.team.update(|root| {
            rt_domain::state::set_path(
                root,
                "shared_context.final_report",
                Value::String(report.clone()),
            );
        });

        Ok(ToolResult::ok(json!({
            "status": "stored",
            "chars": report.len(),
        })))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// finish_flow — terminal success
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FinishFlow;

#[async_trait::async_trait]
impl Tool for FinishFlow {
    fn name(&self) -> &str {
        "finish_flow"
    }

    fn description(&self) -> &str {
        "End your flow. Call this once all work is complete and any \
         report has been stored."
    }

    fn toolset(&self) -> &str {
        "control"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn ends_turn(&self) -> bool {
        true
    }

    fn ends_flow(&self) -> bool {
        true
    }

    async fn invoke(&self, _params: Value, _ctx: &ToolContext) -> rt_domain::Result<ToolResult> {
        Ok(ToolResult::ok(json!({ "status": "finished" })))
    }
}
