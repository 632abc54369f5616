//! Prompt assembler — builds the message list for one LLM call.
//!
//! The system message concatenates the profile's segments (already
//! sorted by `order`, id tie-break, at resolution time). Inbox items due
//! for consumption render as synthetic user messages placed before the
//! final user turn.

use serde_json::Value;

use rt_domain::tool::{ChatMessage, Role};
use rt_domain::Result;
use rt_profiles::{ConsumptionPolicy, EffectiveProfile, SegmentDef, SegmentKind};

use crate::eval;
use crate::flow::FlowState;
use crate::ingest::{IngestorRegistry, DEFAULT_INGESTOR};
use crate::registry::ToolRegistry;

/// Everything the assembler needs beyond the flow itself.
pub struct PromptInputs<'a> {
    pub registry: &'a ToolRegistry,
    pub ingestors: &'a IngestorRegistry,
    /// Context strings tools registered for this turn.
    pub tool_context: Vec<String>,
}

/// Build the ordered message list. Consumed inbox items leave the inbox.
pub fn assemble(
    profile: &EffectiveProfile,
    state: &mut FlowState,
    view: &Value,
    inputs: &PromptInputs<'_>,
) -> Result<Vec<ChatMessage>> {
    let system_text = render_system(profile, view, inputs)?;

    let mut messages = Vec::with_capacity(state.messages.len() + 2);
    messages.push(ChatMessage::system(system_text));
    messages.extend(state.messages.iter().cloned());

    // Render inbox items, placing them before the final user turn.
    let rendered: Vec<ChatMessage> = state
        .inbox
        .iter()
        .map(|item| {
            let body = inputs.ingestors.render(&item.ingestor_id, &item.payload);
            ChatMessage::user(format!("[{}] {}", item.source, body))
        })
        .collect();

    if !rendered.is_empty() {
        let insert_at = messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .unwrap_or(messages.len());
        for (offset, msg) in rendered.into_iter().enumerate() {
            messages.insert(insert_at + offset, msg);
        }
    }

    state
        .inbox
        .retain(|item| item.consumption_policy == ConsumptionPolicy::Persistent);

    Ok(messages)
}

fn render_system(
    profile: &EffectiveProfile,
    view: &Value,
    inputs: &PromptInputs<'_>,
) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();

    for seg in &profile.segments {
        if let Some(ref condition) = seg.condition {
            if !eval::eval_condition(condition, view)? {
                continue;
            }
        }
        if let Some(text) = render_segment(seg, profile, view, inputs) {
            if !text.is_empty() {
                parts.push(text);
            }
        }
    }

    Ok(parts.join("\n\n"))
}

fn render_segment(
    seg: &SegmentDef,
    profile: &EffectiveProfile,
    view: &Value,
    inputs: &PromptInputs<'_>,
) -> Option<String> {
    match seg.kind {
        SegmentKind::StaticText => {
            let content = seg.content.as_deref()?;
            Some(eval::render_template(content, view))
        }
        SegmentKind::StateValue => {
            let path = seg.source_state_path.as_deref()?;
            let value = rt_domain::state::resolve_path(view, path)
                .cloned()
                .unwrap_or(Value::Null);
            let ingestor_id = seg.ingestor_id.as_deref().unwrap_or(DEFAULT_INGESTOR);
            let body = inputs.ingestors.render(ingestor_id, &value);
            match seg.title.as_deref() {
                Some(title) => Some(format!("## {title}\n{body}")),
                None => Some(body),
            }
        }
        SegmentKind::ToolDescription => Some(format!(
            "## Available tools\n{}",
            inputs
                .registry
                .render_prompt_for(&profile.tool_access_policy)
        )),
        SegmentKind::ToolContributedContext => {
            if inputs.tool_context.is_empty() {
                None
            } else {
                Some(inputs.tool_context.join("\n"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::InboxItem;
    use serde_json::json;

    fn profile_from_yaml(yaml: &str) -> std::sync::Arc<EffectiveProfile> {
        let raw: rt_profiles::RawProfile = serde_yaml::from_str(yaml).unwrap();
        let name = raw.name.clone();
        let mut map = std::collections::HashMap::new();
        map.insert(name.clone(), raw);
        rt_profiles::ProfileStore::from_raw(map)
            .resolve(&name)
            .unwrap()
    }

    #[test]
    fn segments_concatenate_in_order() {
        let profile = profile_from_yaml(
            r#"
name: p
type: principal
system_prompt_construction:
  system_prompt_segments:
    - { id: b, type: static_text, order: 200, content: second }
    - { id: a, type: static_text, order: 100, content: first }
flow_decider:
  - { id: f, condition: "True", action: { kind: continue_with_tool } }
"#,
        );
        let registry = ToolRegistry::new();
        let ingestors = IngestorRegistry::new();
        let mut state = FlowState::new("f1", "p");
        let view = json!({"state": {}, "team": {}});

        let msgs = assemble(
            &profile,
            &mut state,
            &view,
            &PromptInputs {
                registry: &registry,
                ingestors: &ingestors,
                tool_context: vec![],
            },
        )
        .unwrap();
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[0].content, "first\n\nsecond");
    }

    #[test]
    fn conditional_segment_skipped_when_falsey() {
        let profile = profile_from_yaml(
            r#"
name: p
type: principal
system_prompt_construction:
  system_prompt_segments:
    - { id: always, type: static_text, order: 1, content: base }
    - id: plan
      type: static_text
      order: 2
      content: plan exists
      condition: "v['team.work_modules']"
flow_decider:
  - { id: f, condition: "True", action: { kind: continue_with_tool } }
"#,
        );
        let registry = ToolRegistry::new();
        let ingestors = IngestorRegistry::new();
        let mut state = FlowState::new("f1", "p");

        let empty_view = json!({"state": {}, "team": {"work_modules": []}});
        let msgs = assemble(
            &profile,
            &mut state,
            &empty_view,
            &PromptInputs {
                registry: &registry,
                ingestors: &ingestors,
                tool_context: vec![],
            },
        )
        .unwrap();
        assert_eq!(msgs[0].content, "base");

        let full_view = json!({"state": {}, "team": {"work_modules": [{"module_id": "wm_1"}]}});
        let msgs = assemble(
            &profile,
            &mut state,
            &full_view,
            &PromptInputs {
                registry: &registry,
                ingestors: &ingestors,
                tool_context: vec![],
            },
        )
        .unwrap();
        assert!(msgs[0].content.contains("plan exists"));
    }

    #[test]
    fn state_value_segment_projects_with_title() {
        let profile = profile_from_yaml(
            r#"
name: p
type: principal
system_prompt_construction:
  system_prompt_segments:
    - id: modules
      type: state_value
      order: 1
      source_state_path: team.work_modules
      ingestor_id: work_modules_digest
      title: Current work plan
flow_decider:
  - { id: f, condition: "True", action: { kind: continue_with_tool } }
"#,
        );
        let registry = ToolRegistry::new();
        let ingestors = IngestorRegistry::new();
        let mut state = FlowState::new("f1", "p");
        let view = json!({
            "state": {},
            "team": {"work_modules": [
                {"module_id": "wm_1", "name": "Research", "description": "", "status": "pending", "deliverables": []}
            ]}
        });

        let msgs = assemble(
            &profile,
            &mut state,
            &view,
            &PromptInputs {
                registry: &registry,
                ingestors: &ingestors,
                tool_context: vec![],
            },
        )
        .unwrap();
        assert!(msgs[0].content.starts_with("## Current work plan"));
        assert!(msgs[0].content.contains("wm_1"));
    }

    #[test]
    fn inbox_items_consumed_and_placed_before_final_user_turn() {
        let profile = profile_from_yaml(
            r#"
name: p
type: principal
flow_decider:
  - { id: f, condition: "True", action: { kind: continue_with_tool } }
"#,
        );
        let registry = ToolRegistry::new();
        let ingestors = IngestorRegistry::new();
        let mut state = FlowState::new("f1", "p");
        state.messages.push(ChatMessage::assistant("earlier answer"));
        state.messages.push(ChatMessage::user("latest question"));
        state.inbox.push_back(InboxItem::text("observer", "reconsider your plan"));
        state
            .inbox
            .push_back(InboxItem::text("pin", "always-on note").persistent());

        let view = json!({"state": {}, "team": {}});
        let msgs = assemble(
            &profile,
            &mut state,
            &view,
            &PromptInputs {
                registry: &registry,
                ingestors: &ingestors,
                tool_context: vec![],
            },
        )
        .unwrap();

        // system, assistant, inbox x2, then the final user turn.
        assert_eq!(msgs.len(), 5);
        assert!(msgs[2].content.contains("reconsider your plan"));
        assert!(msgs[3].content.contains("always-on note"));
        assert_eq!(msgs[4].content, "latest question");

        // Only the persistent item survives.
        assert_eq!(state.inbox.len(), 1);
        assert_eq!(state.inbox[0].source, "pin");
    }

    #[test]
    fn malformed_segment_condition_is_fatal() {
        let profile = profile_from_yaml(
            r#"
name: p
type: principal
system_prompt_construction:
  system_prompt_segments:
    - { id: bad, type: static_text, order: 1, content: x, condition: "((" }
flow_decider:
  - { id: f, condition: "True", action: { kind: continue_with_tool } }
"#,
        );
        let registry = ToolRegistry::new();
        let ingestors = IngestorRegistry::new();
        let mut state = FlowState::new("f1", "p");
        let view = json!({"state": {}, "team": {}});

        assert!(assemble(
            &profile,
            &mut state,
            &view,
            &PromptInputs {
                registry: &registry,
                ingestors: &ingestors,
                tool_context: vec![],
            },
        )
        .is_err());
    }
}
