//! Profile document schema — parsed from per-profile YAML files.
//!
//! Required fields: `name`. Everything else is optional so that abstract
//! base profiles can carry partial definitions. Unknown keys are
//! tolerated for forward compatibility (serde's default behavior).
//!
//! ```yaml
//! name: principal
//! type: principal
//! base_profile: base_agent
//! llm_config_ref: default
//! tool_access_policy:
//!   allowed_toolsets: [planning, dispatch]
//!   allowed_individual_tools: [finish_flow]
//! system_prompt_construction:
//!   system_prompt_segments:
//!     - id: intro
//!       type: static_text
//!       order: 100
//!       content: You orchestrate a team of research associates.
//! text_definitions:
//!   self_reflection: Your last response carried no action. Reconsider.
//! pre_turn_observers: []
//! post_turn_observers: []
//! flow_decider:
//!   - id: fallback
//!     condition: "True"
//!     action: { kind: continue_with_tool }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use rt_domain::state::StatePatch;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent type & tool policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Principal,
    Associate,
}

/// Which tools a profile may see and call. Toolsets and individual tool
/// names are unioned across the inheritance chain.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolAccessPolicy {
    #[serde(default)]
    pub allowed_toolsets: Vec<String>,
    #[serde(default)]
    pub allowed_individual_tools: Vec<String>,
}

impl ToolAccessPolicy {
    /// A tool is visible when its toolset or its own name is allowed.
    pub fn allows(&self, tool_name: &str, toolset: &str) -> bool {
        self.allowed_toolsets.iter().any(|t| t == toolset)
            || self.allowed_individual_tools.iter().any(|t| t == tool_name)
    }

    fn merge_from(&mut self, child: &ToolAccessPolicy) {
        for ts in &child.allowed_toolsets {
            if !self.allowed_toolsets.contains(ts) {
                self.allowed_toolsets.push(ts.clone());
            }
        }
        for t in &child.allowed_individual_tools {
            if !self.allowed_individual_tools.contains(t) {
                self.allowed_individual_tools.push(t.clone());
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System prompt segments
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    StaticText,
    StateValue,
    ToolDescription,
    ToolContributedContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentDef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    #[serde(default)]
    pub order: i32,
    /// Literal text for `static_text` segments; may contain `{{ path }}`
    /// template references.
    #[serde(default)]
    pub content: Option<String>,
    /// State path projected by `state_value` segments.
    #[serde(default)]
    pub source_state_path: Option<String>,
    /// Formatter for `state_value` segments and inbox items.
    #[serde(default)]
    pub ingestor_id: Option<String>,
    /// Heading wrapped around projected state.
    #[serde(default)]
    pub title: Option<String>,
    /// Segment is skipped when this evaluates falsey.
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemPromptConstruction {
    #[serde(default)]
    pub system_prompt_segments: Vec<SegmentDef>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionPolicy {
    #[default]
    ConsumeOnRead,
    Persistent,
}

/// Declarative inbox item. `content_key` points into the profile's
/// `text_definitions`; `content` carries literal (possibly templated)
/// text. Exactly one of the two should be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxItemDef {
    #[serde(default = "d_source")]
    pub source: String,
    #[serde(default)]
    pub content_key: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub ingestor_id: Option<String>,
    #[serde(default)]
    pub consumption_policy: ConsumptionPolicy,
}

impl Default for InboxItemDef {
    fn default() -> Self {
        Self {
            source: d_source(),
            content_key: None,
            content: None,
            ingestor_id: None,
            consumption_policy: ConsumptionPolicy::default(),
        }
    }
}

fn d_source() -> String {
    "observer".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObserverAction {
    AddToInbox {
        #[serde(default)]
        item: InboxItemDef,
    },
    UpdateState {
        updates: Vec<StatePatch>,
    },
    EndAgentTurn {
        outcome: FlowOutcome,
        #[serde(default)]
        error_message: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverRule {
    pub id: String,
    pub condition: String,
    pub action: ObserverAction,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flow decider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowOutcome {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowAction {
    ContinueWithTool,
    LoopWithInboxItem {
        content_key: String,
        #[serde(default)]
        source: Option<String>,
    },
    EndAgentTurn {
        outcome: FlowOutcome,
        #[serde(default)]
        error_message: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeciderRule {
    pub id: String,
    pub condition: String,
    pub action: FlowAction,
}

/// A condition string that matches unconditionally.
pub fn is_catch_all(condition: &str) -> bool {
    condition.trim().eq_ignore_ascii_case("true")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Raw & effective profiles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One profile document as it appears on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProfile {
    pub name: String,
    /// Absent on abstract base profiles.
    #[serde(rename = "type", default)]
    pub agent_type: Option<AgentType>,
    #[serde(default)]
    pub base_profile: Option<String>,
    #[serde(default)]
    pub llm_config_ref: Option<String>,
    #[serde(default)]
    pub tool_access_policy: ToolAccessPolicy,
    #[serde(default)]
    pub system_prompt_construction: SystemPromptConstruction,
    /// BTreeMap keeps rendering deterministic.
    #[serde(default)]
    pub text_definitions: BTreeMap<String, String>,
    #[serde(default)]
    pub pre_turn_observers: Vec<ObserverRule>,
    #[serde(default)]
    pub post_turn_observers: Vec<ObserverRule>,
    #[serde(default)]
    pub flow_decider: Vec<DeciderRule>,
}

/// The merged result of a `base_profile` chain. Immutable per run.
#[derive(Debug, Clone)]
pub struct EffectiveProfile {
    pub name: String,
    pub agent_type: Option<AgentType>,
    pub llm_config_ref: String,
    pub tool_access_policy: ToolAccessPolicy,
    /// Sorted by `order` ascending, id as the stable tie-break.
    pub segments: Vec<SegmentDef>,
    pub text_definitions: BTreeMap<String, String>,
    pub pre_turn_observers: Vec<ObserverRule>,
    pub post_turn_observers: Vec<ObserverRule>,
    pub flow_decider: Vec<DeciderRule>,
}

impl EffectiveProfile {
    /// Merge a child layer onto this profile: union by id with child
    /// wins for segments and observers, child wins by key for text
    /// definitions, union for the tool policy.
    pub(crate) fn overlay(&mut self, child: &RawProfile) {
        if child.agent_type.is_some() {
            self.agent_type = child.agent_type;
        }
        if let Some(ref llm) = child.llm_config_ref {
            self.llm_config_ref = llm.clone();
        }
        self.tool_access_policy.merge_from(&child.tool_access_policy);

        for seg in &child.system_prompt_construction.system_prompt_segments {
            match self.segments.iter_mut().find(|s| s.id == seg.id) {
                Some(slot) => *slot = seg.clone(),
                None => self.segments.push(seg.clone()),
            }
        }
        for (k, v) in &child.text_definitions {
            self.text_definitions.insert(k.clone(), v.clone());
        }
        merge_observers(&mut self.pre_turn_observers, &child.pre_turn_observers);
        merge_observers(&mut self.post_turn_observers, &child.post_turn_observers);
        merge_decider(&mut self.flow_decider, &child.flow_decider);
    }

    pub(crate) fn finalize(&mut self) {
        self.segments
            .sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
    }

    /// Look up a named text fragment.
    pub fn text_definition(&self, key: &str) -> Option<&str> {
        self.text_definitions.get(key).map(String::as_str)
    }
}

fn merge_observers(base: &mut Vec<ObserverRule>, child: &[ObserverRule]) {
    for rule in child {
        match base.iter_mut().find(|r| r.id == rule.id) {
            Some(slot) => *slot = rule.clone(),
            None => base.push(rule.clone()),
        }
    }
}

fn merge_decider(base: &mut Vec<DeciderRule>, child: &[DeciderRule]) {
    for rule in child {
        match base.iter_mut().find(|r| r.id == rule.id) {
            Some(slot) => *slot = rule.clone(),
            None => base.push(rule.clone()),
        }
    }
}

impl From<&RawProfile> for EffectiveProfile {
    fn from(raw: &RawProfile) -> Self {
        let mut eff = Self {
            name: raw.name.clone(),
            agent_type: None,
            llm_config_ref: "default".into(),
            tool_access_policy: ToolAccessPolicy::default(),
            segments: Vec::new(),
            text_definitions: BTreeMap::new(),
            pre_turn_observers: Vec::new(),
            post_turn_observers: Vec::new(),
            flow_decider: Vec::new(),
        };
        eff.overlay(raw);
        eff
    }
}
