//! Resolves `base_profile` inheritance chains into effective profiles.
//!
//! Resolution walks the chain root-first and overlays each child layer
//! (union by id, child wins). Results are memoized; the store is
//! read-only after boot.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use rt_domain::error::{Error, Result};

use crate::loader;
use crate::schema::{is_catch_all, AgentType, EffectiveProfile, RawProfile};

pub struct ProfileStore {
    raw: HashMap<String, RawProfile>,
    resolved: RwLock<HashMap<String, Arc<EffectiveProfile>>>,
}

impl ProfileStore {
    /// Load every profile document under `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self::from_raw(loader::load_all(dir)?))
    }

    pub fn from_raw(raw: HashMap<String, RawProfile>) -> Self {
        Self {
            raw,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// All profile names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.raw.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of dispatchable Associate profiles, sorted. Seeds
    /// `team.profiles_list_instance_ids` at run start.
    pub fn associate_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .raw
            .values()
            .filter(|p| p.agent_type == Some(AgentType::Associate))
            .map(|p| p.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.raw.contains_key(name)
    }

    /// Resolve a profile by name. Memoized; repeated calls return the
    /// same effective profile.
    pub fn resolve(&self, name: &str) -> Result<Arc<EffectiveProfile>> {
        if let Some(hit) = self.resolved.read().get(name) {
            return Ok(hit.clone());
        }

        // Collect the chain child-first, then overlay root-first.
        let mut chain: Vec<&RawProfile> = Vec::new();
        let mut visited: Vec<&str> = Vec::new();
        let mut cursor = Some(name);
        while let Some(n) = cursor {
            if visited.contains(&n) {
                return Err(Error::ProfileCycle(format!(
                    "{} -> {n}",
                    visited.join(" -> ")
                )));
            }
            let raw = self
                .raw
                .get(n)
                .ok_or_else(|| Error::ProfileNotFound(n.to_string()))?;
            visited.push(n);
            chain.push(raw);
            cursor = raw.base_profile.as_deref();
        }

        let root = chain.last().unwrap();
        let mut eff = EffectiveProfile::from(*root);
        for layer in chain.iter().rev().skip(1) {
            eff.overlay(layer);
        }
        eff.name = name.to_string();
        eff.finalize();
        validate(&eff)?;

        let eff = Arc::new(eff);
        self.resolved
            .write()
            .insert(name.to_string(), eff.clone());
        Ok(eff)
    }
}

/// Concrete profiles must be able to reach a flow decision on every turn.
fn validate(eff: &EffectiveProfile) -> Result<()> {
    if eff.agent_type.is_none() {
        // Abstract base profile; only ever resolved as part of a chain.
        return Ok(());
    }
    if !eff.flow_decider.iter().any(|r| is_catch_all(&r.condition)) {
        return Err(Error::Config(format!(
            "profile '{}' flow_decider has no catch-all rule",
            eff.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FlowAction, SegmentKind};

    fn store_from_yaml(docs: &[&str]) -> ProfileStore {
        let mut raw = HashMap::new();
        for doc in docs {
            let p: RawProfile = serde_yaml::from_str(doc).unwrap();
            raw.insert(p.name.clone(), p);
        }
        ProfileStore::from_raw(raw)
    }

    const BASE: &str = r#"
name: base_agent
llm_config_ref: default
tool_access_policy:
  allowed_individual_tools: [finish_flow]
system_prompt_construction:
  system_prompt_segments:
    - { id: identity, type: static_text, order: 100, content: base identity }
    - { id: tools, type: tool_description, order: 900 }
text_definitions:
  self_reflection: base reflection text
flow_decider:
  - id: fallback
    condition: "True"
    action: { kind: continue_with_tool }
"#;

    const CHILD: &str = r#"
name: child
type: associate
base_profile: base_agent
tool_access_policy:
  allowed_toolsets: [research]
system_prompt_construction:
  system_prompt_segments:
    - { id: identity, type: static_text, order: 100, content: child identity }
    - { id: extra, type: static_text, order: 50, content: goes first }
text_definitions:
  self_reflection: child reflection text
"#;

    #[test]
    fn child_overrides_by_id_and_key() {
        let store = store_from_yaml(&[BASE, CHILD]);
        let eff = store.resolve("child").unwrap();

        assert_eq!(eff.agent_type, Some(AgentType::Associate));
        assert_eq!(eff.llm_config_ref, "default");

        // Segment `identity` replaced, `extra` added, sorted by order.
        let ids: Vec<_> = eff.segments.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["extra", "identity", "tools"]);
        let identity = eff.segments.iter().find(|s| s.id == "identity").unwrap();
        assert_eq!(identity.content.as_deref(), Some("child identity"));

        // Text definition: child wins.
        assert_eq!(
            eff.text_definition("self_reflection"),
            Some("child reflection text")
        );

        // Policy union.
        assert!(eff.tool_access_policy.allows("x", "research"));
        assert!(eff.tool_access_policy.allows("finish_flow", ""));

        // Decider inherited from the base.
        assert!(matches!(
            eff.flow_decider[0].action,
            FlowAction::ContinueWithTool
        ));
    }

    #[test]
    fn resolution_is_idempotent_and_memoized() {
        let store = store_from_yaml(&[BASE, CHILD]);
        let a = store.resolve("child").unwrap();
        let b = store.resolve("child").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.segments.len(), b.segments.len());
    }

    #[test]
    fn cycle_is_detected() {
        let store = store_from_yaml(&[
            "name: a\nbase_profile: b\n",
            "name: b\nbase_profile: a\n",
        ]);
        let err = store.resolve("a").unwrap_err();
        assert!(matches!(err, Error::ProfileCycle(_)));
    }

    #[test]
    fn self_cycle_is_detected() {
        let store = store_from_yaml(&["name: a\nbase_profile: a\n"]);
        assert!(matches!(
            store.resolve("a").unwrap_err(),
            Error::ProfileCycle(_)
        ));
    }

    #[test]
    fn unknown_profile_errors() {
        let store = store_from_yaml(&[BASE]);
        assert!(matches!(
            store.resolve("ghost").unwrap_err(),
            Error::ProfileNotFound(_)
        ));
    }

    #[test]
    fn missing_catch_all_rejected_for_concrete_profiles() {
        let store = store_from_yaml(&[r#"
name: broken
type: principal
flow_decider:
  - id: only
    condition: "v['state.current_action']"
    action: { kind: continue_with_tool }
"#]);
        assert!(matches!(
            store.resolve("broken").unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn three_level_chain_merges_root_first() {
        let store = store_from_yaml(&[
            BASE,
            r#"
name: mid
base_profile: base_agent
system_prompt_construction:
  system_prompt_segments:
    - { id: identity, type: static_text, order: 100, content: mid identity }
"#,
            r#"
name: leaf
type: associate
base_profile: mid
"#,
        ]);
        let eff = store.resolve("leaf").unwrap();
        let identity = eff.segments.iter().find(|s| s.id == "identity").unwrap();
        assert_eq!(identity.content.as_deref(), Some("mid identity"));
        assert_eq!(identity.kind, SegmentKind::StaticText);
    }

    #[test]
    fn associate_names_filters_by_type() {
        let store = store_from_yaml(&[
            BASE,
            CHILD,
            "name: boss\ntype: principal\nflow_decider:\n  - { id: f, condition: 'True', action: { kind: continue_with_tool } }\n",
        ]);
        assert_eq!(store.associate_names(), vec!["child".to_string()]);
    }
}
