//! Work modules — the units of delegated work tracked in team state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Module status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Pending,
    InProgress,
    PendingReview,
    Completed,
    Deprecated,
}

impl ModuleStatus {
    /// Whether a module in this status may be handed to an Associate.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, Self::Pending | Self::PendingReview)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deliverable
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Findings an Associate submitted against a module. `is_error` marks a
/// synthetic deliverable carrying the child flow's terminal error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliverable {
    pub payload: serde_json::Value,
    pub submitted_by_flow: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub is_error: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Work module
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkModule {
    pub module_id: String,
    pub name: String,
    pub description: String,
    pub status: ModuleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_profile_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_role_name: Option<String>,
    #[serde(default)]
    pub deliverables: Vec<Deliverable>,
    /// Flow id whose message history produced the deliverables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages_ref: Option<String>,
}

impl WorkModule {
    pub fn new(module_id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            name: name.into(),
            description: description.into(),
            status: ModuleStatus::Pending,
            assigned_profile_name: None,
            assigned_role_name: None,
            deliverables: Vec::new(),
            messages_ref: None,
        }
    }
}

/// Fresh module id: `wm_` + first 8 hex chars of a salted hash.
pub fn fresh_module_id(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    let digest = hasher.finalize();
    format!("wm_{}", &hex::encode(digest)[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_module_starts_pending() {
        let m = WorkModule::new("wm_1", "Research T", "dig into T");
        assert_eq!(m.status, ModuleStatus::Pending);
        assert!(m.deliverables.is_empty());
        assert!(m.assigned_profile_name.is_none());
    }

    #[test]
    fn dispatchable_statuses() {
        assert!(ModuleStatus::Pending.is_dispatchable());
        assert!(ModuleStatus::PendingReview.is_dispatchable());
        assert!(!ModuleStatus::InProgress.is_dispatchable());
        assert!(!ModuleStatus::Completed.is_dispatchable());
        assert!(!ModuleStatus::Deprecated.is_dispatchable());
    }

    #[test]
    fn fresh_ids_are_prefixed_and_unique() {
        let a = fresh_module_id("alpha");
        let b = fresh_module_id("alpha");
        assert!(a.starts_with("wm_"));
        assert_eq!(a.len(), 11);
        assert_ne!(a, b);
    }

    #[test]
    fn status_serializes_snake_case() {
        let s = serde_json::to_string(&ModuleStatus::PendingReview).unwrap();
        assert_eq!(s, "\"pending_review\"");
    }
}
