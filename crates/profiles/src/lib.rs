//! Declarative agent profiles — YAML documents, loaded once at boot and
//! resolved through `base_profile` inheritance into effective profiles.

pub mod loader;
pub mod resolver;
pub mod schema;

pub use resolver::ProfileStore;
pub use schema::{
    AgentType, ConsumptionPolicy, DeciderRule, EffectiveProfile, FlowAction, FlowOutcome,
    InboxItemDef, ObserverAction, ObserverRule, RawProfile, SegmentDef, SegmentKind,
    ToolAccessPolicy,
};
