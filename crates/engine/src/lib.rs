//! The agent-execution engine — drives a team of LLM-backed agents
//! through a shared work plan.
//!
//! Entry point: [`run::Run::start`] spawns the Principal flow for a user
//! prompt. The Principal plans work modules (`manage_work_modules`),
//! dispatches them to Associate flows in parallel
//! (`dispatch_submodules`), reviews deliverables, and finishes with a
//! report. External observers subscribe to the per-run [`bus::EventBus`].

pub mod bus;
pub mod cancel;
pub mod dispatch;
pub mod eval;
pub mod flow;
pub mod ingest;
pub mod llm;
pub mod node;
pub mod plan;
pub mod prompt;
pub mod registry;
pub mod run;
pub mod team;
pub mod tools;

pub use bus::{EventBus, RunEvent};
pub use cancel::CancelToken;
pub use flow::{FlowRunner, FlowState, FlowTermination, InboxItem};
pub use registry::{Tool, ToolContext, ToolRegistry};
pub use run::{Run, RunContext, RunHandle};
pub use team::TeamState;
