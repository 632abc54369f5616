//! LLM transport — the chat-completion streaming client.
//!
//! One trait ([`LlmProvider`]) with two implementations: the
//! OpenAI-compatible SSE adapter used in production, and a scripted
//! provider for tests.

pub mod aggregate;
pub mod mock;
pub mod openai_compat;
mod sse;
mod traits;

pub use aggregate::ResponseAggregator;
pub use mock::{RespondingProvider, ScriptedProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use traits::{ChatRequest, LlmProvider};
