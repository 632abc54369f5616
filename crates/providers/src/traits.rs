use rt_domain::stream::{BoxStream, StreamEvent};
use rt_domain::tool::{ChatMessage, ToolDefinition};
use rt_domain::Result;

/// A chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<ChatMessage>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Model identifier. Empty lets the endpoint choose its default.
    pub model: String,
    /// Sampling temperature. `None` lets the endpoint choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the endpoint choose.
    pub max_tokens: Option<u32>,
}

/// The chat-completion transport seam.
///
/// The engine only ever streams; aggregation into a final message
/// happens on top via [`crate::ResponseAggregator`].
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and return a stream of events.
    async fn chat_stream(&self, req: &ChatRequest)
        -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
