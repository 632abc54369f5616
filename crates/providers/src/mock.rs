//! Scripted provider for tests — returns canned event streams in
//! sequence, without touching the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rt_domain::error::{Error, Result};
use rt_domain::stream::{BoxStream, StreamEvent};

use crate::traits::{ChatRequest, LlmProvider};

/// Replays one canned script per `chat_stream` call. A script is just
/// the list of events the stream should yield.
///
/// ```ignore
/// let provider = ScriptedProvider::new(vec![
///     mock::text_response("hello"),
///     mock::tool_call("c1", "finish_flow", serde_json::json!({})),
/// ]);
/// ```
pub struct ScriptedProvider {
    scripts: Vec<Vec<StreamEvent>>,
    cursor: AtomicUsize,
    /// Pause inserted before each event, to simulate slow streams.
    delay: Option<Duration>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts,
            cursor: AtomicUsize::new(0),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Insert a pause before each yielded event.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request this provider has seen, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_made(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().unwrap().push(req.clone());

        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .get(idx)
            .cloned()
            .ok_or_else(|| Error::Other(format!("scripted provider exhausted at call {idx}")))?;
        let delay = self.delay;

        Ok(Box::pin(async_stream::stream! {
            for event in script {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                yield Ok(event);
            }
        }))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responding provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Computes each response from the incoming request, for scenarios
/// where canned scripts can't know runtime ids (work modules, child
/// flows) ahead of time.
pub struct RespondingProvider {
    respond: Box<dyn Fn(usize, &ChatRequest) -> Vec<StreamEvent> + Send + Sync>,
    cursor: AtomicUsize,
    delay: Option<Duration>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl RespondingProvider {
    pub fn new(
        respond: impl Fn(usize, &ChatRequest) -> Vec<StreamEvent> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            cursor: AtomicUsize::new(0),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_made(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmProvider for RespondingProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().unwrap().push(req.clone());
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        let script = (self.respond)(idx, req);
        let delay = self.delay;

        Ok(Box::pin(async_stream::stream! {
            for event in script {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                yield Ok(event);
            }
        }))
    }

    fn provider_id(&self) -> &str {
        "responding"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Script builders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Plain text answer streamed as one delta.
pub fn text_response(text: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ContentDelta { text: text.into() },
        StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        },
    ]
}

/// A single tool invocation.
pub fn tool_call(call_id: &str, tool_name: &str, arguments: serde_json::Value) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ToolCallStarted {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
        },
        StreamEvent::ToolCallFinished {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        },
        StreamEvent::Done {
            usage: None,
            finish_reason: Some("tool_calls".into()),
        },
    ]
}

/// Reasoning deltas with no content and no tool calls.
pub fn reasoning_only(text: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ReasoningDelta { text: text.into() },
        StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        },
    ]
}

/// Entirely empty completion.
pub fn empty_response() -> Vec<StreamEvent> {
    vec![StreamEvent::Done {
        usage: None,
        finish_reason: Some("stop".into()),
    }]
}
