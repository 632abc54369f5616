//! The LLM call orchestration: streaming with cancellation, per-call
//! timeout, retry with exponential backoff, frame publication, and
//! aggregation into one final assistant response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use rt_domain::config::Config;
use rt_domain::error::{Error, Result};
use rt_providers::aggregate::{AggregatedResponse, ResponseAggregator};
use rt_providers::{ChatRequest, LlmProvider, OpenAiCompatProvider};

use crate::bus::{EventBus, RunEvent};
use crate::cancel::CancelToken;

const BACKOFF_BASE_MS: u64 = 250;
const BACKOFF_CAP_MS: u64 = 4_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider map
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Providers keyed by `llm_config_ref`. Read-only after boot.
pub struct ProviderMap {
    map: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderMap {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Build one OpenAI-compatible adapter per configured endpoint.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mut map: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        for (name, llm_cfg) in &cfg.llm {
            let provider = OpenAiCompatProvider::from_config(name.clone(), llm_cfg)?;
            map.insert(name.clone(), Arc::new(provider));
        }
        Ok(Self { map })
    }

    pub fn insert(&mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.map.insert(name.into(), provider);
    }

    /// Resolve an `llm_config_ref`, falling back to `default`.
    pub fn resolve(&self, config_ref: &str) -> Result<Arc<dyn LlmProvider>> {
        self.map
            .get(config_ref)
            .or_else(|| self.map.get("default"))
            .cloned()
            .ok_or_else(|| Error::Config(format!("no LLM provider for '{config_ref}'")))
    }
}

impl Default for ProviderMap {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Call orchestration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CallOpts {
    pub timeout: Duration,
    pub max_retries: u32,
}

/// Stream one chat completion to the bus and aggregate it.
///
/// - Frames surface as `LlmChunk` events as they arrive.
/// - Cancellation aborts the stream and returns what aggregated so far;
///   the caller observes the token and terminates the flow.
/// - Transport errors and timeouts retry with exponential backoff up to
///   `max_retries` unless cancelled.
/// - A completion with no content, no tool calls, and no reasoning
///   fails with [`Error::EmptyResponse`].
pub async fn call(
    provider: &Arc<dyn LlmProvider>,
    req: &ChatRequest,
    opts: &CallOpts,
    cancel: &CancelToken,
    bus: &EventBus,
    flow_id: &str,
) -> Result<AggregatedResponse> {
    let mut last_error = Error::LlmTransport("no attempt made".into());

    for attempt in 0..=opts.max_retries {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if attempt > 0 {
            let backoff =
                Duration::from_millis((BACKOFF_BASE_MS << (attempt - 1)).min(BACKOFF_CAP_MS));
            tracing::warn!(
                flow_id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %last_error,
                "retrying LLM call"
            );
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }

        match tokio::time::timeout(opts.timeout, attempt_once(provider, req, cancel, bus, flow_id))
            .await
        {
            Err(_elapsed) => {
                last_error = Error::LlmTimeout(format!(
                    "no completion within {} ms",
                    opts.timeout.as_millis()
                ));
            }
            Ok(Err(e)) => match e {
                Error::LlmTransport(_) | Error::LlmTimeout(_) | Error::Http(_) => last_error = e,
                other => return Err(other),
            },
            Ok(Ok(outcome)) => {
                let (response, was_cancelled) = outcome;
                if was_cancelled {
                    // Partial aggregate; the flow will observe the token.
                    return Ok(response);
                }
                if response.content.is_empty()
                    && response.tool_calls.is_empty()
                    && response.reasoning_content.is_empty()
                {
                    return Err(Error::EmptyResponse);
                }
                bus.publish(RunEvent::LlmResponse {
                    flow_id: flow_id.to_string(),
                    content: response.content.clone(),
                    reasoning_content: response.reasoning_content.clone(),
                    tool_calls: response.tool_calls.clone(),
                });
                return Ok(response);
            }
        }
    }

    Err(last_error)
}

/// One streaming attempt. Returns the aggregate and whether the stream
/// was abandoned due to cancellation.
async fn attempt_once(
    provider: &Arc<dyn LlmProvider>,
    req: &ChatRequest,
    cancel: &CancelToken,
    bus: &EventBus,
    flow_id: &str,
) -> Result<(AggregatedResponse, bool)> {
    let mut stream = provider.chat_stream(req).await?;
    let mut aggregator = ResponseAggregator::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Ok((aggregator.finish(), true));
            }
            next = stream.next() => {
                match next {
                    Some(Ok(frame)) => {
                        aggregator.feed(&frame);
                        bus.publish(RunEvent::LlmChunk {
                            flow_id: flow_id.to_string(),
                            frame,
                        });
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok((aggregator.finish(), false)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_domain::stream::StreamEvent;
    use rt_providers::mock::{self, ScriptedProvider};

    fn opts() -> CallOpts {
        CallOpts {
            timeout: Duration::from_secs(5),
            max_retries: 2,
        }
    }

    #[tokio::test]
    async fn aggregates_and_publishes_frames() {
        let provider: Arc<dyn LlmProvider> =
            Arc::new(ScriptedProvider::new(vec![mock::text_response("hello")]));
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let cancel = CancelToken::new();

        let resp = call(&provider, &ChatRequest::default(), &opts(), &cancel, &bus, "f1")
            .await
            .unwrap();
        assert_eq!(resp.content, "hello");

        // Chunk events then the aggregated response.
        let mut saw_chunk = false;
        let mut saw_response = false;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                RunEvent::LlmChunk { .. } => saw_chunk = true,
                RunEvent::LlmResponse { content, .. } => {
                    saw_response = true;
                    assert_eq!(content, "hello");
                }
                _ => {}
            }
        }
        assert!(saw_chunk);
        assert!(saw_response);
    }

    #[tokio::test]
    async fn reasoning_only_response_is_not_empty() {
        let provider: Arc<dyn LlmProvider> =
            Arc::new(ScriptedProvider::new(vec![mock::reasoning_only("analyzing…")]));
        let bus = EventBus::new();
        let cancel = CancelToken::new();

        let resp = call(&provider, &ChatRequest::default(), &opts(), &cancel, &bus, "f1")
            .await
            .unwrap();
        assert!(resp.content.is_empty());
        assert_eq!(resp.reasoning_content, "analyzing…");
    }

    #[tokio::test]
    async fn fully_empty_response_errors() {
        let provider: Arc<dyn LlmProvider> =
            Arc::new(ScriptedProvider::new(vec![mock::empty_response()]));
        let bus = EventBus::new();
        let cancel = CancelToken::new();

        let err = call(&provider, &ChatRequest::default(), &opts(), &cancel, &bus, "f1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyResponse));
    }

    #[tokio::test]
    async fn cancellation_returns_partial_aggregate() {
        let provider: Arc<dyn LlmProvider> = Arc::new(
            ScriptedProvider::new(vec![vec![
                StreamEvent::ContentDelta { text: "par".into() },
                StreamEvent::ContentDelta { text: "tial".into() },
                StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) },
            ]])
            .with_delay(Duration::from_millis(100)),
        );
        let bus = EventBus::new();
        let cancel = CancelToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            canceller.cancel();
        });

        let resp = call(&provider, &ChatRequest::default(), &opts(), &cancel, &bus, "f1")
            .await
            .unwrap();
        assert!(resp.content.len() < "partial".len());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn timeout_then_retry_succeeds() {
        // First script is too slow for the per-call timeout (5 events at
        // 80 ms each); the retry's script finishes inside it.
        let slow_script = vec![
            StreamEvent::ContentDelta { text: "s".into() },
            StreamEvent::ContentDelta { text: "l".into() },
            StreamEvent::ContentDelta { text: "o".into() },
            StreamEvent::ContentDelta { text: "w".into() },
            StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) },
        ];
        let provider: Arc<dyn LlmProvider> = Arc::new(
            ScriptedProvider::new(vec![slow_script, mock::text_response("fast")])
                .with_delay(Duration::from_millis(80)),
        );
        let tight = CallOpts {
            timeout: Duration::from_millis(250),
            max_retries: 1,
        };
        let bus = EventBus::new();
        let cancel = CancelToken::new();

        let resp = call(&provider, &ChatRequest::default(), &tight, &cancel, &bus, "f1")
            .await
            .unwrap();
        assert_eq!(resp.content, "fast");
    }

    #[tokio::test]
    async fn non_retryable_error_surfaces_immediately() {
        let provider: Arc<dyn LlmProvider> = Arc::new(
            ScriptedProvider::new(vec![]), // every call errors with Other
        );
        let bus = EventBus::new();
        let cancel = CancelToken::new();

        let err = call(
            &provider,
            &ChatRequest::default(),
            &CallOpts {
                timeout: Duration::from_secs(1),
                max_retries: 2,
            },
            &cancel,
            &bus,
            "f1",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Other(_)));
        // Only one call was made: Other is not a transport error.
    }
}
