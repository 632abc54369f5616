//! SSE plumbing for the chat-completion stream.
//!
//! The endpoint delivers events delimited by `\n\n`; only `data:` lines
//! matter. [`SseBuffer`] accumulates body chunks and yields complete
//! payloads; [`event_stream`] turns a `reqwest::Response` plus a parser
//! closure into a [`BoxStream`] of stream events.

use rt_domain::error::{Error, Result};
use rt_domain::stream::{BoxStream, StreamEvent};

pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::LlmTimeout(e.to_string())
    } else {
        Error::LlmTransport(e.to_string())
    }
}

/// Accumulates raw SSE bytes and drains complete `data:` payloads.
#[derive(Default)]
pub(crate) struct SseBuffer {
    buf: String,
}

impl SseBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.push_str(&String::from_utf8_lossy(bytes));
    }

    /// Pull every complete event's `data:` payloads out of the buffer.
    /// A trailing partial event stays for the next push.
    pub fn drain(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let block: String = self.buf.drain(..pos).collect();
            self.buf.drain(..2);
            for line in block.lines() {
                if let Some(data) = line.trim().strip_prefix("data:") {
                    let data = data.trim();
                    if !data.is_empty() {
                        payloads.push(data.to_string());
                    }
                }
            }
        }
        payloads
    }

    /// Terminate any dangling partial event and drain it.
    pub fn flush(&mut self) -> Vec<String> {
        if self.buf.trim().is_empty() {
            return Vec::new();
        }
        self.buf.push_str("\n\n");
        self.drain()
    }
}

/// Build a stream of [`StreamEvent`]s from an SSE response body.
///
/// `parse` maps one `data:` payload to zero or more events. A fallback
/// `Done` is emitted if the body closes without one.
pub(crate) fn event_stream<F>(
    response: reqwest::Response,
    mut parse: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = SseBuffer::default();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push(&bytes);
                    for payload in buffer.drain() {
                        for event in parse(&payload) {
                            done_emitted |= matches!(&event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    for payload in buffer.flush() {
                        for event in parse(&payload) {
                            done_emitted |= matches!(&event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_complete_event() {
        let mut buf = SseBuffer::default();
        buf.push(b"event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(buf.drain(), vec!["{\"a\":1}"]);
        assert!(buf.drain().is_empty());
    }

    #[test]
    fn partial_event_waits_for_more_bytes() {
        let mut buf = SseBuffer::default();
        buf.push(b"data: first\n\ndata: par");
        assert_eq!(buf.drain(), vec!["first"]);
        buf.push(b"tial\n\n");
        assert_eq!(buf.drain(), vec!["partial"]);
    }

    #[test]
    fn flush_recovers_dangling_event() {
        let mut buf = SseBuffer::default();
        buf.push(b"data: tail-no-delimiter");
        assert!(buf.drain().is_empty());
        assert_eq!(buf.flush(), vec!["tail-no-delimiter"]);
    }

    #[test]
    fn ignores_non_data_lines_and_empty_payloads() {
        let mut buf = SseBuffer::default();
        buf.push(b"event: ping\nid: 7\nretry: 100\ndata: \n\ndata: keep\n\n");
        assert_eq!(buf.drain(), vec!["keep"]);
    }

    #[test]
    fn done_sentinel_passes_through() {
        let mut buf = SseBuffer::default();
        buf.push(b"data: [DONE]\n\n");
        assert_eq!(buf.drain(), vec!["[DONE]"]);
    }
}
