//! Incremental SSE (Server-Sent Events) decoder for provider responses.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::Stream;
use tokio_stream::StreamExt;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Line-oriented decoder. Bytes go in as they arrive; complete events come
/// out once their terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
    ready: VecDeque<SseEvent>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);
            self.line(&line);
        }
    }

    pub fn next_event(&mut self) -> Option<SseEvent> {
        self.ready.pop_front()
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.line(rest.trim_end_matches('\r'));
        }
        self.dispatch();
        self.ready.pop_front()
    }

    fn line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch();
        } else if line.starts_with(':') {
            // comment
        } else if let Some(value) = line.strip_prefix("event:") {
            self.event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.trim_start().to_string());
        }
    }

    fn dispatch(&mut self) {
        if self.data.is_empty() {
            self.event = None;
            return;
        }
        self.ready.push_back(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        });
    }
}

/// Decode a byte stream as SSE events.
pub fn decode_sse<S, E>(bytes: S) -> impl Stream<Item = anyhow::Result<SseEvent>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures::stream::unfold(
        (Box::pin(bytes), SseDecoder::new(), false),
        |(mut bytes, mut decoder, mut ended)| async move {
            loop {
                if let Some(event) = decoder.next_event() {
                    return Some((Ok(event), (bytes, decoder, ended)));
                }
                if ended {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(e)) => {
                        ended = true;
                        return Some((
                            Err(anyhow::anyhow!("SSE stream error: {e}")),
                            (bytes, decoder, ended),
                        ));
                    }
                    None => {
                        ended = true;
                        if let Some(event) = decoder.finish() {
                            return Some((Ok(event), (bytes, decoder, ended)));
                        }
                    }
                }
            }
        },
    )
}

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = anyhow::Result<SseEvent>> + Send {
    decode_sse(response.bytes_stream())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_splits_across_chunks() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: {\"a\"");
        assert!(decoder.next_event().is_none());
        decoder.push(b":1}\r\n\r\ndata: [DONE]\n\n");
        assert_eq!(decoder.next_event().unwrap().data, r#"{"a":1}"#);
        assert_eq!(decoder.next_event().unwrap().data, "[DONE]");
        assert!(decoder.next_event().is_none());
    }

    #[test]
    fn test_decoder_event_name_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        decoder.push(b": keep-alive\nevent: delta\ndata: one\ndata: two\n\n");
        let event = decoder.next_event().unwrap();
        assert_eq!(event.event.as_deref(), Some("delta"));
        assert_eq!(event.data, "one\ntwo");
    }

    #[test]
    fn test_decoder_finish_flushes_trailing_event() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: tail");
        assert!(decoder.next_event().is_none());
        assert_eq!(decoder.finish().unwrap().data, "tail");
    }

    #[tokio::test]
    async fn test_decode_sse_stream() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: first\n")),
            Ok(Bytes::from_static(b"\ndata: second\n\n")),
        ];
        let events: Vec<_> = decode_sse(futures::stream::iter(chunks)).collect().await;
        let data: Vec<String> = events.into_iter().map(|e| e.unwrap().data).collect();
        assert_eq!(data, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_decode_sse_stream_error_ends_stream() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: ok\n\n")),
            Err(std::io::Error::other("reset")),
            Ok(Bytes::from_static(b"data: never\n\n")),
        ];
        let events: Vec<_> = decode_sse(futures::stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].as_ref().unwrap_err().to_string().contains("reset"));
    }
}
