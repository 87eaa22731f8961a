//! Server-Sent Events (SSE) parsing.
//!
//! The Messages API streams its output as SSE. [`SseDecoder`] turns lines
//! into events, and [`sse_events`] drives it over any async reader as a lazy
//! stream.

use std::pin::Pin;

use futures::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::AiError;

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The event type (e.g., "message_start", "content_block_delta").
    pub event: Option<String>,
    /// The event data (JSON string).
    pub data: String,
}

/// Line-oriented SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: String,
}

impl SseDecoder {
    /// Feeds one line (without its terminator). Returns an event when the
    /// line closes one.
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.trim_end_matches('\r');

        if line.is_empty() {
            return self.take();
        }

        if let Some(event_type) = field(line, "event") {
            self.event = Some(event_type.to_string());
        } else if let Some(data) = field(line, "data") {
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(data);
        }
        // id:, retry: and comments are ignored

        None
    }

    /// Flushes an event left open when the input ends.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.take()
    }

    fn take(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data),
        })
    }
}

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let value = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

struct SseState<R> {
    lines: Lines<Pin<Box<R>>>,
    decoder: SseDecoder,
    finished: bool,
}

impl<R: AsyncBufRead> SseState<R> {
    async fn next_event(&mut self) -> Result<Option<SseEvent>, AiError> {
        if self.finished {
            return Ok(None);
        }

        while let Some(line) = self
            .lines
            .next_line()
            .await
            .map_err(|e| AiError::Network(e.to_string()))?
        {
            if let Some(event) = self.decoder.push_line(&line) {
                return Ok(Some(event));
            }
        }

        self.finished = true;
        Ok(self.decoder.finish())
    }
}

/// Lazily decodes SSE events from `reader`.
pub fn sse_events<R>(reader: R) -> impl Stream<Item = Result<SseEvent, AiError>> + Send
where
    R: AsyncBufRead + Send + 'static,
{
    let state = SseState {
        lines: Box::pin(reader).lines(),
        decoder: SseDecoder::default(),
        finished: false,
    };

    futures::stream::try_unfold(state, |mut state| async move {
        state
            .next_event()
            .await
            .map(|event| event.map(|event| (event, state)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[test]
    fn blank_line_closes_event() {
        let mut decoder = SseDecoder::default();
        assert_eq!(decoder.push_line("event: ping"), None);
        assert_eq!(decoder.push_line("data: {}"), None);
        assert_eq!(
            decoder.push_line(""),
            Some(SseEvent {
                event: Some("ping".to_string()),
                data: "{}".to_string(),
            })
        );
    }

    #[test]
    fn multi_line_data_and_crlf() {
        let mut decoder = SseDecoder::default();
        decoder.push_line("data:first\r");
        decoder.push_line(": a comment");
        decoder.push_line("data: second\r");
        let event = decoder.push_line("\r").unwrap();
        assert_eq!(event.event, None);
        assert_eq!(event.data, "first\nsecond");
    }

    #[test]
    fn event_without_data_is_dropped() {
        let mut decoder = SseDecoder::default();
        decoder.push_line("event: message_stop");
        assert_eq!(decoder.push_line(""), None);
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn stream_flushes_trailing_event() {
        let input: &'static [u8] =
            b"event: a\ndata: 1\n\nevent: b\ndata: 2\n\nevent: c\ndata: 3";
        let events: Vec<SseEvent> = sse_events(input).try_collect().await.unwrap();

        let names: Vec<_> = events.iter().filter_map(|e| e.event.as_deref()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(events[2].data, "3");
    }
}
