//! Streaming re-enrichment
//!
//! The on-demand re-enrichment path streams newline-delimited JSON
//! events back from the service. [`EventDecoder`] turns raw byte chunks
//! into typed events incrementally (chunks may split lines anywhere);
//! [`EnrichStream`] drives a live response and honors a
//! [`CancellationToken`]. Cancellation stops consumption of the
//! response; rows already handed to the caller stay applied.

use std::collections::VecDeque;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

use super::{validate_row, EnrichedRow, EnrichmentOutcome, EnrichmentRequest, HttpEnricher, WireRow};

/// One decoded stream event
#[derive(Debug)]
pub enum StreamEvent {
    Progress { done: u64, total: u64 },
    Row(EnrichedRow),
    /// A per-row or service-reported failure
    Error(String),
    Done,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Progress { done: u64, total: u64 },
    Row { row: WireRow },
    Error { message: String },
    Done,
}

/// Incremental NDJSON event decoder
///
/// Feed it chunks as they arrive; it buffers partial lines internally
/// and emits an event per complete line. Malformed lines are logged and
/// skipped so one bad event cannot wedge the stream.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: String,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as many complete events as `chunk` completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(line.trim()) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever remains after the stream closed without a final
    /// newline.
    pub fn drain_tail(&mut self) -> Option<StreamEvent> {
        let tail = std::mem::take(&mut self.buffer);
        decode_line(tail.trim())
    }
}

fn decode_line(line: &str) -> Option<StreamEvent> {
    if line.is_empty() {
        return None;
    }
    let wire: WireEvent = match serde_json::from_str(line) {
        Ok(w) => w,
        Err(e) => {
            debug!(error = %e, "skipping undecodable stream line");
            return None;
        }
    };
    match wire {
        WireEvent::Progress { done, total } => Some(StreamEvent::Progress { done, total }),
        WireEvent::Row { row } => match validate_row(row) {
            Ok(EnrichmentOutcome::Enriched(row)) => Some(StreamEvent::Row(row)),
            Ok(EnrichmentOutcome::Failed { id, reason }) => {
                Some(StreamEvent::Error(format!("row {}: {}", id, reason)))
            }
            Err(e) => {
                debug!(error = %e, "skipping unusable stream row");
                None
            }
        },
        WireEvent::Error { message } => Some(StreamEvent::Error(message)),
        WireEvent::Done => Some(StreamEvent::Done),
    }
}

/// A live, cancellable enrichment event stream
pub struct EnrichStream {
    response: reqwest::Response,
    decoder: EventDecoder,
    pending: VecDeque<StreamEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl EnrichStream {
    /// Next event, or `None` once the stream ends or is cancelled.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    // Stop consuming; already-applied rows stay applied
                    self.finished = true;
                    return Ok(None);
                }
                chunk = self.response.chunk() => match chunk {
                    Ok(Some(bytes)) => {
                        self.pending.extend(self.decoder.push(&bytes[..]));
                    }
                    Ok(None) => {
                        self.finished = true;
                        if let Some(event) = self.decoder.drain_tail() {
                            return Ok(Some(event));
                        }
                        return Ok(None);
                    }
                    Err(e) => {
                        self.finished = true;
                        return Err(Error::EnrichmentUnavailable(e.to_string()));
                    }
                }
            }
        }
    }
}

impl HttpEnricher {
    /// Open a streaming re-enrichment request.
    pub async fn open_stream(
        &self,
        request: &EnrichmentRequest,
        cancel: CancellationToken,
    ) -> Result<EnrichStream> {
        let url = format!("{}/enrich/stream", self.base_url());
        let response = self
            .http_client()
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::EnrichmentUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::EnrichmentUnavailable(format!(
                "enrichment stream returned {}",
                response.status()
            )));
        }

        Ok(EnrichStream {
            response,
            decoder: EventDecoder::new(),
            pending: VecDeque::new(),
            cancel,
            finished: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_events_split_across_chunks() {
        let mut decoder = EventDecoder::new();

        // A progress event split mid-line over two chunks
        let events = decoder.push(b"{\"type\":\"progress\",\"done\"");
        assert!(events.is_empty());

        let events = decoder.push(b":1,\"total\":3}\n{\"type\":\"done\"}\n");
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            StreamEvent::Progress { done: 1, total: 3 }
        ));
        assert!(matches!(events[1], StreamEvent::Done));
    }

    #[test]
    fn decodes_row_events() {
        let mut decoder = EventDecoder::new();
        let line = b"{\"type\":\"row\",\"row\":{\"id\":9,\"merchant\":\"Netflix\",\"category\":\"subscriptions\",\"confidence\":0.9}}\n";
        let events = decoder.push(line);
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Row(row) => {
                assert_eq!(row.id, 9);
                assert_eq!(row.merchant.as_deref(), Some("Netflix"));
            }
            other => panic!("expected row event, got {:?}", other),
        }
    }

    #[test]
    fn error_events_pass_through() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(b"{\"type\":\"error\",\"message\":\"model overloaded\"}\n");
        assert!(matches!(&events[0], StreamEvent::Error(m) if m == "model overloaded"));
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(b"not json at all\n{\"type\":\"done\"}\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Done));
    }

    #[test]
    fn tail_without_newline_is_decoded_at_end() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(b"{\"type\":\"done\"}").is_empty());
        assert!(matches!(decoder.drain_tail(), Some(StreamEvent::Done)));
        // And the buffer is spent
        assert!(decoder.drain_tail().is_none());
    }

    #[test]
    fn row_level_failures_become_error_events() {
        let mut decoder = EventDecoder::new();
        let events =
            decoder.push(b"{\"type\":\"row\",\"row\":{\"id\":4,\"error\":\"no signal\"}}\n");
        assert!(matches!(&events[0], StreamEvent::Error(m) if m.contains("no signal")));
    }
}
