//! Shared SSE line-framing and per-index tool-call accumulation, used by
//! both the Anthropic and OpenAI-shaped streaming codecs.

use std::collections::BTreeMap;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};

use super::ToolCall;
use crate::{RatchetError, Result};

/// One item framed out of an SSE byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseItem {
    /// A `data:` line's payload, already stripped of the prefix.
    Data(String),
    /// The `[DONE]` sentinel. Always the last item the stream yields.
    Done,
}

/// Splits a raw byte stream into `data: <payload>` lines, yielding
/// [`SseItem::Done`] once and then nothing further once the `[DONE]`
/// sentinel is seen. Lines that don't start with `data:` (blank separators,
/// `event:` lines, comments) are dropped.
pub fn sse_payloads(
    bytes: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> BoxStream<'static, Result<SseItem>> {
    let mut buf = String::new();
    let mut done = false;

    Box::pin(
        bytes
            .map(|chunk| chunk.map_err(RatchetError::from))
            .flat_map(move |chunk| {
                let mut out = Vec::new();
                if done {
                    return futures_util::stream::iter(out);
                }
                match chunk {
                    Err(e) => out.push(Err(e)),
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buf.find('\n') {
                            let line = buf[..pos].trim_end_matches('\r').to_string();
                            buf.drain(..=pos);
                            if let Some(payload) = line.strip_prefix("data:") {
                                let payload = payload.trim();
                                if payload == "[DONE]" {
                                    done = true;
                                    out.push(Ok(SseItem::Done));
                                    break;
                                }
                                if !payload.is_empty() {
                                    out.push(Ok(SseItem::Data(payload.to_string())));
                                }
                            }
                        }
                    }
                }
                futures_util::stream::iter(out)
            }),
    )
}

/// Accumulates streamed tool-call argument fragments keyed by
/// content-block index, tolerating sparse or interleaved indices.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, index: u32, id: impl Into<String>, name: impl Into<String>) {
        let entry = self.calls.entry(index).or_default();
        entry.id = Some(id.into());
        entry.name = Some(name.into());
    }

    pub fn push_argument_delta(&mut self, index: u32, delta: &str) {
        self.calls.entry(index).or_default().arguments.push_str(delta);
    }

    /// Finalizes accumulated fragments in index order, parsing each
    /// argument buffer as JSON. A partial call with an empty argument
    /// buffer parses as an empty object, matching providers that omit
    /// arguments for zero-parameter tools.
    pub fn finish(self) -> Result<Vec<ToolCall>> {
        self.calls
            .into_iter()
            .map(|(_, partial)| {
                let raw = if partial.arguments.trim().is_empty() {
                    "{}"
                } else {
                    partial.arguments.as_str()
                };
                Ok(ToolCall {
                    id: partial.id.unwrap_or_default(),
                    name: partial.name.unwrap_or_default(),
                    arguments: serde_json::from_str(raw)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn frames_data_lines_split_across_chunks() {
        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"a\":")),
            Ok(Bytes::from_static(b"1}\n\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];
        let payloads: Vec<SseItem> = sse_payloads(stream::iter(chunks))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(payloads, vec![SseItem::Data("{\"a\":1}".into()), SseItem::Done]);
    }

    #[test]
    fn accumulator_tolerates_sparse_interleaved_indices() {
        let mut acc = ToolCallAccumulator::new();
        acc.start(3, "call_b", "search");
        acc.start(0, "call_a", "lookup");
        acc.push_argument_delta(0, "{\"q\":");
        acc.push_argument_delta(3, "{\"term\":\"x\"}");
        acc.push_argument_delta(0, "\"y\"}");

        let calls = acc.finish().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "lookup");
        assert_eq!(calls[0].arguments, serde_json::json!({"q": "y"}));
        assert_eq!(calls[1].name, "search");
    }

    #[test]
    fn empty_argument_buffer_finalizes_as_empty_object() {
        let mut acc = ToolCallAccumulator::new();
        acc.start(0, "call_a", "ping");
        let calls = acc.finish().unwrap();
        assert_eq!(calls[0].arguments, serde_json::json!({}));
    }
}
