//! Anthropic's block-completion wire format: `POST /v1/messages`, an
//! `x-api-key` header, a dedicated `anthropic-version` header, and a
//! content-block array mixing `text` and `tool_use` blocks.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::sse::{sse_payloads, SseItem, ToolCallAccumulator};
use super::{FinishReason, Provider, ProviderMessage, ProviderResponse, Role, StreamEvent, ToolCall, Usage};
use crate::tools::ToolDefinition;
use crate::{RatchetError, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

pub struct AnthropicProvider {
    alias: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(alias: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            alias: alias.into(),
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            api_key: api_key.into(),
            max_tokens,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request(&self, messages: &[ProviderMessage], tools: &[ToolDefinition], stream: bool) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let turns: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(message_to_block)
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": turns,
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools
                .iter()
                .map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                }))
                .collect::<Vec<_>>());
        }
        body
    }
}

fn message_to_block(message: &ProviderMessage) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": message.content,
            }],
        }),
        Role::Assistant => {
            let mut blocks = Vec::new();
            if !message.content.is_empty() {
                blocks.push(json!({"type": "text", "text": message.content}));
            }
            for call in message.tool_calls.iter().flatten() {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.arguments,
                }));
            }
            json!({"role": "assistant", "content": blocks})
        }
        Role::User | Role::System => json!({"role": "user", "content": message.content}),
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl From<AnthropicUsage> for Usage {
    fn from(u: AnthropicUsage) -> Self {
        Usage { input_tokens: u.input_tokens, output_tokens: u.output_tokens }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    #[serde(other)]
    Other,
}

fn decode_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.alias
    }

    async fn chat(&self, messages: &[ProviderMessage], tools: &[ToolDefinition]) -> Result<ProviderResponse> {
        let body = self.build_request(messages, tools, false);
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RatchetError::Upstream { status: status.as_u16(), body: text });
        }

        let parsed: AnthropicResponse = resp.json().await?;
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                AnthropicBlock::Text { text: t } => text.push_str(&t),
                AnthropicBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, arguments: input })
                }
                AnthropicBlock::Other => {}
            }
        }
        Ok(ProviderResponse {
            text,
            tool_calls,
            finish_reason: decode_stop_reason(parsed.stop_reason.as_deref()),
            usage: parsed.usage.map(Usage::from),
        })
    }

    async fn stream(
        &self,
        messages: &[ProviderMessage],
        tools: &[ToolDefinition],
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_request(messages, tools, true);
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RatchetError::Upstream { status: status.as_u16(), body: text });
        }

        let payloads = sse_payloads(resp.bytes_stream());
        let mut accumulator = ToolCallAccumulator::new();
        let mut pending_finish = None;
        let mut pending_usage = Usage::default();
        let mut finished = false;

        let events = payloads.flat_map(move |payload| {
            let events = match payload {
                Err(e) => vec![Err(e)],
                Ok(SseItem::Data(raw)) => decode_anthropic_event(
                    &raw,
                    &mut accumulator,
                    &mut pending_finish,
                    &mut pending_usage,
                    &mut finished,
                ),
                Ok(SseItem::Done) => finalize_stream(&mut accumulator, &mut pending_finish, &mut pending_usage, &mut finished),
            };
            futures_util::stream::iter(events)
        });
        Ok(Box::pin(events))
    }
}

/// Finalizes any still-pending tool call and emits the terminal `Done`
/// event. Idempotent: a no-op once `finished` is already set, so a vendor
/// that both sends `message_stop` and closes with `[DONE]` doesn't emit two
/// terminal events.
fn finalize_stream(
    accumulator: &mut ToolCallAccumulator,
    pending_finish: &mut Option<FinishReason>,
    pending_usage: &mut Usage,
    finished: &mut bool,
) -> Vec<Result<StreamEvent>> {
    if *finished {
        return vec![];
    }
    *finished = true;
    let accumulated = std::mem::take(accumulator);
    let mut events: Vec<Result<StreamEvent>> = match accumulated.finish() {
        Ok(calls) => calls.into_iter().map(|c| Ok(StreamEvent::ToolCall(c))).collect(),
        Err(e) => vec![Err(e)],
    };
    let usage = std::mem::take(pending_usage);
    events.push(Ok(StreamEvent::Done(pending_finish.take().unwrap_or_default(), Some(usage))));
    events
}

fn decode_anthropic_event(
    raw: &str,
    accumulator: &mut ToolCallAccumulator,
    pending_finish: &mut Option<FinishReason>,
    pending_usage: &mut Usage,
    finished: &mut bool,
) -> Vec<Result<StreamEvent>> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return vec![Err(RatchetError::from(e))],
    };
    let event_type = value.get("type").and_then(Value::as_str).unwrap_or_default();

    match event_type {
        "message_start" => {
            if let Some(input_tokens) = value
                .get("message")
                .and_then(|m| m.get("usage"))
                .and_then(|u| u.get("input_tokens"))
                .and_then(Value::as_u64)
            {
                pending_usage.input_tokens = input_tokens as u32;
            }
            vec![]
        }
        "content_block_start" => {
            let index = value.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
            if let Some(block) = value.get("content_block") {
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                    let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                    accumulator.start(index, id, name);
                }
            }
            vec![]
        }
        "content_block_delta" => {
            let index = value.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
            let delta = value.get("delta");
            match delta.and_then(|d| d.get("type")).and_then(Value::as_str) {
                Some("text_delta") => {
                    let text = delta
                        .and_then(|d| d.get("text"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    vec![Ok(StreamEvent::Text(text.to_string()))]
                }
                Some("input_json_delta") => {
                    let partial = delta
                        .and_then(|d| d.get("partial_json"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    accumulator.push_argument_delta(index, partial);
                    vec![]
                }
                _ => vec![],
            }
        }
        "message_delta" => {
            let stop_reason = value
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(Value::as_str);
            *pending_finish = Some(decode_stop_reason(stop_reason));
            if let Some(output_tokens) = value
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(Value::as_u64)
            {
                pending_usage.output_tokens = output_tokens as u32;
            }
            vec![]
        }
        "message_stop" => finalize_stream(accumulator, pending_finish, pending_usage, finished),
        _ => vec![],
    }
}
