//! Streaming client for the Anthropic Messages API.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::streaming::{SseEvent, sse_events};
use crate::{
    AiError, ChunkStream, ContentBlock, Model, ModelRequest, ModelResponse, StopReason,
    StreamChunk, Usage,
};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicConfig {
    #[must_use]
    pub fn from_config(conf: &config::AIConfig) -> Self {
        Self {
            api_key: config::AIConfig::api_key(),
            model: conf.model.clone(),
            base_url: conf.url.clone(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    #[must_use]
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn build_request_body(&self, request: &ModelRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "system": request.system,
            "max_tokens": request.max_tokens,
            "messages": request.messages,
            "stream": true,
        });

        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }

        body
    }
}

#[async_trait]
impl Model for AnthropicClient {
    async fn stream(&self, request: ModelRequest<'_>) -> Result<ChunkStream, AiError> {
        let body = self.build_request_body(&request);

        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Messages API streaming request"
        );

        let response = self
            .http
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AiError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text = text.chars().take(200).collect::<String>();
            return Err(AiError::Api(format!("HTTP {status}: {text}")));
        }

        let byte_stream = response
            .bytes_stream()
            .map(|result| result.map_err(std::io::Error::other));
        let reader = tokio::io::BufReader::new(StreamReader::new(byte_stream));

        Ok(chunk_stream(sse_events(reader)))
    }
}

/// Turns raw SSE events into text chunks followed by one final message.
pub fn chunk_stream<S>(events: S) -> ChunkStream
where
    S: Stream<Item = Result<SseEvent, AiError>> + Send + 'static,
{
    let state = ChunkState {
        events: Box::pin(events),
        message: MessageAccumulator::default(),
        done: false,
    };

    Box::pin(futures::stream::try_unfold(state, |mut state| async move {
        state
            .next_chunk()
            .await
            .map(|chunk| chunk.map(|chunk| (chunk, state)))
    }))
}

type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, AiError>> + Send>>;

struct ChunkState {
    events: EventStream,
    message: MessageAccumulator,
    done: bool,
}

impl ChunkState {
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>, AiError> {
        if self.done {
            return Ok(None);
        }

        while let Some(event) = self.events.next().await {
            if let Some(chunk) = self.message.apply(&event?)? {
                self.done = matches!(chunk, StreamChunk::Final(_));
                return Ok(Some(chunk));
            }
        }

        self.done = true;
        if self.message.stop_reason.is_some() {
            return self.message.finish().map(|response| Some(StreamChunk::Final(response)));
        }
        Err(AiError::Parse(
            "stream ended before the message was complete".to_string(),
        ))
    }
}

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Folds Messages API stream events into a [`ModelResponse`].
#[derive(Debug, Default)]
pub struct MessageAccumulator {
    blocks: Vec<PartialBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

fn parse_data(event: &SseEvent) -> Result<Value, AiError> {
    serde_json::from_str(&event.data).map_err(|e| AiError::Parse(e.to_string()))
}

fn block_index(data: &Value) -> Option<usize> {
    data["index"].as_u64().and_then(|i| usize::try_from(i).ok())
}

impl MessageAccumulator {
    /// Applies one event; returns a chunk to forward when the event produced one.
    ///
    /// # Errors
    ///
    /// Fails on malformed event data or an `error` event from the API.
    pub fn apply(&mut self, event: &SseEvent) -> Result<Option<StreamChunk>, AiError> {
        match event.event.as_deref().unwrap_or("") {
            "message_start" => {
                let data = parse_data(event)?;
                if let Some(tokens) = data["message"]["usage"]["input_tokens"].as_u64() {
                    self.usage.input_tokens = tokens;
                }
            }
            "content_block_start" => {
                let data = parse_data(event)?;
                let block = &data["content_block"];
                let partial = match block["type"].as_str() {
                    Some("tool_use") => PartialBlock::ToolUse {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        input_json: String::new(),
                    },
                    _ => PartialBlock::Text(block["text"].as_str().unwrap_or_default().to_string()),
                };
                match block_index(&data) {
                    Some(index) if index < self.blocks.len() => self.blocks[index] = partial,
                    _ => self.blocks.push(partial),
                }
            }
            "content_block_delta" => {
                let data = parse_data(event)?;
                let index = block_index(&data).unwrap_or(self.blocks.len().saturating_sub(1));
                let delta = &data["delta"];

                match (delta["type"].as_str(), self.blocks.get_mut(index)) {
                    (Some("text_delta"), Some(PartialBlock::Text(text))) => {
                        let chunk = delta["text"].as_str().unwrap_or_default();
                        if !chunk.is_empty() {
                            text.push_str(chunk);
                            return Ok(Some(StreamChunk::Text(chunk.to_string())));
                        }
                    }
                    (Some("input_json_delta"), Some(PartialBlock::ToolUse { input_json, .. })) => {
                        input_json.push_str(delta["partial_json"].as_str().unwrap_or_default());
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                let data = parse_data(event)?;
                if let Some(reason) = data["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(tokens) = data["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = tokens;
                }
            }
            "message_stop" => return self.finish().map(|r| Some(StreamChunk::Final(r))),
            "error" => {
                let data = parse_data(event)?;
                let message = data["error"]["message"]
                    .as_str()
                    .unwrap_or(&event.data)
                    .to_string();
                return Err(AiError::Api(message));
            }
            // ping, content_block_stop
            _ => {}
        }

        Ok(None)
    }

    /// Assembles the message received so far.
    ///
    /// # Errors
    ///
    /// Fails when a tool-use input is not valid JSON.
    pub fn finish(&mut self) -> Result<ModelResponse, AiError> {
        // Unknown block kinds start as empty text; the API rejects empty text blocks.
        let content = std::mem::take(&mut self.blocks)
            .into_iter()
            .filter(|block| !matches!(block, PartialBlock::Text(text) if text.is_empty()))
            .map(|block| match block {
                PartialBlock::Text(text) => Ok(ContentBlock::Text { text }),
                PartialBlock::ToolUse {
                    id,
                    name,
                    input_json,
                } => {
                    let input = if input_json.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&input_json)
                            .map_err(|e| AiError::Parse(format!("tool input for {name}: {e}")))?
                    };
                    Ok(ContentBlock::ToolUse { id, name, input })
                }
            })
            .collect::<Result<Vec<_>, AiError>>()?;

        let stop_reason = self
            .stop_reason
            .take()
            .map_or(StopReason::EndTurn, |reason| StopReason::parse(&reason));

        Ok(ModelResponse {
            content,
            stop_reason,
            usage: self.usage,
        })
    }
}
