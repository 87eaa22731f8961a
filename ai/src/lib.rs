//! Model access for askql: conversation types, the [`Model`] seam and a
//! streaming client for the Anthropic Messages API.

pub mod anthropic;
pub mod streaming;
mod types;

use std::fmt::Debug;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use types::{
    ContentBlock, Message, MessageContent, ModelRequest, ModelResponse, Role, StopReason,
    StreamChunk, ToolDescriptor, ToolUse, Usage,
};

// Re-export types that consumers will need to describe tools
pub use serde_json::{Value, json};

/// Lazy, finite sequence of text chunks ending in [`StreamChunk::Final`].
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AiError>> + Send>>;

/// A language model that can be asked for a streamed completion.
#[async_trait]
pub trait Model: Send + Sync + Debug {
    /// Starts a completion. Errors before the first chunk (auth, network,
    /// HTTP status) are returned here; later failures arrive through the stream.
    async fn stream(&self, request: ModelRequest<'_>) -> Result<ChunkStream, AiError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Parse error: {0}")]
    Parse(String),
}
