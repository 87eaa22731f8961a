//! The chat core of askql: SQL extraction, the query tool, the tool registry
//! and the loop that runs a turn of conversation against a model.

pub mod conversation;
pub mod mcp;
pub mod prompt;
pub mod session;
pub mod sql;
pub mod tools;

use std::sync::Arc;

pub use conversation::{Conversation, TurnEvent};
pub use session::Session;
pub use tools::{QueryTool, ToolHandler, ToolOutput, ToolRegistry};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Model(#[from] ai::AiError),
    #[error("model stream ended without a final message")]
    IncompleteResponse,
    #[error("tool {0:?} is already registered")]
    DuplicateTool(String),
    #[error("external tools from {name}: {message}")]
    ToolSource { name: String, message: String },
}

/// The built-in tool set: the SQL query tool over `database`.
#[must_use]
pub fn builtin_tools(database: Arc<dyn db::Database>) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    // An empty registry cannot hold a clashing name.
    let _ = registry.register(Arc::new(QueryTool::new(database)));
    registry
}
