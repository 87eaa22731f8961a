use ai::Message;

use crate::tools::ToolRegistry;

/// Per-user chat state, owned by whoever hosts the conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) history: Vec<Message>,
    pub(crate) tools: ToolRegistry,
    pub(crate) system_prompt: String,
    pub(crate) max_tokens: u32,
    pub(crate) max_tool_rounds: usize,
}

impl Session {
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            history: vec![],
            tools,
            system_prompt: system_prompt.into(),
            max_tokens: 1024,
            max_tool_rounds: 0,
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Caps tool round-trips per turn; `0` means unbounded.
    #[must_use]
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Forgets the conversation; tools and settings stay.
    pub fn reset(&mut self) {
        self.history.clear();
    }
}
