//! The tool-use loop driving one turn of a chat session.

use std::sync::Arc;

use ai::{ContentBlock, Message, Model, ModelRequest, ModelResponse, Role, StopReason, StreamChunk, Value};
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::ChatError;
use crate::session::Session;
use crate::tools::ToolOutput;

/// Progress of a turn, forwarded to the host as it happens.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// A streamed piece of model text.
    Text(String),
    /// The model asked for a tool.
    ToolCall { id: String, name: String, input: Value },
    /// The tool answered.
    ToolResult {
        id: String,
        name: String,
        output: ToolOutput,
    },
}

#[derive(Debug)]
enum TurnState {
    AwaitingModel,
    ToolRequested(ModelResponse),
    Done(ModelResponse),
}

/// Runs turns against a model. Holds no conversation state of its own; the
/// [`Session`] is passed in for every turn.
#[derive(Debug, Clone)]
pub struct Conversation {
    model: Arc<dyn Model>,
}

impl Conversation {
    #[must_use]
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self { model }
    }

    /// Appends `user_message` to the session and loops model calls and tool
    /// calls until the model answers without requesting a tool. Returns the
    /// final text, which is also appended to the history.
    ///
    /// Events go to `events` without waiting on the receiver; a dropped
    /// receiver is ignored.
    ///
    /// # Errors
    ///
    /// Model failures are returned as they happen. History already appended
    /// during the turn is kept.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        user_message: impl Into<String>,
        events: &UnboundedSender<TurnEvent>,
    ) -> Result<String, ChatError> {
        session.history.push(Message::user(user_message));

        let mut rounds = 0;
        let mut state = TurnState::AwaitingModel;

        loop {
            state = match state {
                TurnState::AwaitingModel => {
                    let response = self.call_model(session, events).await?;
                    let wants_tool = response.stop_reason == StopReason::ToolUse
                        && response.tool_uses().next().is_some();

                    if wants_tool {
                        TurnState::ToolRequested(response)
                    } else {
                        TurnState::Done(response)
                    }
                }
                TurnState::ToolRequested(response) => {
                    rounds += 1;
                    if session.max_tool_rounds > 0 && rounds > session.max_tool_rounds {
                        warn!(
                            rounds = session.max_tool_rounds,
                            "tool round limit reached, ending turn"
                        );
                        TurnState::Done(response)
                    } else {
                        let results = run_tools(session, &response, events).await;
                        session
                            .history
                            .push(Message::blocks(Role::Assistant, response.content));
                        session.history.push(Message::blocks(Role::User, results));
                        TurnState::AwaitingModel
                    }
                }
                TurnState::Done(response) => {
                    let text = response.text();
                    // The API rejects empty assistant turns later in the history.
                    if !text.is_empty() {
                        session.history.push(Message::assistant(text.clone()));
                    }
                    return Ok(text);
                }
            };
        }
    }

    async fn call_model(
        &self,
        session: &Session,
        events: &UnboundedSender<TurnEvent>,
    ) -> Result<ModelResponse, ChatError> {
        let tools = session.tools.descriptors();
        let request = ModelRequest {
            system: &session.system_prompt,
            messages: &session.history,
            tools: &tools,
            max_tokens: session.max_tokens,
        };

        debug!(messages = session.history.len(), "calling model");
        let mut stream = self.model.stream(request).await?;

        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::Text(text) => {
                    let _ = events.send(TurnEvent::Text(text));
                }
                StreamChunk::Final(response) => return Ok(response),
            }
        }

        Err(ChatError::IncompleteResponse)
    }
}

/// Services every tool-use block of `response` in order, producing the
/// matching tool-result blocks.
async fn run_tools(
    session: &Session,
    response: &ModelResponse,
    events: &UnboundedSender<TurnEvent>,
) -> Vec<ContentBlock> {
    let mut results = vec![];

    for tool_use in response.tool_uses() {
        info!(tool = tool_use.name, id = tool_use.id, "tool requested");
        let _ = events.send(TurnEvent::ToolCall {
            id: tool_use.id.to_string(),
            name: tool_use.name.to_string(),
            input: tool_use.input.clone(),
        });

        let output = session.tools.dispatch(tool_use.name, tool_use.input).await;

        let _ = events.send(TurnEvent::ToolResult {
            id: tool_use.id.to_string(),
            name: tool_use.name.to_string(),
            output: output.clone(),
        });
        results.push(ContentBlock::ToolResult {
            tool_use_id: tool_use.id.to_string(),
            content: output.content,
            is_error: output.is_error,
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use ai::{AiError, ChunkStream, ToolDescriptor, Usage, json};
    use async_trait::async_trait;
    use db::SqliteDatabase;
    use tokio::sync::mpsc;

    use super::*;
    use crate::tools::{QueryTool, SQL_ERROR_MARKER, ToolRegistry};

    /// Replays canned responses and records how many messages each call saw.
    #[derive(Debug, Default)]
    struct ScriptedModel {
        responses: Mutex<VecDeque<ModelResponse>>,
        seen: Mutex<Vec<(usize, Vec<String>)>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<ModelResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::default(),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Model for ScriptedModel {
        async fn stream(&self, request: ModelRequest<'_>) -> Result<ChunkStream, AiError> {
            self.seen.lock().unwrap().push((
                request.messages.len(),
                request.tools.iter().map(|t| t.name.clone()).collect(),
            ));

            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AiError::Api("script exhausted".to_string()))?;

            let mut chunks: Vec<Result<StreamChunk, AiError>> = vec![];
            let text = response.text();
            if !text.is_empty() {
                chunks.push(Ok(StreamChunk::Text(text)));
            }
            chunks.push(Ok(StreamChunk::Final(response)));
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn tool_use(id: &str, sql: &str) -> ModelResponse {
        ModelResponse {
            content: vec![
                ContentBlock::Text {
                    text: "Let me look.".to_string(),
                },
                ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: "query_sqlite".to_string(),
                    input: json!({ "sql_query": sql }),
                },
            ],
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
        }
    }

    fn answer(text: &str) -> ModelResponse {
        ModelResponse {
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        }
    }

    async fn session() -> Session {
        let database = SqliteDatabase::in_memory().await.unwrap();
        database
            .bootstrap_sample_table("transactions")
            .await
            .unwrap();
        let mut tools = ToolRegistry::default();
        tools
            .register(Arc::new(QueryTool::new(Arc::new(database))))
            .unwrap();
        Session::new("system", tools)
    }

    /// Every tool-use block is answered by the very next message.
    fn assert_tool_results_adjacent(history: &[Message]) {
        for (i, message) in history.iter().enumerate() {
            let requested: Vec<&str> = message
                .content_blocks()
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect();
            if requested.is_empty() {
                continue;
            }

            let next = history.get(i + 1).expect("tool use must be answered");
            assert_eq!(next.role, Role::User);
            let answered: Vec<&str> = next
                .content_blocks()
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(requested, answered);
        }
    }

    #[tokio::test]
    async fn two_tool_rounds_then_answer() {
        let model = ScriptedModel::new(vec![
            tool_use("toolu_1", "SELECT * FROM transactions WHERE status='approved'"),
            tool_use("toolu_2", "SELECT SUM(amount) AS total FROM transactions"),
            answer("Three approved transactions, 750.75 in total."),
        ]);
        let conversation = Conversation::new(model.clone());
        let mut session = session().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let text = conversation
            .run_turn(&mut session, "How many approved?", &tx)
            .await
            .unwrap();

        assert_eq!(text, "Three approved transactions, 750.75 in total.");
        assert_eq!(model.calls(), 3);

        let history = session.history();
        // user, (assistant, tool results) x2, assistant
        assert_eq!(history.len(), 6);
        let tool_results = history
            .iter()
            .flat_map(|m| m.content_blocks())
            .filter(|b| matches!(b, ContentBlock::ToolResult { .. }))
            .count();
        assert_eq!(tool_results, 2);
        assert_eq!(history[5], Message::assistant(text.clone()));
        assert_tool_results_adjacent(history);

        drop(tx);
        let mut tool_calls = 0;
        let mut streamed = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::ToolCall { name, .. } => {
                    assert_eq!(name, "query_sqlite");
                    tool_calls += 1;
                }
                TurnEvent::Text(t) => streamed.push_str(&t),
                TurnEvent::ToolResult { .. } => {}
            }
        }
        assert_eq!(tool_calls, 2);
        assert!(streamed.ends_with("750.75 in total."));
    }

    #[tokio::test]
    async fn model_sees_full_history_and_tools() {
        let model = ScriptedModel::new(vec![tool_use("a", "SELECT 1"), answer("1")]);
        let conversation = Conversation::new(model.clone());
        let mut session = session().await;
        let (tx, _rx) = mpsc::unbounded_channel();

        conversation.run_turn(&mut session, "q", &tx).await.unwrap();

        let seen = model.seen.lock().unwrap().clone();
        assert_eq!(seen[0], (1, vec!["query_sqlite".to_string()]));
        assert_eq!(seen[1].0, 3);
    }

    #[tokio::test]
    async fn sql_errors_are_fed_back_to_the_model() {
        let model = ScriptedModel::new(vec![
            tool_use("bad", "SELEC * FROM transactions"),
            tool_use("good", "SELECT COUNT(*) AS n FROM transactions"),
            answer("There are 4."),
        ]);
        let conversation = Conversation::new(model);
        let mut session = session().await;
        let (tx, _rx) = mpsc::unbounded_channel();

        conversation.run_turn(&mut session, "count", &tx).await.unwrap();

        let ContentBlock::ToolResult {
            content, is_error, ..
        } = &session.history()[2].content_blocks()[0]
        else {
            panic!("expected a tool result");
        };
        assert!(content.starts_with(SQL_ERROR_MARKER));
        assert!(*is_error);
    }

    #[tokio::test]
    async fn every_tool_use_block_is_answered() {
        let mut response = tool_use("first", "SELECT 1");
        response.content.push(ContentBlock::ToolUse {
            id: "second".to_string(),
            name: "no_such_tool".to_string(),
            input: json!({}),
        });
        let model = ScriptedModel::new(vec![response, answer("done")]);
        let conversation = Conversation::new(model);
        let mut session = session().await;
        let (tx, _rx) = mpsc::unbounded_channel();

        conversation.run_turn(&mut session, "q", &tx).await.unwrap();

        let results = session.history()[2].content_blocks();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            &results[1],
            ContentBlock::ToolResult { content, is_error: true, .. } if content == "unknown tool: no_such_tool"
        ));
        assert_tool_results_adjacent(session.history());
    }

    #[tokio::test]
    async fn round_limit_ends_turn_with_consistent_history() {
        let model = ScriptedModel::new(vec![
            tool_use("1", "SELECT 1"),
            tool_use("2", "SELECT 2"),
            tool_use("3", "SELECT 3"),
        ]);
        let conversation = Conversation::new(model.clone());
        let mut session = session().await.with_max_tool_rounds(2);
        let (tx, _rx) = mpsc::unbounded_channel();

        let text = conversation.run_turn(&mut session, "loop", &tx).await.unwrap();

        assert_eq!(model.calls(), 3);
        assert_eq!(text, "Let me look.");
        assert_eq!(session.history().len(), 6);
        assert_tool_results_adjacent(session.history());
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let model = ScriptedModel::new(vec![]);
        let conversation = Conversation::new(model);
        let mut session = session().await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = conversation.run_turn(&mut session, "hi", &tx).await.unwrap_err();

        assert!(matches!(err, ChatError::Model(AiError::Api(_))));
        assert_eq!(session.history(), [Message::user("hi")]);
    }

    #[tokio::test]
    async fn turns_accumulate_until_reset() {
        let model = ScriptedModel::new(vec![answer("one"), answer("two")]);
        let conversation = Conversation::new(model.clone());
        let mut session = session().await;
        let (tx, _rx) = mpsc::unbounded_channel();

        conversation.run_turn(&mut session, "a", &tx).await.unwrap();
        conversation.run_turn(&mut session, "b", &tx).await.unwrap();
        assert_eq!(session.history().len(), 4);
        assert_eq!(model.seen.lock().unwrap()[1].0, 3);

        session.reset();
        assert!(session.history().is_empty());
        assert_eq!(session.tools().descriptors(), vec![descriptor_of(&session)]);
    }

    fn descriptor_of(session: &Session) -> ToolDescriptor {
        session.tools().get("query_sqlite").unwrap().descriptor().clone()
    }
}
