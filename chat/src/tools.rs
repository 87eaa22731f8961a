use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use ai::{ToolDescriptor, Value, json};
use async_trait::async_trait;
use comfy_table::{Table, presets};
use db::{Database, DatabaseResult};
use tracing::{info, warn};

use crate::ChatError;
use crate::sql::{check_read_only, normalize_query};

pub const QUERY_TOOL_NAME: &str = "query_sqlite";
pub const SQL_QUERY_PARAM: &str = "sql_query";

/// Prefix of every failed query result handed back to the model.
pub const SQL_ERROR_MARKER: &str = "❌ SQL Error: ";

/// What a tool returns to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    #[must_use]
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    #[must_use]
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// A callable tool. Failures are reported through [`ToolOutput`], never raised.
#[async_trait]
pub trait ToolHandler: Send + Sync + Debug {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn call(&self, input: &Value) -> ToolOutput;
}

/// Name to handler map: the built-in tools plus tool sets discovered from
/// external sources, keyed by source name.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    builtin: Vec<Arc<dyn ToolHandler>>,
    external: BTreeMap<String, Vec<Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    /// # Errors
    ///
    /// Fails if a tool with the same name is already available.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> Result<(), ChatError> {
        let name = &handler.descriptor().name;
        if self.get(name).is_some() {
            return Err(ChatError::DuplicateTool(name.clone()));
        }
        self.builtin.push(handler);
        Ok(())
    }

    /// Installs the tool set of `source`, replacing what it offered before.
    ///
    /// # Errors
    ///
    /// Fails without changing the registry if any name clashes with a tool
    /// from elsewhere or appears twice in `handlers`.
    pub fn register_source(
        &mut self,
        source: impl Into<String>,
        handlers: Vec<Arc<dyn ToolHandler>>,
    ) -> Result<(), ChatError> {
        let source = source.into();

        for (i, handler) in handlers.iter().enumerate() {
            let name = &handler.descriptor().name;
            let clashes_elsewhere = self
                .iter_with_source()
                .any(|(owner, other)| owner != Some(source.as_str()) && &other.name == name);
            let repeated = handlers[..i]
                .iter()
                .any(|earlier| &earlier.descriptor().name == name);
            if clashes_elsewhere || repeated {
                return Err(ChatError::DuplicateTool(name.clone()));
            }
        }

        info!(source = %source, tools = handlers.len(), "registered external tools");
        self.external.insert(source, handlers);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.builtin
            .iter()
            .chain(self.external.values().flatten())
            .find(|handler| handler.descriptor().name == name)
    }

    /// Every available tool with the source it came from (`None` for built-ins).
    #[must_use]
    pub fn iter_with_source(&self) -> impl Iterator<Item = (Option<&str>, &ToolDescriptor)> {
        let builtin = self.builtin.iter().map(|h| (None::<&str>, h.descriptor()));
        let external = self.external.iter().flat_map(|(source, handlers)| {
            handlers
                .iter()
                .map(move |h| (Some(source.as_str()), h.descriptor()))
        });
        builtin.chain(external)
    }

    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.iter_with_source()
            .map(|(_, descriptor)| descriptor.clone())
            .collect()
    }

    /// Runs the named tool. An unknown name yields an error output.
    pub async fn dispatch(&self, name: &str, input: &Value) -> ToolOutput {
        match self.get(name) {
            Some(handler) => handler.call(input).await,
            None => {
                warn!(tool = name, "model requested an unknown tool");
                ToolOutput::error(format!("unknown tool: {name}"))
            }
        }
    }
}

/// Runs read-only SQL against the data store and answers with a markdown table.
#[derive(Debug)]
pub struct QueryTool {
    database: Arc<dyn Database>,
    descriptor: ToolDescriptor,
}

impl QueryTool {
    #[must_use]
    pub fn new(database: Arc<dyn Database>) -> Self {
        let descriptor = ToolDescriptor::new(
            QUERY_TOOL_NAME,
            "Run SQL query on sample SQLite table.",
            json!({
                "type": "object",
                "properties": {
                    SQL_QUERY_PARAM: {
                        "type": "string",
                        "description": "A single SELECT statement to execute.",
                    },
                },
                "required": [SQL_QUERY_PARAM],
            }),
        );

        Self {
            database,
            descriptor,
        }
    }

    /// Executes `sql` and renders the outcome as text for the model.
    pub async fn run(&self, sql: &str) -> ToolOutput {
        let query = normalize_query(sql);

        if let Err(reason) = check_read_only(query) {
            warn!(%query, %reason, "refused query");
            return ToolOutput::error(format!("{SQL_ERROR_MARKER}{reason}"));
        }

        info!(%query, "running query");
        match self.database.get_results(query).await {
            Ok(result) => ToolOutput::ok(render_table(&result)),
            Err(err) => {
                warn!(%query, %err, "query failed");
                ToolOutput::error(format!("{SQL_ERROR_MARKER}{err}"))
            }
        }
    }
}

#[async_trait]
impl ToolHandler for QueryTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, input: &Value) -> ToolOutput {
        match input.get(SQL_QUERY_PARAM).and_then(Value::as_str) {
            Some(sql) => self.run(sql).await,
            None => ToolOutput::error(format!(
                "{SQL_ERROR_MARKER}missing string parameter `{SQL_QUERY_PARAM}`"
            )),
        }
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Markdown table of a result set.
#[must_use]
pub fn render_table(result: &DatabaseResult) -> String {
    if result.headers.is_empty() {
        return "(no rows)".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(presets::ASCII_MARKDOWN)
        .set_header(result.headers.iter().map(|(name, _)| name.as_str()));

    for row in &result.rows {
        table.add_row(row.iter().map(cell_text));
    }

    table.to_string()
}
