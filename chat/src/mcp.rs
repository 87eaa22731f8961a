//! External tools served over MCP.
//!
//! Each configured server is spawned as a child process speaking MCP on
//! stdin/stdout. After the handshake its `tools/list` is turned into
//! [`ToolHandler`]s that forward calls to `tools/call`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ai::{ToolDescriptor, Value};
use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParams, ClientCapabilities, Implementation, InitializeRequestParams,
    ProtocolVersion, RawContent,
};
use rmcp::service::{RoleClient, RunningService, serve_client};
use rmcp::transport::child_process::TokioChildProcess;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::ChatError;
use crate::tools::{ToolHandler, ToolOutput, ToolRegistry};

type Service = Arc<RunningService<RoleClient, InitializeRequestParams>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

fn init_params() -> InitializeRequestParams {
    InitializeRequestParams {
        meta: None,
        protocol_version: ProtocolVersion::V_2024_11_05,
        capabilities: ClientCapabilities::default(),
        client_info: Implementation::from_build_env(),
    }
}

/// A live connection to one MCP server.
pub struct McpConnection {
    name: String,
    service: Service,
}

impl fmt::Debug for McpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpConnection")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl McpConnection {
    /// Spawns the server process and performs the MCP handshake.
    ///
    /// # Errors
    ///
    /// Fails if the process cannot be spawned or the handshake fails or times out.
    pub async fn connect(server: &config::McpServer) -> Result<Self, ChatError> {
        let source_error = |message: String| ChatError::ToolSource {
            name: server.name.clone(),
            message,
        };

        let mut cmd = Command::new(&server.command);
        cmd.args(&server.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped());
        let (transport, _stderr) = TokioChildProcess::builder(cmd)
            .spawn()
            .map_err(|e| source_error(format!("spawn MCP process: {e}")))?;

        let service = tokio::time::timeout(HANDSHAKE_TIMEOUT, serve_client(init_params(), transport))
            .await
            .map_err(|_| source_error("MCP handshake timeout".to_string()))?
            .map_err(|e| source_error(format!("MCP handshake: {e}")))?;

        debug!(source = %server.name, "connected to MCP server");
        Ok(Self {
            name: server.name.clone(),
            service: Arc::new(service),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lists the server's tools as handlers bound to this connection.
    ///
    /// # Errors
    ///
    /// Fails if the server rejects `tools/list`.
    pub async fn discover(&self) -> Result<Vec<Arc<dyn ToolHandler>>, ChatError> {
        let list = self
            .service
            .list_tools(None)
            .await
            .map_err(|e| ChatError::ToolSource {
                name: self.name.clone(),
                message: format!("tools/list: {e}"),
            })?;

        Ok(list
            .tools
            .iter()
            .map(|tool| {
                let descriptor = ToolDescriptor::new(
                    tool.name.to_string(),
                    tool.description.as_deref().unwrap_or_default(),
                    Value::Object(tool.input_schema.as_ref().clone()),
                );
                Arc::new(McpTool {
                    source: self.name.clone(),
                    service: Arc::clone(&self.service),
                    descriptor,
                }) as Arc<dyn ToolHandler>
            })
            .collect())
    }
}

/// Connects to every configured server and merges its tools into `registry`
/// under the server's name. Servers that fail are logged and skipped.
/// Returns the names of the servers whose tools were registered.
pub async fn register_servers(
    registry: &mut ToolRegistry,
    servers: &[config::McpServer],
) -> Vec<String> {
    let mut registered = vec![];

    for server in servers {
        let outcome = match McpConnection::connect(server).await {
            Ok(connection) => match connection.discover().await {
                Ok(tools) => registry.register_source(connection.name(), tools),
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => registered.push(server.name.clone()),
            Err(err) => warn!(source = %server.name, %err, "skipping external tools"),
        }
    }

    registered
}

/// One remote tool.
pub struct McpTool {
    source: String,
    service: Service,
    descriptor: ToolDescriptor,
}

impl fmt::Debug for McpTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpTool")
            .field("source", &self.source)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ToolHandler for McpTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, input: &Value) -> ToolOutput {
        let params = CallToolRequestParams {
            meta: None,
            name: self.descriptor.name.clone().into(),
            arguments: input.as_object().cloned(),
            task: None,
        };

        match self.service.call_tool(params).await {
            Ok(result) => {
                let text = result
                    .content
                    .iter()
                    .filter_map(|c| match &c.raw {
                        RawContent::Text(t) => Some(t.text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                ToolOutput {
                    content: text,
                    is_error: result.is_error.unwrap_or(false),
                }
            }
            Err(e) => {
                warn!(source = %self.source, tool = %self.descriptor.name, %e, "MCP tool call failed");
                ToolOutput::error(format!("tools/call: {e}"))
            }
        }
    }
}
