//! Terminal host for askql chat sessions.

pub mod commands;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use tokio::sync::mpsc;

use ai::{AnthropicClient, AnthropicConfig};
use chat::{Conversation, Session, TurnEvent, tools::SQL_QUERY_PARAM};
use commands::Command;
use db::{Database, SqliteDatabase};

/// Everything one terminal chat needs: the shared data store, the model
/// loop and this user's session.
#[derive(Debug)]
pub struct App {
    database: Arc<dyn Database>,
    conversation: Conversation,
    session: Session,
}

impl App {
    /// Seeds the in-memory dataset, connects external tool servers and
    /// prepares a fresh session.
    ///
    /// # Errors
    ///
    /// Fails if the dataset cannot be created.
    pub async fn from_config(conf: &config::AskqlConfig) -> anyhow::Result<Self> {
        let database = SqliteDatabase::in_memory()
            .await
            .context("opening in-memory database")?;
        database
            .bootstrap_sample_table(&conf.data.table_name)
            .await
            .context("seeding sample table")?;
        database.set_read_only(true).await?;
        let database: Arc<dyn Database> = Arc::new(database);

        let mut tools = chat::builtin_tools(Arc::clone(&database));
        let connected = chat::mcp::register_servers(&mut tools, &conf.mcp).await;
        if !connected.is_empty() {
            tracing::info!(servers = ?connected, "external tools available");
        }

        let session = Session::new(chat::prompt::system_prompt(&conf.data.table_name), tools)
            .with_max_tokens(conf.ai.max_tokens)
            .with_max_tool_rounds(conf.max_tool_rounds);

        let model = AnthropicClient::new(AnthropicConfig::from_config(&conf.ai));

        Ok(Self {
            database,
            conversation: Conversation::new(Arc::new(model)),
            session,
        })
    }

    /// Runs one question through the model, printing as it streams.
    ///
    /// # Errors
    ///
    /// Fails when the model call fails.
    pub async fn ask(&mut self, question: &str) -> anyhow::Result<String> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                print_event(&event);
            }
        });

        print!("\n{}", "[Assistant] ".blue().bold());
        let result = self
            .conversation
            .run_turn(&mut self.session, question, &tx)
            .await;

        drop(tx);
        let _ = printer.await;
        println!("\n");

        Ok(result?)
    }

    /// Interactive prompt loop until `/exit`, Ctrl-C or end of input.
    ///
    /// # Errors
    ///
    /// Fails only if the terminal cannot be written to.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        cliclack::intro("askql".bold())?;
        cliclack::log::remark(format!(
            "Ask questions about the sample transactions. {} for commands.",
            "/help".cyan()
        ))?;

        loop {
            let Ok(line) = cliclack::input("You")
                .placeholder("How many transactions were approved?")
                .interact::<String>()
            else {
                break;
            };

            match Command::parse(&line) {
                Command::Ask(question) => {
                    if let Err(err) = self.ask(&question).await {
                        cliclack::log::error(format!("{err:#}"))?;
                    }
                }
                Command::Help => cliclack::note("Commands", commands::HELP)?,
                Command::Schema => match self.database.get_schema().await {
                    Ok(schema) => println!("{}\n", commands::schema_table(&schema)),
                    Err(err) => cliclack::log::error(err.to_string())?,
                },
                Command::Tools => println!("{}\n", commands::tools_table(self.session.tools())),
                Command::Reset => {
                    self.session.reset();
                    cliclack::log::info("Started a new conversation.")?;
                }
                Command::Unknown(name) => {
                    cliclack::log::warning(format!("Unknown command /{name}, try /help"))?;
                }
                Command::Exit => break,
            }
        }

        cliclack::outro("Bye!")?;
        Ok(())
    }
}

fn print_event(event: &TurnEvent) {
    match event {
        TurnEvent::Text(text) => print!("{}", text.blue()),
        TurnEvent::ToolCall { name, input, .. } => {
            let detail = input
                .get(SQL_QUERY_PARAM)
                .and_then(ai::Value::as_str)
                .map_or_else(|| input.to_string(), str::to_string);
            println!("\n{} {}", format!("▸ {name}").yellow().bold(), detail.dimmed());
        }
        TurnEvent::ToolResult { output, .. } => {
            let content = if output.is_error {
                output.content.red()
            } else {
                output.content.dimmed()
            };
            println!("{content}\n");
        }
    }
    let _ = io::stdout().flush();
}
