use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Ask questions about a sample dataset in plain language.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.config/askql/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model to ask
    #[arg(short, long)]
    model: Option<String>,

    /// Name of the sample table
    #[arg(short, long)]
    table: Option<String>,

    /// Ask a single question and exit
    #[arg(short, long)]
    ask: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut conf = match &cli.config {
        Some(path) => config::AskqlConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => config::AskqlConfig::get_or_default(),
    };
    if let Some(model) = cli.model {
        conf.ai.model = model;
    }
    if let Some(table) = cli.table {
        conf.data.table_name = table;
    }
    tracing::debug!(?conf, "configuration loaded");

    let mut app = ui::App::from_config(&conf).await?;

    match cli.ask {
        Some(question) => {
            app.ask(&question).await?;
        }
        None => app.run().await?,
    }

    Ok(())
}
