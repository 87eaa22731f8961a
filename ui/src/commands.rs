use comfy_table::{Table, presets};

use chat::ToolRegistry;
use db::Schema;

/// A line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Schema,
    Tools,
    Reset,
    Exit,
    Unknown(String),
    Ask(String),
}

impl Command {
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(name) = line.strip_prefix('/') else {
            return Command::Ask(line.to_string());
        };

        match name.split_whitespace().next().unwrap_or_default() {
            "help" | "?" => Command::Help,
            "schema" => Command::Schema,
            "tools" => Command::Tools,
            "reset" | "clear" => Command::Reset,
            "exit" | "quit" | "q" => Command::Exit,
            other => Command::Unknown(other.to_string()),
        }
    }
}

pub const HELP: &str = "\
/schema  show the tables the assistant can query
/tools   list the tools offered to the model
/reset   start a new conversation
/exit    leave
Anything else is sent to the assistant.";

#[must_use]
pub fn schema_table(schema: &Schema) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_header(["table", "column", "type"]);

    for (name, columns) in &schema.tables {
        for (column, column_type) in columns {
            table.add_row([name.as_str(), column.as_str(), column_type.as_str()]);
        }
    }

    table
}

#[must_use]
pub fn tools_table(tools: &ToolRegistry) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_header(["tool", "source", "description"]);

    for (source, descriptor) in tools.iter_with_source() {
        table.add_row([
            descriptor.name.as_str(),
            source.unwrap_or("built-in"),
            descriptor.description.as_str(),
        ]);
    }

    table
}
