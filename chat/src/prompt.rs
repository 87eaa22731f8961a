use std::fmt::Write;

use crate::tools::{QUERY_TOOL_NAME, SQL_QUERY_PARAM};

/// The fixed system instruction for a session over the sample table.
#[must_use]
pub fn system_prompt(table_name: &str) -> String {
    let mut columns = String::new();
    for (name, kind) in db::sample::COLUMNS {
        let _ = writeln!(columns, "- {name} ({kind})");
    }

    format!(
        r#"
You are a SQL assistant for a SQLite database. Answer questions about the data by
calling the `{QUERY_TOOL_NAME}` tool with a single SELECT statement in `{SQL_QUERY_PARAM}`.
Only issue SELECT statements.

Use the table `{table_name}` with the following schema:

{columns}
Only send syntactically correct SQL. If a query fails, read the error, fix the SQL and
try again. When you show SQL to the user, put it inside a markdown block. Once you have
the results, answer the question briefly in plain language.
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_table_and_columns() {
        let prompt = system_prompt("transactions");
        assert!(prompt.contains("`transactions`"));
        assert!(prompt.contains("- amount (float)"));
        assert!(prompt.contains("query_sqlite"));
    }
}
