//! The fixed demo dataset seeded at startup.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transaction {
    pub user_id: i64,
    pub user_name: &'static str,
    pub transaction_id: i64,
    pub amount: f64,
    pub status: &'static str,
}

pub const TRANSACTIONS: &[Transaction] = &[
    Transaction {
        user_id: 1,
        user_name: "Alice",
        transaction_id: 1,
        amount: 100.5,
        status: "approved",
    },
    Transaction {
        user_id: 2,
        user_name: "Bob",
        transaction_id: 2,
        amount: 200.0,
        status: "declined",
    },
    Transaction {
        user_id: 3,
        user_name: "Charlie",
        transaction_id: 3,
        amount: 150.25,
        status: "approved",
    },
    Transaction {
        user_id: 2,
        user_name: "Bob",
        transaction_id: 4,
        amount: 300.0,
        status: "approved",
    },
];

/// Column names with the types a model should assume when writing queries.
pub const COLUMNS: &[(&str, &str)] = &[
    ("user_id", "integer"),
    ("user_name", "string"),
    ("transaction_id", "integer"),
    ("amount", "float"),
    ("status", "string: 'approved', 'declined'"),
];

pub(crate) fn create_table_sql(quoted_table: &str) -> String {
    format!(
        "CREATE TABLE {quoted_table} (
            user_id INTEGER,
            user_name TEXT,
            transaction_id INTEGER,
            amount REAL,
            status TEXT
        )"
    )
}

pub(crate) fn insert_sql(quoted_table: &str) -> String {
    format!(
        "INSERT INTO {quoted_table} (user_id, user_name, transaction_id, amount, status)
         VALUES (?, ?, ?, ?, ?)"
    )
}
