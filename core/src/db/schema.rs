//! Table definitions, applied to every freshly opened session.
//!
//! The DDL sticks to the subset both backends accept, so there is one copy.

pub const SENDER_KEY_SHARED_TABLE: &str = "sender_key_shared";

pub const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sender_key_shared (
        account_uuid TEXT NOT NULL,
        distribution_id TEXT NOT NULL,
        address TEXT NOT NULL,
        device INTEGER NOT NULL,
        PRIMARY KEY (account_uuid, distribution_id, address, device)
    )",
    "CREATE INDEX IF NOT EXISTS sender_key_shared_account_address
        ON sender_key_shared (account_uuid, address)",
];
