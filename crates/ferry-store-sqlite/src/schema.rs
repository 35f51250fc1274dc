//! SQL schema for the Ferry SQLite backends.
//!
//! Executed at connection startup; idempotent thanks to
//! `CREATE TABLE IF NOT EXISTS`. The store and the broker may live in the
//! same file or in separate files.

/// Connection settings shared by both backends. The busy timeout lets a
/// producer and a consumer process share one broker file.
const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
";

/// The `users` relation. `email` only ever holds ciphertext. The `*_folded`
/// columns hold the Unicode-lowercased names that prefix queries match on.
pub const STORE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id                INTEGER PRIMARY KEY,
    first_name        TEXT NOT NULL,
    last_name         TEXT NOT NULL,
    first_name_folded TEXT NOT NULL,
    last_name_folded  TEXT NOT NULL,
    email             TEXT NOT NULL,
    created_at        INTEGER NOT NULL, -- epoch milliseconds, UTC
    deleted_at        INTEGER,
    merged_at         INTEGER,
    parent_user_id    INTEGER           -- weak reference; no foreign key
);

CREATE INDEX IF NOT EXISTS users_first_name_idx ON users(first_name_folded);
CREATE INDEX IF NOT EXISTS users_last_name_idx  ON users(last_name_folded);
";

/// Durable queue. A row is deleted when its delivery is acknowledged.
pub const BROKER_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    message_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    queue        TEXT    NOT NULL,
    content_type TEXT    NOT NULL,
    payload      BLOB    NOT NULL,
    state        TEXT    NOT NULL DEFAULT 'ready',  -- 'ready' | 'delivered' | 'dead'
    attempt      INTEGER NOT NULL DEFAULT 0,
    published_at INTEGER NOT NULL,  -- epoch milliseconds
    delivered_at INTEGER,
    dead_reason  TEXT
);

CREATE INDEX IF NOT EXISTS messages_queue_state_idx ON messages(queue, state, message_id);
";

/// Record cache. Rows past `expires_at` are treated as absent and swept
/// periodically.
pub const CACHE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache (
    key        TEXT    PRIMARY KEY,
    value      BLOB    NOT NULL,
    expires_at INTEGER NOT NULL   -- epoch milliseconds
);

CREATE INDEX IF NOT EXISTS cache_expires_idx ON cache(expires_at);
";

/// Prefix `schema` with the connection pragmas.
pub fn with_pragmas(schema: &str) -> String { format!("{PRAGMAS}{schema}") }
