//! Error types for the page auto-responder.

use std::time::Duration;

/// Configuration-related errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Remote API transport errors.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },
}

/// Seen-comment ledger persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to read ledger {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to write ledger {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Corrupt ledger {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

/// Errors loading a rule snapshot from a pattern store.
#[derive(Debug, thiserror::Error)]
pub enum RuleSourceError {
    #[error("Failed to read responses file {path}: {reason}")]
    File { path: String, reason: String },

    #[error("Failed to parse responses file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Rule store query failed: {0}")]
    Store(#[from] DatabaseError),
}

/// Failure of a single post's worker task. Never aborts sibling tasks.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Fetching comments for post {post_id} failed: {source}")]
    FetchComments {
        post_id: String,
        #[source]
        source: GraphError,
    },

    #[error("Task for post {post_id} panicked: {reason}")]
    Panicked { post_id: String, reason: String },

    #[error("Task for post {post_id} timed out after {timeout:?}")]
    TimedOut { post_id: String, timeout: Duration },

    #[error("Worker pool closed before post {post_id} could run")]
    PoolClosed { post_id: String },
}

/// Failure of a whole processing cycle. The daemon backs off and retries.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Fetching posts failed: {0}")]
    FetchPosts(#[source] GraphError),

    #[error("No rule snapshot available: {0}")]
    Rules(#[source] RuleSourceError),
}
