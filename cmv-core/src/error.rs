//! Error types for cmv-core

use thiserror::Error;

/// Main error type for the cmv-core library
#[derive(Error, Debug)]
pub enum Error {
    /// No transcript matches the given id or prefix
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A prefix matched more than one transcript
    #[error("ambiguous session prefix '{}': matches {}", .prefix, .matches.join(", "))]
    AmbiguousSession {
        prefix: String,
        matches: Vec<String>,
    },

    /// Master index lookup miss
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Name collision on snapshot create or import
    #[error("snapshot already exists: {0}")]
    SnapshotExists(String),

    /// Branch name collision within a snapshot
    #[error("branch '{branch}' already exists on snapshot '{snapshot}'")]
    BranchExists { snapshot: String, branch: String },

    /// Branch lookup miss within a snapshot
    #[error("no branch '{branch}' on snapshot '{snapshot}'")]
    BranchNotFound { snapshot: String, branch: String },

    /// Snapshot name failed charset/length validation
    #[error("invalid snapshot name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Branch target has zero user or assistant messages
    #[error("snapshot '{0}' has no conversation content; re-capture from a session with at least one message")]
    NoConversationContent(String),

    /// Host layout discovery failed for a known source session
    #[error("no host project directory found for '{0}'; the project may have been removed or renamed")]
    ProjectDirNotFound(String),

    /// Host assistant binary could not be resolved
    #[error("host CLI not found: {0}")]
    HostCliNotFound(String),

    /// Import archive is missing required entries
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for cmv-core
pub type Result<T> = std::result::Result<T, Error>;
