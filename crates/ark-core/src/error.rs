//! Error types for Ark.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("failed to resolve stack: {0}")]
    StackResolve(String),

    #[error("plugin install failed for {plugin}: {reason}")]
    PluginInstall { plugin: String, reason: String },

    #[error("config set failed for key {key}: {reason}")]
    ConfigSet { key: String, reason: String },

    #[error("refresh failed: {0}")]
    Refresh(String),

    #[error("update failed: {0}")]
    Up(String),

    #[error("destroy failed: {0}")]
    Destroy(String),

    #[error("remote source fetch failed: {0}")]
    Fetch(String),

    #[error("program error: {0}")]
    Program(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
