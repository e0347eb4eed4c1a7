use thiserror::Error;

use crate::platform::PlatformError;

#[derive(Error, Debug)]
pub enum BotError {
    // State errors
    #[error("Failed to load state from '{path}': {source}")]
    StateLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state file '{path}': {source}")]
    StateParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to save state to '{path}': {source}")]
    StateSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Guild {guild_id} has no configuration record")]
    NotConfigured { guild_id: u64 },

    // Lookup errors
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Role not found: {role_id}")]
    RoleNotFound { role_id: u64 },

    // Command errors
    #[error("{message}")]
    InvalidInput { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    // Discord errors
    #[error("Discord API error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BotError {
    pub fn not_found(what: impl Into<String>) -> Self {
        BotError::NotFound { what: what.into() }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        BotError::InvalidInput {
            message: message.into(),
        }
    }

    /// Absent targets are tolerated as no-ops on most paths.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BotError::NotFound { .. }
                | BotError::RoleNotFound { .. }
                | BotError::Platform(PlatformError::NotFound)
        )
    }
}

impl From<serenity::Error> for BotError {
    fn from(err: serenity::Error) -> Self {
        BotError::Platform(PlatformError::from(err))
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;

use poise::serenity_prelude as serenity;
