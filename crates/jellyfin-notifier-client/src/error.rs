//! Error types for Jellyfin API calls.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors returned by [`crate::JellyfinClient`] and the refresh flusher.
///
/// Every variant maps to the HTTP status the notifier answers with when the
/// error reaches a caller.
#[derive(Debug, Error)]
pub enum JellyfinError {
    /// Base URL or `/System/Info` could not be reached
    #[error("Failed to reach Jellyfin: {source}")]
    Unreachable {
        #[source]
        source: reqwest::Error,
    },

    /// `/System/Info` answered 401/403
    #[error("Jellyfin API key rejected (status {status})")]
    KeyRejected { status: u16 },

    /// `/System/Info` answered something other than 200/401/403
    #[error("Failed to reach Jellyfin (status {status})")]
    UnexpectedStatus { status: u16 },

    #[error("Failed to fetch Jellyfin virtual folders: {source}")]
    FoldersUnreachable {
        #[source]
        source: reqwest::Error,
    },

    #[error("Jellyfin API key rejected for virtual folders (status {status})")]
    FoldersRejected { status: u16 },

    #[error("Failed to fetch Jellyfin virtual folders (status {status})")]
    FoldersStatus { status: u16 },

    #[error("Failed to parse Jellyfin virtual folders response")]
    FoldersParse,

    /// `POST /Library/Refresh` could not be sent
    #[error("Failed to trigger Jellyfin: {source}")]
    RefreshUnreachable {
        #[source]
        source: reqwest::Error,
    },

    /// `POST /Library/Refresh` answered something other than 204
    #[error("Failed to trigger Jellyfin ({status})")]
    RefreshStatus { status: u16 },

    /// One or more per-library refreshes failed
    #[error("Failed to refresh libraries: {}", .failures.join(", "))]
    LibraryRefresh { failures: Vec<String> },

    /// Requested collection types that no library on the server has
    #[error(
        "Unknown collection types: {}. Available: {}",
        .missing.join(", "),
        display_available(.available)
    )]
    UnknownCollectionTypes {
        missing: Vec<String>,
        available: Vec<String>,
    },
}

fn display_available(available: &[String]) -> String {
    if available.is_empty() {
        "(none)".to_string()
    } else {
        available.join(", ")
    }
}

impl JellyfinError {
    /// Status the notifier answers with for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::KeyRejected { .. } | Self::FoldersRejected { .. } => StatusCode::UNAUTHORIZED,
            Self::Unreachable { .. }
            | Self::UnexpectedStatus { .. }
            | Self::FoldersUnreachable { .. }
            | Self::FoldersStatus { .. }
            | Self::FoldersParse
            | Self::RefreshUnreachable { .. } => StatusCode::BAD_GATEWAY,
            Self::RefreshStatus { .. } | Self::LibraryRefresh { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::UnknownCollectionTypes { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

/// Result type alias for JellyfinError
pub type Result<T> = std::result::Result<T, JellyfinError>;
