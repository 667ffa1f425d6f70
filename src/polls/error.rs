//! Poll Errors

use crate::channels::ChannelError;
use crate::store::StoreError;
use thiserror::Error;

/// Result type for poll service operations
pub type PollResult<T> = Result<T, PollError>;

/// Failure of a poll service operation.
///
/// Every variant maps to one user-facing message through
/// [`PollError::user_message`].
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Poll not found: {0}")]
    NotFound(String),

    #[error("User {user_id} may not {action} poll {poll_id}")]
    Forbidden {
        poll_id: String,
        user_id: String,
        action: &'static str,
    },

    #[error("Poll {0} is already finished")]
    AlreadyFinished(String),

    #[error("Option {position} is out of range for poll {poll_id} ({max} options)")]
    InvalidOption {
        poll_id: String,
        position: u32,
        max: usize,
    },

    #[error("Poll ID collision: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] ChannelError),
}

impl PollError {
    /// Text shown to the user who issued the command
    pub fn user_message(&self) -> String {
        match self {
            PollError::Validation(msg) => format!("Error: {}", msg),
            PollError::NotFound(poll_id) => {
                format!("Error: poll with ID `{}` was not found.", poll_id)
            }
            PollError::Forbidden { action, .. } => {
                format!("Error: only the poll creator can {} it.", action)
            }
            PollError::AlreadyFinished(poll_id) => {
                format!("Error: poll `{}` is already finished.", poll_id)
            }
            PollError::InvalidOption { max, .. } => {
                format!("Error: option number must be between 1 and {}.", max)
            }
            PollError::Conflict(_) => {
                "Error: could not allocate a poll ID, please try again.".to_string()
            }
            PollError::Storage(_) => {
                "Error: the poll store is unavailable, please try again later.".to_string()
            }
            PollError::Gateway(_) => {
                "Error: could not reach the chat server, please try again later.".to_string()
            }
        }
    }

    /// Whether this is an internal failure rather than a bad request
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            PollError::Storage(_) | PollError::Gateway(_) | PollError::Conflict(_)
        )
    }

    /// Map a store error raised while working on `poll_id`
    pub fn from_store(poll_id: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => PollError::NotFound(poll_id.to_string()),
            StoreError::Closed(_) => PollError::AlreadyFinished(poll_id.to_string()),
            StoreError::Conflict(_) => PollError::Conflict(poll_id.to_string()),
            other => PollError::Storage(other),
        }
    }
}
