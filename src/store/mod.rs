//! Poll Storage
//!
//! Repository contract over the persistent store, with a SQLite backend
//! for deployments and an in-memory backend for tests and dry runs.

pub mod memory;
pub mod sqlite;

use crate::polls::{Poll, Vote};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use memory::MemoryPollRepository;
pub use sqlite::SqlitePollRepository;

/// Result type for repository operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the persistent store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Poll is closed: {0}")]
    Closed(String),

    #[error("Store operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Typed CRUD over polls and votes.
///
/// Implementations must be safe under concurrent mutation from other
/// processes sharing the same store.
#[async_trait]
pub trait PollRepository: Send + Sync {
    /// Insert a new poll. Fails with `Conflict` if the ID is taken.
    async fn create_poll(&self, poll: &Poll) -> StoreResult<()>;

    /// Point lookup by ID. Fails with `NotFound` if absent.
    async fn get_poll(&self, poll_id: &str) -> StoreResult<Poll>;

    /// Replace the whole record. Last writer wins.
    async fn update_poll(&self, poll: &Poll) -> StoreResult<()>;

    /// Remove a poll together with all of its votes.
    async fn delete_poll(&self, poll_id: &str) -> StoreResult<()>;

    /// Record a vote, replacing the voter's previous choice in that poll.
    /// Fails with `NotFound` if the poll is gone and with `Closed` if it
    /// has been finished.
    async fn add_vote(&self, vote: &Vote) -> StoreResult<()>;

    /// All current votes of a poll, in no particular order.
    async fn get_votes(&self, poll_id: &str) -> StoreResult<Vec<Vote>>;

    /// Cheap round-trip used at startup.
    async fn health_check(&self) -> StoreResult<()>;

    /// Delete votes whose poll no longer exists. Returns how many were removed.
    async fn purge_orphaned_votes(&self) -> StoreResult<u64>;

    /// Release backend resources.
    async fn close(&self);
}

/// Type-erased repository handle
pub type DynPollRepository = Arc<dyn PollRepository>;
