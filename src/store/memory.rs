//! In-memory poll store
//!
//! Lock-protected maps with the same contract as the SQLite backend.

use super::{PollRepository, StoreError, StoreResult};
use crate::polls::{Poll, Vote};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory repository
#[derive(Debug, Default)]
pub struct MemoryPollRepository {
    /// Polls by ID
    polls: RwLock<HashMap<String, Poll>>,
    /// Votes by poll ID, then user ID
    votes: RwLock<HashMap<String, HashMap<String, Vote>>>,
}

impl MemoryPollRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vote records across all polls
    pub fn vote_count(&self) -> usize {
        self.votes.read().values().map(|v| v.len()).sum()
    }

    /// Insert a vote without checking that its poll exists.
    ///
    /// Simulates a record left behind by an interrupted delete.
    pub fn insert_raw_vote(&self, vote: Vote) {
        self.votes
            .write()
            .entry(vote.poll_id.clone())
            .or_default()
            .insert(vote.user_id.clone(), vote);
    }
}

#[async_trait]
impl PollRepository for MemoryPollRepository {
    async fn create_poll(&self, poll: &Poll) -> StoreResult<()> {
        let mut polls = self.polls.write();
        if polls.contains_key(&poll.id) {
            return Err(StoreError::Conflict(format!("poll {}", poll.id)));
        }
        polls.insert(poll.id.clone(), poll.clone());
        Ok(())
    }

    async fn get_poll(&self, poll_id: &str) -> StoreResult<Poll> {
        self.polls
            .read()
            .get(poll_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("poll {}", poll_id)))
    }

    async fn update_poll(&self, poll: &Poll) -> StoreResult<()> {
        let mut polls = self.polls.write();
        match polls.get_mut(&poll.id) {
            Some(existing) => {
                *existing = poll.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("poll {}", poll.id))),
        }
    }

    async fn delete_poll(&self, poll_id: &str) -> StoreResult<()> {
        let mut polls = self.polls.write();
        let mut votes = self.votes.write();

        if polls.remove(poll_id).is_none() {
            return Err(StoreError::NotFound(format!("poll {}", poll_id)));
        }
        votes.remove(poll_id);
        Ok(())
    }

    async fn add_vote(&self, vote: &Vote) -> StoreResult<()> {
        let polls = self.polls.read();
        match polls.get(&vote.poll_id) {
            None => return Err(StoreError::NotFound(format!("poll {}", vote.poll_id))),
            Some(poll) if poll.is_finished => {
                return Err(StoreError::Closed(format!("poll {}", vote.poll_id)))
            }
            Some(_) => {}
        }

        // Keyed by voter, so a repeat vote overwrites in place.
        let mut votes = self.votes.write();
        votes
            .entry(vote.poll_id.clone())
            .or_default()
            .insert(vote.user_id.clone(), vote.clone());
        Ok(())
    }

    async fn get_votes(&self, poll_id: &str) -> StoreResult<Vec<Vote>> {
        let votes = self.votes.read();
        Ok(votes
            .get(poll_id)
            .map(|by_user| by_user.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn purge_orphaned_votes(&self) -> StoreResult<u64> {
        let polls = self.polls.read();
        let mut votes = self.votes.write();

        let mut removed = 0u64;
        votes.retain(|poll_id, by_user| {
            if polls.contains_key(poll_id) {
                true
            } else {
                removed += by_user.len() as u64;
                false
            }
        });
        Ok(removed)
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll(id: &str) -> Poll {
        Poll::new("Lunch", vec!["Pizza".into(), "Sushi".into()], "creator", "chan").with_id(id)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = MemoryPollRepository::new();
        repo.create_poll(&poll("p1")).await.unwrap();

        let stored = repo.get_poll("p1").await.unwrap();
        assert_eq!(stored.title, "Lunch");
        assert!(matches!(
            repo.get_poll("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let repo = MemoryPollRepository::new();
        repo.create_poll(&poll("p1")).await.unwrap();
        assert!(matches!(
            repo.create_poll(&poll("p1")).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_update_missing_poll() {
        let repo = MemoryPollRepository::new();
        assert!(matches!(
            repo.update_poll(&poll("p1")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_revote_replaces() {
        let repo = MemoryPollRepository::new();
        repo.create_poll(&poll("p1")).await.unwrap();

        for option in [0, 1, 0, 1] {
            repo.add_vote(&Vote::new("p1", "alice", option)).await.unwrap();
        }

        let votes = repo.get_votes("p1").await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].option_index, 1);
    }

    #[tokio::test]
    async fn test_vote_on_missing_poll() {
        let repo = MemoryPollRepository::new();
        assert!(matches!(
            repo.add_vote(&Vote::new("nope", "alice", 0)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_vote_on_finished_poll_is_closed() {
        let repo = MemoryPollRepository::new();
        let mut p = poll("p1");
        repo.create_poll(&p).await.unwrap();
        repo.add_vote(&Vote::new("p1", "alice", 0)).await.unwrap();

        p.finish(chrono::Utc::now());
        repo.update_poll(&p).await.unwrap();

        assert!(matches!(
            repo.add_vote(&Vote::new("p1", "bob", 1)).await,
            Err(StoreError::Closed(_))
        ));
        assert_eq!(repo.vote_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_votes() {
        let repo = MemoryPollRepository::new();
        repo.create_poll(&poll("p1")).await.unwrap();
        repo.add_vote(&Vote::new("p1", "alice", 0)).await.unwrap();

        repo.delete_poll("p1").await.unwrap();
        assert!(repo.get_votes("p1").await.unwrap().is_empty());
        assert_eq!(repo.vote_count(), 0);
    }

    #[tokio::test]
    async fn test_purge_orphaned_votes() {
        let repo = MemoryPollRepository::new();
        repo.create_poll(&poll("p1")).await.unwrap();
        repo.add_vote(&Vote::new("p1", "alice", 0)).await.unwrap();
        repo.insert_raw_vote(Vote::new("gone", "bob", 0));
        repo.insert_raw_vote(Vote::new("gone", "carol", 1));

        assert_eq!(repo.purge_orphaned_votes().await.unwrap(), 2);
        assert_eq!(repo.vote_count(), 1);
    }
}
