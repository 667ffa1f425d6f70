//! Poll Service
//!
//! Authorization and lifecycle rules for polls. Each operation checks the
//! poll's state and the requester before touching storage, and results are
//! always recomputed from the stored votes.

use super::error::{PollError, PollResult};
use super::model::{Poll, PollResults, Vote};
use super::render;
use super::tally::tally;
use crate::channels::DynGateway;
use crate::store::DynPollRepository;
use chrono::Utc;
use tracing::{debug, error, info};

/// Outcome of finishing a poll
#[derive(Debug, Clone)]
pub struct FinishOutcome {
    /// Final results
    pub results: PollResults,
    /// True when the poll had already been finished before this call
    pub already_finished: bool,
}

/// Orchestrates poll operations over a repository and a gateway
pub struct PollService {
    store: DynPollRepository,
    gateway: DynGateway,
}

impl PollService {
    /// Create a service over explicitly owned handles
    pub fn new(store: DynPollRepository, gateway: DynGateway) -> Self {
        Self { store, gateway }
    }

    /// Messaging gateway used for announcements
    pub fn gateway(&self) -> &DynGateway {
        &self.gateway
    }

    /// Create a poll, announce it in `channel_id`, then persist it with the
    /// announcement's post ID.
    ///
    /// If persisting fails after the announcement went out, the post stays
    /// in the channel without a backing record and an error is returned.
    pub async fn create_poll(
        &self,
        requester_id: &str,
        channel_id: &str,
        title: &str,
        options: Vec<String>,
    ) -> PollResult<Poll> {
        let options: Vec<String> = options.into_iter().map(|o| o.trim().to_string()).collect();
        let mut poll = Poll::new(title.trim(), options, requester_id, channel_id);
        poll.validate().map_err(PollError::Validation)?;

        let post_id = self
            .gateway
            .post_message(channel_id, &render::announcement(&poll))
            .await?;
        poll.post_id = post_id;

        if let Err(e) = self.store.create_poll(&poll).await {
            error!(
                poll_id = %poll.id,
                post_id = %poll.post_id,
                channel_id,
                error = %e,
                "Failed to persist announced poll"
            );
            return Err(PollError::from_store(&poll.id, e));
        }

        info!(poll_id = %poll.id, creator_id = requester_id, channel_id, options = poll.options.len(), "Poll created");
        Ok(poll)
    }

    /// Record `requester_id`'s choice of the 1-based `position`, replacing
    /// any earlier choice, and return the updated results.
    pub async fn cast_vote(
        &self,
        requester_id: &str,
        poll_id: &str,
        position: u32,
    ) -> PollResult<PollResults> {
        let poll = self.load(poll_id).await?;

        if poll.is_finished {
            return Err(PollError::AlreadyFinished(poll.id));
        }
        let option_index = poll
            .option_index(position)
            .ok_or_else(|| PollError::InvalidOption {
                poll_id: poll.id.clone(),
                position,
                max: poll.options.len(),
            })?;

        let vote = Vote::new(&poll.id, requester_id, option_index);
        self.store
            .add_vote(&vote)
            .await
            .map_err(|e| PollError::from_store(poll_id, e))?;
        debug!(poll_id, user_id = requester_id, option_index, "Vote recorded");

        self.tally_of(poll).await
    }

    /// Current results, computed fresh
    pub async fn get_results(&self, poll_id: &str) -> PollResult<PollResults> {
        let poll = self.load(poll_id).await?;
        self.tally_of(poll).await
    }

    /// Close a poll. Only its creator may do this; finishing twice is a
    /// no-op that leaves `finished_at` untouched.
    pub async fn finish_poll(&self, requester_id: &str, poll_id: &str) -> PollResult<FinishOutcome> {
        let mut poll = self.load(poll_id).await?;
        authorize(&poll, requester_id, "finish")?;

        let already_finished = !poll.finish(Utc::now());
        if already_finished {
            debug!(poll_id, "Poll was already finished");
        } else {
            self.store
                .update_poll(&poll)
                .await
                .map_err(|e| PollError::from_store(poll_id, e))?;
            info!(poll_id, user_id = requester_id, "Poll finished");
        }

        Ok(FinishOutcome {
            results: self.tally_of(poll).await?,
            already_finished,
        })
    }

    /// Delete a poll and all of its votes. Only its creator may do this.
    pub async fn delete_poll(&self, requester_id: &str, poll_id: &str) -> PollResult<()> {
        let poll = self.load(poll_id).await?;
        authorize(&poll, requester_id, "delete")?;

        self.store
            .delete_poll(&poll.id)
            .await
            .map_err(|e| PollError::from_store(poll_id, e))?;
        info!(poll_id, user_id = requester_id, "Poll deleted");
        Ok(())
    }

    async fn load(&self, poll_id: &str) -> PollResult<Poll> {
        self.store
            .get_poll(poll_id)
            .await
            .map_err(|e| PollError::from_store(poll_id, e))
    }

    async fn tally_of(&self, poll: Poll) -> PollResult<PollResults> {
        let votes = self
            .store
            .get_votes(&poll.id)
            .await
            .map_err(|e| PollError::from_store(&poll.id, e))?;
        Ok(tally(&poll, &votes))
    }
}

fn authorize(poll: &Poll, requester_id: &str, action: &'static str) -> PollResult<()> {
    if poll.is_creator(requester_id) {
        return Ok(());
    }
    Err(PollError::Forbidden {
        poll_id: poll.id.clone(),
        user_id: requester_id.to_string(),
        action,
    })
}
