//! Poll Model
//!
//! Entities for single-choice polls: the poll itself, one vote per user,
//! and the derived results view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimum number of options a poll must offer
pub const MIN_OPTIONS: usize = 2;

/// Length of generated poll IDs
const POLL_ID_LEN: usize = 8;

/// Lifecycle state of a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    /// Accepting votes
    Active,
    /// Closed by its creator, results are final
    Finished,
}

impl PollStatus {
    /// Human-readable label used in rendered messages
    pub fn label(&self) -> &'static str {
        match self {
            PollStatus::Active => "Active",
            PollStatus::Finished => "Finished",
        }
    }
}

/// A single voting round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    /// Short opaque identifier
    pub id: String,
    /// Poll question
    pub title: String,
    /// Option labels, addressed by position
    pub options: Vec<String>,
    /// User who created the poll; the only one allowed to finish or delete it
    pub creator_id: String,
    /// Channel the poll was announced in
    pub channel_id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Set once when the poll is finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether the poll has been finished
    #[serde(default)]
    pub is_finished: bool,
    /// ID of the announcement post in the messaging gateway
    #[serde(default)]
    pub post_id: String,
}

impl Poll {
    /// Create a new active poll with a freshly generated ID
    pub fn new(
        title: impl Into<String>,
        options: Vec<String>,
        creator_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_poll_id(),
            title: title.into(),
            options,
            creator_id: creator_id.into(),
            channel_id: channel_id.into(),
            created_at: Utc::now(),
            finished_at: None,
            is_finished: false,
            post_id: String::new(),
        }
    }

    /// Override the generated ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Current lifecycle state
    pub fn status(&self) -> PollStatus {
        if self.is_finished {
            PollStatus::Finished
        } else {
            PollStatus::Active
        }
    }

    /// Whether `user_id` may finish or delete this poll
    pub fn is_creator(&self, user_id: &str) -> bool {
        self.creator_id == user_id
    }

    /// Transition to finished. Returns false if it already was.
    pub fn finish(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_finished {
            return false;
        }
        self.is_finished = true;
        self.finished_at = Some(at);
        true
    }

    /// Convert a 1-based option position into a 0-based index
    pub fn option_index(&self, position: u32) -> Option<usize> {
        let position = position as usize;
        if position >= 1 && position <= self.options.len() {
            Some(position - 1)
        } else {
            None
        }
    }

    /// Label of the option at a 0-based index
    pub fn option_label(&self, index: usize) -> Option<&str> {
        self.options.get(index).map(String::as_str)
    }

    /// Check the creation-time invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("poll ID is required".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("poll title is required".to_string());
        }
        if self.options.len() < MIN_OPTIONS {
            return Err(format!(
                "a poll needs at least {} options, got {}",
                MIN_OPTIONS,
                self.options.len()
            ));
        }
        if let Some(pos) = self.options.iter().position(|o| o.trim().is_empty()) {
            return Err(format!("option {} is empty", pos + 1));
        }
        if self.is_finished != self.finished_at.is_some() {
            return Err("finished flag and finish time disagree".to_string());
        }
        Ok(())
    }
}

/// One user's current choice in one poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Poll voted in
    pub poll_id: String,
    /// Voter
    pub user_id: String,
    /// 0-based index into the poll's options
    pub option_index: usize,
    /// Time of the most recent vote action
    pub voted_at: DateTime<Utc>,
}

impl Vote {
    /// Create a vote stamped with the current time
    pub fn new(poll_id: impl Into<String>, user_id: impl Into<String>, option_index: usize) -> Self {
        Self {
            poll_id: poll_id.into(),
            user_id: user_id.into(),
            option_index,
            voted_at: Utc::now(),
        }
    }
}

/// Vote count for one option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionTally {
    /// Option label
    pub label: String,
    /// Number of current votes
    pub votes: u32,
}

/// Results view computed from a poll and its votes. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResults {
    /// The poll the results belong to
    pub poll: Poll,
    /// Counts in option order, one entry per option
    pub tallies: Vec<OptionTally>,
    /// Voter ID -> label of the option they chose
    pub voters: HashMap<String, String>,
}

impl PollResults {
    /// Sum of all option counts
    pub fn total_votes(&self) -> u32 {
        self.tallies.iter().map(|t| t.votes).sum()
    }

    /// Count for the first option carrying `label`
    pub fn count_of(&self, label: &str) -> Option<u32> {
        self.tallies.iter().find(|t| t.label == label).map(|t| t.votes)
    }

    /// Share of the total for the option at `index`, in percent
    pub fn percentage(&self, index: usize) -> f64 {
        let votes = self.tallies.get(index).map(|t| t.votes).unwrap_or(0);
        percentage(votes, self.total_votes())
    }

    /// Label of the option `user_id` currently votes for
    pub fn choice_of(&self, user_id: &str) -> Option<&str> {
        self.voters.get(user_id).map(String::as_str)
    }
}

/// `count / total * 100`, with an empty poll yielding zero
pub fn percentage(count: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 / total as f64 * 100.0
}

/// Generate a short poll ID (first 8 hex digits of a v4 UUID)
pub fn generate_poll_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(POLL_ID_LEN);
    id
}
