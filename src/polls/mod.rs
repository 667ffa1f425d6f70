//! Polling Module
//!
//! Single-choice polls driven by chat commands: the data model, the tally
//! engine, and the service enforcing who may do what and when.

pub mod error;
pub mod model;
pub mod render;
pub mod service;
pub mod tally;

pub use error::{PollError, PollResult};
pub use model::{
    generate_poll_id, percentage, OptionTally, Poll, PollResults, PollStatus, Vote, MIN_OPTIONS,
};
pub use service::{FinishOutcome, PollService};
pub use tally::tally;
