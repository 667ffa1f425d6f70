//! votebot library
//!
//! A Mattermost bot that runs single-choice polls: members create a poll
//! with a few options, vote by option number, and the creator finishes or
//! deletes it. Polls and votes live in SQLite (or in memory for dry runs).

pub mod bot;
pub mod channels;
pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod polls;
pub mod store;
