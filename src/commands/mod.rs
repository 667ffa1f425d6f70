//! Command Dispatcher
//!
//! Maps chat messages addressed to the bot onto poll service operations and
//! posts every outcome, success or failure, back to the originating channel.

pub mod parse;

pub use parse::{parse_command, split_quoted, Command};

use crate::channels::{BotIdentity, InboundEvent};
use crate::logging::sanitize_log_message;
use crate::polls::{render, PollError, PollService};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Routes inbound events to the poll service
pub struct Dispatcher {
    service: Arc<PollService>,
    identity: BotIdentity,
}

impl Dispatcher {
    pub fn new(service: Arc<PollService>, identity: BotIdentity) -> Self {
        Self { service, identity }
    }

    /// Handle one inbound event. Returns false when the event was not
    /// addressed to the bot and was ignored.
    pub async fn handle_event(&self, event: &InboundEvent) -> bool {
        if !self.identity.is_addressed(event) {
            return false;
        }

        let text = self.identity.strip_mentions(&event.text);
        let command = parse_command(&text);
        info!(
            user_id = %event.sender_id,
            channel_id = %event.channel_id,
            command = command.name(),
            "Received command"
        );

        let replies = self.execute(&event.sender_id, &event.channel_id, command).await;
        for reply in replies {
            if let Err(e) = self
                .service
                .gateway()
                .post_message(&event.channel_id, &reply)
                .await
            {
                error!(channel_id = %event.channel_id, error = %e, "Failed to post reply");
            }
        }
        true
    }

    /// Run `command` for `sender_id` and return the replies to post
    pub async fn execute(&self, sender_id: &str, channel_id: &str, command: Command) -> Vec<String> {
        let name = command.name();
        let reply = match command {
            Command::Create { title, options } => self
                .service
                .create_poll(sender_id, channel_id, &title, options)
                .await
                .map(|poll| render::created(&poll)),
            Command::Vote { poll_id, position } => {
                match self.service.cast_vote(sender_id, &poll_id, position).await {
                    Ok(results) => {
                        let voter = match self.service.gateway().display_name(sender_id).await {
                            Ok(display) => Some(display),
                            Err(e) => {
                                debug!(user_id = sender_id, error = %e, "Display name lookup failed");
                                None
                            }
                        };
                        Ok(render::vote_recorded(&results.poll, position, voter.as_deref()))
                    }
                    Err(e) => Err(e),
                }
            }
            Command::Results { poll_id } => self
                .service
                .get_results(&poll_id)
                .await
                .map(|results| render::results(&results)),
            Command::Finish { poll_id } => self
                .service
                .finish_poll(sender_id, &poll_id)
                .await
                .map(|outcome| render::finished(&outcome.results, outcome.already_finished)),
            Command::Delete { poll_id } => self
                .service
                .delete_poll(sender_id, &poll_id)
                .await
                .map(|()| render::deleted(&poll_id)),
            Command::Help => Ok(render::HELP_TEXT.to_string()),
            Command::Invalid(message) => Ok(message),
        };

        match reply {
            Ok(text) => vec![text],
            Err(e) => vec![report(name, sender_id, &e)],
        }
    }
}

fn report(command: &str, user_id: &str, err: &PollError) -> String {
    if err.is_internal() {
        let error = sanitize_log_message(&err.to_string());
        error!(command, user_id, %error, "Command failed");
    } else {
        warn!(command, user_id, error = %err, "Command rejected");
    }
    err.user_message()
}
