//! Messaging Channels
//!
//! The gateway contract the poll service talks to, and the Mattermost
//! implementation of it.

pub mod mattermost;
#[path = "trait.rs"]
mod gateway;

pub use gateway::{
    BotIdentity, ChannelError, ChannelResult, DynGateway, InboundEvent, MessagingGateway,
};
pub use mattermost::{MattermostChannel, MattermostConfig};
