//! Mattermost Channel
//!
//! Mattermost self-hosted messaging platform integration. Outbound posts
//! and user lookups go through the REST API v4; inbound messages arrive
//! over the WebSocket event stream.

use super::{BotIdentity, ChannelError, ChannelResult, InboundEvent, MessagingGateway};
use crate::logging::sanitize_log_message;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// HTTP request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// WebSocket connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// First reconnect delay
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Reconnect delay ceiling
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Mattermost channel type for one-to-one conversations
const DIRECT_CHANNEL_TYPE: &str = "D";

/// Mattermost configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MattermostConfig {
    /// Mattermost server URL
    pub server_url: String,
    /// Bot access token
    pub token: String,
    /// Team the bot is expected to belong to; checked at startup when set
    pub team_name: String,
    /// Expected bot user ID; checked against the token's account when set
    pub bot_user_id: String,
}

/// Mattermost channel implementation
#[derive(Debug, Clone)]
pub struct MattermostChannel {
    config: MattermostConfig,
    client: reqwest::Client,
    identity: BotIdentity,
}

#[derive(Debug, Deserialize)]
struct MmUser {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct MmTeam {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MmPost {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MmApiError {
    #[serde(default)]
    message: String,
}

/// Envelope of a WebSocket event
#[derive(Debug, Deserialize)]
struct WsEvent {
    #[serde(default)]
    event: String,
    #[serde(default)]
    data: WsPostedData,
}

#[derive(Debug, Default, Deserialize)]
struct WsPostedData {
    #[serde(default)]
    channel_type: String,
    /// The post, JSON-encoded as a string
    #[serde(default)]
    post: String,
}

#[derive(Debug, Deserialize)]
struct WsPost {
    user_id: String,
    channel_id: String,
    #[serde(default)]
    message: String,
}

impl MattermostChannel {
    /// Authenticate against the server and resolve the bot identity
    pub async fn connect(config: MattermostConfig) -> ChannelResult<Self> {
        if config.server_url.trim().is_empty() {
            return Err(ChannelError::InvalidConfig("server URL is required".into()));
        }
        if config.token.trim().is_empty() {
            return Err(ChannelError::InvalidConfig("token is required".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::Other(format!("Failed to build HTTP client: {}", e)))?;

        let mut channel = Self {
            config,
            client,
            identity: BotIdentity::default(),
        };

        info!(server_url = %channel.config.server_url, "Connecting to Mattermost");

        let me: MmUser = channel.get_json("users/me").await?;
        if !channel.config.bot_user_id.is_empty() && channel.config.bot_user_id != me.id {
            return Err(ChannelError::InvalidConfig(format!(
                "token belongs to user {} but botUserId is {}",
                me.id, channel.config.bot_user_id
            )));
        }
        channel.identity = BotIdentity {
            user_id: me.id,
            username: me.username,
        };

        if !channel.config.team_name.is_empty() {
            let path = format!(
                "teams/name/{}",
                urlencoding::encode(&channel.config.team_name)
            );
            let team: MmTeam = channel.get_json(&path).await?;
            debug!(team_id = %team.id, team = %channel.config.team_name, "Resolved team");
        }

        info!(
            bot_user_id = %channel.identity.user_id,
            bot_username = %channel.identity.username,
            "Connected to Mattermost"
        );
        Ok(channel)
    }

    /// The bot account behind the token
    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    /// Spawn the WebSocket listener.
    ///
    /// Events are forwarded on `tx` until `cancel` fires or the receiver is
    /// dropped. Dropped connections are retried with exponential backoff.
    pub fn listen(
        &self,
        tx: mpsc::Sender<InboundEvent>,
        cancel: CancellationToken,
    ) -> ChannelResult<JoinHandle<()>> {
        let ws_url = websocket_url(&self.config.server_url)?;
        let token = self.config.token.clone();
        let bot_user_id = self.identity.user_id.clone();

        Ok(tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                match run_websocket(&ws_url, &token, &bot_user_id, &tx, &cancel).await {
                    Ok(()) => {
                        debug!("WebSocket listener stopped");
                        return;
                    }
                    Err(WsExit::Connected(e)) => {
                        warn!(error = %sanitize_log_message(&e), "WebSocket connection lost");
                        backoff = INITIAL_BACKOFF;
                    }
                    Err(WsExit::Failed(e)) => {
                        warn!(
                            error = %sanitize_log_message(&e),
                            retry_in_secs = backoff.as_secs(),
                            "WebSocket connect failed"
                        );
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }))
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/v4/{}",
            self.config.server_url.trim_end_matches('/'),
            path
        )
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> ChannelResult<T> {
        let response = self
            .client
            .get(self.api_url(path))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        Self::decode(response).await
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> ChannelResult<T> {
        let response = self
            .client
            .post(self.api_url(path))
            .bearer_auth(&self.config.token)
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> ChannelResult<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ChannelError::Parse(e.to_string()));
        }

        let message = response
            .json::<MmApiError>()
            .await
            .map(|e| e.message)
            .unwrap_or_default();
        Err(api_error(status.as_u16(), message))
    }
}

#[async_trait]
impl MessagingGateway for MattermostChannel {
    async fn post_message(&self, channel_id: &str, text: &str) -> ChannelResult<String> {
        let body = serde_json::json!({
            "channel_id": channel_id,
            "message": text,
        });
        let post: MmPost = self.post_json("posts", &body).await?;
        debug!(channel_id, post_id = %post.id, "Posted message");
        Ok(post.id)
    }

    async fn display_name(&self, user_id: &str) -> ChannelResult<String> {
        let user: MmUser = self
            .get_json(&format!("users/{}", urlencoding::encode(user_id)))
            .await?;
        Ok(user.username)
    }
}

fn api_error(status: u16, message: String) -> ChannelError {
    match status {
        401 | 403 => ChannelError::AuthenticationFailed(message),
        _ => ChannelError::Api { status, message },
    }
}

/// How a WebSocket session ended abnormally
enum WsExit {
    /// The session was established and then dropped
    Connected(String),
    /// The session never got established
    Failed(String),
}

/// One WebSocket session. Returns `Ok` only when cancelled or the consumer
/// went away.
async fn run_websocket(
    ws_url: &str,
    token: &str,
    bot_user_id: &str,
    tx: &mpsc::Sender<InboundEvent>,
    cancel: &CancellationToken,
) -> Result<(), WsExit> {
    let connect = tokio_tungstenite::connect_async(ws_url);
    let (stream, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        result = tokio::time::timeout(CONNECT_TIMEOUT, connect) => match result {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(WsExit::Failed(e.to_string())),
            Err(_) => return Err(WsExit::Failed("connect timed out".to_string())),
        },
    };
    let (mut write, mut read) = stream.split();

    let challenge = serde_json::json!({
        "seq": 1,
        "action": "authentication_challenge",
        "data": { "token": token },
    });
    write
        .send(Message::Text(challenge.to_string().into()))
        .await
        .map_err(|e| WsExit::Failed(e.to_string()))?;
    info!("WebSocket listener connected");

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            frame = read.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                return Err(WsExit::Connected("closed by server".to_string()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(WsExit::Connected(e.to_string())),
        };

        let Some(event) = parse_posted_event(text.as_str()) else {
            continue;
        };
        if event.sender_id == bot_user_id {
            continue;
        }
        if tx.send(event).await.is_err() {
            error!("Event consumer dropped, stopping WebSocket listener");
            return Ok(());
        }
    }
}

/// Extract an inbound message from a raw WebSocket frame. Anything other
/// than a well-formed `posted` event yields `None`.
fn parse_posted_event(raw: &str) -> Option<InboundEvent> {
    let event: WsEvent = serde_json::from_str(raw).ok()?;
    if event.event != "posted" {
        return None;
    }
    let post: WsPost = serde_json::from_str(&event.data.post).ok()?;

    Some(InboundEvent {
        sender_id: post.user_id,
        channel_id: post.channel_id,
        text: post.message,
        is_direct: event.data.channel_type == DIRECT_CHANNEL_TYPE,
    })
}

/// WebSocket endpoint for a server base URL
fn websocket_url(server_url: &str) -> ChannelResult<String> {
    let mut url = url::Url::parse(server_url)
        .map_err(|e| ChannelError::InvalidConfig(format!("invalid server URL: {}", e)))?;

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(ChannelError::InvalidConfig(format!(
                "unsupported URL scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ChannelError::InvalidConfig("cannot derive WebSocket URL".into()))?;

    let path = url.path().trim_end_matches('/').to_string();
    if !path.ends_with("/api/v4/websocket") {
        url.set_path(&format!("{}/api/v4/websocket", path));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("https://chat.example.com").unwrap(),
            "wss://chat.example.com/api/v4/websocket"
        );
        assert_eq!(
            websocket_url("http://localhost:8065/").unwrap(),
            "ws://localhost:8065/api/v4/websocket"
        );
        assert_eq!(
            websocket_url("http://host/mm/api/v4/websocket").unwrap(),
            "ws://host/mm/api/v4/websocket"
        );
        assert!(websocket_url("ftp://host").is_err());
        assert!(websocket_url("not a url").is_err());
    }

    #[test]
    fn test_parse_posted_event() {
        let post = serde_json::json!({
            "id": "post1",
            "user_id": "alice",
            "channel_id": "chan1",
            "message": "@pollbot results abc",
        });
        let raw = serde_json::json!({
            "event": "posted",
            "data": {
                "channel_type": "O",
                "post": post.to_string(),
            },
            "broadcast": { "channel_id": "chan1" },
        });

        let event = parse_posted_event(&raw.to_string()).unwrap();
        assert_eq!(event.sender_id, "alice");
        assert_eq!(event.channel_id, "chan1");
        assert_eq!(event.text, "@pollbot results abc");
        assert!(!event.is_direct);
    }

    #[test]
    fn test_parse_direct_message() {
        let post = serde_json::json!({"user_id": "bob", "channel_id": "dm", "message": "help"});
        let raw = serde_json::json!({
            "event": "posted",
            "data": { "channel_type": "D", "post": post.to_string() },
        });
        assert!(parse_posted_event(&raw.to_string()).unwrap().is_direct);
    }

    #[test]
    fn test_parse_ignores_other_events() {
        assert!(parse_posted_event(r#"{"event":"typing","data":{}}"#).is_none());
        assert!(parse_posted_event(r#"{"status":"OK","seq_reply":1}"#).is_none());
        assert!(parse_posted_event(r#"{"event":"posted","data":{"post":"garbage"}}"#).is_none());
        assert!(parse_posted_event("not json").is_none());
    }

    #[test]
    fn test_api_error_mapping() {
        assert!(matches!(
            api_error(401, "bad token".into()),
            ChannelError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            api_error(404, "no such user".into()),
            ChannelError::Api { status: 404, .. }
        ));
    }

    #[tokio::test]
    async fn test_connect_requires_token() {
        let config = MattermostConfig {
            server_url: "http://localhost:8065".into(),
            ..Default::default()
        };
        assert!(matches!(
            MattermostChannel::connect(config).await,
            Err(ChannelError::InvalidConfig(_))
        ));
    }
}
