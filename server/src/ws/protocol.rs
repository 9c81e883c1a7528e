//! Wire protocol: JSON events over WebSocket text frames.
//!
//! Inbound frames deserialize into `ClientEvent` and are dispatched
//! here; outbound traffic is built from `ServerEvent`. The `event` tag
//! field selects the variant. Connection identity comes from the
//! authenticated handshake, never from an event payload.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::chat::{fanout, presence};
use crate::state::AppState;
use crate::ws::ConnectionId;

/// One message as pushed to recipients. Carries the chat's resolved
/// member list so fan-out never re-queries the store per delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: String,
    pub sender: UserSummary,
    pub chat: ChatSummary,
    pub content: String,
    pub created_at: String,
    #[serde(default)]
    pub reactions: Vec<ReactionEntry>,
    #[serde(default)]
    pub read_by: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    pub is_group: bool,
    /// User ids of every chat member, resolved at message-creation time.
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionEntry {
    pub user_id: String,
    pub emoji: String,
}

/// Online flag per queried user, with the persisted last-seen
/// timestamp as the offline fallback.
#[derive(Debug, Clone, Serialize)]
pub struct OnlineStatus {
    pub user_id: String,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

/// Client → relay events.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Open a chat: scope typing broadcasts to this connection.
    JoinChat { chat_id: String },
    Typing { chat_id: String },
    StopTyping { chat_id: String },
    /// The REST write already happened; this triggers live fan-out.
    NewMessage { message: MessageEnvelope },
    ReactionUpdate { message: MessageEnvelope },
    MessagesRead { chat_id: String, members: Vec<String> },
    GetOnlineUsers { user_ids: Vec<String> },
}

/// Relay → client events.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Ack sent to a connection once it is registered.
    Connected {},
    Typing { chat_id: String, user_id: String },
    StopTyping { chat_id: String, user_id: String },
    MessageReceived { message: MessageEnvelope },
    ReactionUpdated { message: MessageEnvelope },
    MessagesRead { chat_id: String, reader_id: String },
    UserStatus { user_id: String, online: bool },
    OnlineUsers { users: Vec<OnlineStatus> },
}

impl ServerEvent {
    /// Encode as a WebSocket text frame. Encoding never fails for these
    /// types in practice; a failure is logged and the event dropped.
    pub fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode server event");
                None
            }
        }
    }
}

/// Handle an incoming text frame: decode the event and dispatch.
/// Malformed payloads are logged and dropped — no response, and never
/// an error that could affect other connections.
pub async fn handle_text_event(
    text: &str,
    state: &AppState,
    connection_id: ConnectionId,
    user_id: &str,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "malformed client event, dropping"
            );
            return;
        }
    };

    match event {
        ClientEvent::JoinChat { chat_id } => {
            state.rooms.join(&chat_id, connection_id);
            tracing::debug!(user_id = %user_id, chat_id = %chat_id, "joined chat room");
        }
        ClientEvent::Typing { chat_id } => {
            broadcast_typing(state, connection_id, user_id, chat_id, true);
        }
        ClientEvent::StopTyping { chat_id } => {
            broadcast_typing(state, connection_id, user_id, chat_id, false);
        }
        ClientEvent::NewMessage { message } => {
            fanout::deliver(&state.sessions, message, user_id);
        }
        ClientEvent::ReactionUpdate { message } => {
            fanout::deliver_reaction(&state.sessions, message);
        }
        ClientEvent::MessagesRead { chat_id, members } => {
            fanout::deliver_read(&state.sessions, &chat_id, user_id, &members);
        }
        ClientEvent::GetOnlineUsers { user_ids } => {
            let users = presence::online_users(state, user_ids).await;
            if let Some(msg) = (ServerEvent::OnlineUsers { users }).to_message() {
                state.sessions.send_to_connection(connection_id, msg);
            }
        }
    }
}

fn broadcast_typing(
    state: &AppState,
    connection_id: ConnectionId,
    user_id: &str,
    chat_id: String,
    typing: bool,
) {
    let exclude = if state.typing_echo_self {
        None
    } else {
        Some(connection_id)
    };
    let event = if typing {
        ServerEvent::Typing {
            chat_id: chat_id.clone(),
            user_id: user_id.to_string(),
        }
    } else {
        ServerEvent::StopTyping {
            chat_id: chat_id.clone(),
            user_id: user_id.to_string(),
        }
    };
    if let Some(msg) = event.to_message() {
        state
            .rooms
            .broadcast_to_room(&chat_id, &msg, exclude, &state.sessions);
    }
}
