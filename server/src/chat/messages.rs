//! REST endpoints for messages, reactions, and read tracking.
//!
//! Sending a message persists it and returns the fan-out envelope with
//! the chat's member list already resolved; the client then emits the
//! relay event that triggers live delivery. The REST path itself never
//! broadcasts — the sender already has their HTTP response.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::ws::protocol::{ChatSummary, MessageEnvelope, ReactionEntry, UserSummary};

/// Maximum message content length (chars).
const MAX_CONTENT_LENGTH: usize = 4000;

// --- Request types ---

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

// --- Handlers ---

/// GET /api/chats/{chat_id}/messages
/// Full message thread with senders, reactions, and read-by lists.
/// Members only.
pub async fn fetch_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<MessageEnvelope>>, StatusCode> {
    let db = state.db.clone();
    let caller = claims.sub;

    let messages = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        require_member(&conn, &chat_id, &caller)?;

        let mut stmt = conn
            .prepare(
                "SELECT id FROM messages WHERE chat_id = ?1 ORDER BY created_at, id",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let ids: Vec<String> = stmt
            .query_map(rusqlite::params![chat_id], |row| row.get(0))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            messages.push(message_envelope(&conn, id)?);
        }
        Ok::<_, StatusCode>(messages)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(messages))
}

/// POST /api/chats/{chat_id}/messages
/// Persist a new message and return its fan-out envelope. The sender
/// counts as having read their own message.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageEnvelope>), StatusCode> {
    let content = body.content.trim().to_string();
    if content.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if content.len() > MAX_CONTENT_LENGTH {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let db = state.db.clone();
    let caller = claims.sub;

    let envelope = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        require_member(&conn, &chat_id, &caller)?;

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, chat_id, caller, content, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        conn.execute(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![id, caller],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        conn.execute(
            "UPDATE chats SET latest_message_id = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![chat_id, id, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        message_envelope(&conn, &id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok((StatusCode::CREATED, Json(envelope)))
}

/// PUT /api/messages/{message_id}/reactions
/// Toggle the caller's reaction: the same emoji again removes it, a
/// different emoji replaces it (one reaction per user per message).
/// Returns the updated envelope for the client to relay.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Json(body): Json<ToggleReactionRequest>,
) -> Result<Json<MessageEnvelope>, StatusCode> {
    let emoji = body.emoji.trim().to_string();
    if emoji.is_empty() || emoji.len() > 64 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let caller = claims.sub;

    let envelope = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let chat_id: String = conn
            .query_row(
                "SELECT chat_id FROM messages WHERE id = ?1",
                rusqlite::params![message_id],
                |row| row.get(0),
            )
            .map_err(|_| StatusCode::NOT_FOUND)?;
        require_member(&conn, &chat_id, &caller)?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT emoji FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                rusqlite::params![message_id, caller],
                |row| row.get(0),
            )
            .ok();

        if existing.as_deref() == Some(emoji.as_str()) {
            // Toggle off
            conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                rusqlite::params![message_id, caller],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        } else {
            conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                rusqlite::params![message_id, caller],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            conn.execute(
                "INSERT INTO reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                rusqlite::params![message_id, caller, emoji],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }

        message_envelope(&conn, &message_id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(envelope))
}

/// PUT /api/chats/{chat_id}/read
/// Mark every message in the chat as read by the caller.
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let caller = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        require_member(&conn, &chat_id, &caller)?;

        conn.execute(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id)
             SELECT id, ?2 FROM messages WHERE chat_id = ?1",
            rusqlite::params![chat_id, caller],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<(), StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(StatusCode::OK)
}

// --- Helpers ---

/// Verify the chat exists and the caller is a member.
fn require_member(conn: &Connection, chat_id: &str, caller: &str) -> Result<(), StatusCode> {
    let chat_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM chats WHERE id = ?1",
            rusqlite::params![chat_id],
            |row| row.get::<_, i64>(0).map(|c| c > 0),
        )
        .unwrap_or(false);
    if !chat_exists {
        return Err(StatusCode::NOT_FOUND);
    }

    let is_member: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            rusqlite::params![chat_id, caller],
            |row| row.get::<_, i64>(0).map(|c| c > 0),
        )
        .unwrap_or(false);
    if !is_member {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(())
}

/// Build the fan-out envelope for one stored message: sender summary,
/// chat summary with the resolved member list, reactions, read-by.
pub(crate) fn message_envelope(
    conn: &Connection,
    message_id: &str,
) -> Result<MessageEnvelope, StatusCode> {
    let (chat_id, content, created_at, sender) = conn
        .query_row(
            "SELECT m.chat_id, m.content, m.created_at, u.id, u.name, u.avatar_url
             FROM messages m
             JOIN users u ON u.id = m.sender_id
             WHERE m.id = ?1",
            rusqlite::params![message_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    UserSummary {
                        id: row.get(3)?,
                        name: row.get(4)?,
                        avatar_url: row.get(5)?,
                    },
                ))
            },
        )
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let (chat_name, is_group): (String, bool) = conn
        .query_row(
            "SELECT name, is_group FROM chats WHERE id = ?1",
            rusqlite::params![chat_id],
            |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut stmt = conn
        .prepare("SELECT user_id FROM chat_members WHERE chat_id = ?1")
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let members: Vec<String> = stmt
        .query_map(rusqlite::params![chat_id], |row| row.get(0))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .filter_map(|r| r.ok())
        .collect();

    let mut stmt = conn
        .prepare("SELECT user_id, emoji FROM reactions WHERE message_id = ?1")
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let reactions: Vec<ReactionEntry> = stmt
        .query_map(rusqlite::params![message_id], |row| {
            Ok(ReactionEntry {
                user_id: row.get(0)?,
                emoji: row.get(1)?,
            })
        })
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .filter_map(|r| r.ok())
        .collect();

    let mut stmt = conn
        .prepare("SELECT user_id FROM message_reads WHERE message_id = ?1")
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let read_by: Vec<String> = stmt
        .query_map(rusqlite::params![message_id], |row| row.get(0))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .filter_map(|r| r.ok())
        .collect();

    Ok(MessageEnvelope {
        id: message_id.to_string(),
        sender,
        chat: ChatSummary {
            id: chat_id,
            name: chat_name,
            is_group,
            members,
        },
        content,
        created_at,
        reactions,
        read_by,
    })
}
