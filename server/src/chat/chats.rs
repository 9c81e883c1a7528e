//! REST endpoints for chat CRUD: one-on-one access, chat list, and
//! group management.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::users::UserProfile;

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct AccessChatRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub user_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameGroupRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub name: String,
    pub is_group: bool,
    pub admin_id: Option<String>,
    pub members: Vec<UserProfile>,
    pub latest_message: Option<LatestMessage>,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct LatestMessage {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub sender_name: String,
    pub created_at: String,
}

// --- Handlers ---

/// POST /api/chats
/// Access-or-create the one-on-one chat between the caller and the
/// given user. Creating is idempotent: a second call returns the same
/// chat.
pub async fn access_chat(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<AccessChatRequest>,
) -> Result<Json<ChatResponse>, StatusCode> {
    let other_id = body.user_id.trim().to_string();
    if other_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let caller = claims.sub;

    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let other_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE id = ?1",
                rusqlite::params![other_id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .unwrap_or(false);
        if !other_exists {
            return Err(StatusCode::NOT_FOUND);
        }

        // Existing one-on-one chat with exactly these two members?
        let existing: Option<String> = conn
            .query_row(
                "SELECT c.id FROM chats c
                 JOIN chat_members m1 ON m1.chat_id = c.id AND m1.user_id = ?1
                 JOIN chat_members m2 ON m2.chat_id = c.id AND m2.user_id = ?2
                 WHERE c.is_group = 0",
                rusqlite::params![caller, other_id],
                |row| row.get(0),
            )
            .ok();

        let chat_id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::now_v7().to_string();
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    "INSERT INTO chats (id, name, is_group, admin_id, created_at, updated_at)
                     VALUES (?1, '', 0, NULL, ?2, ?2)",
                    rusqlite::params![id, now],
                )
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
                for member in [&caller, &other_id] {
                    conn.execute(
                        "INSERT INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
                        rusqlite::params![id, member],
                    )
                    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
                }
                id
            }
        };

        chat_response(&conn, &chat_id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(chat))
}

/// GET /api/chats
/// All chats the caller belongs to, most recently updated first.
pub async fn fetch_chats(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ChatResponse>>, StatusCode> {
    let db = state.db.clone();
    let caller = claims.sub;

    let chats = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(
                "SELECT c.id FROM chats c
                 JOIN chat_members cm ON cm.chat_id = c.id
                 WHERE cm.user_id = ?1
                 ORDER BY c.updated_at DESC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let ids: Vec<String> = stmt
            .query_map(rusqlite::params![caller], |row| row.get(0))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        let mut chats = Vec::with_capacity(ids.len());
        for id in &ids {
            chats.push(chat_response(&conn, id)?);
        }
        Ok::<_, StatusCode>(chats)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(chats))
}

/// POST /api/chats/group
/// Create a group chat with the caller as admin. At least two other
/// members are required.
pub async fn create_group_chat(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ChatResponse>), StatusCode> {
    let name = body.name.trim().to_string();
    if name.is_empty() || body.user_ids.len() < 2 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let caller = claims.sub;
    let user_ids = body.user_ids;

    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO chats (id, name, is_group, admin_id, created_at, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4, ?4)",
            rusqlite::params![id, name, caller, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut members: Vec<&String> = user_ids.iter().collect();
        members.push(&caller);
        for member in members {
            conn.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![id, member],
            )
            .map_err(|_| StatusCode::BAD_REQUEST)?;
        }

        chat_response(&conn, &id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok((StatusCode::CREATED, Json(chat)))
}

/// PUT /api/chats/group/{chat_id}/rename
/// Rename a group chat. Admin only.
pub async fn rename_group(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
    Json(body): Json<RenameGroupRequest>,
) -> Result<Json<ChatResponse>, StatusCode> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let caller = claims.sub;

    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        require_group_admin(&conn, &chat_id, &caller)?;

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE chats SET name = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![chat_id, name, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        chat_response(&conn, &chat_id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(chat))
}

/// PUT /api/chats/group/{chat_id}/members
/// Add a member to a group chat. Admin only.
pub async fn add_member(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
    Json(body): Json<AddMemberRequest>,
) -> Result<Json<ChatResponse>, StatusCode> {
    let db = state.db.clone();
    let caller = claims.sub;
    let user_id = body.user_id;

    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        require_group_admin(&conn, &chat_id, &caller)?;

        let user_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE id = ?1",
                rusqlite::params![user_id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .unwrap_or(false);
        if !user_exists {
            return Err(StatusCode::NOT_FOUND);
        }

        conn.execute(
            "INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![chat_id, user_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        chat_response(&conn, &chat_id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(chat))
}

/// DELETE /api/chats/group/{chat_id}/members/{user_id}
/// Remove a member from a group chat. The admin can remove anyone;
/// other members can only remove themselves (leave).
pub async fn remove_member(
    State(state): State<AppState>,
    claims: Claims,
    Path((chat_id, user_id)): Path<(String, String)>,
) -> Result<Json<ChatResponse>, StatusCode> {
    let db = state.db.clone();
    let caller = claims.sub;

    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if user_id != caller {
            require_group_admin(&conn, &chat_id, &caller)?;
        } else {
            // Leaving still requires the chat to be a group
            let is_group: bool = conn
                .query_row(
                    "SELECT is_group FROM chats WHERE id = ?1",
                    rusqlite::params![chat_id],
                    |row| row.get::<_, i64>(0).map(|g| g != 0),
                )
                .map_err(|_| StatusCode::NOT_FOUND)?;
            if !is_group {
                return Err(StatusCode::BAD_REQUEST);
            }
        }

        let removed = conn
            .execute(
                "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                rusqlite::params![chat_id, user_id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if removed == 0 {
            return Err(StatusCode::NOT_FOUND);
        }

        chat_response(&conn, &chat_id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(chat))
}

// --- Helpers ---

/// Verify the chat exists, is a group, and the caller administers it.
fn require_group_admin(
    conn: &Connection,
    chat_id: &str,
    caller: &str,
) -> Result<(), StatusCode> {
    let (is_group, admin_id): (bool, Option<String>) = conn
        .query_row(
            "SELECT is_group, admin_id FROM chats WHERE id = ?1",
            rusqlite::params![chat_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)? != 0,
                    row.get(1)?,
                ))
            },
        )
        .map_err(|_| StatusCode::NOT_FOUND)?;

    if !is_group {
        return Err(StatusCode::BAD_REQUEST);
    }
    if admin_id.as_deref() != Some(caller) {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(())
}

/// Build the full chat payload: members plus the latest message.
pub(crate) fn chat_response(conn: &Connection, chat_id: &str) -> Result<ChatResponse, StatusCode> {
    let (name, is_group, admin_id, latest_message_id, updated_at): (
        String,
        bool,
        Option<String>,
        Option<String>,
        String,
    ) = conn
        .query_row(
            "SELECT name, is_group, admin_id, latest_message_id, updated_at
             FROM chats WHERE id = ?1",
            rusqlite::params![chat_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get::<_, i64>(1)? != 0,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let mut stmt = conn
        .prepare(
            "SELECT u.id, u.name, u.email, u.avatar_url, u.is_online, u.last_seen
             FROM users u
             JOIN chat_members cm ON cm.user_id = u.id
             WHERE cm.chat_id = ?1
             ORDER BY u.name",
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let members: Vec<UserProfile> = stmt
        .query_map(rusqlite::params![chat_id], |row| {
            Ok(UserProfile {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                avatar_url: row.get(3)?,
                is_online: row.get::<_, i64>(4)? != 0,
                last_seen: row.get(5)?,
            })
        })
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .filter_map(|r| r.ok())
        .collect();

    let latest_message = latest_message_id.and_then(|mid| {
        conn.query_row(
            "SELECT m.id, m.content, m.sender_id, u.name, m.created_at
             FROM messages m
             JOIN users u ON u.id = m.sender_id
             WHERE m.id = ?1",
            rusqlite::params![mid],
            |row| {
                Ok(LatestMessage {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    sender_id: row.get(2)?,
                    sender_name: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .ok()
    });

    Ok(ChatResponse {
        id: chat_id.to_string(),
        name,
        is_group,
        admin_id,
        members,
        latest_message,
        updated_at,
    })
}
