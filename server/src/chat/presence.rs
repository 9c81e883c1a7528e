//! Presence tracking on top of the session registry.
//!
//! Online/offline is derived from session liveness; only the offline
//! transition writes to the store (last-seen timestamp). Status
//! changes are broadcast to every connection — any user's chat list
//! may be showing the presence dot.

use chrono::Utc;

use crate::state::AppState;
use crate::ws::protocol::{OnlineStatus, ServerEvent};
use crate::ws::sessions::SessionRegistry;

/// Broadcast a user's online/offline status to all connected clients.
pub fn broadcast_status(sessions: &SessionRegistry, user_id: &str, online: bool) {
    let event = ServerEvent::UserStatus {
        user_id: user_id.to_string(),
        online,
    };
    if let Some(msg) = event.to_message() {
        sessions.broadcast_to_all(&msg);
    }
}

/// Handle the 1→0 transition: persist last-seen, then broadcast
/// offline. Presence is best-effort — a failed store write is logged
/// and the broadcast still goes out.
pub async fn mark_offline(state: &AppState, user_id: &str) {
    let db = state.db.clone();
    let uid = user_id.to_string();

    let persisted = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| format!("DB lock error: {}", e))?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE users SET is_online = 0, last_seen = ?2, updated_at = ?2 WHERE id = ?1",
            rusqlite::params![uid, now],
        )
        .map_err(|e| e.to_string())?;
        Ok::<(), String>(())
    })
    .await;

    match persisted {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(user_id = %user_id, error = %e, "failed to persist last-seen");
        }
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "presence write task failed");
        }
    }

    broadcast_status(&state.sessions, user_id, false);
}

/// Resolve online status for a list of users. Online comes straight
/// from the registry; for offline users the persisted last-seen
/// timestamp is attached as a fallback.
pub async fn online_users(state: &AppState, user_ids: Vec<String>) -> Vec<OnlineStatus> {
    let flags: Vec<(String, bool)> = user_ids
        .into_iter()
        .map(|id| {
            let online = state.sessions.is_online(&id);
            (id, online)
        })
        .collect();

    let offline_ids: Vec<String> = flags
        .iter()
        .filter(|(_, online)| !online)
        .map(|(id, _)| id.clone())
        .collect();

    let mut last_seen = std::collections::HashMap::new();
    if !offline_ids.is_empty() {
        let db = state.db.clone();
        let fetched = tokio::task::spawn_blocking(move || {
            let conn = db.lock().ok()?;
            let mut map = std::collections::HashMap::new();
            for id in &offline_ids {
                let seen: Option<String> = conn
                    .query_row(
                        "SELECT last_seen FROM users WHERE id = ?1",
                        rusqlite::params![id],
                        |row| row.get(0),
                    )
                    .ok()
                    .flatten();
                if let Some(seen) = seen {
                    map.insert(id.clone(), seen);
                }
            }
            Some(map)
        })
        .await;

        if let Ok(Some(map)) = fetched {
            last_seen = map;
        }
    }

    flags
        .into_iter()
        .map(|(user_id, online)| {
            let last_seen = if online {
                None
            } else {
                last_seen.get(&user_id).cloned()
            };
            OnlineStatus {
                user_id,
                online,
                last_seen,
            }
        })
        .collect()
}
