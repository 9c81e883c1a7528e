//! REST endpoints for user registration, login, and search.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::jwt;
use crate::auth::middleware::Claims;
use crate::state::AppState;

/// Avatar used when registration does not supply one.
const DEFAULT_AVATAR_URL: &str =
    "https://icon-library.com/images/anonymous-avatar-icon/anonymous-avatar-icon-25.jpg";

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
    pub is_online: bool,
    pub last_seen: Option<String>,
}

// --- Handlers ---

/// POST /api/users
/// Register a new user. Hashes the password with bcrypt and returns an
/// access token alongside the profile.
pub async fn register_user(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), StatusCode> {
    let name = body.name.trim().to_string();
    let email = body.email.trim().to_lowercase();
    if name.is_empty() || email.is_empty() || body.password.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let avatar_url = body
        .avatar_url
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_AVATAR_URL.to_string());

    let db = state.db.clone();
    let password = body.password.clone();
    let (id, name, email, avatar_url) = tokio::task::spawn_blocking(move || {
        // bcrypt is deliberately slow — keep it off the async threads
        let password_hash = bcrypt::hash(&password, bcrypt::DEFAULT_COST)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE email = ?1",
                rusqlite::params![email],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .unwrap_or(false);
        if exists {
            return Err(StatusCode::BAD_REQUEST);
        }

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (id, name, email, password_hash, avatar_url, is_online, last_seen, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL, ?6, ?6)",
            rusqlite::params![id, name, email, password_hash, avatar_url, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok((id, name, email, avatar_url))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let token = jwt::issue_access_token(&state.jwt_secret, &id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tracing::info!(user_id = %id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            id,
            name,
            email,
            avatar_url,
            token,
        }),
    ))
}

/// POST /api/users/login
/// Verify credentials and return an access token. Invalid email and
/// invalid password return the same 401 — no user enumeration.
pub async fn login_user(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, StatusCode> {
    let email = body.email.trim().to_lowercase();
    let db = state.db.clone();
    let password = body.password.clone();

    let (id, name, email, avatar_url) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let row: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT id, name, avatar_url, password_hash FROM users WHERE email = ?1",
                rusqlite::params![email],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )
            .ok();

        let (id, name, avatar_url, password_hash) = row.ok_or(StatusCode::UNAUTHORIZED)?;

        let matches = bcrypt::verify(&password, &password_hash).unwrap_or(false);
        if !matches {
            return Err(StatusCode::UNAUTHORIZED);
        }

        Ok((id, name, email, avatar_url))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let token = jwt::issue_access_token(&state.jwt_secret, &id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(AuthResponse {
        id,
        name,
        email,
        avatar_url,
        token,
    }))
}

/// GET /api/users?search=jane
/// Case-insensitive name/email search, excluding the caller. No search
/// term returns every other user.
pub async fn search_users(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserProfile>>, StatusCode> {
    let db = state.db.clone();
    let caller = claims.sub;
    let pattern = query
        .search
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("%{}%", s.trim()));

    let users = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let sql = "SELECT id, name, email, avatar_url, is_online, last_seen
                   FROM users
                   WHERE id != ?1 AND (?2 IS NULL OR name LIKE ?2 OR email LIKE ?2)
                   ORDER BY name";
        let mut stmt = conn
            .prepare(sql)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let users: Vec<UserProfile> = stmt
            .query_map(rusqlite::params![caller, pattern], |row| {
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

        Ok::<_, StatusCode>(users)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(users))
}
