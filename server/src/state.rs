use std::sync::Arc;

use crate::db::DbPool;
use crate::ws::rooms::RoomRouter;
use crate::ws::sessions::SessionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Live WebSocket sessions per user, with the per-connection reverse index
    pub sessions: Arc<SessionRegistry>,
    /// Connections currently viewing each chat, for typing broadcast scoping
    pub rooms: Arc<RoomRouter>,
    /// Typing-indicator echo policy (see Config)
    pub typing_echo_self: bool,
    /// Allowed CORS origins; empty = any
    pub cors_origins: Vec<String>,
}
