use axum::http::{header, HeaderValue, Method};
use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::middleware::JwtSecret;
use crate::chat::{chats, messages};
use crate::state::AppState;
use crate::users;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting: 5 requests per minute per IP on auth endpoints.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // 1 token every 12 seconds = 5 per minute
            .burst_size(5) // Allow burst of 5
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    // Registration and login, rate limited
    let auth_routes = Router::new()
        .route("/api/users", axum::routing::post(users::register_user))
        .route("/api/users/login", axum::routing::post(users::login_user))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Authenticated routes (JWT required — Claims extractor validates token)
    let api_routes = Router::new()
        .route("/api/users", axum::routing::get(users::search_users))
        .route("/api/chats", axum::routing::post(chats::access_chat))
        .route("/api/chats", axum::routing::get(chats::fetch_chats))
        .route(
            "/api/chats/group",
            axum::routing::post(chats::create_group_chat),
        )
        .route(
            "/api/chats/group/{chat_id}/rename",
            axum::routing::put(chats::rename_group),
        )
        .route(
            "/api/chats/group/{chat_id}/members",
            axum::routing::put(chats::add_member),
        )
        .route(
            "/api/chats/group/{chat_id}/members/{user_id}",
            axum::routing::delete(chats::remove_member),
        )
        .route(
            "/api/chats/{chat_id}/messages",
            axum::routing::get(messages::fetch_messages),
        )
        .route(
            "/api/chats/{chat_id}/messages",
            axum::routing::post(messages::send_message),
        )
        .route(
            "/api/chats/{chat_id}/read",
            axum::routing::put(messages::mark_read),
        )
        .route(
            "/api/messages/{message_id}/reactions",
            axum::routing::put(messages::toggle_reaction),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/", axum::routing::get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(api_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(cors_layer(&state.cors_origins))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// CORS for browser clients. Configured origins are parsed strictly;
/// an empty list falls back to allowing any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, ignoring");
                None
            }
        })
        .collect();
    cors.allow_origin(parsed)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "API is running"
}
