//! Integration tests for user registration, login, and search.

use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use chatpulse_server::ws::rooms::RoomRouter;
use chatpulse_server::ws::sessions::SessionRegistry;

/// Helper: start the server on a random port and return its base URL.
async fn start_test_server() -> String {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = chatpulse_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = chatpulse_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = chatpulse_server::state::AppState {
        db,
        jwt_secret,
        sessions: Arc::new(SessionRegistry::new()),
        rooms: Arc::new(RoomRouter::new()),
        typing_echo_self: false,
        cors_origins: Vec::new(),
    };

    let app = chatpulse_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    format!("http://{}", addr)
}

/// Register a user and return (user_id, access_token).
async fn register_user(base_url: &str, name: &str, email: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/users", base_url))
        .json(&json!({
            "name": name,
            "email": email,
            "password": "hunter2!",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201, "Registration failed for {}", name);
    let body: serde_json::Value = resp.json().await.unwrap();
    (
        body["id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn test_register_rejects_duplicate_email() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    register_user(&base_url, "Jane", "jane@example.com").await;

    let resp = client
        .post(format!("{}/api/users", base_url))
        .json(&json!({
            "name": "Jane Again",
            "email": "jane@example.com",
            "password": "hunter2!",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_register_rejects_missing_fields() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/users", base_url))
        .json(&json!({ "name": "NoEmail", "email": "", "password": "pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_login_succeeds_with_correct_password() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    let (user_id, _) = register_user(&base_url, "Sam", "sam@example.com").await;

    let resp = client
        .post(format!("{}/api/users/login", base_url))
        .json(&json!({ "email": "sam@example.com", "password": "hunter2!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["id"].as_str().unwrap(), user_id);
    assert!(!body["token"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_login_rejects_wrong_password_and_unknown_email() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    register_user(&base_url, "Pat", "pat@example.com").await;

    let resp = client
        .post(format!("{}/api/users/login", base_url))
        .json(&json!({ "email": "pat@example.com", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{}/api/users/login", base_url))
        .json(&json!({ "email": "nobody@example.com", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_search_is_case_insensitive_and_excludes_caller() {
    let base_url = start_test_server().await;
    let client = reqwest::Client::new();

    let (_, token) = register_user(&base_url, "Alice", "alice@example.com").await;
    let (bob_id, _) = register_user(&base_url, "Bob", "bob@example.com").await;
    register_user(&base_url, "Carol", "carol@example.com").await;

    // Search requires auth
    let resp = client
        .get(format!("{}/api/users?search=bob", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{}/api/users?search=BOB", base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let results = body.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"].as_str().unwrap(), bob_id);

    // No search term: everyone but the caller
    let resp = client
        .get(format!("{}/api/users", base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Bob", "Carol"]);
}
