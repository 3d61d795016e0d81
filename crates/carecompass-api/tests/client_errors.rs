//! Status code mapping of ApiClient against a stub server.

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use carecompass_api::{ApiClient, ClientError};
use serde_json::json;

async fn spawn_stub() -> String {
    let app = Router::new()
        .route("/api/ping", get(|| async { Json(json!({ "ok": true })) }))
        .route(
            "/api/me",
            get(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": "Invalid or expired session" })),
                )
            }),
        )
        .route(
            "/api/share/:patient_id",
            get(|| async { (StatusCode::NOT_FOUND, Json(json!({}))) }),
        )
        .route(
            "/api/register",
            post(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(json!({ "error": "Email already registered" })),
                )
            }),
        )
        .route(
            "/api/patients",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_ping_and_availability() {
    let client = ApiClient::new(&spawn_stub().await).unwrap();
    assert!(client.ping().await.unwrap().ok);
    assert!(client.is_available().await);
}

#[tokio::test]
async fn test_unreachable_server_is_unavailable() {
    // bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ApiClient::new(&format!("http://{}", addr)).unwrap();
    assert!(!client.is_available().await);
    let err = client.ping().await.unwrap_err();
    assert!(err.is_unavailable(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn test_status_mapping() {
    let client = ApiClient::new(&spawn_stub().await)
        .unwrap()
        .with_token("stale");

    match client.me().await {
        Err(ClientError::Unauthorized(message)) => {
            assert_eq!(message, "Invalid or expired session")
        }
        other => panic!("expected Unauthorized, got {other:?}"),
    }

    assert_eq!(client.share_link("alex").await.unwrap(), None);

    match client.register(&Default::default()).await {
        Err(ClientError::Api { status, message }) => {
            assert_eq!(status, 409);
            assert_eq!(message, "Email already registered");
        }
        other => panic!("expected Api error, got {other:?}"),
    }

    match client.patients().await {
        Err(ClientError::Api { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "Internal Server Error");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}
