use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use secure_auth::backend::{AadhaarData, FaceData, FallbackRequest, VerifySecureRequest};
use secure_auth::common::config::{BackendConfig, BotCheckConfig};
use secure_auth::{BotCheck, ErrorKind, HttpBotCheck, HttpVerificationBackend, VerificationBackend};

#[derive(Clone, Default)]
struct Recorded {
    bodies: Arc<Mutex<Vec<Value>>>,
    script_loads: Arc<AtomicUsize>,
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Address nothing is listening on.
async fn dead_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn backend_config(base_url: &str) -> BackendConfig {
    BackendConfig {
        base_url: base_url.to_string(),
        verify_path: "/api/auth/verify-secure".to_string(),
        fallback_path: "/api/auth/fallback-verification".to_string(),
        timeout_ms: 2_000,
        connect_timeout_ms: 1_000,
        fallback_method: "otp".to_string(),
    }
}

fn bot_check_config(base_url: &str) -> BotCheckConfig {
    BotCheckConfig {
        site_key: "site-key".to_string(),
        script_url: format!("{}/api.js", base_url),
        execute_url: format!("{}/execute", base_url),
        action: "secure_auth".to_string(),
        timeout_ms: 2_000,
    }
}

fn verify_request() -> VerifySecureRequest {
    VerifySecureRequest {
        user_id: "user-1".into(),
        email: "asha@example.com".into(),
        recaptcha_token: "abc123".into(),
        aadhaar_data: AadhaarData {
            aadhaar_number: "123456789012".into(),
            consent: true,
            name: "Asha".into(),
        },
        face_data: FaceData {
            descriptors: vec![0.1, 0.2],
            method: "face-descriptor".into(),
            reference_descriptors: vec![0.1, 0.2],
        },
    }
}

fn fallback_request() -> FallbackRequest {
    FallbackRequest {
        user_id: "user-1".into(),
        email: "asha@example.com".into(),
        reason: "Face capture failed".into(),
        alternate_method: "otp".into(),
    }
}

async fn record(State(recorded): State<Recorded>, Json(body): Json<Value>) {
    recorded.bodies.lock().push(body);
}

#[tokio::test]
async fn test_verify_secure_success_returns_data() {
    let recorded = Recorded::default();
    let app = Router::new()
        .route(
            "/api/auth/verify-secure",
            post(|State(recorded): State<Recorded>, Json(body): Json<Value>| async move {
                recorded.bodies.lock().push(body);
                Json(json!({ "success": true, "data": { "verified": true } }))
            }),
        )
        .with_state(recorded.clone());
    let base = serve(app).await;

    let backend = HttpVerificationBackend::new(&backend_config(&base));
    let data = backend.verify_secure(&verify_request()).await.unwrap();
    assert_eq!(data, json!({ "verified": true }));

    let bodies = recorded.bodies.lock().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["recaptchaToken"], "abc123");
    assert_eq!(bodies[0]["aadhaarData"]["aadhaarNumber"], "123456789012");
    assert_eq!(bodies[0]["faceData"]["referenceDescriptors"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_verify_secure_unsuccessful_body_is_rejected() {
    let app = Router::new().route(
        "/api/auth/verify-secure",
        post(|| async { Json(json!({ "success": false, "message": "Face mismatch" })) }),
    );
    let base = serve(app).await;

    let backend = HttpVerificationBackend::new(&backend_config(&base));
    let err = backend.verify_secure(&verify_request()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BackendRejected);
    assert_eq!(err.message, "Face mismatch");
}

#[tokio::test]
async fn test_verify_secure_error_status_is_rejected() {
    let app = Router::new()
        .route(
            "/api/auth/verify-secure",
            post(|| async {
                (StatusCode::UNAUTHORIZED, Json(json!({ "success": false, "message": "Invalid token" })))
            }),
        )
        .route(
            "/api/auth/fallback-verification",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
    let base = serve(app).await;

    let backend = HttpVerificationBackend::new(&backend_config(&base));
    let err = backend.verify_secure(&verify_request()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BackendRejected);
    assert_eq!(err.message, "Invalid token");

    let err = backend.request_fallback(&fallback_request()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BackendRejected);
}

#[tokio::test]
async fn test_fallback_posts_request() {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/api/auth/fallback-verification", post(record))
        .with_state(recorded.clone());
    let base = serve(app).await;

    let backend = HttpVerificationBackend::new(&backend_config(&format!("{}/", base)));
    backend.request_fallback(&fallback_request()).await.unwrap();

    let bodies = recorded.bodies.lock().clone();
    assert_eq!(
        bodies,
        vec![json!({
            "userId": "user-1",
            "email": "asha@example.com",
            "reason": "Face capture failed",
            "alternateMethod": "otp",
        })]
    );
}

#[tokio::test]
async fn test_backend_unreachable() {
    let backend = HttpVerificationBackend::new(&backend_config(&dead_address().await));

    let err = backend.verify_secure(&verify_request()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BackendUnreachable);
    let err = backend.request_fallback(&fallback_request()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BackendUnreachable);
}

fn bot_check_app(recorded: Recorded, execute_reply: Value) -> Router {
    Router::new()
        .route(
            "/api.js",
            get(|State(recorded): State<Recorded>| async move {
                recorded.script_loads.fetch_add(1, Ordering::SeqCst);
                "/* bot check */"
            }),
        )
        .route(
            "/execute",
            post(move |State(recorded): State<Recorded>, Json(body): Json<Value>| async move {
                recorded.bodies.lock().push(body);
                Json(execute_reply)
            }),
        )
        .with_state(recorded)
}

#[tokio::test]
async fn test_bot_check_loads_once_and_issues_token() {
    let recorded = Recorded::default();
    let base = serve(bot_check_app(recorded.clone(), json!({ "success": true, "token": "abc123" }))).await;

    let bot_check = HttpBotCheck::new(&bot_check_config(&base));
    assert!(!bot_check.is_loaded());
    bot_check.load().await.unwrap();
    bot_check.load().await.unwrap();
    assert!(bot_check.is_loaded());

    assert_eq!(bot_check.execute("secure_auth").await.unwrap(), "abc123");
    assert_eq!(recorded.script_loads.load(Ordering::SeqCst), 1);
    assert_eq!(
        recorded.bodies.lock().clone(),
        vec![json!({ "sitekey": "site-key", "action": "secure_auth" })]
    );
}

#[tokio::test]
async fn test_bot_check_rejection_carries_error_codes() {
    let recorded = Recorded::default();
    let reply = json!({ "success": false, "error-codes": ["timeout-or-duplicate"] });
    let base = serve(bot_check_app(recorded, reply)).await;

    let bot_check = HttpBotCheck::new(&bot_check_config(&base));
    let err = bot_check.execute("secure_auth").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BotCheckRejected);
    assert!(err.message.contains("timeout-or-duplicate"));
}

#[tokio::test]
async fn test_bot_check_unavailable() {
    let bot_check = HttpBotCheck::new(&bot_check_config(&dead_address().await));
    let err = bot_check.load().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BotCheckUnavailable);
    assert!(!bot_check.is_loaded());

    let err = bot_check.execute("secure_auth").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BotCheckUnavailable);
}
