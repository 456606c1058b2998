mod support;

use auth_orchestrator::health::HealthVerdict;
use auth_orchestrator::protocol::identity::Identity;
use auth_orchestrator::{
    AuthError, CredentialSource, HttpSessionBackend, OrchestratorConfig, SessionBackend, UserInfo,
};

use support::http_responder::{CannedResponse, HttpResponder};

fn backend_for(responder: &HttpResponder) -> HttpSessionBackend {
    HttpSessionBackend::new(&OrchestratorConfig::new(responder.base_url())).unwrap()
}

#[tokio::test]
async fn identity_request_sends_marker_and_bearer_headers() {
    let responder = HttpResponder::start(vec![CannedResponse::json(
        200,
        r#"{"is_authenticated":true,"session_ready":true,"user_id":"u-7","email":"a@b.c","source":"header"}"#,
    )])
    .await
    .unwrap();
    let backend = backend_for(&responder);

    let identity = backend.fetch_identity(Some("access-1")).await.unwrap();

    assert_eq!(
        identity,
        Identity::Authenticated {
            user: UserInfo {
                id: "u-7".into(),
                email: Some("a@b.c".into()),
            },
            session_ready: Some(true),
            source: CredentialSource::Header,
        }
    );

    let requests = responder.requests();
    assert_eq!(requests.len(), 1);
    let request = requests[0].to_ascii_lowercase();
    assert!(request.starts_with("get /api/auth/whoami "), "{request}");
    assert!(request.contains("x-requested-with: xmlhttprequest"));
    assert!(request.contains("authorization: bearer access-1"));
}

#[tokio::test]
async fn identity_request_without_token_has_no_authorization() {
    let responder = HttpResponder::start(vec![CannedResponse::json(
        200,
        r#"{"is_authenticated":false}"#,
    )])
    .await
    .unwrap();
    let backend = backend_for(&responder);

    let identity = backend.fetch_identity(None).await.unwrap();

    assert!(matches!(identity, Identity::Anonymous { .. }));
    let request = responder.requests()[0].to_ascii_lowercase();
    assert!(!request.contains("authorization:"));
}

#[tokio::test]
async fn identity_rejection_maps_to_http_error() {
    let responder = HttpResponder::start(vec![CannedResponse::json(401, "{}")])
        .await
        .unwrap();
    let backend = backend_for(&responder);

    let err = backend.fetch_identity(None).await.unwrap_err();

    assert!(matches!(err, AuthError::Http { status: 401 }));
    assert!(err.is_definitive_unauthenticated());
}

#[tokio::test]
async fn malformed_identity_body_is_rejected() {
    let responder = HttpResponder::start(vec![CannedResponse::json(200, r#"{"user_id":7}"#)])
        .await
        .unwrap();
    let backend = backend_for(&responder);

    let err = backend.fetch_identity(None).await.unwrap_err();

    assert!(matches!(err, AuthError::MalformedResponse { .. }));
}

#[tokio::test]
async fn health_probe_maps_status_to_verdict() {
    let responder = HttpResponder::start(vec![
        CannedResponse::json(200, r#"{"status":"ok"}"#),
        CannedResponse::json(503, "{}"),
    ])
    .await
    .unwrap();
    let backend = backend_for(&responder);

    assert_eq!(
        backend.probe_health().await,
        HealthVerdict::Reachable { status: 200 }
    );
    assert!(!backend.probe_health().await.is_healthy());
    assert!(
        responder.requests()[0]
            .to_ascii_lowercase()
            .starts_with("get /health ")
    );
}

#[tokio::test]
async fn unreachable_backend_is_an_unhealthy_verdict() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend =
        HttpSessionBackend::new(&OrchestratorConfig::new(format!("http://{addr}"))).unwrap();

    assert!(matches!(
        backend.probe_health().await,
        HealthVerdict::Unreachable { .. }
    ));
    assert!(matches!(
        backend.fetch_identity(None).await.unwrap_err(),
        AuthError::Network { .. }
    ));
}

#[tokio::test]
async fn refresh_posts_the_refresh_token() {
    let responder = HttpResponder::start(vec![CannedResponse::json(
        200,
        r#"{"access_token":"access-2","refresh_token":"refresh-2"}"#,
    )])
    .await
    .unwrap();
    let backend = backend_for(&responder);

    let pair = backend.refresh_tokens("refresh-1").await.unwrap();

    assert_eq!(pair.access.as_deref(), Some("access-2"));
    assert_eq!(pair.refresh.as_deref(), Some("refresh-2"));

    let request = responder.requests()[0].clone();
    assert!(request.to_ascii_lowercase().starts_with("post /api/auth/refresh "));
    let body = request.split("\r\n\r\n").nth(1).unwrap();
    let body: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(body, serde_json::json!({"refresh_token": "refresh-1"}));
}

#[tokio::test]
async fn rejected_refresh_surfaces_the_status() {
    let responder = HttpResponder::start(vec![CannedResponse::json(403, "{}")])
        .await
        .unwrap();
    let backend = backend_for(&responder);

    let err = backend.refresh_tokens("stale").await.unwrap_err();

    assert!(matches!(err, AuthError::Http { status: 403 }));
}
