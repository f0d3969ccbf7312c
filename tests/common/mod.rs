#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response, header},
};
use gatehouse::auth::{ClientIpConfig, GatewayConfig, SecurityContext, SecurityGateway};
use gatehouse::create_app;
use gatehouse::jwt::Role;
use gatehouse::session::Session;
use gatehouse::tokens::{Identity, TokenPair};
use serde_json::Value;

pub const SECRET: &[u8] = b"test-secret-key-for-testing-0123456789";
pub const USER_AGENT: &str = "GatehouseTest/1.0";
pub const ORIGIN: &str = "http://localhost:7291";
pub const CLIENT_ADDR: &str = "203.0.113.7:40000";

/// Create a test app and return (app, gateway).
pub fn create_test_app() -> (Router, Arc<SecurityGateway>) {
    create_test_app_with(GatewayConfig::default())
}

pub fn create_test_app_with(config: GatewayConfig) -> (Router, Arc<SecurityGateway>) {
    let gateway = Arc::new(SecurityGateway::new(SECRET, config));
    (create_app(gateway.clone()), gateway)
}

pub fn identity(user_id: &str) -> Identity {
    Identity {
        user_id: user_id.to_string(),
        email: format!("{user_id}@example.com"),
        role: Role::User,
    }
}

/// Open a session as if `user_id` had just signed in with `USER_AGENT`.
pub async fn login(gateway: &SecurityGateway, user_id: &str) -> (Session, TokenPair) {
    let (parts, _) = Request::builder()
        .uri("/login")
        .header(header::USER_AGENT, USER_AGENT)
        .extension(ConnectInfo(client_addr()))
        .body(Body::empty())
        .unwrap()
        .into_parts();
    let ctx = SecurityContext::from_parts(&parts, &ClientIpConfig::default());
    gateway
        .establish_session(&identity(user_id), &ctx)
        .await
        .expect("Failed to establish session")
}

pub fn client_addr() -> SocketAddr {
    CLIENT_ADDR.parse().unwrap()
}

/// Request builder carrying the test client's address, user agent and
/// bearer token.
pub fn authed(method: &str, uri: &str, access_token: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::USER_AGENT, USER_AGENT)
        .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
        .extension(ConnectInfo(client_addr()))
}

/// Like [`authed`], plus a matching CSRF header, cookie and trusted origin.
pub fn authed_with_csrf(
    method: &str,
    uri: &str,
    access_token: &str,
    csrf_token: &str,
) -> axum::http::request::Builder {
    authed(method, uri, access_token)
        .header("x-csrf-token", csrf_token)
        .header(header::COOKIE, format!("csrf-token={csrf_token}"))
        .header(header::ORIGIN, ORIGIN)
}

pub fn json_body(value: Value) -> Body {
    Body::from(value.to_string())
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

pub fn extract_set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect()
}

/// Fetch a CSRF token for the session behind `access_token`.
pub async fn fetch_csrf_token(app: &Router, access_token: &str) -> String {
    use tower::ServiceExt;

    let response = app
        .clone()
        .oneshot(authed("GET", "/api/csrf", access_token).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = read_json(response).await;
    body["csrfToken"]
        .as_str()
        .expect("csrfToken missing")
        .to_string()
}
