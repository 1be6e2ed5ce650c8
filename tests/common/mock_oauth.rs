//! Stands in for GitHub's and Google's OAuth token and userinfo endpoints
//! so the callback flow can be exercised without a network dependency.

use axum::{
    routing::{get, post, IntoMakeService},
    Extension, Form, Json, Router, TypedHeader,
};
use headers::{authorization::Bearer, Authorization};
use http::StatusCode;
use hyper::{server::conn::AddrIncoming, Server};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
pub struct MockUser {
    pub provider_id: String,
    pub display_name: String,
    pub email: Option<String>,
}

#[derive(Clone, Default)]
pub struct MockOAuthState {
    github: Arc<RwLock<HashMap<String, MockUser>>>,
    google: Arc<RwLock<HashMap<String, MockUser>>>,
    next_code: Arc<AtomicU64>,
}

impl MockOAuthState {
    fn next_code(&self) -> String {
        self.next_code.fetch_add(1, Ordering::SeqCst).to_string()
    }

    pub async fn register_github_user(&self, user: MockUser) -> String {
        let code = self.next_code();
        self.github.write().await.insert(code.clone(), user);
        code
    }

    pub async fn register_google_user(&self, user: MockUser) -> String {
        let code = self.next_code();
        self.google.write().await.insert(code.clone(), user);
        code
    }

    async fn github_user_for_code(&self, code: &str) -> Option<MockUser> {
        self.github.read().await.get(code).cloned()
    }

    async fn google_user_for_code(&self, code: &str) -> Option<MockUser> {
        self.google.read().await.get(code).cloned()
    }
}

pub fn start(addr: SocketAddr, state: MockOAuthState) -> Server<AddrIncoming, IntoMakeService<Router>> {
    let app = Router::new()
        .route("/github/token", post(github_token))
        .route("/github/userinfo", get(github_userinfo))
        .route("/google/token", post(google_token))
        .route("/google/userinfo", get(google_userinfo))
        .layer(Extension(state));
    Server::bind(&addr).serve(app.into_make_service())
}

#[derive(Debug, Deserialize)]
struct ExchangeRequest {
    code: String,
}

fn token_response(code: &str, prefix: &str) -> Json<Value> {
    Json(json!({
        "access_token": format!("{prefix}::{code}"),
        "token_type": "Bearer",
        "expires_in": 3600,
    }))
}

fn code_from_bearer<'a>(token: &'a str, prefix: &str) -> Option<&'a str> {
    token.strip_prefix(prefix)?.strip_prefix("::")
}

async fn github_token(
    Form(req): Form<ExchangeRequest>,
    Extension(state): Extension<MockOAuthState>,
) -> (StatusCode, Json<Value>) {
    match state.github_user_for_code(&req.code).await {
        Some(_) => (StatusCode::OK, token_response(&req.code, "gh")),
        None => (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))),
    }
}

async fn github_userinfo(
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Extension(state): Extension<MockOAuthState>,
) -> (StatusCode, Json<Value>) {
    let Some(code) = code_from_bearer(bearer.token(), "gh") else {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_token"})));
    };
    match state.github_user_for_code(code).await {
        Some(user) => (
            StatusCode::OK,
            Json(json!({
                "id": user.provider_id.parse::<u64>().unwrap_or(0),
                "login": user.display_name,
                "email": user.email,
            })),
        ),
        None => (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_token"}))),
    }
}

async fn google_token(
    Form(req): Form<ExchangeRequest>,
    Extension(state): Extension<MockOAuthState>,
) -> (StatusCode, Json<Value>) {
    match state.google_user_for_code(&req.code).await {
        Some(_) => (StatusCode::OK, token_response(&req.code, "ggl")),
        None => (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))),
    }
}

async fn google_userinfo(
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Extension(state): Extension<MockOAuthState>,
) -> (StatusCode, Json<Value>) {
    let Some(code) = code_from_bearer(bearer.token(), "ggl") else {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_token"})));
    };
    match state.google_user_for_code(code).await {
        Some(user) => (
            StatusCode::OK,
            Json(json!({
                "sub": user.provider_id,
                "name": user.display_name,
                "email": user.email,
            })),
        ),
        None => (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_token"}))),
    }
}
