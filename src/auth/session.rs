use crate::{constants::USER_SESSION_TTL_SECS, db::PersistentStorage};
use axum::{
    extract::{Extension, FromRequest, RequestParts},
    TypedHeader,
};
use chrono::{Duration, Utc};
use headers::{authorization::Bearer, Authorization};
use http::HeaderMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Debug, Hash, Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionToken(pub String);

impl Display for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mints a fresh opaque session token; only its hash is ever persisted, so
/// a database read can never recover a bearer credential.
#[must_use]
pub fn generate_session_token() -> SessionToken {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    SessionToken(crate::util::base64url_encode(&bytes))
}

#[must_use]
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)
}

pub async fn issue(storage: &PersistentStorage, user_id: &str) -> Result<SessionToken, crate::db::StorageError> {
    let token = generate_session_token();
    let expires_at = Utc::now() + Duration::seconds(USER_SESSION_TTL_SECS);
    storage
        .insert_user_session(&hash_token(&token.0), user_id, expires_at)
        .await?;
    Ok(token)
}

pub async fn validate(
    storage: &PersistentStorage,
    token: &str,
) -> Result<Option<String>, crate::db::StorageError> {
    storage.validate_user_session(&hash_token(token)).await
}

pub async fn revoke(storage: &PersistentStorage, token: &str) -> Result<(), crate::db::StorageError> {
    storage.delete_user_session(&hash_token(token)).await
}

/// Best-effort bearer extraction for endpoints where a user session is
/// optional context (e.g. attributing `ownerId` on queue creation) rather
/// than a hard requirement. Any failure just resolves to `None`.
pub async fn optional_user(storage: &PersistentStorage, headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))?;
    validate(storage, bearer).await.ok().flatten()
}

#[derive(Debug, Error)]
pub enum SessionRejection {
    #[error("missing or malformed authorization header")]
    MissingToken,
    #[error("session is invalid or expired")]
    InvalidSession,
}

impl axum::response::IntoResponse for SessionRejection {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            Self::MissingToken | Self::InvalidSession => http::StatusCode::UNAUTHORIZED,
        };
        (status, self.to_string()).into_response()
    }
}

/// Extracts and validates the bearer session token for handlers that
/// require an authenticated user. Resolves all the way to the user id so
/// handlers never need to touch the raw token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

#[axum::async_trait]
impl<B> FromRequest<B> for AuthenticatedUser
where
    B: Send,
{
    type Rejection = SessionRejection;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request(req)
                .await
                .map_err(|_| SessionRejection::MissingToken)?;

        let Extension(storage) = Extension::<PersistentStorage>::from_request(req)
            .await
            .map_err(|_| SessionRejection::InvalidSession)?;

        let user_id = validate(&storage, bearer.token())
            .await
            .map_err(|_| SessionRejection::InvalidSession)?
            .ok_or(SessionRejection::InvalidSession)?;

        Ok(Self(user_id))
    }
}
