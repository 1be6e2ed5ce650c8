pub mod exchange;
pub mod host_cookie;
pub mod session;

use crate::{db::PersistentStorage, model::Queue};
use http::HeaderMap;

pub const HOST_COOKIE_NAME: &str = "queue_host_auth";
pub const HOST_HEADER_NAME: &str = "x-host-auth";

/// Pulls the host-authority token out of either the cookie jar or the
/// `x-host-auth` header used by native clients and cross-origin flows.
#[must_use]
pub fn extract_host_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(HOST_HEADER_NAME) {
        if let Ok(value) = value.to_str() {
            return Some(value.to_owned());
        }
    }
    let cookie_header = headers.get(http::header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix(&format!("{HOST_COOKIE_NAME}=")) {
            return Some(value.to_owned());
        }
    }
    None
}

/// A host mutation is authorized either by a valid host cookie for this
/// queue, or by an authenticated user session matching the queue's owner.
/// Either suffices; the two mechanisms are never conflated.
pub async fn authorize_host(
    signer: &host_cookie::HostCookieSigner,
    storage: &PersistentStorage,
    queue: &Queue,
    headers: &HeaderMap,
) -> bool {
    if let Some(token) = extract_host_token(headers) {
        if signer.verify(&token, &queue.session_id).is_ok() {
            return true;
        }
    }

    let Some(owner_id) = &queue.owner_id else {
        return false;
    };
    let Some(bearer) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };

    matches!(session::validate(storage, bearer).await, Ok(Some(user_id)) if &user_id == owner_id)
}
