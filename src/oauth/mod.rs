pub mod github;
pub mod google;

use crate::{
    constants::OAUTH_STATE_TTL_SECS,
    db::{OAuthStateRow, PersistentStorage, StorageError},
};
use chrono::{Duration, Utc};
use rand::RngCore;

pub use self::{
    github::{github_oauth_client, GithubAuthOptions, GithubOAuthClient, GithubProfile},
    google::{google_oauth_client, GoogleAuthOptions, GoogleOAuthClient, GoogleProfile},
};

/// Mints a fresh CSRF state value and persists the request context it was
/// issued for (which provider, which platform-specific redirect, and the
/// `return_to` path to send the browser back to once the exchange token is
/// redeemed).
pub async fn issue_state(
    storage: &PersistentStorage,
    provider: &str,
    platform: &str,
    redirect_uri: Option<String>,
    return_to: Option<String>,
) -> Result<String, StorageError> {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    let state = crate::util::base64url_encode(&bytes);
    let expires_at = Utc::now() + Duration::seconds(OAUTH_STATE_TTL_SECS);
    storage
        .insert_oauth_state(
            &state,
            &OAuthStateRow {
                provider: provider.to_owned(),
                platform: platform.to_owned(),
                redirect_uri,
                return_to,
            },
            expires_at,
        )
        .await?;
    Ok(state)
}

/// Atomically consumes a CSRF state, so a replayed callback (or a second
/// concurrent callback racing the first) observes `None`.
pub async fn consume_state(
    storage: &PersistentStorage,
    state: &str,
) -> Result<Option<OAuthStateRow>, StorageError> {
    storage.consume_oauth_state(state).await
}
