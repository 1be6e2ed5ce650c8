use crate::{
    auth::session::hash_token, constants::EXCHANGE_TOKEN_TTL_SECS, db::PersistentStorage,
};
use chrono::{Duration, Utc};
use rand::RngCore;

/// One-shot token handed to the browser via a redirect query parameter so
/// an OAuth callback completed on one origin (the API's own domain) can be
/// redeemed for a session on another (the app's own domain), without ever
/// putting the session token itself in a URL.
#[must_use]
pub fn generate_exchange_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    crate::util::base64url_encode(&bytes)
}

pub async fn mint(
    storage: &PersistentStorage,
    user_id: &str,
) -> Result<String, crate::db::StorageError> {
    let token = generate_exchange_token();
    let expires_at = Utc::now() + Duration::seconds(EXCHANGE_TOKEN_TTL_SECS);
    storage
        .insert_exchange_token(&hash_token(&token), user_id, expires_at)
        .await?;
    Ok(token)
}

/// Redeems the token for the user id it was minted for. The underlying
/// `UPDATE ... WHERE used = 0 RETURNING` is atomic: under N concurrent
/// redeem attempts with the same token, exactly one observes `Some`.
pub async fn redeem(
    storage: &PersistentStorage,
    token: &str,
) -> Result<Option<String>, crate::db::StorageError> {
    storage.redeem_exchange_token(&hash_token(token)).await
}
