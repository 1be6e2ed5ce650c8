use crate::{
    auth::session::AuthenticatedUser,
    db::{PersistentStorage, PushSubscriptionRow},
    error::ApiError,
    model::{PartyId, SessionId},
    notifications::{self, NotificationEvent, NotificationKind, NotificationSender},
    registry::CoordinatorRegistry,
    AppSettings,
};
use axum::{
    extract::Extension,
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct VapidKeyResponse {
    pub public_key: Option<String>,
}

pub async fn vapid_key(Extension(options): Extension<notifications::Options>) -> Json<VapidKeyResponse> {
    Json(VapidKeyResponse {
        public_key: options.vapid_public_key.clone(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub session_id: String,
    pub party_id: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

/// Registers a push subscription and, for a party that is still active in
/// the queue, fires the join-confirm notification — this is the first
/// moment a real subscriber exists to receive it, so it cannot be fired
/// from `join()` itself (there is no subscription yet at that point).
pub async fn subscribe(
    Extension(storage): Extension<PersistentStorage>,
    Extension(registry): Extension<CoordinatorRegistry>,
    Extension(notifications): Extension<NotificationSender>,
    Json(body): Json<SubscribeRequest>,
) -> Result<Response, ApiError> {
    let session_id = SessionId(body.session_id);
    let party_id = PartyId(body.party_id);

    let subscription = PushSubscriptionRow {
        endpoint: body.endpoint,
        p256dh: body.p256dh,
        auth: body.auth,
        session_id: session_id.clone(),
        party_id: party_id.clone(),
    };
    storage.upsert_push_subscription(&subscription).await?;

    if let Some(queue) = storage.get_queue_by_session(&session_id).await? {
        if let Some(handle) = registry.get_or_load(&session_id).await {
            if let Ok(snapshot) = handle.snapshot().await {
                let is_active = snapshot.now_serving.as_ref() == Some(&party_id)
                    || snapshot.waiting.iter().any(|entry| entry.party_id == party_id);
                if is_active {
                    notifications.send(NotificationEvent {
                        session_id,
                        party_id,
                        short_code: queue.short_code,
                        call_deadline: None,
                        kind: NotificationKind::JoinConfirm,
                    });
                }
            }
        }
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub struct TestPushRequest {
    pub session_id: String,
    pub party_id: String,
}

/// Admin-only diagnostic endpoint: lets a signed-in admin poke a specific
/// subscription with a `test` push to confirm delivery actually works.
pub async fn send_test(
    AuthenticatedUser(user_id): AuthenticatedUser,
    Extension(storage): Extension<PersistentStorage>,
    Extension(notifications): Extension<NotificationSender>,
    Extension(settings): Extension<AppSettings>,
    Json(body): Json<TestPushRequest>,
) -> Result<StatusCode, ApiError> {
    let user = storage.get_user(&user_id).await?.ok_or(ApiError::NotFound)?;
    if !settings.is_admin(user.email.as_deref()) {
        return Err(ApiError::Forbidden);
    }

    let session_id = SessionId(body.session_id);
    let queue = storage
        .get_queue_by_session(&session_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    notifications.send(NotificationEvent {
        session_id,
        party_id: PartyId(body.party_id),
        short_code: queue.short_code,
        call_deadline: None,
        kind: NotificationKind::Test,
    });
    Ok(StatusCode::NO_CONTENT)
}
