use crate::{
    auth::{self, host_cookie::HostCookieSigner, session},
    captcha,
    constants::{MAX_GUESTS_MAX, MAX_GUESTS_MIN, MAX_PARTY_NAME_LEN},
    db::PersistentStorage,
    error::ApiError,
    events,
    kv::{generate_unique_short_code, ShortCodeDirectory},
    model::{PartyId, Queue, QueueStatus, SessionId},
    registry::CoordinatorRegistry,
    AppSettings,
};
use axum::{
    extract::{Extension, Path},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt as _};

fn validate_hhmm(value: &str) -> bool {
    let Some((h, m)) = value.split_once(':') else {
        return false;
    };
    matches!((h.parse::<u32>(), m.parse::<u32>()), (Ok(h), Ok(m)) if h < 24 && m < 60)
}

#[derive(Debug, Deserialize)]
pub struct CreateQueueRequest {
    pub event_name: String,
    pub max_guests: i32,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    pub open_time: Option<String>,
    pub close_time: Option<String>,
    #[serde(default)]
    pub requires_auth: bool,
    pub captcha_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateQueueResponse {
    pub code: String,
    pub session_id: String,
    pub join_url: String,
    pub ws_url: String,
    pub host_auth_token: String,
    pub event_name: String,
    pub max_guests: i32,
}

pub async fn create(
    headers: HeaderMap,
    Extension(registry): Extension<CoordinatorRegistry>,
    Extension(storage): Extension<PersistentStorage>,
    Extension(kv): Extension<ShortCodeDirectory>,
    Extension(signer): Extension<HostCookieSigner>,
    Extension(http_client): Extension<reqwest::Client>,
    Extension(captcha_opts): Extension<captcha::Options>,
    Extension(settings): Extension<AppSettings>,
    Json(body): Json<CreateQueueRequest>,
) -> Result<Response, ApiError> {
    if !(MAX_GUESTS_MIN..=MAX_GUESTS_MAX).contains(&body.max_guests) {
        return Err(ApiError::InvalidInput("max_guests out of range".to_owned()));
    }
    if body.event_name.trim().is_empty() {
        return Err(ApiError::InvalidInput("event_name is required".to_owned()));
    }
    if let (Some(open), Some(close)) = (&body.open_time, &body.close_time) {
        if !validate_hhmm(open) || !validate_hhmm(close) {
            return Err(ApiError::InvalidInput("open_time/close_time must be HH:MM".to_owned()));
        }
        if open >= close {
            return Err(ApiError::InvalidInput("open_time must be before close_time".to_owned()));
        }
    }

    let captcha_token = body.captcha_token.as_deref().unwrap_or_default();
    if !captcha::verify(&captcha_opts, &http_client, captcha_token).await {
        return Err(ApiError::CaptchaFailed);
    }

    let owner_id = session::optional_user(&storage, &headers).await;
    let code = generate_unique_short_code(&storage)
        .await
        .map_err(|err| ApiError::Storage(err.to_string()))?;

    let queue = Queue {
        session_id: SessionId::new(),
        short_code: code.clone(),
        status: QueueStatus::Active,
        event_name: body.event_name,
        max_guests: body.max_guests,
        location: body.location,
        contact_info: body.contact_info,
        open_time: body.open_time,
        close_time: body.close_time,
        created_at: Utc::now(),
        owner_id,
        requires_auth: body.requires_auth,
    };

    storage.insert_queue(&queue).await?;
    events::party_lifecycle(&storage, queue.session_id.clone(), None, "queue_created");
    kv.insert(code.clone(), queue.session_id.clone()).await;
    registry.insert_new(queue.clone()).await;

    let host_auth_token = signer.sign(&queue.session_id);
    let join_url = format!("{}queue/{code}", settings.app_base_url);
    let ws_url = format!("{}api/queue/{code}/connect", settings.app_base_url);

    let cookie = format!(
        "{}={}; Max-Age={}; HttpOnly; Secure; SameSite=Strict; Path=/",
        auth::HOST_COOKIE_NAME,
        host_auth_token,
        HostCookieSigner::max_age_secs(),
    );

    let body = Json(CreateQueueResponse {
        code,
        session_id: queue.session_id.0,
        join_url,
        ws_url,
        host_auth_token,
        event_name: queue.event_name,
        max_guests: queue.max_guests,
    });

    let mut response = body.into_response();
    if let Ok(value) = http::HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(http::header::SET_COOKIE, value);
    }
    Ok(response)
}

pub(crate) async fn load_queue(storage: &PersistentStorage, kv: &ShortCodeDirectory, code: &str) -> Result<Queue, ApiError> {
    let code = code.to_uppercase();
    let session_id = kv.get_fresh(&code).await;
    let queue = match session_id {
        Some(session_id) => storage.get_queue_by_session(&session_id).await?,
        None => {
            let queue = storage.get_queue_by_short_code(&code).await?;
            if let Some(queue) = &queue {
                kv.insert(code, queue.session_id.clone()).await;
            }
            queue
        }
    };
    queue.ok_or(ApiError::NotFound)
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub name: Option<String>,
    #[serde(default = "default_size")]
    pub size: i32,
    pub identity: Option<String>,
    pub captcha_token: Option<String>,
}

const fn default_size() -> i32 {
    1
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub party_id: String,
}

pub async fn join(
    Path(code): Path<String>,
    headers: HeaderMap,
    Extension(registry): Extension<CoordinatorRegistry>,
    Extension(storage): Extension<PersistentStorage>,
    Extension(kv): Extension<ShortCodeDirectory>,
    Extension(http_client): Extension<reqwest::Client>,
    Extension(captcha_opts): Extension<captcha::Options>,
    Json(body): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, ApiError> {
    if body.size < 1 {
        return Err(ApiError::InvalidInput("size must be at least 1".to_owned()));
    }
    if let Some(name) = &body.name {
        if name.len() > MAX_PARTY_NAME_LEN {
            return Err(ApiError::InvalidInput("name is too long".to_owned()));
        }
    }

    let captcha_token = body.captcha_token.as_deref().unwrap_or_default();
    if !captcha::verify(&captcha_opts, &http_client, captcha_token).await {
        return Err(ApiError::CaptchaFailed);
    }

    let _ = session::optional_user(&storage, &headers).await;
    let queue = load_queue(&storage, &kv, &code).await?;
    events::funnel_marker(&storage, queue.session_id.clone(), "join_started");
    let handle = registry
        .get_or_load(&queue.session_id)
        .await
        .ok_or(ApiError::NotFound)?;

    let party_id = handle.join(body.name, body.size, body.identity).await?;
    events::funnel_marker(&storage, queue.session_id.clone(), "join_completed");
    Ok(Json(JoinResponse {
        party_id: party_id.0,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PartyIdentityRequest {
    pub party_id: String,
}

pub async fn declare_nearby(
    Path(code): Path<String>,
    Extension(registry): Extension<CoordinatorRegistry>,
    Extension(storage): Extension<PersistentStorage>,
    Extension(kv): Extension<ShortCodeDirectory>,
    Json(body): Json<PartyIdentityRequest>,
) -> Result<StatusCode, ApiError> {
    let queue = load_queue(&storage, &kv, &code).await?;
    let handle = registry
        .get_or_load(&queue.session_id)
        .await
        .ok_or(ApiError::NotFound)?;
    handle.declare_nearby(PartyId(body.party_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave(
    Path(code): Path<String>,
    Extension(registry): Extension<CoordinatorRegistry>,
    Extension(storage): Extension<PersistentStorage>,
    Extension(kv): Extension<ShortCodeDirectory>,
    Json(body): Json<PartyIdentityRequest>,
) -> Result<StatusCode, ApiError> {
    let queue = load_queue(&storage, &kv, &code).await?;
    let handle = registry
        .get_or_load(&queue.session_id)
        .await
        .ok_or(ApiError::NotFound)?;
    match handle.leave(PartyId(body.party_id)).await {
        Ok(()) | Err(crate::coordinator::CoordinatorError::TerminalState) => Ok(StatusCode::NO_CONTENT),
        Err(err) => Err(err.into()),
    }
}

async fn require_host(
    headers: &HeaderMap,
    signer: &HostCookieSigner,
    storage: &PersistentStorage,
    queue: &Queue,
) -> Result<(), ApiError> {
    if auth::authorize_host(signer, storage, queue, headers).await {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AdvanceRequest {
    pub served_party: Option<String>,
    pub next_party: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdvanceResponse {
    pub now_serving: Option<String>,
}

pub async fn advance(
    Path(code): Path<String>,
    headers: HeaderMap,
    Extension(registry): Extension<CoordinatorRegistry>,
    Extension(storage): Extension<PersistentStorage>,
    Extension(kv): Extension<ShortCodeDirectory>,
    Extension(signer): Extension<HostCookieSigner>,
    Json(body): Json<AdvanceRequest>,
) -> Result<Json<AdvanceResponse>, ApiError> {
    let queue = load_queue(&storage, &kv, &code).await?;
    require_host(&headers, &signer, &storage, &queue).await?;
    let handle = registry
        .get_or_load(&queue.session_id)
        .await
        .ok_or(ApiError::NotFound)?;
    let now_serving = handle
        .advance(body.next_party.map(PartyId))
        .await?
        .map(|id| id.0);
    Ok(Json(AdvanceResponse { now_serving }))
}

pub async fn kick(
    Path(code): Path<String>,
    headers: HeaderMap,
    Extension(registry): Extension<CoordinatorRegistry>,
    Extension(storage): Extension<PersistentStorage>,
    Extension(kv): Extension<ShortCodeDirectory>,
    Extension(signer): Extension<HostCookieSigner>,
    Json(body): Json<PartyIdentityRequest>,
) -> Result<StatusCode, ApiError> {
    let queue = load_queue(&storage, &kv, &code).await?;
    require_host(&headers, &signer, &storage, &queue).await?;
    let handle = registry
        .get_or_load(&queue.session_id)
        .await
        .ok_or(ApiError::NotFound)?;
    handle.kick(PartyId(body.party_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn close(
    Path(code): Path<String>,
    headers: HeaderMap,
    Extension(registry): Extension<CoordinatorRegistry>,
    Extension(storage): Extension<PersistentStorage>,
    Extension(kv): Extension<ShortCodeDirectory>,
    Extension(signer): Extension<HostCookieSigner>,
) -> Result<StatusCode, ApiError> {
    let queue = load_queue(&storage, &kv, &code).await?;
    require_host(&headers, &signer, &storage, &queue).await?;
    let handle = registry
        .get_or_load(&queue.session_id)
        .await
        .ok_or(ApiError::NotFound)?;
    handle.close().await?;
    Ok(StatusCode::NO_CONTENT)
}

fn etag_for(version: u64) -> String {
    format!("\"{version}\"")
}

pub async fn snapshot(
    Path(code): Path<String>,
    headers: HeaderMap,
    Extension(registry): Extension<CoordinatorRegistry>,
    Extension(storage): Extension<PersistentStorage>,
    Extension(kv): Extension<ShortCodeDirectory>,
) -> Result<Response, ApiError> {
    let queue = load_queue(&storage, &kv, &code).await?;
    let handle = registry
        .get_or_load(&queue.session_id)
        .await
        .ok_or(ApiError::NotFound)?;
    let snapshot = handle.snapshot().await?;
    let etag = etag_for(snapshot.version);

    if let Some(if_none_match) = headers.get(http::header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        if if_none_match == etag {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
    }

    let mut response = Json(snapshot).into_response();
    if let Ok(value) = http::HeaderValue::from_str(&etag) {
        response.headers_mut().insert(http::header::ETAG, value);
    }
    Ok(response)
}

pub async fn connect(
    Path(code): Path<String>,
    Extension(registry): Extension<CoordinatorRegistry>,
    Extension(storage): Extension<PersistentStorage>,
    Extension(kv): Extension<ShortCodeDirectory>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let queue = load_queue(&storage, &kv, &code).await?;
    let handle = registry
        .get_or_load(&queue.session_id)
        .await
        .ok_or(ApiError::NotFound)?;
    let (initial, receiver) = handle.subscribe().await?;

    let initial_event = Event::default()
        .id(initial.version.to_string())
        .json_data(initial)
        .unwrap_or_else(|_| Event::default());

    let rest = BroadcastStream::new(receiver).filter_map(|item| {
        item.ok().map(|snapshot| {
            Ok(Event::default()
                .id(snapshot.version.to_string())
                .json_data(snapshot)
                .unwrap_or_else(|_| Event::default()))
        })
    });

    let stream = tokio_stream::once(Ok(initial_event)).chain(rest);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
