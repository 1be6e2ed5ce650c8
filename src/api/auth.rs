use crate::{
    auth::session::{self, AuthenticatedUser},
    db::{PersistentStorage, User},
    error::ApiError,
    oauth::{self, github, google, GithubOAuthClient, GoogleOAuthClient},
    util::{is_allowed_redirect_uri, is_safe_return_to},
    AppSettings,
};
use axum::{
    extract::{Extension, Path, Query},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const NATIVE_REDIRECT_PREFIXES: &[&str] = &["queuecoordinator://", "http://localhost"];

#[derive(Debug, Deserialize)]
pub struct BeginQuery {
    #[serde(default = "default_platform")]
    pub platform: String,
    pub redirect_uri: Option<String>,
    pub return_to: Option<String>,
}

fn default_platform() -> String {
    "web".to_owned()
}

pub async fn begin(
    Path(provider): Path<String>,
    Query(query): Query<BeginQuery>,
    Extension(storage): Extension<PersistentStorage>,
    Extension(settings): Extension<AppSettings>,
    Extension(github_client): Extension<GithubOAuthClient>,
    Extension(google_client): Extension<GoogleOAuthClient>,
) -> Result<Response, ApiError> {
    if let Some(redirect_uri) = &query.redirect_uri {
        if !is_allowed_redirect_uri(redirect_uri, &settings.allowed_origins, NATIVE_REDIRECT_PREFIXES) {
            return Err(ApiError::InvalidInput("redirect_uri is not allowed".to_owned()));
        }
    }
    if let Some(return_to) = &query.return_to {
        if !is_safe_return_to(return_to) {
            return Err(ApiError::InvalidInput("return_to must be a relative path".to_owned()));
        }
    }

    let state = oauth::issue_state(
        &storage,
        &provider,
        &query.platform,
        query.redirect_uri.clone(),
        query.return_to.clone(),
    )
    .await?;

    let url = match provider.as_str() {
        "github" => github::github_authorize_url(&github_client, state),
        "google" => google::google_authorize_url(&google_client, state),
        _ => return Err(ApiError::NotFound),
    };

    Ok(Redirect::to(&url).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

async fn upsert_user(
    storage: &PersistentStorage,
    provider: &str,
    provider_id: String,
    display_name: String,
    email: Option<String>,
) -> Result<String, ApiError> {
    if let Some(user) = storage.find_user_by_provider_id(provider, &provider_id).await? {
        return Ok(user.id);
    }

    if let Some(email) = &email {
        if let Some(user) = storage.find_user_by_email(email).await? {
            storage.link_provider_id(&user.id, provider, &provider_id).await?;
            return Ok(user.id);
        }
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        email,
        github_id: (provider == "github").then(|| provider_id.clone()),
        google_id: (provider == "google").then(|| provider_id.clone()),
        display_name: Some(display_name),
    };
    storage.insert_user(&user).await?;
    Ok(user.id)
}

/// OAuth failures that land mid-redirect (the browser is already off the
/// app's own origin) are reported by bouncing back to the app with an error
/// query param instead of rendering a bare JSON body the user never sees
/// formatted.
fn oauth_error_redirect(settings: &AppSettings, error: &str) -> Response {
    let mut target = settings.app_base_url.clone();
    target.query_pairs_mut().append_pair("auth", "error").append_pair("error", error);
    Redirect::to(target.as_str()).into_response()
}

pub async fn callback(
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    Extension(storage): Extension<PersistentStorage>,
    Extension(http_client): Extension<reqwest::Client>,
    Extension(github_client): Extension<GithubOAuthClient>,
    Extension(google_client): Extension<GoogleOAuthClient>,
    Extension(settings): Extension<AppSettings>,
) -> Result<Response, ApiError> {
    let Some(pending) = oauth::consume_state(&storage, &query.state).await? else {
        return Ok(oauth_error_redirect(&settings, "state_invalid"));
    };
    if pending.provider != provider {
        return Ok(oauth_error_redirect(&settings, "provider_mismatch"));
    }

    let (provider_id, display_name, email) = match provider.as_str() {
        "github" => {
            match github::exchange_code_for_profile(&github_client, &http_client, query.code).await {
                Ok(profile) => (profile.provider_id, profile.display_name, profile.email),
                Err(_) => return Ok(oauth_error_redirect(&settings, "oauth_failed")),
            }
        }
        "google" => {
            match google::exchange_code_for_profile(&google_client, &http_client, query.code).await {
                Ok(profile) => (profile.provider_id, profile.display_name, profile.email),
                Err(_) => return Ok(oauth_error_redirect(&settings, "oauth_failed")),
            }
        }
        _ => return Err(ApiError::NotFound),
    };

    let user_id = upsert_user(&storage, &provider, provider_id, display_name, email).await?;
    let session_token = session::issue(&storage, &user_id).await?;

    let Some(redirect_uri) = pending.redirect_uri else {
        return Ok(Json(serde_json::json!({ "session_token": session_token.0 })).into_response());
    };

    let exchange_token = crate::auth::exchange::mint(&storage, &user_id).await?;
    let mut target = redirect_uri;
    let separator = if target.contains('?') { '&' } else { '?' };
    target.push(separator);
    target.push_str("exchange_token=");
    target.push_str(&exchange_token);
    if let Some(return_to) = pending.return_to {
        target.push_str("&return_to=");
        target.push_str(&urlencoding_light(&return_to));
    }
    Ok(Redirect::to(&target).into_response())
}

fn urlencoding_light(value: &str) -> String {
    value.replace('%', "%25").replace(' ', "%20").replace('&', "%26")
}

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    pub session_token: String,
    pub user: UserView,
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub is_admin: bool,
}

fn user_view(settings: &AppSettings, user: User) -> UserView {
    let is_admin = settings.is_admin(user.email.as_deref());
    UserView {
        id: user.id,
        email: user.email,
        display_name: user.display_name,
        is_admin,
    }
}

pub async fn exchange(
    Extension(storage): Extension<PersistentStorage>,
    Extension(settings): Extension<AppSettings>,
    Json(body): Json<ExchangeRequest>,
) -> Result<Json<ExchangeResponse>, ApiError> {
    let Some(user_id) = crate::auth::exchange::redeem(&storage, &body.token).await? else {
        return Err(ApiError::Unauthenticated);
    };
    let user = storage.get_user(&user_id).await?.ok_or(ApiError::NotFound)?;
    let session_token = session::issue(&storage, &user_id).await?;
    Ok(Json(ExchangeResponse {
        session_token: session_token.0,
        user: user_view(&settings, user),
    }))
}

pub async fn me(
    AuthenticatedUser(user_id): AuthenticatedUser,
    Extension(storage): Extension<PersistentStorage>,
    Extension(settings): Extension<AppSettings>,
) -> Result<Json<UserView>, ApiError> {
    let user = storage.get_user(&user_id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(user_view(&settings, user)))
}

pub async fn logout(
    headers: http::HeaderMap,
    Extension(storage): Extension<PersistentStorage>,
) -> Result<StatusCode, ApiError> {
    if let Some(bearer) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        session::revoke(&storage, bearer).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}
