use crate::{api::queue::load_queue, db::PersistentStorage, events, kv::ShortCodeDirectory, AppSettings};
use axum::{
    extract::{Extension, Path},
    response::{IntoResponse, Response},
};
use http::{header, StatusCode};

/// Short-code links are handed out as plain URLs (QR codes, texted links);
/// this turns `/queue/{code}` into a redirect to the single-page app with
/// the code carried as a query parameter. A 302 rather than axum's default
/// 303 `Redirect::to`, since these links get re-scanned from the same QR
/// code repeatedly and should keep redirecting rather than being cached
/// against the original method.
pub async fn redirect_to_app(
    Path(code): Path<String>,
    Extension(settings): Extension<AppSettings>,
    Extension(storage): Extension<PersistentStorage>,
    Extension(kv): Extension<ShortCodeDirectory>,
) -> Response {
    let code = code.to_uppercase();
    if let Ok(queue) = load_queue(&storage, &kv, &code).await {
        events::funnel_marker(&storage, queue.session_id, "qr_scanned");
    }

    let target = format!("{}?code={}", settings.app_base_url, code);
    let mut response = StatusCode::FOUND.into_response();
    if let Ok(value) = header::HeaderValue::from_str(&target) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}
