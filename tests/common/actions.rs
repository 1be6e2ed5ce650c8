use crate::common::Harness;
use http::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

/// A `reqwest::Client` that does not auto-follow redirects, so callers can
/// inspect `Location` headers from `begin`/`callback` responses directly.
pub fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

fn query_pairs(url: &Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

/// Starts the OAuth flow for `provider` and returns the CSRF state the
/// server embedded in the authorize-url redirect.
pub async fn begin_oauth(
    harness: &Harness,
    client: &reqwest::Client,
    provider: &str,
    redirect_uri: Option<&str>,
) -> String {
    let mut url = harness.app_path(&format!("api/auth/{provider}"));
    if let Some(redirect_uri) = redirect_uri {
        url.query_pairs_mut().append_pair("redirect_uri", redirect_uri);
    }
    let response = client.get(url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let authorize_url = Url::parse(
        response
            .headers()
            .get(http::header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap(),
    )
    .unwrap();
    query_pairs(&authorize_url)
        .remove("state")
        .expect("authorize url must carry a state param")
}

/// Completes the OAuth callback for a user registered with the mock
/// provider and returns the raw response so both same-origin (JSON body)
/// and cross-origin (redirect with `exchange_token`) flows can be asserted.
pub async fn complete_oauth_callback(
    harness: &Harness,
    client: &reqwest::Client,
    provider: &str,
    state: &str,
    code: &str,
) -> reqwest::Response {
    let url = harness.app_path(&format!("api/auth/{provider}/callback"));
    client
        .get(url)
        .query(&[("state", state), ("code", code)])
        .send()
        .await
        .unwrap()
}

/// Logs a mock GitHub user in via the same-origin path and returns the
/// bearer session token.
pub async fn login_github(harness: &Harness, client: &reqwest::Client, display_name: &str, email: Option<&str>) -> String {
    let (code, _user) = harness.register_github_user(display_name, email).await;
    let state = begin_oauth(harness, client, "github", None).await;
    let response = complete_oauth_callback(harness, client, "github", &state, &code).await;
    assert_eq!(response.status(), StatusCode::OK);
    response
        .json::<Value>()
        .await
        .unwrap()
        .get("session_token")
        .expect("response must carry session_token")
        .as_str()
        .unwrap()
        .to_owned()
}

pub async fn me(harness: &Harness, client: &reqwest::Client, session_token: &str) -> Value {
    client
        .get(harness.app_path("api/auth/me"))
        .bearer_auth(session_token)
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap()
}

#[derive(Debug)]
pub struct CreatedQueue {
    pub code: String,
    pub session_id: String,
    pub host_auth_token: String,
}

pub async fn create_queue(harness: &Harness, client: &reqwest::Client, event_name: &str, max_guests: i32) -> CreatedQueue {
    let response = client
        .post(harness.app_path("api/queue/create"))
        .json(&serde_json::json!({
            "event_name": event_name,
            "max_guests": max_guests,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK, "queue creation must succeed");

    let cookie = response
        .headers()
        .get(http::header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_owned());
    let body: Value = response.json().await.unwrap();
    let host_auth_token = cookie
        .as_deref()
        .and_then(|c| c.split(';').next())
        .and_then(|kv| kv.split_once('='))
        .map(|(_, v)| v.to_owned())
        .unwrap_or_else(|| body["host_auth_token"].as_str().unwrap().to_owned());

    CreatedQueue {
        code: body["code"].as_str().unwrap().to_owned(),
        session_id: body["session_id"].as_str().unwrap().to_owned(),
        host_auth_token,
    }
}

pub async fn join_queue(harness: &Harness, client: &reqwest::Client, code: &str, name: &str, size: i32) -> reqwest::Response {
    client
        .post(harness.app_path(&format!("api/queue/{code}/join")))
        .json(&serde_json::json!({ "name": name, "size": size }))
        .send()
        .await
        .unwrap()
}

pub async fn advance(harness: &Harness, client: &reqwest::Client, queue: &CreatedQueue) -> reqwest::Response {
    client
        .post(harness.app_path(&format!("api/queue/{}/advance", queue.code)))
        .header("x-host-auth", &queue.host_auth_token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
}

pub async fn snapshot(harness: &Harness, client: &reqwest::Client, code: &str) -> Value {
    client
        .get(harness.app_path(&format!("api/queue/{code}/snapshot")))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap()
}

pub async fn snapshot_response(harness: &Harness, client: &reqwest::Client, code: &str) -> reqwest::Response {
    client
        .get(harness.app_path(&format!("api/queue/{code}/snapshot")))
        .send()
        .await
        .unwrap()
}

pub async fn declare_nearby(harness: &Harness, client: &reqwest::Client, code: &str, party_id: &str) -> reqwest::Response {
    client
        .post(harness.app_path(&format!("api/queue/{code}/declare-nearby")))
        .json(&serde_json::json!({ "party_id": party_id }))
        .send()
        .await
        .unwrap()
}
