mod common;

use common::{actions, Harness};
use http::StatusCode;

#[tokio::test]
async fn create_join_and_advance_serves_parties_in_order() {
    let harness = Harness::run().await;
    let client = reqwest::Client::new();

    let queue = actions::create_queue(&harness, &client, "Taco Night", 10).await;
    assert_eq!(queue.code.len(), 6);

    let first = actions::join_queue(&harness, &client, &queue.code, "Alice", 2).await;
    assert_eq!(first.status(), StatusCode::OK);
    let second = actions::join_queue(&harness, &client, &queue.code, "Bob", 1).await;
    assert_eq!(second.status(), StatusCode::OK);

    let snapshot = actions::snapshot(&harness, &client, &queue.code).await;
    assert_eq!(snapshot["waiting"].as_array().unwrap().len(), 2);
    assert!(snapshot["now_serving"].is_null());

    let advance_response = actions::advance(&harness, &client, &queue).await;
    assert_eq!(advance_response.status(), StatusCode::OK);
    let body: serde_json::Value = advance_response.json().await.unwrap();
    assert!(body["now_serving"].is_string(), "advance must call the first joined party");

    let snapshot = actions::snapshot(&harness, &client, &queue.code).await;
    assert_eq!(snapshot["now_serving"], body["now_serving"]);
    assert_eq!(snapshot["waiting"].as_array().unwrap().len(), 1, "called party leaves the waiting list");
}

#[tokio::test]
async fn join_is_rejected_once_max_guests_is_reached() {
    let harness = Harness::run().await;
    let client = reqwest::Client::new();

    let queue = actions::create_queue(&harness, &client, "Small Room", 2).await;

    let first = actions::join_queue(&harness, &client, &queue.code, "Alice", 2).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = actions::join_queue(&harness, &client, &queue.code, "Bob", 1).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["error"], "queue_full");
}

#[tokio::test]
async fn advance_requires_host_authority() {
    let harness = Harness::run().await;
    let client = reqwest::Client::new();

    let queue = actions::create_queue(&harness, &client, "Needs Host", 5).await;
    actions::join_queue(&harness, &client, &queue.code, "Alice", 1).await;

    let response = client
        .post(harness.app_path(&format!("api/queue/{}/advance", queue.code)))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let forged = client
        .post(harness.app_path(&format!("api/queue/{}/advance", queue.code)))
        .header("x-host-auth", "not-a-real-signature")
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn host_cookie_does_not_authorize_a_different_queue() {
    let harness = Harness::run().await;
    let client = reqwest::Client::new();

    let queue_a = actions::create_queue(&harness, &client, "Queue A", 5).await;
    let queue_b = actions::create_queue(&harness, &client, "Queue B", 5).await;

    let response = client
        .post(harness.app_path(&format!("api/queue/{}/advance", queue_b.code)))
        .header("x-host-auth", &queue_a.host_auth_token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn github_login_returns_a_usable_session_same_origin() {
    let harness = Harness::run().await;
    let client = actions::no_redirect_client();

    let session_token = actions::login_github(&harness, &client, "octocat", Some("octo@example.com")).await;

    let follow_client = reqwest::Client::new();
    let profile = actions::me(&harness, &follow_client, &session_token).await;
    assert_eq!(profile["email"], "octo@example.com");
    assert_eq!(profile["is_admin"], false);
}

#[tokio::test]
async fn admin_email_is_reflected_on_the_session_profile() {
    let harness = Harness::run().await;
    let client = actions::no_redirect_client();

    let session_token = actions::login_github(&harness, &client, "root", Some("admin@example.com")).await;

    let follow_client = reqwest::Client::new();
    let profile = actions::me(&harness, &follow_client, &session_token).await;
    assert_eq!(profile["is_admin"], true);
}

#[tokio::test]
async fn cross_origin_callback_mints_a_redeemable_exchange_token() {
    let harness = Harness::run().await;
    let client = actions::no_redirect_client();

    let (code, _user) = harness.register_github_user("exchange-user", Some("ex@example.com")).await;
    let state = actions::begin_oauth(&harness, &client, "github", Some("http://127.0.0.1:3100/app-callback")).await;
    let response = actions::complete_oauth_callback(&harness, &client, "github", &state, &code).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let location = response.headers().get(http::header::LOCATION).unwrap().to_str().unwrap().to_owned();
    let url = url::Url::parse(&location).unwrap();
    let exchange_token = url
        .query_pairs()
        .find(|(k, _)| k == "exchange_token")
        .map(|(_, v)| v.into_owned())
        .expect("redirect must carry an exchange_token");

    let follow_client = reqwest::Client::new();
    let redeem_once = follow_client
        .post(harness.app_path("api/auth/exchange"))
        .json(&serde_json::json!({ "token": exchange_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(redeem_once.status(), StatusCode::OK);

    let redeem_twice = follow_client
        .post(harness.app_path("api/auth/exchange"))
        .json(&serde_json::json!({ "token": exchange_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(redeem_twice.status(), StatusCode::UNAUTHORIZED, "an exchange token must be single-use");
}

#[tokio::test]
async fn oauth_state_cannot_be_replayed() {
    let harness = Harness::run().await;
    let client = actions::no_redirect_client();

    let (code, _user) = harness.register_github_user("replay-user", None).await;
    let state = actions::begin_oauth(&harness, &client, "github", None).await;

    let first = actions::complete_oauth_callback(&harness, &client, "github", &state, &code).await;
    assert_eq!(first.status(), StatusCode::OK);

    let replay = actions::complete_oauth_callback(&harness, &client, "github", &state, &code).await;
    assert_eq!(replay.status(), StatusCode::SEE_OTHER, "a consumed oauth state must not be reusable");
    let location = replay
        .headers()
        .get(http::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(location.contains("auth=error"), "replayed state must redirect back with an error marker");
}

#[tokio::test]
async fn declaring_nearby_twice_is_idempotent() {
    let harness = Harness::run().await;
    let client = reqwest::Client::new();

    let queue = actions::create_queue(&harness, &client, "Nearby Check", 5).await;
    let join_response = actions::join_queue(&harness, &client, &queue.code, "Alice", 1).await;
    let party_id = join_response.json::<serde_json::Value>().await.unwrap()["party_id"]
        .as_str()
        .unwrap()
        .to_owned();

    let first = actions::declare_nearby(&harness, &client, &queue.code, &party_id).await;
    assert_eq!(first.status(), StatusCode::NO_CONTENT);
    let second = actions::declare_nearby(&harness, &client, &queue.code, &party_id).await;
    assert_eq!(second.status(), StatusCode::NO_CONTENT, "declaring nearby twice must not error");

    let snapshot = actions::snapshot(&harness, &client, &queue.code).await;
    let waiting = snapshot["waiting"].as_array().unwrap();
    assert_eq!(waiting.len(), 1);
}

#[tokio::test]
async fn snapshot_returns_not_modified_for_a_matching_etag() {
    let harness = Harness::run().await;
    let client = reqwest::Client::new();

    let queue = actions::create_queue(&harness, &client, "ETag Check", 5).await;
    actions::join_queue(&harness, &client, &queue.code, "Alice", 1).await;

    let first = actions::snapshot_response(&harness, &client, &queue.code).await;
    assert_eq!(first.status(), StatusCode::OK);
    let etag = first
        .headers()
        .get(http::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .expect("snapshot must carry an etag")
        .to_owned();

    let conditional = client
        .get(harness.app_path(&format!("api/queue/{}/snapshot", queue.code)))
        .header(http::header::IF_NONE_MATCH, &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(conditional.status(), StatusCode::NOT_MODIFIED);

    actions::join_queue(&harness, &client, &queue.code, "Bob", 1).await;
    let changed = client
        .get(harness.app_path(&format!("api/queue/{}/snapshot", queue.code)))
        .header(http::header::IF_NONE_MATCH, &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(changed.status(), StatusCode::OK, "a changed snapshot must not match the stale etag");
}

#[tokio::test]
async fn called_party_becomes_no_show_after_the_call_window_elapses() {
    let harness = Harness::run_with_call_window_secs(1).await;
    let client = reqwest::Client::new();

    let queue = actions::create_queue(&harness, &client, "Slow Check-in", 5).await;
    actions::join_queue(&harness, &client, &queue.code, "Alice", 1).await;
    actions::join_queue(&harness, &client, &queue.code, "Bob", 1).await;

    let advance_response = actions::advance(&harness, &client, &queue).await;
    assert_eq!(advance_response.status(), StatusCode::OK);
    let called: serde_json::Value = advance_response.json().await.unwrap();
    let called_party_id = called["now_serving"].as_str().unwrap().to_owned();

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

    let snapshot = actions::snapshot(&harness, &client, &queue.code).await;
    assert!(
        snapshot["now_serving"].is_null(),
        "a party that misses its call window must no longer be shown as served"
    );
    let waiting = snapshot["waiting"].as_array().unwrap();
    assert!(
        !waiting.iter().any(|p| p["party_id"] == called_party_id),
        "a no_show party must not reappear in the waiting line"
    );
}
