#![doc = include_str!("../Readme.md")]
#![warn(clippy::all, clippy::pedantic, clippy::cargo, clippy::nursery)]
#![cfg_attr(any(test, feature = "bench"), allow(clippy::wildcard_imports))]
// TODO: These lints
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::module_name_repetitions)]

use crate::{
    api::{auth as api_auth, push as api_push, queue as api_queue, redirect as api_redirect},
    auth::host_cookie::HostCookieSigner,
    constants::CORS_MAX_AGE_SECS,
    db::storage_client,
    kv::ShortCodeDirectory,
    oauth::{github_oauth_client, google_oauth_client, GithubAuthOptions, GoogleAuthOptions},
    registry::CoordinatorRegistry,
    util::parse_url,
};
use axum::{
    extract::Extension,
    response::Html,
    routing::{get, post, IntoMakeService},
    Router, Server,
};
use clap::Parser;
use cli_batteries::await_shutdown;
use eyre::Result as EyreResult;
use http::{header, HeaderName, Method};
use hyper::server::conn::AddrIncoming;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use url::Url;

mod api;
mod auth;
mod captcha;
mod constants;
mod coordinator;
mod db;
mod error;
mod events;
mod kv;
mod model;
mod notifications;
mod oauth;
mod registry;
mod util;

/// Cross-cutting, request-independent settings derived from `Options` that
/// handlers need to build absolute URLs or check an admin allow-list.
#[derive(Clone, Debug)]
pub struct AppSettings {
    pub app_base_url: Url,
    pub allowed_origins: Vec<Url>,
    pub admin_emails: Vec<String>,
}

impl AppSettings {
    #[must_use]
    pub fn is_admin(&self, email: Option<&str>) -> bool {
        email
            .map(|email| self.admin_emails.iter().any(|admin| admin.eq_ignore_ascii_case(email)))
            .unwrap_or(false)
    }
}

fn parse_csv_urls(csv: &str) -> EyreResult<Vec<Url>> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Url::parse(s).map_err(Into::into))
        .collect()
}

fn parse_csv_list(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Parser)]
pub struct Options {
    /// API server url to bind.
    #[clap(long, env, default_value = "http://127.0.0.1:3000/")]
    pub server: Url,

    /// Public base url of the guest/host web app, used to build join links
    /// and the websocket-style connect url returned from queue creation.
    #[clap(long, env, default_value = "http://127.0.0.1:3000/")]
    pub app_base_url: Url,

    /// Comma-separated list of origins allowed to make credentialed
    /// cross-origin requests against this API.
    #[clap(long, env, default_value = "http://127.0.0.1:3000")]
    pub allowed_origins: String,

    /// Comma-separated list of email addresses (case-insensitive) granted
    /// admin privileges.
    #[clap(long, env, default_value = "")]
    pub admin_emails: String,

    #[clap(flatten)]
    pub db: db::Options,

    #[clap(flatten)]
    pub coordinator: coordinator::Options,

    #[clap(flatten)]
    pub host_cookie: auth::host_cookie::Options,

    #[clap(flatten)]
    pub notifications: notifications::Options,

    #[clap(flatten)]
    pub captcha: captcha::Options,

    #[clap(flatten)]
    pub github: GithubAuthOptions,

    #[clap(flatten)]
    pub google: GoogleAuthOptions,
}

#[allow(clippy::missing_errors_doc)]
pub async fn async_main(options: Options) -> EyreResult<()> {
    let addr = options.server.clone();
    let server = start_server(options).await?;
    info!("Listening on http://{}{}", server.local_addr(), addr.path());
    server.with_graceful_shutdown(await_shutdown()).await?;
    Ok(())
}

#[allow(clippy::missing_errors_doc)]
pub async fn start_server(
    options: Options,
) -> EyreResult<Server<AddrIncoming, IntoMakeService<Router>>> {
    info!("Starting queue coordinator.");

    let allowed_origins = parse_csv_urls(&options.allowed_origins)?;
    let admin_emails = parse_csv_list(&options.admin_emails);
    let settings = AppSettings {
        app_base_url: options.app_base_url.clone(),
        allowed_origins: allowed_origins.clone(),
        admin_emails,
    };

    let storage = storage_client(&options.db).await?;
    let notifications = notifications::spawn_dispatcher(
        options.notifications.clone(),
        storage.clone(),
        options.app_base_url.clone(),
    );
    let registry = CoordinatorRegistry::new(
        storage.clone(),
        notifications.clone(),
        options.coordinator.call_window_secs,
    );
    let kv = ShortCodeDirectory::new();
    let host_cookie_signer = HostCookieSigner::new(&options.host_cookie);
    let github_client = github_oauth_client(&options.github);
    let google_client = google_oauth_client(&options.google);

    let cors_origins: Vec<_> = allowed_origins
        .iter()
        .filter_map(|url| url.origin().ascii_serialization().parse::<http::HeaderValue>().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::list(cors_origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-host-auth"),
        ])
        .max_age(Duration::from_secs(CORS_MAX_AGE_SECS));

    let app = Router::new()
        .layer(TraceLayer::new_for_http())
        .route("/hello_world", get(hello_world))
        .route("/queue/:code", get(api_redirect::redirect_to_app))
        .route("/api/queue/create", post(api_queue::create))
        .route("/api/queue/:code/join", post(api_queue::join))
        .route("/api/queue/:code/declare-nearby", post(api_queue::declare_nearby))
        .route("/api/queue/:code/leave", post(api_queue::leave))
        .route("/api/queue/:code/advance", post(api_queue::advance))
        .route("/api/queue/:code/kick", post(api_queue::kick))
        .route("/api/queue/:code/close", post(api_queue::close))
        .route("/api/queue/:code/snapshot", get(api_queue::snapshot))
        .route("/api/queue/:code/connect", get(api_queue::connect))
        .route("/api/auth/:provider", get(api_auth::begin).post(api_auth::begin))
        .route(
            "/api/auth/:provider/callback",
            get(api_auth::callback).post(api_auth::callback),
        )
        .route("/api/auth/exchange", post(api_auth::exchange))
        .route("/api/auth/me", get(api_auth::me))
        .route("/api/auth/logout", post(api_auth::logout))
        .route("/api/push/vapid", get(api_push::vapid_key))
        .route("/api/push/subscribe", post(api_push::subscribe))
        .route("/api/push/test", post(api_push::send_test))
        .layer(cors)
        .layer(Extension(registry))
        .layer(Extension(kv))
        .layer(Extension(storage))
        .layer(Extension(host_cookie_signer))
        .layer(Extension(github_client))
        .layer(Extension(google_client))
        .layer(Extension(reqwest::Client::new()))
        .layer(Extension(options.captcha.clone()))
        .layer(Extension(options.notifications.clone()))
        .layer(Extension(notifications))
        .layer(Extension(settings));

    // Run the server
    let (addr, prefix) = parse_url(&options.server)?;
    let app = Router::new().nest(prefix, app);
    let server = Server::try_bind(&addr)?.serve(app.into_make_service());
    Ok(server)
}

#[allow(clippy::unused_async)] // Required for axum function signature
async fn hello_world() -> Html<&'static str> {
    Html("<h1>Server is Running</h1>")
}
