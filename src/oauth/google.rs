use crate::util::Secret;
use clap::Parser;
use oauth2::{
    basic::BasicClient, reqwest::async_http_client, AuthUrl, AuthorizationCode, ClientId,
    ClientSecret, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use std::ops::Deref;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Parser)]
pub struct GoogleAuthOptions {
    /// Google OAuth2 authorization url.
    #[clap(
        long,
        env,
        default_value = "https://accounts.google.com/o/oauth2/v2/auth"
    )]
    pub google_auth_url: String,

    /// Google OAuth2 token url.
    #[clap(long, env, default_value = "https://oauth2.googleapis.com/token")]
    pub google_token_url: String,

    /// Google OAuth2 user info url.
    #[clap(
        long,
        env,
        default_value = "https://openidconnect.googleapis.com/v1/userinfo"
    )]
    pub google_userinfo_url: String,

    /// Google OAuth2 callback redirect url.
    #[clap(
        long,
        env,
        default_value = "http://127.0.0.1:3000/auth/callback/google"
    )]
    pub google_redirect_url: String,

    /// Google OAuth2 client access id.
    #[clap(long, env)]
    pub google_client_id: Secret,

    /// Google OAuth2 client access key.
    #[clap(long, env)]
    pub google_client_secret: Secret,
}

#[derive(Clone)]
pub struct GoogleOAuthClient {
    client: BasicClient,
    userinfo_url: String,
}

impl Deref for GoogleOAuthClient {
    type Target = BasicClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[must_use]
pub fn google_oauth_client(options: &GoogleAuthOptions) -> GoogleOAuthClient {
    GoogleOAuthClient {
        client: BasicClient::new(
            ClientId::new(options.google_client_id.get_secret().to_owned()),
            Some(ClientSecret::new(
                options.google_client_secret.get_secret().to_owned(),
            )),
            AuthUrl::new(options.google_auth_url.clone()).unwrap(),
            Some(TokenUrl::new(options.google_token_url.clone()).unwrap()),
        )
        .set_redirect_uri(RedirectUrl::new(options.google_redirect_url.clone()).unwrap()),
        userinfo_url: options.google_userinfo_url.clone(),
    }
}

#[must_use]
pub fn google_authorize_url(client: &GoogleOAuthClient, state: String) -> String {
    let (url, _) = client
        .authorize_url(move || oauth2::CsrfToken::new(state))
        .add_scope(Scope::new("openid".to_owned()))
        .add_scope(Scope::new("email".to_owned()))
        .add_scope(Scope::new("profile".to_owned()))
        .url();
    url.to_string()
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GoogleProfile {
    pub provider_id: String,
    pub display_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum GoogleAuthError {
    #[error("failed to exchange authorization code")]
    CodeExchangeFailed,
    #[error("failed to fetch google profile")]
    ProfileFetchFailed,
}

pub async fn exchange_code_for_profile(
    client: &GoogleOAuthClient,
    http: &reqwest::Client,
    code: String,
) -> Result<GoogleProfile, GoogleAuthError> {
    let token = client
        .exchange_code(AuthorizationCode::new(code))
        .request_async(async_http_client)
        .await
        .map_err(|_| GoogleAuthError::CodeExchangeFailed)?;

    let response = http
        .get(&client.userinfo_url)
        .bearer_auth(token.access_token().secret())
        .send()
        .await
        .map_err(|_| GoogleAuthError::ProfileFetchFailed)?;

    let info: GoogleUserInfo = response
        .json()
        .await
        .map_err(|_| GoogleAuthError::ProfileFetchFailed)?;

    Ok(GoogleProfile {
        provider_id: info.sub,
        display_name: info.name.unwrap_or_else(|| "Unknown".to_owned()),
        email: info.email,
    })
}
