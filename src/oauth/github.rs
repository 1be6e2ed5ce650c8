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
pub struct GithubAuthOptions {
    /// Github OAuth2 authorization url.
    #[clap(long, env, default_value = "https://github.com/login/oauth/authorize")]
    pub gh_auth_url: String,

    /// Github OAuth2 token url.
    #[clap(
        long,
        env,
        default_value = "https://github.com/login/oauth/access_token"
    )]
    pub gh_token_url: String,

    /// Github OAuth2 user info url.
    #[clap(long, env, default_value = "https://api.github.com/user")]
    pub gh_userinfo_url: String,

    /// Github OAuth2 callback redirect url.
    #[clap(
        long,
        env,
        default_value = "http://127.0.0.1:3000/auth/callback/github"
    )]
    pub gh_redirect_url: String,

    /// Github OAuth2 client access id.
    #[clap(long, env)]
    pub gh_client_id: Secret,

    /// Github OAuth2 client access key.
    #[clap(long, env)]
    pub gh_client_secret: Secret,
}

#[derive(Clone)]
pub struct GithubOAuthClient {
    client: BasicClient,
    userinfo_url: String,
}

impl Deref for GithubOAuthClient {
    type Target = BasicClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[must_use]
pub fn github_oauth_client(options: &GithubAuthOptions) -> GithubOAuthClient {
    GithubOAuthClient {
        client: BasicClient::new(
            ClientId::new(options.gh_client_id.get_secret().to_owned()),
            Some(ClientSecret::new(
                options.gh_client_secret.get_secret().to_owned(),
            )),
            AuthUrl::new(options.gh_auth_url.clone()).unwrap(),
            Some(TokenUrl::new(options.gh_token_url.clone()).unwrap()),
        )
        .set_redirect_uri(RedirectUrl::new(options.gh_redirect_url.clone()).unwrap()),
        userinfo_url: options.gh_userinfo_url.clone(),
    }
}

#[must_use]
pub fn github_authorize_url(client: &GithubOAuthClient, state: String) -> String {
    let (url, _) = client
        .authorize_url(move || oauth2::CsrfToken::new(state))
        .add_scope(Scope::new("read:user".to_owned()))
        .add_scope(Scope::new("user:email".to_owned()))
        .url();
    url.to_string()
}

#[derive(Debug, Deserialize)]
struct GithubUserInfo {
    id: u64,
    login: String,
    email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GithubProfile {
    pub provider_id: String,
    pub display_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum GithubAuthError {
    #[error("failed to exchange authorization code")]
    CodeExchangeFailed,
    #[error("failed to fetch github profile")]
    ProfileFetchFailed,
}

pub async fn exchange_code_for_profile(
    client: &GithubOAuthClient,
    http: &reqwest::Client,
    code: String,
) -> Result<GithubProfile, GithubAuthError> {
    let token = client
        .exchange_code(AuthorizationCode::new(code))
        .request_async(async_http_client)
        .await
        .map_err(|_| GithubAuthError::CodeExchangeFailed)?;

    let response = http
        .get(&client.userinfo_url)
        .bearer_auth(token.access_token().secret())
        .header("User-Agent", "queue-coordinator")
        .send()
        .await
        .map_err(|_| GithubAuthError::ProfileFetchFailed)?;

    let info: GithubUserInfo = response
        .json()
        .await
        .map_err(|_| GithubAuthError::ProfileFetchFailed)?;

    Ok(GithubProfile {
        provider_id: info.id.to_string(),
        display_name: info.login,
        email: info.email,
    })
}
