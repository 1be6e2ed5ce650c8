use crate::util::Secret;
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Parser)]
pub struct Options {
    /// Turnstile secret key used to verify captcha tokens server-side.
    /// When absent, captcha verification is skipped entirely (useful for
    /// local development and integration tests).
    #[clap(long, env)]
    pub turnstile_secret_key: Option<Secret>,

    /// Turnstile siteverify endpoint.
    #[clap(
        long,
        env,
        default_value = "https://challenges.cloudflare.com/turnstile/v0/siteverify"
    )]
    pub turnstile_verify_url: String,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    success: bool,
}

/// Calls out to the captcha provider to check a token submitted by a
/// client. Returns `true` whenever verification is disabled (no secret
/// configured), so local and test deployments don't need a live key.
pub async fn verify(options: &Options, http: &reqwest::Client, token: &str) -> bool {
    let Some(secret) = &options.turnstile_secret_key else {
        return true;
    };

    let request = VerifyRequest {
        secret: secret.get_secret(),
        response: token,
    };

    let response = match http.post(&options.turnstile_verify_url).json(&request).send().await {
        Ok(response) => response,
        Err(_) => return false,
    };

    match response.json::<VerifyResponse>().await {
        Ok(body) => body.success,
        Err(_) => false,
    }
}
