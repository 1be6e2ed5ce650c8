use crate::{
    constants::HOST_COOKIE_MAX_AGE_SECS,
    model::SessionId,
    util::{base64url_decode, base64url_encode, Secret},
};
use clap::Parser;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq, Parser)]
pub struct Options {
    /// Secret key used to sign host cookies. Must stay stable across
    /// restarts or every host is logged out.
    #[clap(long, env)]
    pub host_cookie_secret: Secret,
}

#[derive(Debug, Error)]
pub enum HostCookieError {
    #[error("malformed host cookie")]
    Malformed,
    #[error("host cookie signature does not match")]
    BadSignature,
}

/// Signs and verifies the `hostSessionId.hmac` cookie value that proves a
/// browser was the one that created a given queue, without the server
/// needing to keep any session state for it.
#[derive(Clone)]
pub struct HostCookieSigner {
    key: Vec<u8>,
}

impl HostCookieSigner {
    #[must_use]
    pub fn new(options: &Options) -> Self {
        Self {
            key: options.host_cookie_secret.get_secret().as_bytes().to_vec(),
        }
    }

    #[must_use]
    pub fn sign(&self, session_id: &SessionId) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(session_id.0.as_bytes());
        let tag = mac.finalize().into_bytes();
        format!("{}.{}", session_id.0, base64url_encode(&tag))
    }

    pub fn verify(&self, cookie_value: &str, session_id: &SessionId) -> Result<(), HostCookieError> {
        let (id_part, sig_part) = cookie_value
            .split_once('.')
            .ok_or(HostCookieError::Malformed)?;
        if id_part != session_id.0 {
            return Err(HostCookieError::BadSignature);
        }
        let given = base64url_decode(sig_part).map_err(|_| HostCookieError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(id_part.as_bytes());
        let expected = mac.finalize().into_bytes();

        if expected.as_slice().ct_eq(&given).into() {
            Ok(())
        } else {
            Err(HostCookieError::BadSignature)
        }
    }

    #[must_use]
    pub const fn max_age_secs() -> i64 {
        HOST_COOKIE_MAX_AGE_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> HostCookieSigner {
        HostCookieSigner {
            key: b"test-key-material".to_vec(),
        }
    }

    #[test]
    fn round_trips() {
        let signer = signer();
        let session_id = SessionId::new();
        let cookie = signer.sign(&session_id);
        assert!(signer.verify(&cookie, &session_id).is_ok());
    }

    #[test]
    fn rejects_tampered_session_id() {
        let signer = signer();
        let session_id = SessionId::new();
        let cookie = signer.sign(&session_id);
        let other = SessionId::new();
        assert!(signer.verify(&cookie, &other).is_err());
    }

    #[test]
    fn rejects_forged_signature() {
        let signer = signer();
        let session_id = SessionId::new();
        let forged = format!("{}.{}", session_id.0, "not-a-real-signature");
        assert!(signer.verify(&forged, &session_id).is_err());
    }
}
