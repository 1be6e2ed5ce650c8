use eyre::{bail, ensure, Result as EyreResult};
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str,
};
use std::convert::Infallible;
use url::{Host, Url};

pub fn parse_url(url: &Url) -> EyreResult<(SocketAddr, &str)> {
    ensure!(
        url.scheme() == "http",
        "Only http:// is supported in {}",
        url
    );
    let prefix = url.path();
    let ip: IpAddr = match url.host() {
        Some(Host::Ipv4(ip)) => ip.into(),
        Some(Host::Ipv6(ip)) => ip.into(),
        Some(_) => bail!("Cannot bind {}", url),
        None => Ipv4Addr::LOCALHOST.into(),
    };
    let port = url.port().unwrap_or(8080);
    let addr = SocketAddr::new(ip, port);
    Ok((addr, prefix))
}

#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn get_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("[REDACTED]")
    }
}

impl str::FromStr for Secret {
    type Err = Infallible;

    fn from_str(str: &str) -> Result<Self, Self::Err> {
        Ok(Self(str.to_owned()))
    }
}

#[must_use]
pub fn base64url_encode(bytes: &[u8]) -> String {
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}

pub fn base64url_decode(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::decode_config(value, base64::URL_SAFE_NO_PAD)
}

/// A `return_to` path is safe to redirect to only if it is a relative
/// path: it must start with `/`, must not start with `//` (protocol-
/// relative, i.e. host-switching), and must not contain a scheme prefix
/// or backslash that a browser could reinterpret as an absolute URL.
#[must_use]
pub fn is_safe_return_to(path: &str) -> bool {
    if !path.starts_with('/') || path.starts_with("//") {
        return false;
    }
    if path.contains('\\') {
        return false;
    }
    if path.contains(':') {
        return false;
    }
    true
}

/// Validates a redirect URI against an allow-list of origins (exact
/// scheme+host match), permitting path equality or subpath, plus a
/// separate allowance for native deep-link / development patterns.
#[must_use]
pub fn is_allowed_redirect_uri(uri: &str, allowed_origins: &[Url], native_prefixes: &[&str]) -> bool {
    if native_prefixes.iter().any(|prefix| uri.starts_with(prefix)) {
        return true;
    }
    let Ok(parsed) = Url::parse(uri) else {
        return false;
    };
    allowed_origins.iter().any(|allowed| {
        allowed.scheme() == parsed.scheme()
            && allowed.host_str() == parsed.host_str()
            && allowed.port_or_known_default() == parsed.port_or_known_default()
            && (parsed.path() == allowed.path() || parsed.path().starts_with(allowed.path()))
    })
}
