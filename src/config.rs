//! Client settings loaded from environment variables.
//!
//! DESIGN
//! ======
//! The dispatcher endpoint is derived from the URL of the page that hosts the
//! client: a secure page talks `wss` on 443, anything else `ws` on the
//! dispatcher port. `SLAVELINK_WS_URL` bypasses the derivation entirely.
//! Unparseable numeric variables fall back to their defaults; structurally
//! wrong values (bad page URL, inverted backoff bounds) are errors.

use tokio_tungstenite::tungstenite::http::Uri;

use crate::backoff::{BackoffBounds, DEFAULT_MAX_BACKOFF_SECS, DEFAULT_MIN_BACKOFF_SECS, MAX_BACKOFF_CEILING_SECS};

pub const DEFAULT_PAGE_URL: &str = "http://localhost";
pub const DEFAULT_PORT: u16 = 3004;
pub const SECURE_PORT: u16 = 443;
pub const ENDPOINT_PATH: &str = "/ws";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid page url {url:?}: {reason}")]
    InvalidPageUrl { url: String, reason: &'static str },
    #[error("invalid backoff bounds: min {min}s, max {max}s")]
    InvalidBackoff { min: f64, max: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Full websocket URL, e.g. `ws://localhost:3004/ws`.
    pub endpoint: String,
    pub backoff: BackoffBounds,
}

impl ClientConfig {
    /// Build a config from the process environment.
    ///
    /// - `SLAVELINK_PAGE_URL`: hosting page URL (default `http://localhost`)
    /// - `SLAVELINK_WS_URL`: explicit endpoint, overrides the page URL
    /// - `SLAVELINK_PORT`: non-secure dispatcher port (default 3004)
    /// - `SLAVELINK_MIN_BACKOFF_SECS` / `SLAVELINK_MAX_BACKOFF_SECS`
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::build`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::build`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let page_url = lookup("SLAVELINK_PAGE_URL").unwrap_or_else(|| DEFAULT_PAGE_URL.into());
        let ws_url = lookup("SLAVELINK_WS_URL").filter(|url| !url.trim().is_empty());
        let port = lookup_parse(&lookup, "SLAVELINK_PORT", DEFAULT_PORT);
        let backoff = BackoffBounds {
            min_secs: lookup_parse(&lookup, "SLAVELINK_MIN_BACKOFF_SECS", DEFAULT_MIN_BACKOFF_SECS),
            max_secs: lookup_parse(&lookup, "SLAVELINK_MAX_BACKOFF_SECS", DEFAULT_MAX_BACKOFF_SECS),
        };
        Self::build(&page_url, ws_url, port, backoff)
    }

    /// Validate settings and resolve the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPageUrl`] when no override is given and
    /// `page_url` is not an http(s) URL with a host, and
    /// [`ConfigError::InvalidBackoff`] unless
    /// `0 < min <= max <= MAX_BACKOFF_CEILING_SECS`. A zero floor would never
    /// grow past jitter.
    pub fn build(
        page_url: &str,
        ws_url: Option<String>,
        port: u16,
        backoff: BackoffBounds,
    ) -> Result<Self, ConfigError> {
        let BackoffBounds { min_secs: min, max_secs: max } = backoff;
        let valid = min > 0.0 && min <= max && max <= MAX_BACKOFF_CEILING_SECS;
        if !valid {
            return Err(ConfigError::InvalidBackoff { min, max });
        }
        let endpoint = match ws_url {
            Some(url) => url,
            None => endpoint_for_page(page_url, port)?,
        };
        Ok(Self { endpoint, backoff })
    }
}

/// Dispatcher endpoint for a client hosted at `page_url`.
///
/// `https` pages get `wss://<host>:443/ws`; `http` pages get
/// `ws://<host>:<port>/ws`. The page's own port, path and credentials are
/// ignored.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidPageUrl`] for unparseable URLs, unsupported
/// schemes, or URLs without a host.
pub fn endpoint_for_page(page_url: &str, port: u16) -> Result<String, ConfigError> {
    let invalid = |reason| ConfigError::InvalidPageUrl { url: page_url.to_owned(), reason };

    let uri: Uri = page_url.trim().parse().map_err(|_| invalid("not a valid url"))?;
    let secure = match uri.scheme_str().map(str::to_ascii_lowercase).as_deref() {
        Some("https" | "wss") => true,
        Some("http" | "ws") => false,
        Some(_) => return Err(invalid("scheme must be http or https")),
        None => return Err(invalid("missing scheme")),
    };
    let host = uri.host().filter(|host| !host.is_empty()).ok_or_else(|| invalid("missing host"))?;
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_owned()
    };

    Ok(if secure {
        format!("wss://{host}:{SECURE_PORT}{ENDPOINT_PATH}")
    } else {
        format!("ws://{host}:{port}{ENDPOINT_PATH}")
    })
}

fn lookup_parse<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    lookup(key).and_then(|v| v.trim().parse::<T>().ok()).unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
