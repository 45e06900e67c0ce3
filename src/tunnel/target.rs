//! Relay WebSocket URL derived from the configured base address.

use url::Url;

/// Well-known relay endpoint clients register on.
pub const TUNNEL_PATH: &str = "/ws";

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("invalid server URL {0:?}: {1}")]
    InvalidUrl(String, url::ParseError),
    #[error("unsupported server scheme {0:?} (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
}

/// The authenticated WebSocket URL for one connection attempt.
///
/// Built fresh for every attempt. The key and version travel as query
/// parameters on the upgrade request and never inside a frame.
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    url: Url,
}

impl ConnectionTarget {
    /// Upgrade `base` to its WebSocket scheme, point it at [`TUNNEL_PATH`] and
    /// attach `key` plus a non-empty `version`.
    ///
    /// Query parameters already present on `base` are kept, except `key` and
    /// `version` which are replaced.
    pub fn new(base: &str, key: &str, version: Option<&str>) -> Result<Self, TargetError> {
        let mut url = Url::parse(base).map_err(|e| TargetError::InvalidUrl(base.to_string(), e))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(TargetError::UnsupportedScheme(other.to_string())),
        };
        // http -> ws and https -> wss are both special-scheme swaps, which `url` allows.
        url.set_scheme(scheme)
            .map_err(|()| TargetError::UnsupportedScheme(url.scheme().to_string()))?;
        url.set_path(TUNNEL_PATH);
        url.set_fragment(None);

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "key" && k != "version")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.extend_pairs(kept);
            query.append_pair("key", key);
            if let Some(v) = version.filter(|v| !v.is_empty()) {
                query.append_pair("version", v);
            }
        }

        Ok(Self { url })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// The URL with the key masked, for logs.
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        let pairs: Vec<(String, String)> = self
            .url
            .query_pairs()
            .map(|(k, v)| {
                let v = if k == "key" { "***".into() } else { v.into_owned() };
                (k.into_owned(), v)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}
