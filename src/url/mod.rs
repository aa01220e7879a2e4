//! URL handling module for h2fetch
//!
//! This module provides the normalized request URI type, fragment stripping,
//! default-port inference and the same-origin test used by the crawler and
//! by the driver's connection grouping.

mod normalize;
mod origin;

pub use normalize::strip_fragment;
pub use origin::{default_port, Origin};

use crate::{UrlError, UrlResult};
use std::fmt;
use url::{Host, Url};

/// A request URI with its fragment removed
///
/// The serialized form (`as_str`) is the normalized URI used as the
/// deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestUri {
    url: Url,
}

impl RequestUri {
    /// Parses a raw URI, dropping any fragment
    ///
    /// The URI must be absolute and carry a host. Any scheme is accepted;
    /// schemes other than `http` are treated as encrypted when inferring
    /// the default port.
    ///
    /// # Examples
    ///
    /// ```
    /// use h2fetch::url::RequestUri;
    ///
    /// let uri = RequestUri::parse("http://Example.com/a.png#top").unwrap();
    /// assert_eq!(uri.as_str(), "http://example.com/a.png");
    /// assert_eq!(uri.effective_port(), 80);
    /// ```
    pub fn parse(raw: &str) -> UrlResult<Self> {
        let stripped = strip_fragment(raw.trim());
        let url = Url::parse(stripped).map_err(|e| UrlError::Parse(format!("{}: {}", raw, e)))?;

        if url.host().is_none() {
            return Err(UrlError::MissingHost(raw.to_string()));
        }

        Ok(Self { url })
    }

    /// The normalized URI string
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// The underlying parsed URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host suitable for name resolution (IPv6 literals without brackets)
    pub fn host(&self) -> String {
        match self.url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => String::new(),
        }
    }

    /// Explicit port, if the URI carried one that differs from the scheme default
    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// Port used for connecting and for same-origin comparison
    pub fn effective_port(&self) -> u16 {
        self.url
            .port()
            .unwrap_or_else(|| default_port(self.url.scheme()))
    }

    /// Request path: the URI path (or `/`) followed by `?query` when present
    pub fn path_and_query(&self) -> String {
        let path = self.url.path();
        let mut out = if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        };
        if let Some(query) = self.url.query() {
            out.push('?');
            out.push_str(query);
        }
        out
    }

    /// Value for the `:authority` pseudo-header
    ///
    /// IPv6 literals stay bracketed; the port is only appended when it is
    /// explicit and not the scheme default.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) if port != default_port(self.url.scheme()) => format!("{}:{}", host, port),
            _ => host.to_string(),
        }
    }

    /// The (scheme, host, effective port) triple of this URI
    pub fn origin(&self) -> Origin {
        Origin::new(self.scheme(), &self.host(), self.effective_port())
    }

    /// Returns true if `other` has the same scheme, host and effective port
    pub fn same_origin(&self, other: &RequestUri) -> bool {
        self.origin() == other.origin()
    }
}

impl fmt::Display for RequestUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
