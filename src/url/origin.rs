use std::fmt;

/// Returns the default port for a scheme
///
/// The special schemes of the URL standard keep their registered ports, so
/// a port the `url` crate elides always maps back to itself. `http` and `ws`
/// give 80, `ftp` gives 21, and `https`, `wss` and every unrecognized scheme
/// give 443.
pub fn default_port(scheme: &str) -> u16 {
    match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => 80,
        "ftp" => 21,
        _ => 443,
    }
}

/// The (scheme, host, effective port) triple that decides connection
/// grouping and crawl eligibility
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: String,
    host: String,
    port: u16,
}

impl Origin {
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host for name resolution (IPv6 literals without brackets)
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns true if the scheme calls for TLS
    pub fn is_secure(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("https")
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}
