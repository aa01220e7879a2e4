//! Driver module: runs one session per origin
//!
//! This module contains:
//! - Grouping of input URIs by origin
//! - The sequential `Driver` that runs each group's `ConnectionSession`
//! - Aggregation of session outcomes into the process exit status

mod group;

pub use group::{group_by_origin, OriginGroup};

use crate::config::Config;
use crate::output::print_statistics;
use crate::request::BodySource;
use crate::session::{ConnectionSession, SessionReport};
use crate::transport::{build_tls_config, sni_host, TlsTarget};
use crate::url::Origin;
use crate::{FetchError, Result};
use std::io::Write;
use std::sync::Arc;

/// Outcome of a whole run
#[derive(Debug, Default)]
pub struct DriverReport {
    pub sessions: Vec<SessionReport>,
    /// Number of origin groups that did not complete every request
    pub failures: usize,
}

impl DriverReport {
    /// Process exit status: the failure count, saturated at 255
    pub fn exit_code(&self) -> u8 {
        u8::try_from(self.failures).unwrap_or(u8::MAX)
    }
}

/// Runs origin groups one after another
#[derive(Debug)]
pub struct Driver<'a> {
    config: &'a Config,
    body: Option<Arc<BodySource>>,
}

impl<'a> Driver<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config, body: None }
    }

    /// Attaches a request body; every initial request becomes a POST
    pub fn with_body(mut self, body: BodySource) -> Self {
        self.body = Some(Arc::new(body));
        self
    }

    /// Fetches every URI
    ///
    /// # Arguments
    ///
    /// * `uris` - Raw input URIs, grouped by origin before fetching
    /// * `bodies` - Destination for decoded response bodies
    /// * `stats` - Destination for the statistics block, when enabled
    ///
    /// # Returns
    ///
    /// A report with one entry per origin group; groups that failed TLS
    /// setup are included with their error.
    pub async fn run<S, W, O>(&self, uris: &[S], bodies: &mut W, stats: &mut O) -> DriverReport
    where
        S: AsRef<str>,
        W: Write,
        O: Write,
    {
        let mut report = DriverReport::default();

        for group in group_by_origin(uris) {
            let session = match self.session_for(&group) {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!("[{}] {}", group.origin, e);
                    report.failures += 1;
                    report.sessions.push(SessionReport::failed(group.origin, e));
                    continue;
                }
            };

            let outcome = session.run(bodies).await;
            if !outcome.is_success() || !outcome.is_complete() {
                report.failures += 1;
            }

            if self.config.stat {
                if let Err(e) = print_statistics(stats, &outcome.requests) {
                    tracing::warn!("Failed to write statistics: {}", e);
                }
            }
            report.sessions.push(outcome);
        }

        report
    }

    /// Builds the session for one group, including TLS setup
    fn session_for(&self, group: &OriginGroup) -> Result<ConnectionSession<'a>> {
        let tls = self.tls_target(&group.origin)?;
        let mut session = ConnectionSession::new(group.origin.clone(), self.config, tls);

        for uri in &group.uris {
            for _ in 0..self.config.multiply {
                session.enqueue(uri.clone(), self.body.clone());
            }
        }
        Ok(session)
    }

    fn tls_target(&self, origin: &Origin) -> Result<Option<TlsTarget>> {
        if !origin.is_secure() || self.config.tls.disabled {
            return Ok(None);
        }

        let config = build_tls_config(&self.config.tls).map_err(FetchError::Tls)?;
        Ok(Some(TlsTarget {
            config,
            server_name: sni_host(origin.host(), &self.config.headers),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::net::TcpListener;

    #[test]
    fn test_exit_code_saturates() {
        let report = DriverReport {
            sessions: Vec::new(),
            failures: 300,
        };
        assert_eq!(report.exit_code(), 255);
        assert_eq!(DriverReport::default().exit_code(), 0);
    }

    #[test]
    fn test_multiply_enqueues_each_uri_n_times() {
        let config = Config {
            multiply: 3,
            ..Config::default()
        };
        let driver = Driver::new(&config);
        let group = group_by_origin(&["http://example.com/"]).remove(0);

        let session = driver.session_for(&group).unwrap();
        assert_eq!(session.len(), 3);
    }

    #[test]
    fn test_duplicate_inputs_collapse_without_multiply() {
        let config = Config::default();
        let driver = Driver::new(&config);
        let group =
            group_by_origin(&["http://example.com/", "http://example.com/#frag"]).remove(0);

        let session = driver.session_for(&group).unwrap();
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_cleartext_needs_no_tls() {
        let config = Config::default();
        let driver = Driver::new(&config);
        let target = driver
            .tls_target(&Origin::new("http", "example.com", 80))
            .unwrap();
        assert!(target.is_none());
    }

    #[test]
    fn test_tls_disabled_switch() {
        let mut config = Config::default();
        config.tls.disabled = true;
        let driver = Driver::new(&config);
        let target = driver
            .tls_target(&Origin::new("https", "example.com", 443))
            .unwrap();
        assert!(target.is_none());
    }

    #[tokio::test]
    async fn test_tls_failure_counts_group_as_failed() {
        let mut config = Config::default();
        config.tls.cert_file = Some(PathBuf::from("/nonexistent/client.pem"));
        let driver = Driver::new(&config);

        let mut bodies = Vec::new();
        let mut stats = Vec::new();
        let report = driver
            .run(&["https://example.com/"], &mut bodies, &mut stats)
            .await;

        assert_eq!(report.failures, 1);
        assert!(matches!(
            report.sessions[0].error,
            Some(FetchError::Tls(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_groups_each_count() {
        let mut ports = Vec::new();
        for _ in 0..2 {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            ports.push(listener.local_addr().unwrap().port());
        }

        let config = Config::default();
        let driver = Driver::new(&config);
        let uris: Vec<String> = ports
            .iter()
            .map(|p| format!("http://127.0.0.1:{}/", p))
            .collect();

        let mut bodies = Vec::new();
        let mut stats = Vec::new();
        let report = driver.run(&uris, &mut bodies, &mut stats).await;

        assert_eq!(report.sessions.len(), 2);
        assert_eq!(report.failures, 2);
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_invalid_uris_are_not_failures() {
        let config = Config::default();
        let driver = Driver::new(&config);

        let mut bodies = Vec::new();
        let mut stats = Vec::new();
        let report = driver.run(&["::nonsense::"], &mut bodies, &mut stats).await;

        assert!(report.sessions.is_empty());
        assert_eq!(report.exit_code(), 0);
    }
}
