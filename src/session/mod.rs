//! Connection sessions
//!
//! A `ConnectionSession` owns one HTTP/2 connection to one origin and every
//! request multiplexed over it. The async part lives here; event handling is
//! in [`SessionHandler`].

mod handler;

pub use handler::{Flow, SessionHandler};

use crate::config::Config;
use crate::engine::H2Engine;
use crate::output::RequestReport;
use crate::request::{BodySource, Enqueue};
use crate::state::ConnectionState;
use crate::transport::{self, SessionIo, TlsTarget};
use crate::url::{Origin, RequestUri};
use crate::{FetchError, Result};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one session
#[derive(Debug)]
pub struct SessionReport {
    pub origin: Origin,
    /// Every request the session knew about, in enqueue order
    pub requests: Vec<RequestReport>,
    pub total: usize,
    pub completed: usize,
    /// Connection-level failure, if the session ended on one
    pub error: Option<FetchError>,
}

impl SessionReport {
    /// Report for a session that never got to connect
    pub fn failed(origin: Origin, error: FetchError) -> Self {
        Self {
            origin,
            requests: Vec::new(),
            total: 0,
            completed: 0,
            error: Some(error),
        }
    }

    /// True if the session ended without a connection-level failure
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// True if every request reached stream close
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

/// One HTTP/2 connection and its requests
#[derive(Debug)]
pub struct ConnectionSession<'a> {
    origin: Origin,
    config: &'a Config,
    tls: Option<TlsTarget>,
    state: ConnectionState,
    handler: SessionHandler<'a>,
}

impl<'a> ConnectionSession<'a> {
    /// Creates an idle session
    ///
    /// # Arguments
    ///
    /// * `origin` - Scheme, host and port every request shares
    /// * `config` - Run configuration
    /// * `tls` - TLS parameters, or `None` for cleartext
    pub fn new(origin: Origin, config: &'a Config, tls: Option<TlsTarget>) -> Self {
        Self {
            origin,
            config,
            tls,
            state: ConnectionState::Idle,
            handler: SessionHandler::new(config),
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Adds an initial request; submitted once the connection is up
    pub fn enqueue(&mut self, uri: RequestUri, body: Option<Arc<BodySource>>) -> Enqueue {
        self.handler.enqueue(uri, body, 0)
    }

    /// Number of requests enqueued so far
    pub fn len(&self) -> usize {
        self.handler.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handler.registry().is_empty()
    }

    fn transition(&mut self, to: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(FetchError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!("[{}] {} -> {}", self.origin, self.state, to);
        self.state = to;
        Ok(())
    }

    /// Connects, runs every request to completion and tears down
    ///
    /// Decoded bodies are written to `out`. The session always ends in
    /// [`ConnectionState::Closed`], whatever the outcome.
    pub async fn run<W: Write>(mut self, out: &mut W) -> SessionReport {
        let result = self.drive(out).await;
        if let Err(e) = out.flush() {
            tracing::warn!("Failed to flush output: {}", e);
        }
        self.teardown();

        let registry = self.handler.registry();
        let (total, completed) = (registry.len(), registry.completed());
        if completed < total {
            tracing::warn!(
                "Some requests were not processed. total={}, processed={}",
                total,
                completed
            );
        }

        let error = match result {
            Ok(()) => None,
            Err(e) => {
                tracing::error!("[{}] {}", self.origin, e);
                Some(e)
            }
        };

        SessionReport {
            requests: self.handler.report(),
            origin: self.origin,
            total,
            completed,
            error,
        }
    }

    async fn drive<W: Write>(&mut self, out: &mut W) -> Result<()> {
        self.transition(ConnectionState::Connecting)?;
        tracing::info!("Connecting to {}", self.origin);

        let stream = transport::connect(&self.origin, self.tls.as_ref(), self.config.timeout).await?;
        let io = SessionIo::new(
            stream,
            self.config.output_upper_threshold,
            self.config.timeout,
        );
        let mut engine = H2Engine::new(io);

        self.transition(ConnectionState::Connected)?;
        let mut flow = self.handler.on_connected(&mut engine, Instant::now())?;

        while let Some(event) = engine.next_event().await? {
            if flow == Flow::Continue {
                flow = self.handler.on_event(&mut engine, event, out)?;
                if flow == Flow::Shutdown {
                    self.transition(ConnectionState::Closing)?;
                }
            }
        }

        if flow == Flow::Shutdown && self.state == ConnectionState::Connected {
            self.transition(ConnectionState::Closing)?;
        }
        Ok(())
    }

    /// Moves to `Closed`; safe to call more than once
    fn teardown(&mut self) {
        if self.state != ConnectionState::Closed {
            tracing::debug!("[{}] {} -> {}", self.origin, self.state, ConnectionState::Closed);
            self.state = ConnectionState::Closed;
        }
    }
}
