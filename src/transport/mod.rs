//! Transport layer: TCP and TLS connect plus the session I/O adapter
//!
//! This module contains:
//! - `connect`: name resolution, TCP connect and the optional TLS handshake
//! - `SessionIo`: backpressure-aware writes and the idle timeout
//! - rustls client configuration and SNI selection

mod io;
mod tls;

pub use self::io::{OutputBuffer, SendOutcome, SessionIo};
pub use tls::{build_tls_config, sni_host, ALPN_H2};

use crate::url::Origin;
use crate::{FetchError, TlsError};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::io as stdio;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// TLS parameters for one connection
#[derive(Debug, Clone)]
pub struct TlsTarget {
    pub config: Arc<ClientConfig>,
    /// Name sent in SNI and checked against the certificate
    pub server_name: String,
}

/// A connected byte stream, with or without TLS
#[derive(Debug)]
pub enum TransportStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl TransportStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<stdio::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<stdio::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<stdio::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<stdio::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Opens a connection to `origin`
///
/// # Arguments
///
/// * `origin` - Host and port to connect to
/// * `tls` - TLS parameters, or `None` for cleartext HTTP/2
/// * `timeout` - Bound on resolution, connect and handshake together
///
/// # Returns
///
/// * `Ok(TransportStream)` - Connected (and, with TLS, handshaken) stream
/// * `Err(FetchError)` - Connect failure, timeout or invalid server name
pub async fn connect(
    origin: &Origin,
    tls: Option<&TlsTarget>,
    timeout: Option<Duration>,
) -> Result<TransportStream, FetchError> {
    let attempt = open_stream(origin, tls);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| FetchError::ConnectTimeout {
                origin: origin.to_string(),
            })?,
        None => attempt.await,
    }
}

async fn open_stream(origin: &Origin, tls: Option<&TlsTarget>) -> Result<TransportStream, FetchError> {
    let connect_error = |source| FetchError::Connect {
        origin: origin.to_string(),
        source,
    };

    let tcp = TcpStream::connect((origin.host(), origin.port()))
        .await
        .map_err(connect_error)?;
    tcp.set_nodelay(true).map_err(connect_error)?;
    tracing::debug!("TCP connection to {} established", origin);

    let Some(tls) = tls else {
        return Ok(TransportStream::Plain(tcp));
    };

    let server_name = ServerName::try_from(tls.server_name.clone())
        .map_err(|_| TlsError::InvalidServerName(tls.server_name.clone()))?;
    let stream = TlsConnector::from(tls.config.clone())
        .connect(server_name, tcp)
        .await
        .map_err(connect_error)?;

    let (_, session) = stream.get_ref();
    match session.alpn_protocol() {
        Some(ALPN_H2) => tracing::debug!("TLS handshake with {} complete, negotiated h2", origin),
        Some(other) => tracing::warn!(
            "Server {} negotiated {} instead of h2",
            origin,
            String::from_utf8_lossy(other)
        ),
        None => tracing::warn!("Server {} did not negotiate h2 via ALPN", origin),
    }

    Ok(TransportStream::Tls(Box::new(stream)))
}
