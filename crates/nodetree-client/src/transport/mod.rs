//! Byte-stream transports.
//!
//! The engine runs over anything that is `AsyncRead + AsyncWrite`; this
//! module turns a [`ServerUrl`] into such a stream.

pub mod auth;
pub mod fingerprint;
#[cfg(feature = "tls")]
pub mod tls;
pub mod url;

pub use auth::{AuthKey, AUTH_KEY_LEN};
pub use fingerprint::Fingerprint;
pub use url::{Endpoint, ServerUrl, DEFAULT_PORT};

use crate::domain::error::TransportError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::info;

/// A bidirectional byte stream the connection can own.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased transport stream.
pub type BoxStream = Box<dyn AsyncStream>;

/// Open the transport named by `url`.
pub async fn dial(url: &ServerUrl) -> Result<BoxStream, TransportError> {
    info!(endpoint = %url.endpoint, "Dialing server");
    match &url.endpoint {
        Endpoint::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        Endpoint::Tls { host, port } => dial_tls(host, *port, url.fingerprint).await,
        Endpoint::Unix { path } => dial_unix(path).await,
    }
}

#[cfg(feature = "tls")]
async fn dial_tls(
    host: &str,
    port: u16,
    fingerprint: Option<Fingerprint>,
) -> Result<BoxStream, TransportError> {
    let expected = fingerprint.ok_or(TransportError::MissingFingerprint)?;
    let stream = tls::connect(host, port, expected).await?;
    Ok(Box::new(stream))
}

#[cfg(not(feature = "tls"))]
async fn dial_tls(
    _host: &str,
    _port: u16,
    _fingerprint: Option<Fingerprint>,
) -> Result<BoxStream, TransportError> {
    Err(TransportError::TlsDisabled)
}

#[cfg(unix)]
async fn dial_unix(path: &std::path::Path) -> Result<BoxStream, TransportError> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn dial_unix(_path: &std::path::Path) -> Result<BoxStream, TransportError> {
    Err(TransportError::UnixUnsupported)
}
