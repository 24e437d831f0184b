//! TLS over TCP with certificate fingerprint pinning.
//!
//! There is no CA chain: the server certificate is accepted exactly when
//! the SHA-256 digest of its DER bytes matches the expected fingerprint.
//! Handshake signatures are still verified with the ring provider.

use crate::domain::error::TransportError;
use crate::transport::fingerprint::Fingerprint;
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Certificate verifier that pins one fingerprint.
#[derive(Debug)]
pub struct FingerprintVerifier {
    expected: Fingerprint,
    observed: Mutex<Option<Fingerprint>>,
    provider: Arc<CryptoProvider>,
}

impl FingerprintVerifier {
    pub fn new(expected: Fingerprint, provider: Arc<CryptoProvider>) -> Self {
        Self {
            expected,
            observed: Mutex::new(None),
            provider,
        }
    }

    /// Fingerprint of the last certificate presented, if any.
    pub fn observed(&self) -> Option<Fingerprint> {
        *self.observed.lock()
    }

    /// Accept `der` only if it matches the pinned fingerprint.
    pub fn check(&self, der: &[u8]) -> Result<(), TransportError> {
        let actual = Fingerprint::of_der(der);
        *self.observed.lock() = Some(actual);
        if actual == self.expected {
            Ok(())
        } else {
            Err(TransportError::FingerprintMismatch {
                expected: self.expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.check(end_entity.as_ref())
            .map(|()| ServerCertVerified::assertion())
            .map_err(|e| rustls::Error::General(e.to_string()))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Dial `host:port` and complete a TLS handshake pinned to `expected`.
///
/// A mismatching certificate aborts the handshake, so no protocol byte is
/// ever written to an unverified peer.
pub async fn connect(
    host: &str,
    port: u16,
    expected: Fingerprint,
) -> Result<TlsStream<TcpStream>, TransportError> {
    let provider = Arc::new(ring::default_provider());
    let verifier = Arc::new(FingerprintVerifier::new(expected, provider.clone()));

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier.clone())
        .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

    let tcp = TcpStream::connect((host, port)).await?;
    tcp.set_nodelay(true)?;

    match TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
    {
        Ok(stream) => {
            debug!(host, port, fingerprint = %expected, "TLS session established");
            Ok(stream)
        }
        Err(e) => match verifier.observed() {
            Some(actual) if actual != expected => {
                warn!(host, port, expected = %expected, actual = %actual, "Certificate fingerprint mismatch");
                Err(TransportError::FingerprintMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                })
            }
            _ => Err(TransportError::Tls(e.to_string())),
        },
    }
}
