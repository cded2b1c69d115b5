//! Quinn-based QUIC transport.
//!
//! Encrypted, multiplexed streams over UDP with TLS 1.3. Certificates come
//! from PEM files in production; without them a self-signed certificate is
//! generated for local development.
//!
//! ALPN is set to `duet`, so clients speaking anything else fail the
//! handshake before a connection ever reaches the coordinator.

use std::{net::SocketAddr, sync::Arc};

use duet_proto::ALPN_PROTOCOL;
use quinn::{Endpoint, RecvStream, SendStream, ServerConfig};

use crate::error::ServerError;

/// QUIC endpoint accepting client connections.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Create and bind a new QUIC transport.
    ///
    /// Uses the PEM certificate and key when both paths are given, and a
    /// self-signed certificate otherwise.
    pub fn bind(
        address: &str,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let server_config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key)?,
            (None, None) => generate_self_signed_config()?,
            _ => {
                return Err(ServerError::Config(
                    "certificate and key must be given together".to_string(),
                ));
            },
        };

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ServerError::Transport(format!("failed to create endpoint: {e}")))?;

        tracing::info!("QUIC transport bound to {}", addr);

        Ok(Self { endpoint })
    }

    /// Wait for the next completed handshake.
    ///
    /// `None` once the endpoint is closed.
    pub async fn accept(&self) -> Result<Option<QuinnConnection>, ServerError> {
        let Some(incoming) = self.endpoint.accept().await else {
            return Ok(None);
        };

        let connection = incoming
            .await
            .map_err(|e| ServerError::Transport(format!("handshake failed: {e}")))?;

        Ok(Some(QuinnConnection { connection }))
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }

    /// Stop accepting and close every connection.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"server shutdown");
    }
}

/// A client connection.
///
/// Clones share the same underlying QUIC connection.
#[derive(Clone)]
pub struct QuinnConnection {
    connection: quinn::Connection,
}

impl QuinnConnection {
    /// Accept the next client-opened bidirectional stream.
    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream), ServerError> {
        self.connection
            .accept_bi()
            .await
            .map_err(|e| ServerError::Transport(format!("accept_bi failed: {e}")))
    }

    /// Open the server-to-client stream.
    pub async fn open_uni(&self) -> Result<SendStream, ServerError> {
        self.connection
            .open_uni()
            .await
            .map_err(|e| ServerError::Transport(format!("open_uni failed: {e}")))
    }

    /// Remote peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Close the connection with a reason the client can read.
    pub fn close(&self, reason: &str) {
        self.connection.close(0u32.into(), reason.as_bytes());
    }
}

fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, ServerError> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| ServerError::Config(format!("failed to read cert '{cert_path}': {e}")))?;

    let key_pem = std::fs::read(key_path)
        .map_err(|e| ServerError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    if certs.is_empty() {
        return Err(ServerError::Config(format!("no certificates in '{cert_path}'")));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config(format!("no private key in '{key_path}'")))?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    quic_config(tls_config)
}

fn generate_self_signed_config() -> Result<ServerConfig, ServerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_chain = vec![cert.cert.der().clone()];
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key.into())
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    tracing::warn!("using self-signed certificate, not for production use");

    quic_config(tls_config)
}

fn quic_config(mut tls_config: rustls::ServerConfig) -> Result<ServerConfig, ServerError> {
    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
        .map_err(|e| ServerError::Config(format!("QUIC config error: {e}")))?;

    Ok(ServerConfig::with_crypto(Arc::new(crypto)))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn binds_with_self_signed() {
        let transport = QuinnTransport::bind("127.0.0.1:0", None, None).unwrap();
        assert_ne!(transport.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_address() {
        let result = QuinnTransport::bind("invalid:address:format", None, None);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn rejects_cert_without_key() {
        let result = QuinnTransport::bind("127.0.0.1:0", Some("cert.pem"), None);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn binds_with_pem_files() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

        let mut cert = tempfile::NamedTempFile::new().unwrap();
        cert.write_all(generated.cert.pem().as_bytes()).unwrap();
        let mut key = tempfile::NamedTempFile::new().unwrap();
        key.write_all(generated.key_pair.serialize_pem().as_bytes()).unwrap();

        let cert_path = cert.path().to_str().unwrap();
        let key_path = key.path().to_str().unwrap();

        assert!(QuinnTransport::bind("127.0.0.1:0", Some(cert_path), Some(key_path)).is_ok());
    }

    #[tokio::test]
    async fn rejects_missing_pem_files() {
        let result = QuinnTransport::bind(
            "127.0.0.1:0",
            Some("/nonexistent/cert.pem"),
            Some("/nonexistent/key.pem"),
        );
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
