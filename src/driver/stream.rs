//! Stream abstraction for plain TCP and TLS connections.
//!
//! ClickHouse negotiates TLS up front (secure port, no in-band upgrade), so
//! the TLS handshake runs directly on the freshly connected socket.

use crate::error::{ChError, ChResult};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// TLS configuration. Every field is optional: an empty config verifies the
/// server against the system roots and sends no client certificate.
#[derive(Clone, Default)]
pub struct TlsConfig {
    /// CA certificate(s) in PEM format (uses system certs if None)
    pub ca_cert_pem: Option<Vec<u8>>,
    /// Client certificate in PEM format, for mutual TLS
    pub client_cert_pem: Option<Vec<u8>>,
    /// Client private key in PEM format, for mutual TLS
    pub client_key_pem: Option<Vec<u8>>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("custom_ca", &self.ca_cert_pem.is_some())
            .field("client_auth", &self.client_cert_pem.is_some())
            .finish()
    }
}

impl TlsConfig {
    /// Create a mutual TLS config from file paths.
    pub fn from_files(
        cert_path: impl AsRef<std::path::Path>,
        key_path: impl AsRef<std::path::Path>,
        ca_path: Option<impl AsRef<std::path::Path>>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            client_cert_pem: Some(std::fs::read(cert_path)?),
            client_key_pem: Some(std::fs::read(key_path)?),
            ca_cert_pem: ca_path.map(|p| std::fs::read(p)).transpose()?,
        })
    }

    /// Verify the server against a specific CA file only.
    pub fn with_ca_file(ca_path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(Self {
            ca_cert_pem: Some(std::fs::read(ca_path)?),
            ..Self::default()
        })
    }

    fn client_config(&self) -> ChResult<tokio_rustls::rustls::ClientConfig> {
        use tokio_rustls::rustls::{ClientConfig, RootCertStore, pki_types::CertificateDer};

        let mut root_cert_store = RootCertStore::empty();
        if let Some(ca_pem) = &self.ca_cert_pem {
            for cert in rustls_pemfile::certs(&mut ca_pem.as_slice()).filter_map(|r| r.ok()) {
                let _ = root_cert_store.add(cert);
            }
        } else {
            let certs = rustls_native_certs::load_native_certs();
            for cert in certs.certs {
                let _ = root_cert_store.add(cert);
            }
        }

        let builder = ClientConfig::builder().with_root_certificates(root_cert_store);

        match (&self.client_cert_pem, &self.client_key_pem) {
            (Some(cert_pem), Some(key_pem)) => {
                let client_certs: Vec<CertificateDer<'static>> =
                    rustls_pemfile::certs(&mut cert_pem.as_slice())
                        .filter_map(|r| r.ok())
                        .collect();
                let client_key = rustls_pemfile::private_key(&mut key_pem.as_slice())
                    .map_err(|e| ChError::Connection(format!("Invalid client key: {:?}", e)))?
                    .ok_or_else(|| {
                        ChError::Connection("No private key found in PEM".to_string())
                    })?;
                builder
                    .with_client_auth_cert(client_certs, client_key)
                    .map_err(|e| ChError::Connection(format!("Invalid client cert/key: {}", e)))
            }
            (None, None) => Ok(builder.with_no_client_auth()),
            _ => Err(ChError::Connection(
                "Client certificate and key must be given together".to_string(),
            )),
        }
    }
}

/// A ClickHouse connection stream (TCP or TLS).
#[allow(clippy::large_enum_variant)]
pub enum ChStream {
    Tcp(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl ChStream {
    /// Open a TCP connection, upgrading to TLS when a config is given.
    pub async fn connect(host: &str, port: u16, tls: Option<&TlsConfig>) -> ChResult<Self> {
        let addr = format!("{}:{}", host, port);
        let tcp_stream = TcpStream::connect(&addr).await?;

        // Disable Nagle's algorithm for lower latency
        tcp_stream.set_nodelay(true)?;

        let Some(tls) = tls else {
            return Ok(ChStream::Tcp(tcp_stream));
        };

        use tokio_rustls::TlsConnector;
        use tokio_rustls::rustls::pki_types::ServerName;

        let connector = TlsConnector::from(Arc::new(tls.client_config()?));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| ChError::Connection("Invalid hostname for TLS".to_string()))?;

        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| ChError::Connection(format!("TLS handshake failed: {}", e)))?;

        Ok(ChStream::Tls(tls_stream))
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, ChStream::Tls(_))
    }
}

impl AsyncRead for ChStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ChStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            ChStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ChStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ChStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            ChStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ChStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            ChStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ChStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            ChStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
