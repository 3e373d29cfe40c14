//! Internal module for establishing connections to IMAP servers.
//!
//! Supports implicit TLS, `STARTTLS` upgrades and plain TCP.

use crate::backend::{Encryption, MailBackend};
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use rustls::ClientConfig;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};
use webpki_roots::TLS_SERVER_ROOTS;

/// Byte stream an IMAP client can run over.
pub(crate) trait ImapStream: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T> ImapStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

/// A TLS or plain stream, used for IMAP communication.
pub(crate) type BoxedStream = Box<dyn ImapStream>;

static TLS_CONFIG: Lazy<Arc<ClientConfig>> = Lazy::new(|| {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    Arc::new(
        ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth(),
    )
});

/// Opens a connection to `backend` using its configured transport.
#[instrument(
    name = "connection::establish",
    skip_all,
    fields(
        backend = %backend.name(),
        target_addr = %backend.address(),
        encryption = ?backend.encryption()
    )
)]
pub(crate) async fn establish(backend: &MailBackend) -> Result<BoxedStream> {
    let target_addr = backend.address();
    match backend.encryption() {
        Encryption::Ssl => {
            let stream = establish_tls_connection(backend.host(), &target_addr).await?;
            Ok(Box::new(stream))
        }
        Encryption::StartTls => {
            let stream = establish_starttls_connection(backend.host(), &target_addr).await?;
            Ok(Box::new(stream))
        }
        Encryption::None => {
            let stream = connect_tcp(&target_addr).await?;
            Ok(Box::new(stream))
        }
    }
}

async fn establish_tls_connection(
    host: &str,
    target_addr: &str,
) -> Result<TlsStream<TcpStream>> {
    let server_name = parse_server_name(host)?;
    let tcp_stream = connect_tcp(target_addr).await?;
    tls_handshake(server_name, tcp_stream, target_addr).await
}

/// Reads the plaintext greeting, issues `STARTTLS` and wraps the socket.
///
/// No second greeting follows the upgrade, so the returned stream is ready
/// for `LOGIN`.
#[instrument(name = "connection::starttls", skip_all, fields(target_addr = %target_addr))]
async fn establish_starttls_connection(
    host: &str,
    target_addr: &str,
) -> Result<TlsStream<TcpStream>> {
    let server_name = parse_server_name(host)?;
    let tcp_stream = connect_tcp(target_addr).await?;

    let starttls_failed = |source| Error::StartTls {
        target: target_addr.to_string(),
        source,
    };

    let mut client = async_imap::Client::new(tcp_stream);
    match client.read_response().await {
        Some(Ok(_greeting)) => {}
        Some(Err(e)) => return Err(starttls_failed(async_imap::error::Error::Io(e))),
        None => return Err(starttls_failed(async_imap::error::Error::ConnectionLost)),
    }

    debug!("Requesting STARTTLS");

    client
        .run_command_and_check_ok("STARTTLS", None)
        .await
        .map_err(starttls_failed)?;

    tls_handshake(server_name, client.into_inner(), target_addr).await
}

async fn tls_handshake(
    server_name: rustls::ServerName,
    tcp_stream: TcpStream,
    target_addr: &str,
) -> Result<TlsStream<TcpStream>> {
    let connector = TlsConnector::from(TLS_CONFIG.clone());

    debug!("Performing TLS handshake");

    connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|source| Error::TlsConnect {
            target: target_addr.to_string(),
            source,
        })
}

/// Parses server name for TLS SNI.
fn parse_server_name(host: &str) -> Result<rustls::ServerName> {
    rustls::ServerName::try_from(host).map_err(|source| Error::InvalidDnsName {
        host: host.to_string(),
        source,
    })
}

#[instrument(name = "connection::tcp_connect", skip_all, fields(target_addr = %target_addr))]
async fn connect_tcp(target_addr: &str) -> Result<TcpStream> {
    debug!("Establishing TCP connection");

    TcpStream::connect(target_addr)
        .await
        .map_err(|source| Error::TcpConnect {
            target: target_addr.to_string(),
            source,
        })
}
