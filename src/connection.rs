//! Shared TLS connection and frame helpers
//!
//! Provides the low-level `connect()` used by [`TcpTransport`] and the
//! frame readers/writers both ends of the transport speak:
//!
//! ```text
//!   client -> server   [call:1][len:4][payload]
//!   server -> client   [status:4][len:4][payload]
//! ```
//!
//! All integers are little-endian.
//!
//! [`TcpTransport`]: crate::TcpTransport

use crate::error::{Error, Result, WireError};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

/// Largest frame payload either side accepts.
pub const MAX_FRAME: usize = 1 << 20;

/// A TLS-wrapped client connection.
pub type ClientStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Build a TLS connector that accepts all certificates.
///
/// Test servers present self-signed certificates, so verification is
/// skipped entirely.
fn tls_connector() -> TlsConnector {
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Open a fresh TLS connection to `host:port`.
///
/// # Errors
///
/// Returns `Io` if the TCP connect fails and `Tls` if the host name is
/// not a valid server name or the handshake fails.
pub async fn connect(host: &str, port: u16) -> Result<ClientStream> {
    let addr = format!("{host}:{port}");
    debug!("Connecting to ROP server at {}", addr);

    let tcp_stream = TcpStream::connect(&addr).await?;
    tcp_stream.set_nodelay(true)?;

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;
    let tls_stream = tls_connector()
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| Error::Tls(e.to_string()))?;

    info!("Connected to ROP server at {}", addr);
    Ok(tls_stream)
}

fn frame_len(len: usize) -> Result<u32> {
    if len > MAX_FRAME {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: MAX_FRAME,
        }
        .into());
    }
    u32::try_from(len).map_err(|_| {
        WireError::FrameTooLarge {
            size: len,
            max: MAX_FRAME,
        }
        .into()
    })
}

async fn read_payload<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let len = reader.read_u32_le().await? as usize;
    if len > MAX_FRAME {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: MAX_FRAME,
        }
        .into());
    }
    let mut payload = vec![0; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one client frame.
///
/// # Errors
///
/// Returns `Io` on write failure and `Wire` for oversized payloads.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    call: u8,
    payload: &[u8],
) -> Result<()> {
    let len = frame_len(payload.len())?;
    writer.write_u8(call).await?;
    writer.write_u32_le(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one client frame. `Ok(None)` means the peer closed the stream
/// cleanly between frames.
///
/// # Errors
///
/// Returns `Io` on read failure and `Wire` for oversized payloads.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<(u8, Vec<u8>)>> {
    let call = match reader.read_u8().await {
        Ok(call) => call,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let payload = read_payload(reader).await?;
    Ok(Some((call, payload)))
}

/// Write one server frame.
///
/// # Errors
///
/// Returns `Io` on write failure and `Wire` for oversized payloads.
pub async fn write_reply<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u32,
    payload: &[u8],
) -> Result<()> {
    let len = frame_len(payload.len())?;
    writer.write_u32_le(status).await?;
    writer.write_u32_le(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one server frame as `(status, payload)`.
///
/// # Errors
///
/// Returns `Io` on read failure and `Wire` for oversized payloads.
pub async fn read_reply<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(u32, Vec<u8>)> {
    let status = reader.read_u32_le().await?;
    let payload = read_payload(reader).await?;
    Ok((status, payload))
}

/// Certificate verifier that accepts all certificates
/// (for self-signed test server certs).
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
