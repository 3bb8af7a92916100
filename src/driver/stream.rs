//! Stream abstraction for TCP and TLS connections.
//!
//! TLS here is pass-through only: either the platform trust store or, for
//! `verify=false`, a verifier that accepts any certificate.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

/// A connection stream (plain TCP or TLS).
#[allow(clippy::large_enum_variant)]
pub enum ClickStream {
    Tcp(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl ClickStream {
    /// Open a socket to `host:port`, wrapping it in TLS when `secure`.
    pub async fn connect(host: &str, port: u16, secure: bool, verify: bool) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::Connection(format!("connect to {addr}: {e}")))?;

        // Disable Nagle's algorithm for lower latency
        tcp.set_nodelay(true)?;

        if !secure {
            return Ok(ClickStream::Tcp(tcp));
        }

        let config = if verify {
            let certs = rustls_native_certs::load_native_certs();
            let mut root_cert_store = rustls::RootCertStore::empty();
            for cert in certs.certs {
                let _ = root_cert_store.add(cert);
            }
            ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth()
        } else {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(
                    rustls::crypto::ring::default_provider(),
                )))
                .with_no_client_auth()
        };

        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::Connection(format!("invalid hostname for TLS: {host}")))?;
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Connection(format!("TLS handshake failed: {e}")))?;
        Ok(ClickStream::Tls(tls))
    }
}

/// Certificate verifier for `verify=false`: trusts anything but still
/// checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyCert(rustls::crypto::CryptoProvider);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

impl AsyncRead for ClickStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClickStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            ClickStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClickStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ClickStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            ClickStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClickStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            ClickStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClickStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            ClickStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
