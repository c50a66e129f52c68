//! HTTP(S) listeners.
//!
//! A listener is bound once at startup; its accept loop runs under
//! [`run_forever`] and is re-entered whenever it returns.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use meridian_runtime::{TaskHandle, run_forever};
use rustls::ServerConfig;
use rustls::server::WebPkiClientVerifier;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpListener;
use tokio::time::Sleep;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;
use crate::error::AssemblyError;

/// Time allowed for reading request headers and for handling a request.
/// Writing the response is bounded separately by [`WRITE_TIMEOUT`].
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Longest a response write may wait on a peer that is not reading.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Largest accepted request head.
pub const MAX_HEADER_BYTES: usize = 1 << 20;

fn read_pem(path: &Path) -> Result<Vec<u8>, AssemblyError> {
    std::fs::read(path).map_err(|e| tls_error(path, e.to_string()))
}

fn tls_error(path: &Path, reason: impl Into<String>) -> AssemblyError {
    AssemblyError::Tls {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Build the server side of TLS: TLS 1.2 or newer, client certificates
/// requested but optional when a client CA is configured.
///
/// # Errors
/// [`AssemblyError::Tls`] when the certificate, key or CA bundle cannot be
/// read or parsed.
pub fn load_tls(config: &TlsConfig) -> Result<Arc<ServerConfig>, AssemblyError> {
    let cert_pem = read_pem(&config.cert_file)?;
    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(&config.cert_file, e.to_string()))?;
    if certs.is_empty() {
        return Err(tls_error(&config.cert_file, "no certificate found in PEM"));
    }

    let key_pem = read_pem(&config.key_file)?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| tls_error(&config.key_file, e.to_string()))?
        .ok_or_else(|| tls_error(&config.key_file, "no private key found in PEM"))?;

    let builder = ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS13,
        &rustls::version::TLS12,
    ]);
    let builder = match &config.client_ca_file {
        Some(ca_file) => {
            let ca_pem = read_pem(ca_file)?;
            let mut roots = rustls::RootCertStore::empty();
            for cert in rustls_pemfile::certs(&mut ca_pem.as_slice()) {
                let cert = cert.map_err(|e| tls_error(ca_file, e.to_string()))?;
                roots
                    .add(cert)
                    .map_err(|e| tls_error(ca_file, e.to_string()))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .allow_unauthenticated()
                .build()
                .map_err(|e| tls_error(ca_file, e.to_string()))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut tls = builder
        .with_single_cert(certs, key)
        .map_err(|e| tls_error(&config.key_file, e.to_string()))?;
    tls.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(tls))
}

/// A bound listener serving one handler.
pub struct HttpServer {
    name: String,
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Router,
    tls: Option<TlsAcceptor>,
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpServer {
    /// # Errors
    /// [`AssemblyError::Bind`] when `addr` cannot be bound.
    pub async fn bind(
        name: impl Into<String>,
        addr: &str,
        handler: Router,
        tls: Option<Arc<ServerConfig>>,
    ) -> Result<Self, AssemblyError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AssemblyError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| AssemblyError::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        Ok(Self {
            name: name.into(),
            listener,
            local_addr,
            handler,
            tls: tls.map(TlsAcceptor::from),
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() { "https" } else { "http" }
    }

    /// Start serving. The accept loop is restarted after `min_delay`
    /// whenever it ends.
    #[must_use]
    pub fn spawn(self, min_delay: Duration) -> TaskHandle {
        let name = self.name.clone();
        let server = Arc::new(self);
        tracing::info!(listener = %server.name, addr = %server.local_addr, scheme = server.scheme(), "Listening");
        run_forever(name, min_delay, move || {
            let server = Arc::clone(&server);
            async move { server.accept_loop().await }
        })
    }

    async fn accept_loop(&self) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let handler = self.handler.clone();
            match &self.tls {
                Some(acceptor) => {
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(stream) => serve_connection(stream, handler, peer).await,
                            Err(e) => tracing::debug!(%peer, error = %e, "TLS handshake failed"),
                        }
                    });
                }
                None => {
                    tokio::spawn(serve_connection(stream, handler, peer));
                }
            }
        }
    }
}

async fn serve_connection<I>(io: I, handler: Router, peer: SocketAddr)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = TowerToHyperService::new(handler);
    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(REQUEST_TIMEOUT)
        .max_buf_size(MAX_HEADER_BYTES);
    let io = TokioIo::new(WriteTimeout::new(io, WRITE_TIMEOUT));
    if let Err(e) = builder.serve_connection(io, service).await {
        tracing::debug!(%peer, error = %e, "Connection closed with error");
    }
}

/// Fails a write or flush that makes no progress within `timeout`.
///
/// This bounds a peer that stops reading a response body. A peer that keeps
/// reading, however slowly, is not cut off.
struct WriteTimeout<I> {
    io: I,
    timeout: Duration,
    stalled: Option<Pin<Box<Sleep>>>,
}

impl<I> WriteTimeout<I> {
    fn new(io: I, timeout: Duration) -> Self {
        Self {
            io,
            timeout,
            stalled: None,
        }
    }

    fn check_stall<T>(&mut self, cx: &mut Context<'_>, poll: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        if poll.is_ready() {
            self.stalled = None;
            return poll;
        }
        let timeout = self.timeout;
        let timer = self
            .stalled
            .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
        match timer.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "response write timed out",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<I: AsyncRead + Unpin> AsyncRead for WriteTimeout<I> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl<I: AsyncWrite + Unpin> AsyncWrite for WriteTimeout<I> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.io).poll_write(cx, buf);
        this.check_stall(cx, poll)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.io).poll_flush(cx);
        this.check_stall(cx, poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn missing_certificate_is_a_tls_error() {
        let config = TlsConfig {
            cert_file: PathBuf::from("/nonexistent/server.crt"),
            key_file: PathBuf::from("/nonexistent/server.key"),
            client_ca_file: None,
        };
        let err = load_tls(&config).unwrap_err();
        assert!(matches!(err, AssemblyError::Tls { path, .. } if path == "/nonexistent/server.crt"));
    }

    #[test]
    fn pem_without_certificates_is_rejected() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "not a certificate").unwrap();
        let config = TlsConfig {
            cert_file: cert.path().to_path_buf(),
            key_file: cert.path().to_path_buf(),
            client_ca_file: None,
        };
        assert!(matches!(load_tls(&config), Err(AssemblyError::Tls { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_writes_time_out() {
        use tokio::io::AsyncWriteExt;

        // the peer never reads, so the pipe fills up
        let (client, _peer) = tokio::io::duplex(8);
        let mut conn = WriteTimeout::new(client, Duration::from_secs(1));
        let err = conn.write_all(&[0; 64]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn writes_that_progress_complete() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (client, mut peer) = tokio::io::duplex(8);
        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            peer.read_to_end(&mut buf).await.unwrap();
            buf.len()
        });
        let mut conn = WriteTimeout::new(client, Duration::from_secs(60));
        conn.write_all(&[0; 64]).await.unwrap();
        conn.shutdown().await.unwrap();
        assert_eq!(reader.await.unwrap(), 64);
    }

    #[tokio::test]
    async fn bind_failure_names_the_address() {
        let err = HttpServer::bind("api", "not-an-address", Router::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Bind { addr, .. } if addr == "not-an-address"));
    }
}
