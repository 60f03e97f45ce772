//! Protocol-demultiplexing listener
//!
//! One accepting socket serves plaintext and TLS on the same port. Each
//! accepted connection gets a peek deadline; the first byte decides the
//! pipeline (a TLS handshake always starts with 0x16) and is left in the
//! stream for whichever pipeline consumes it. Peek failures close that
//! connection and never take the accept loop down.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Budget for reading the first byte of a connection
const PEEK_TIMEOUT: Duration = Duration::from_secs(5);
/// First byte of a TLS handshake record (ContentType: Handshake)
const TLS_HANDSHAKE_BYTE: u8 = 0x16;

/// Whether a first byte selects the secured pipeline.
pub const fn is_tls_client_hello(first_byte: u8) -> bool {
    first_byte == TLS_HANDSHAKE_BYTE
}

/// Bind the listener and serve until the process ends. When no TLS
/// configuration is available only the plaintext pipeline runs.
pub async fn run(
    addr: &str,
    router: Router,
    tls_config: Option<Arc<rustls::ServerConfig>>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, tls = tls_config.is_some(), "listening");
    let acceptor = tls_config.map(TlsAcceptor::from);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Accept failures are transient (fd pressure, reset during
                // handshake); the loop must keep serving.
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let router = router.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            match demux(stream).await {
                Ok((stream, true)) => match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => serve_connection(tls_stream, router).await,
                        Err(e) => debug!(%peer, error = %e, "TLS handshake failed"),
                    },
                    None => debug!(%peer, "TLS client but no credential loaded"),
                },
                Ok((stream, false)) => serve_connection(stream, router).await,
                Err(e) => debug!(%peer, error = %e, "connection dropped before first byte"),
            }
        });
    }
}

/// Peek the first byte without consuming it and classify the connection.
async fn demux(stream: TcpStream) -> std::io::Result<(TcpStream, bool)> {
    let mut first = [0u8; 1];
    let n = tokio::time::timeout(PEEK_TIMEOUT, stream.peek(&mut first))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "peek timed out"))??;
    if n == 0 {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    Ok((stream, is_tls_client_hello(first[0])))
}

/// Hand one connection to hyper. The connection is owned here from now
/// on; the accept loop never touches it again.
async fn serve_connection<S>(stream: S, router: Router)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let socket = TokioIo::new(stream);
    let service = TowerToHyperService::new(router);
    if let Err(e) = ConnectionBuilder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(socket, service)
        .await
    {
        debug!(error = %e, "connection ended with error");
    }
}
