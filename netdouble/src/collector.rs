use std::net::SocketAddr;

use anyhow::Context as _;
use async_trait::async_trait;
use futures::TryFutureExt as _;
use netdouble_task::{ChildTask, ShutdownSignal, Task};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::Instrument as _;

use crate::api;

const HTTP_CONNECTION_MAX_DURATION: tokio::time::Duration = tokio::time::Duration::from_secs(10 * 60);

/// Telemetry ingestion endpoint: accepts HTTP connections and hands them to
/// the single-route router. Submissions are acknowledged whether or not they
/// parse; only the accept loop itself is long-lived.
pub struct TelemetryCollectorTask {
    listener: TcpListener,
    addr: SocketAddr,
    metrics_path: String,
}

impl TelemetryCollectorTask {
    pub fn init_and_bind(addr: SocketAddr, metrics_path: String) -> anyhow::Result<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4().context("failed to create IPv4 TCP socket")?
        } else {
            TcpSocket::new_v6().context("failed to create IPv6 TCP socket")?
        };
        socket.bind(addr).context("failed to bind TCP socket")?;

        let listener = socket
            .listen(64)
            .context("failed to listen with the bound TCP socket")?;
        let addr = listener.local_addr().context("failed to read bound TCP address")?;

        info!(%addr, path = %metrics_path, "Telemetry collector listening");

        Ok(Self {
            listener,
            addr,
            metrics_path,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[instrument("collector", skip(self), fields(port = self.addr.port()))]
    async fn serve(self) -> anyhow::Result<()> {
        let router = api::make_router(&self.metrics_path);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let router = router.clone();

                    let fut = tokio::time::timeout(HTTP_CONNECTION_MAX_DURATION, async move {
                        if let Err(e) = handle_http_peer(stream, router, peer_addr).await {
                            error!(error = format!("{e:#}"), "handle_http_peer failed");
                        }
                    })
                    .inspect_err(|error| debug!(%error, "Drop long-lived HTTP connection"))
                    .instrument(info_span!("http", client = %peer_addr));

                    ChildTask::spawn(fut).detach();
                }
                Err(error) => {
                    error!(%error, "Failed to accept connection");
                }
            }
        }
    }
}

#[async_trait]
impl Task for TelemetryCollectorTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "telemetry collector";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        tokio::select! {
            result = self.serve() => result,
            _ = shutdown_signal.wait() => Ok(()),
        }
    }
}

/// Checks if an error represents a benign client disconnect.
///
/// Walks the error chain and returns true if any cause is a `std::io::Error`
/// with kind `BrokenPipe`, `ConnectionReset`, or `UnexpectedEof`.
fn is_benign_disconnect(err: &anyhow::Error) -> bool {
    use std::io::ErrorKind::{BrokenPipe, ConnectionReset, UnexpectedEof};

    err.chain().any(|cause| {
        if let Some(ioe) = cause.downcast_ref::<std::io::Error>() {
            return matches!(ioe.kind(), BrokenPipe | ConnectionReset | UnexpectedEof);
        }
        false
    })
}

async fn handle_http_peer(stream: TcpStream, router: axum::Router, peer_addr: SocketAddr) -> anyhow::Result<()> {
    use axum::extract::connect_info::ConnectInfo;
    use hyper::service::service_fn;
    use tower::Service as _;

    let service = service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
        // We have to clone the router because hyper's `Service` uses `&self` whereas
        // tower's `Service` requires `&mut self`.
        //
        // We don't need to call `poll_ready` since `Router` is always ready.
        router
            .clone()
            .layer(axum::Extension(ConnectInfo(peer_addr)))
            .call(request)
    });

    let result = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
        .serve_connection(hyper_util::rt::TokioIo::new(stream), service)
        .await;

    match result {
        Ok(()) => Ok(()),
        Err(error) => {
            // Check for hyper-specific benign cases first.
            if let Some(hyper_err) = error.downcast_ref::<hyper::Error>()
                && (hyper_err.is_canceled() || hyper_err.is_incomplete_message())
            {
                debug!(error = format!("{:#}", anyhow::anyhow!(error)), %peer_addr, "Request was cancelled/incomplete");
                return Ok(());
            }

            // Then check for underlying io::Error kinds via anyhow chain.
            let error = anyhow::Error::from_boxed(error);
            if is_benign_disconnect(&error) {
                debug!(error = format!("{error:#}"), %peer_addr, "Client disconnected");
                Ok(())
            } else {
                Err(error.context("HTTP server"))
            }
        }
    }
}
