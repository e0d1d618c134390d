//! TCP front door.
//!
//! Accepts connections, serves HTTP/1.1 and HTTP/2 over each through hyper,
//! and hands every request to [`App::handle`]. On shutdown the listener
//! closes first; requests already on the wire finish, and each of them
//! still writes its access line before [`Server::serve`] returns.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::error::Result;

enum Listen {
    Addr(SocketAddr),
    Bound(TcpListener),
}

/// Serves an [`App`] on one listening socket.
pub struct Server {
    listen: Listen,
}

impl Server {
    /// Binds `addr` lazily, when serving starts.
    pub fn bind(addr: SocketAddr) -> Self {
        Self { listen: Listen::Addr(addr) }
    }

    /// Serves on an already-bound listener (port 0 in tests, socket
    /// activation).
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listen: Listen::Bound(listener) }
    }

    /// Runs until SIGTERM or Ctrl-C, then drains.
    pub async fn serve(self, app: App) -> Result<()> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Runs until `shutdown` resolves, then waits for open connections.
    pub async fn serve_with_shutdown(
        self,
        app: App,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let listener = match self.listen {
            Listen::Addr(addr) => TcpListener::bind(addr).await?,
            Listen::Bound(listener) => listener,
        };
        info!(
            addr = %listener.local_addr()?,
            profile = %app.config().profile,
            "tern listening"
        );

        let app = Arc::new(app);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Checked first so a pending signal wins over a queued accept.
                biased;

                () = &mut shutdown => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(Arc::clone(&app), stream, peer));
                    }
                    Err(e) => warn!("accept failed: {e}"),
                },

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        info!(open = connections.len(), "shutting down, draining connections");
        while connections.join_next().await.is_some() {}
        info!("tern stopped");
        Ok(())
    }
}

async fn serve_connection(app: Arc<App>, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, "set_nodelay: {e}");
    }

    let service = service_fn(move |req: hyper::Request<Incoming>| {
        let app = Arc::clone(&app);
        async move { Ok::<_, Infallible>(app.handle(req, peer).await) }
    });

    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(%peer, "connection closed with error: {e}");
    }
}

/// Resolves on the first SIGTERM or Ctrl-C. A signal whose handler cannot
/// be installed is logged and never fires.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("received Ctrl-C"),
        () = terminate => info!("received SIGTERM"),
    }
}
