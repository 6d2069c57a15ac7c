//! HTTP transport and graceful shutdown.
//!
//! The chain driver is synchronous, so each request's chain runs on tokio's
//! blocking pool while the connection task stays free to do I/O. Per request
//! the server:
//!
//! 1. Reads the whole body into a [`Request`](crate::Request).
//! 2. Creates a [`Recorder`] as the response sink and a scope that is
//!    cancelled if the client goes away (and, optionally, times out).
//! 3. Runs the endpoint's chain against them.
//! 4. Sends the recording of whichever sink the context holds once the
//!    chain returns. A decorator may have swapped it.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server stops accepting connections, lets every
//! in-flight connection finish, then returns from [`Server::serve`].

use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::pipeline::Endpoint;
use crate::request;
use crate::response::{self, Recorder, ResponseWriter};
use crate::scope::Scope;

/// Serves an [`Endpoint`] over HTTP/1.1 and HTTP/2.
#[derive(Debug)]
pub struct Server {
    addr: String,
    request_timeout: Option<Duration>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called. The address is parsed there, not here.
    ///
    /// ```rust,no_run
    /// use strand::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), request_timeout: None }
    }

    /// Gives every request's scope a deadline `timeout` after it arrives.
    ///
    /// Handlers observe it through [`Context::deadline`](crate::Context::deadline)
    /// and [`Context::is_done`](crate::Context::is_done); nothing is
    /// interrupted.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Accepts connections until SIGTERM or Ctrl-C, then drains.
    pub async fn serve(self, app: impl Into<Endpoint>) -> Result<(), Error> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Accepts connections until `shutdown` resolves, then drains.
    pub async fn serve_with_shutdown<F>(self, app: impl Into<Endpoint>, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let addr: SocketAddr = self.addr.parse().map_err(|_| Error::Addr(self.addr.clone()))?;
        let listener = TcpListener::bind(addr).await?;
        let endpoint = Arc::new(app.into());
        let request_timeout = self.request_timeout;

        info!(addr = %listener.local_addr()?, "strand listening");

        let mut tasks = tokio::task::JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let endpoint = Arc::clone(&endpoint);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            dispatch(Arc::clone(&endpoint), request_timeout, req)
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("strand stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the endpoint's chain.
///
/// Never fails towards hyper: unreadable bodies become `400` and a chain that
/// panics becomes `500`.
async fn dispatch<B>(
    endpoint: Arc<Endpoint>,
    timeout: Option<Duration>,
    req: http::Request<B>,
) -> Result<http::Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Display,
{
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("failed to read request body: {e}");
            return Ok(status_only(StatusCode::BAD_REQUEST));
        }
    };
    let request = request::share(http::Request::from_parts(parts, body));

    // Dropped with this future, so a client that hangs up cancels the scope.
    let (scope, _disconnect) = Scope::background().with_cancel();
    let (scope, _deadline) = match timeout {
        Some(after) => {
            let (scope, handle) = scope.with_timeout(after);
            (scope, Some(handle))
        }
        None => (scope, None),
    };

    let recorder = response::share(Recorder::new());
    let initial = Arc::clone(&recorder);
    let run = tokio::task::spawn_blocking(move || {
        let cx = endpoint.serve_in(initial, request, scope);
        Arc::clone(cx.response())
    });

    let last = match run.await {
        Ok(last) => last,
        Err(e) => {
            error!("request chain failed: {e}");
            return Ok(status_only(StatusCode::INTERNAL_SERVER_ERROR));
        }
    };

    // A decorator may have swapped the sink; what it recorded is the answer.
    let recorded = last.lock().take_recording();
    let recorded = match recorded {
        Some(recorded) => recorded,
        None => {
            warn!("final response sink does not record, sending the transport recorder");
            recorder.lock().take_recording().unwrap_or_default()
        }
    };
    Ok(recorded.into_http())
}

fn status_only(status: StatusCode) -> http::Response<Full<Bytes>> {
    let mut recorder = Recorder::new();
    recorder.set_status(status);
    recorder.into_http()
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C only on Windows).
///
/// If a handler cannot be installed its arm never resolves and the other
/// signal still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
