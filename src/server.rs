//! Transport adapter: sockets in, contexts out, responses back.
//!
//! Three pieces, usable separately or wired together by [`Server`]:
//!
//! - [`Capture`] turns raw hyper requests into [`Context`]s on the shared
//!   requests stream and waits for each one to be answered.
//! - [`Serve`] owns the shared `responses` and `errors` channels. Its
//!   [`send`](Serve::send) stage ends every route pipeline; a background task
//!   [`flush`]es each response onto its connection.
//! - [`Server`] binds a listener and runs the accept loop.
//!
//! # Shutdown
//!
//! Closing the responses channel (explicitly, or on SIGTERM / Ctrl-C) drains
//! the responses already queued, stops `accept()`, completes the requests
//! stream, asks every open connection to finish gracefully, and finally
//! releases the listener. Connections still waiting for an answer at that
//! point get a `500`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::body::ResponseBody;
use crate::context::{Connection, Context, Id, Peer};
use crate::error::{BoxError, Error};
use crate::flow::{Flow, FlowStream, ResponseHandler};
use crate::handling::HandlingError;
use crate::request::Request;
use crate::response::Response;

/// Host used when the bind address names none.
pub const DEFAULT_HOST: &str = "localhost";
/// Port used when the bind address names none.
pub const DEFAULT_PORT: u16 = 80;

// ── Capture ───────────────────────────────────────────────────────────────────

/// Entry point of the pipeline: one [`Context`] per incoming request.
#[derive(Clone)]
pub struct Capture {
    inner: Arc<CaptureInner>,
}

struct CaptureInner {
    last_id: AtomicU64,
    requests: UnboundedSender<Flow<Context>>,
}

impl Capture {
    /// A capture point plus the requests stream it feeds.
    pub fn new() -> (Self, FlowStream<Context>) {
        let (tx, rx) = mpsc::unbounded();
        let capture = Self {
            inner: Arc::new(CaptureInner { last_id: AtomicU64::new(0), requests: tx }),
        };
        (capture, rx.boxed())
    }

    /// Emits a context for `req` and resolves with the response the pipeline
    /// flushed for it.
    ///
    /// Requests with a method outside [`Method`](crate::Method) are answered
    /// `405`, requests whose URL cannot be rebuilt `400`; neither becomes a
    /// context. A context dropped without a response is answered `500`.
    pub async fn dispatch<B>(&self, req: http::Request<B>, peer: Peer) -> http::Response<ResponseBody>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let request = match Request::from_transport(req, peer.secure) {
            Ok(request) => request,
            Err(rejection) => {
                debug!(peer = ?peer.remote_addr, status = rejection.status.as_u16(), "request rejected: {}", rejection.message);
                return plain(rejection.status, rejection.message);
            }
        };

        let id = Id(self.inner.last_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (connection, reply) = Connection::open(peer);
        debug!(request = %id, method = %request.method(), url = request.url().as_str(), "captured");

        let ctx = Context::new(id, connection, request);
        if self.inner.requests.unbounded_send(Ok(ctx)).is_err() {
            debug!(request = %id, "requests stream closed");
            return plain(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down".to_owned());
        }

        match reply.await {
            Ok(res) => res,
            Err(_) => {
                error!(request = %id, "context dropped without a response");
                plain(StatusCode::INTERNAL_SERVER_ERROR, "no response was produced".to_owned())
            }
        }
    }

    /// Completes the requests stream. Later dispatches are answered `503`.
    pub fn close(&self) {
        self.inner.requests.close_channel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.requests.is_closed()
    }
}

fn plain(status: StatusCode, message: String) -> http::Response<ResponseBody> {
    let mut res = http::Response::new(Full::new(Bytes::from(message)).map_err(|never| match never {}).boxed_unsync());
    *res.status_mut() = status;
    res
}

// ── Serve ─────────────────────────────────────────────────────────────────────

/// Owner of the shared `responses` and `errors` channels.
#[derive(Clone)]
pub struct Serve {
    inner: Arc<ServeInner>,
}

struct ServeInner {
    responses: Responses,
    errors_tx: UnboundedSender<HandlingError>,
    errors_rx: Mutex<Option<UnboundedReceiver<HandlingError>>>,
    errors_taken: AtomicBool,
    done: watch::Receiver<bool>,
}

/// Handle on the shared responses channel.
#[derive(Clone)]
pub struct Responses {
    tx: UnboundedSender<Response>,
}

impl Responses {
    /// Queues `res` for flushing. Gives it back if the channel is closed.
    pub fn next(&self, res: Response) -> Result<(), Response> {
        self.tx.unbounded_send(res).map_err(|e| e.into_inner())
    }

    /// Completes the channel. Responses already queued are still flushed.
    pub fn close(&self) {
        self.tx.close_channel();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Serve {
    /// Opens both channels and spawns the flusher task.
    pub fn new() -> Self {
        let (res_tx, mut res_rx) = mpsc::unbounded::<Response>();
        let (errors_tx, errors_rx) = mpsc::unbounded();
        let (done_tx, done) = watch::channel(false);

        let errors_closer = errors_tx.clone();
        tokio::spawn(async move {
            while let Some(res) = res_rx.next().await {
                flush(res);
            }
            debug!("responses channel completed");
            errors_closer.close_channel();
            let _ = done_tx.send(true);
        });

        Self {
            inner: Arc::new(ServeInner {
                responses: Responses { tx: res_tx },
                errors_tx,
                errors_rx: Mutex::new(Some(errors_rx)),
                errors_taken: AtomicBool::new(false),
                done,
            }),
        }
    }

    /// The terminal stage of a route pipeline.
    ///
    /// Responses go to the responses channel. Every fault not forwarded yet,
    /// recovered or not, goes to the errors channel exactly once and is
    /// passed on marked as diverted. A diverted fault reaching `send()` again
    /// (an error renderer that declined) is logged and dropped; its
    /// connection falls back to a `500`.
    ///
    /// Until [`errors`](Self::errors) is taken nothing is queued: recovered
    /// faults are only passed on, unrecovered ones are dropped and answered
    /// `500`.
    pub fn send(&self) -> ResponseHandler {
        let inner = Arc::clone(&self.inner);
        Box::new(move |source| {
            source
                .filter_map(move |item| future::ready(forward(&inner, item)))
                .boxed()
        })
    }

    pub fn responses(&self) -> Responses {
        self.inner.responses.clone()
    }

    /// The shared errors stream. Pipe it through
    /// [`handle_errors`](crate::handle_errors) and back into [`send`](Self::send).
    /// Once taken, it must be consumed, or unrecovered faults hang until
    /// shutdown.
    ///
    /// # Panics
    ///
    /// Panics when called a second time: the stream has a single consumer.
    pub fn errors(&self) -> BoxStream<'static, HandlingError> {
        let rx = self
            .inner
            .errors_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| panic!("the errors stream was already taken"));
        self.inner.errors_taken.store(true, Ordering::Release);
        rx.boxed()
    }

    /// Resolves once the responses channel completed and every queued
    /// response was flushed.
    pub async fn completed(&self) {
        let mut done = self.inner.done.clone();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for Serve {
    fn default() -> Self {
        Self::new()
    }
}

fn forward(inner: &ServeInner, item: Flow<Response>) -> Option<Flow<Response>> {
    match item {
        Ok(res) => match inner.responses.next(res.clone()) {
            Ok(()) => Some(Ok(res)),
            Err(res) => {
                warn!(request = %res.context().id(), "responses channel closed, dropping response");
                None
            }
        },
        Err(err) if err.is_diverted() => {
            error!(
                request = %err.context().id(),
                status = err.status().as_u16(),
                "fault returned from the error channel unrendered: {err}"
            );
            None
        }
        Err(err) if !inner.errors_taken.load(Ordering::Acquire) => {
            if !err.is_recovered() {
                error!(request = %err.context().id(), status = err.status().as_u16(), "no errors consumer, fault is lost: {err}");
            }
            Some(Err(err.diverted()))
        }
        Err(err) => {
            let err = err.diverted();
            if inner.errors_tx.unbounded_send(err.clone()).is_err() && !err.is_recovered() {
                error!(request = %err.context().id(), "errors channel closed, fault is lost: {err}");
            }
            Some(Err(err))
        }
    }
}

/// Writes a terminal response onto its connection.
///
/// Status and reason phrase, then every header value on its own line, then
/// the body: a stream is piped through, buffered bytes go out in one frame.
pub fn flush(res: Response) {
    let id = res.context().id();
    let status = res.status();
    let connection = Arc::clone(res.context().original());
    match connection.write(res.into_http()) {
        Ok(()) => debug!(request = %id, status = status.as_u16(), "flushed"),
        Err(_) => warn!(request = %id, status = status.as_u16(), "connection already answered or gone, response dropped"),
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// An HTTP/1.1 and HTTP/2 listener wired to a [`Capture`] and a [`Serve`].
pub struct Server {
    addr: String,
    handle_signals: bool,
}

impl Server {
    /// Configures the address to listen on.
    ///
    /// Missing parts fall back to [`DEFAULT_HOST`] and [`DEFAULT_PORT`]:
    /// `""`, `":3000"` and `"0.0.0.0"` are all valid.
    ///
    /// ```rust,no_run
    /// use rxhttp::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        Self { addr: addr.to_owned(), handle_signals: true }
    }

    /// Whether SIGTERM and Ctrl-C close the responses channel. On by default.
    pub fn handle_signals(self, enabled: bool) -> Self {
        Self { handle_signals: enabled, ..self }
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// This is the readiness signal: once it returns `Ok`, the socket is
    /// bound and connections are accepted.
    pub async fn listen(self) -> Result<Listening, Error> {
        let addr = resolve_addr(&self.addr);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind { addr: addr.clone(), source })?;
        let local_addr = listener.local_addr()?;

        let (capture, requests) = Capture::new();
        let serve = Serve::new();

        if self.handle_signals {
            let responses = serve.responses();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("shutdown signal received");
                responses.close();
            });
        }

        let accept = tokio::spawn(accept_loop(listener, capture.clone(), serve.clone()));
        info!(addr = %local_addr, "rxhttp listening");

        Ok(Listening {
            local_addr,
            serve,
            requests: Mutex::new(Some(requests)),
            accept,
        })
    }
}

fn resolve_addr(addr: &str) -> String {
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_owned();
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            let host = if host.is_empty() { DEFAULT_HOST } else { host };
            let port = if port.is_empty() { DEFAULT_PORT.to_string() } else { port.to_owned() };
            format!("{host}:{port}")
        }
        _ if addr.is_empty() => format!("{DEFAULT_HOST}:{DEFAULT_PORT}"),
        _ => format!("{addr}:{DEFAULT_PORT}"),
    }
}

/// A bound, running server.
pub struct Listening {
    local_addr: SocketAddr,
    serve: Serve,
    requests: Mutex<Option<FlowStream<Context>>>,
    accept: JoinHandle<()>,
}

impl Listening {
    /// The address actually bound; useful with port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The shared requests stream.
    ///
    /// # Panics
    ///
    /// Panics when called a second time: the stream has a single consumer.
    /// Wrap it in a [`Router`](crate::Router) to fan it out.
    pub fn requests(&self) -> FlowStream<Context> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| panic!("the requests stream was already taken"))
    }

    pub fn send(&self) -> ResponseHandler {
        self.serve.send()
    }

    pub fn responses(&self) -> Responses {
        self.serve.responses()
    }

    /// See [`Serve::errors`].
    pub fn errors(&self) -> BoxStream<'static, HandlingError> {
        self.serve.errors()
    }

    /// Starts a graceful shutdown.
    pub fn close(&self) {
        self.serve.responses().close();
    }

    /// Resolves once the listener is released and every connection ended.
    pub async fn stopped(self) -> Result<(), Error> {
        self.accept.await?;
        Ok(())
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(listener: TcpListener, capture: Capture, serve: Serve) {
    let mut tasks = JoinSet::new();
    let (drain_tx, drain_rx) = watch::channel(false);

    let completed = serve.completed();
    tokio::pin!(completed);

    loop {
        tokio::select! {
            // Shutdown is checked first so no connection is accepted once the
            // responses channel completed.
            biased;

            () = &mut completed => {
                info!(in_flight = tasks.len(), "responses channel completed, draining connections");
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

                let capture = capture.clone();
                let mut drain = drain_rx.clone();
                let io = TokioIo::new(stream);
                let peer = Peer { remote_addr: Some(remote_addr), secure: false };

                tasks.spawn(async move {
                    let svc = service_fn(move |req: http::Request<hyper::body::Incoming>| {
                        let capture = capture.clone();
                        async move { Ok::<_, Infallible>(capture.dispatch(req, peer).await) }
                    });

                    let builder = ConnBuilder::new(TokioExecutor::new());
                    let conn = builder.serve_connection(io, svc);
                    tokio::pin!(conn);

                    let res = tokio::select! {
                        res = conn.as_mut() => res,
                        _ = drain.changed() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                    };
                    if let Err(e) = res {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    drop(listener);
    capture.close();
    let _ = drain_tx.send(true);
    while tasks.join_next().await.is_some() {}

    info!("rxhttp stopped");
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C the process receives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot install Ctrl-C handler: {e}");
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
                error!("cannot install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}
