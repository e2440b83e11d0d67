//! The per-request envelope that flows through a pipeline.
//!
//! # Lifecycle
//!
//! ```text
//! accept ─► Context{id, connection, request, state: {}}
//!              │  with_state(Routed)      (router)
//!              │  with_state(Cookies)     (middleware)
//!              ▼
//!           Response{context, status, headers, body}
//!              │  flush
//!              ▼
//!           Connection::write  ─► socket    (exactly once)
//! ```
//!
//! A [`Context`] is cheap to clone and never mutated: every `with_*` call
//! returns a new context sharing everything it did not change.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::body::{Body, ResponseBody};
use crate::handling::HandlingError;
use crate::request::Request;
use crate::response::Response;
use crate::state::State;

/// Identity of a captured connection, monotonically increasing from 1.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Id(pub u64);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// Transport handle of one request: where its response must be written.
///
/// Owned by the transport; contexts only hold a shared reference. The reply
/// slot is written at most once. When every reference is dropped without a
/// write, the transport notices and answers on its own.
pub struct Connection {
    remote_addr: Option<SocketAddr>,
    secure: bool,
    reply: Mutex<Option<oneshot::Sender<http::Response<ResponseBody>>>>,
}

/// What the transport knows about the peer when a request arrives.
#[derive(Clone, Copy, Debug, Default)]
pub struct Peer {
    pub remote_addr: Option<SocketAddr>,
    /// Whether the socket is encrypted; selects the `https` scheme.
    pub secure: bool,
}

impl Connection {
    /// Opens a handle plus the receiving end the transport waits on.
    pub(crate) fn open(peer: Peer) -> (Arc<Self>, oneshot::Receiver<http::Response<ResponseBody>>) {
        let (tx, rx) = oneshot::channel();
        let conn = Self {
            remote_addr: peer.remote_addr,
            secure: peer.secure,
            reply: Mutex::new(Some(tx)),
        };
        (Arc::new(conn), rx)
    }

    /// A handle not attached to any socket. Writes to it are discarded.
    pub fn detached() -> Arc<Self> {
        Arc::new(Self { remote_addr: None, secure: false, reply: Mutex::new(None) })
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Whether a response was already written (or the handle is detached).
    pub fn is_flushed(&self) -> bool {
        self.reply.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Writes the response. Fails if something was written before or the
    /// peer is gone.
    pub(crate) fn write(&self, res: http::Response<ResponseBody>) -> Result<(), http::Response<ResponseBody>> {
        let tx = self.reply.lock().unwrap_or_else(PoisonError::into_inner).take();
        match tx {
            Some(tx) => tx.send(res),
            None => Err(res),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("remote_addr", &self.remote_addr)
            .field("secure", &self.secure)
            .field("flushed", &self.is_flushed())
            .finish()
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Immutable envelope: identity, transport handle, request, and state.
#[derive(Clone)]
pub struct Context {
    id: Id,
    original: Arc<Connection>,
    request: Request,
    state: State,
}

impl Context {
    pub fn new(id: Id, original: Arc<Connection>, request: Request) -> Self {
        Self { id, original, request, state: State::new() }
    }

    pub fn id(&self) -> Id { self.id }
    pub fn original(&self) -> &Arc<Connection> { &self.original }
    pub fn request(&self) -> &Request { &self.request }
    pub fn state(&self) -> &State { &self.state }

    /// A state field, if an upstream stage attached it.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.state.get()
    }

    /// A state field this stage cannot work without.
    ///
    /// Its absence means a prerequisite middleware was not piped in front of
    /// the caller, which is reported as a `500`.
    pub fn require<T: 'static>(&self) -> Result<&T, HandlingError> {
        self.state.get().ok_or_else(|| {
            HandlingError::new(
                format!("missing state field `{}`", std::any::type_name::<T>()),
                self,
            )
        })
    }

    /// New context with `field` added to (or replacing one in) the state.
    pub fn with_state<T: Send + Sync + 'static>(&self, field: T) -> Self {
        Self { state: self.state.with(field), ..self.clone() }
    }

    /// New context whose state is the shallow merge of the current one and `state`.
    pub fn merge_state(&self, state: &State) -> Self {
        Self { state: self.state.merge(state), ..self.clone() }
    }

    /// New context carrying a different request snapshot.
    pub fn with_request(&self, request: Request) -> Self {
        Self { request, ..self.clone() }
    }

    /// A default `200` response for this context with the given body.
    pub fn reply(&self, body: impl Into<Body>) -> Response {
        Response::new(self).with_body(body)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("method", &self.request.method())
            .field("url", &self.request.url().as_str())
            .field("state", &self.state)
            .finish()
    }
}
