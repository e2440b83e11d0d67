//! Cookie-keyed sessions.
//!
//! [`start_session`] pipes [`use_cookies`] first, then loads the session named
//! by the session cookie, or creates a fresh one under a new UUIDv4 id, and
//! schedules the cookie to be (re)sent. Pipe
//! [`send_cookies`](super::cookies::send_cookies) on the response side for the
//! cookie to reach the client.
//!
//! There is no process-wide default storage. Whoever wires the pipeline owns
//! the storage and passes it in:
//!
//! ```rust,ignore
//! let sessions = SessionOptions::new(MemoryStorage::new()).lifetime(Duration::from_secs(3600));
//! router.get("/cart").pipe(start_session(sessions)).pipe(handle(show_cart));
//! ```
//!
//! Two concurrent requests without a session cookie each get their own new
//! session; nothing deduplicates them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::cookies::{CookieOptions, Cookies, OffsetDateTime, use_cookies};
use crate::context::Context;
use crate::error::BoxError;
use crate::flow::{Middleware, compose};
use crate::handling::pass_through;

/// Default name of the session cookie.
pub const DEFAULT_COOKIE_NAME: &str = "sid";

// ── Session ───────────────────────────────────────────────────────────────────

/// A session record: string keys to JSON values.
///
/// Cheap to clone; clones share the same data, so writes made while handling
/// one request are visible to the storage and to later requests.
#[derive(Clone)]
pub struct Session {
    id: Arc<str>,
    data: Arc<Mutex<HashMap<String, Value>>>,
}

impl Session {
    pub fn new(id: &str) -> Self {
        Self { id: Arc::from(id), data: Arc::default() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).insert(key.to_owned(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).remove(key)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys = self.data.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("Session").field("id", &self.id).field("keys", &keys).finish()
    }
}

// ── Storage ───────────────────────────────────────────────────────────────────

/// Where sessions live between requests.
pub trait SessionStorage: Send + Sync + 'static {
    /// The session stored under `id`, if any.
    fn load(&self, id: &str) -> BoxFuture<'static, Result<Option<Session>, BoxError>>;

    /// Stores and returns an empty session under `id`.
    fn create(&self, id: &str) -> BoxFuture<'static, Result<Session, BoxError>>;
}

/// In-process storage. Sessions live as long as the storage value.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self, id: &str) -> BoxFuture<'static, Result<Option<Session>, BoxError>> {
        let found = self.sessions.lock().unwrap_or_else(PoisonError::into_inner).get(id).cloned();
        Box::pin(async move { Ok(found) })
    }

    fn create(&self, id: &str) -> BoxFuture<'static, Result<Session, BoxError>> {
        let session = Session::new(id);
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_owned(), session.clone());
        Box::pin(async move { Ok(session) })
    }
}

// ── Middleware ────────────────────────────────────────────────────────────────

/// Configuration of [`start_session`].
#[derive(Clone)]
pub struct SessionOptions {
    storage: Arc<dyn SessionStorage>,
    cookie_name: String,
    lifetime: Option<Duration>,
    path: Option<String>,
    domain: Option<String>,
}

impl SessionOptions {
    pub fn new(storage: impl SessionStorage) -> Self {
        Self {
            storage: Arc::new(storage),
            cookie_name: DEFAULT_COOKIE_NAME.to_owned(),
            lifetime: None,
            path: None,
            domain: None,
        }
    }

    pub fn cookie_name(self, name: impl Into<String>) -> Self {
        Self { cookie_name: name.into(), ..self }
    }

    /// How long the session cookie stays valid, counted from each request.
    /// Without it the cookie lasts for the browser session.
    pub fn lifetime(self, lifetime: Duration) -> Self {
        Self { lifetime: Some(lifetime), ..self }
    }

    pub fn path(self, path: impl Into<String>) -> Self {
        Self { path: Some(path.into()), ..self }
    }

    pub fn domain(self, domain: impl Into<String>) -> Self {
        Self { domain: Some(domain.into()), ..self }
    }

    fn cookie(&self) -> CookieOptions {
        CookieOptions {
            expires: self.lifetime.map(|l| OffsetDateTime::now_utc() + l),
            path: self.path.clone(),
            domain: self.domain.clone(),
            ..CookieOptions::default()
        }
    }
}

/// Attaches [`Cookies`] and a [`Session`] state field.
///
/// Storage failures become `500` faults.
pub fn start_session(options: SessionOptions) -> Middleware {
    let options = Arc::new(options);
    let attach = pass_through(move |ctx: Context| {
        let options = Arc::clone(&options);
        async move {
            let cookies = ctx.require::<Cookies>()?;
            let session = load_or_create(options.storage.as_ref(), cookies.get(&options.cookie_name)).await?;
            cookies.set_cookie(&options.cookie_name, session.id(), options.cookie());
            Ok::<_, BoxError>(ctx.with_state(session))
        }
    });
    compose(use_cookies(), attach)
}

async fn load_or_create(storage: &dyn SessionStorage, received: Option<&str>) -> Result<Session, BoxError> {
    if let Some(id) = received {
        if let Some(session) = storage.load(id).await? {
            return Ok(session);
        }
        debug!(session = id, "unknown session id, starting a new session");
    }
    let id = Uuid::new_v4().to_string();
    debug!(session = %id, "session created");
    storage.create(&id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        assert!(storage.load("x").await.unwrap().is_none());
        let created = storage.create("x").await.unwrap();
        created.set("data", "test1");
        let loaded = storage.load("x").await.unwrap().unwrap();
        assert_eq!(loaded.get("data"), Some(Value::from("test1")));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn unknown_ids_get_a_fresh_session() {
        let storage = MemoryStorage::new();
        let session = load_or_create(&storage, Some("forged")).await.unwrap();
        assert_ne!(session.id(), "forged");
        assert!(Uuid::parse_str(session.id()).is_ok());

        let again = load_or_create(&storage, Some(session.id())).await.unwrap();
        assert_eq!(again.id(), session.id());
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn options_build_cookie_attributes() {
        let opts = SessionOptions::new(MemoryStorage::new())
            .cookie_name("token")
            .lifetime(Duration::from_secs(60))
            .path("/");
        let cookie = opts.cookie();
        assert_eq!(opts.cookie_name, "token");
        assert_eq!(cookie.path.as_deref(), Some("/"));
        assert!(cookie.expires.is_some_and(|at| at > OffsetDateTime::now_utc()));
    }
}
