//! Radix-tree stream demultiplexer.
//!
//! A [`Router`] consumes one upstream stream of contexts and splits it into
//! one stream per registered route plus an *unrouted* stream. One matchit
//! tree per HTTP method, consulted for every context at dispatch time, so
//! routes registered after the first context arrived still take effect.
//!
//! ```rust,ignore
//! let router = Router::new(capture_stream);
//!
//! router.get("/posts/:id").pipe(handle(show_post)).pipe(serve.send()).subscribe();
//! router.unrouted().pipe(handle(|_| async { StatusCode::NOT_FOUND })).pipe(serve.send()).subscribe();
//! ```
//!
//! Every upstream item ends up on exactly one output: the stream of the route
//! it matched, or the unrouted stream. Faults travelling upstream go to the
//! unrouted stream untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::StreamExt;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use matchit::Router as MatchitRouter;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::flow::{Flow, FlowStream};
use crate::method::Method;
use crate::pattern::Pattern;

// ── Routed ────────────────────────────────────────────────────────────────────

/// State field attached to every context a route matched: the path
/// parameters by name. A trailing wildcard is stored under `"*"`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Routed {
    params: HashMap<String, String>,
}

impl Routed {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }
}

impl Context {
    /// A path parameter captured by the router, if this context was routed.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.get::<Routed>()?.get(name)
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

struct RouteEntry {
    pattern: Arc<Pattern>,
    tx: UnboundedSender<Flow<Context>>,
}

struct Table {
    trees: RwLock<HashMap<Method, MatchitRouter<RouteEntry>>>,
    outputs: Mutex<Vec<UnboundedSender<Flow<Context>>>>,
    unrouted: UnboundedSender<Flow<Context>>,
}

/// The application router.
pub struct Router {
    table: Arc<Table>,
    upstream: Mutex<Option<FlowStream<Context>>>,
    unrouted: Mutex<Option<UnboundedReceiver<Flow<Context>>>>,
}

impl Router {
    /// Wraps `upstream`. Nothing is consumed until the first route (or the
    /// unrouted stream) is requested.
    pub fn new(upstream: FlowStream<Context>) -> Self {
        let (tx, rx) = mpsc::unbounded();
        Self {
            table: Arc::new(Table {
                trees: RwLock::new(HashMap::new()),
                outputs: Mutex::new(Vec::new()),
                unrouted: tx,
            }),
            upstream: Mutex::new(Some(upstream)),
            unrouted: Mutex::new(Some(rx)),
        }
    }

    /// Registers `pattern` for `method` and returns the stream of contexts it
    /// matches, each carrying a [`Routed`] state field.
    ///
    /// The first registration spawns the dispatch task, so it must happen
    /// inside a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is malformed or conflicts with a route already
    /// registered for the same method.
    pub fn route(&self, method: Method, pattern: &str) -> FlowStream<Context> {
        self.route_any(&[method], pattern)
    }

    /// Registers one stream for several methods at once.
    pub fn route_any(&self, methods: &[Method], pattern: &str) -> FlowStream<Context> {
        let compiled = Pattern::parse(pattern).unwrap_or_else(|e| panic!("invalid route `{pattern}`: {e}"));
        let compiled = Arc::new(compiled);
        let (tx, rx) = mpsc::unbounded();

        {
            let mut trees = self.table.trees.write().unwrap_or_else(PoisonError::into_inner);
            for method in methods {
                let tree = trees.entry(*method).or_default();
                let entry = RouteEntry { pattern: Arc::clone(&compiled), tx: tx.clone() };
                tree.insert(compiled.route(), entry)
                    .unwrap_or_else(|e| panic!("invalid route `{method} {pattern}`: {e}"));
                if let Some(prefix) = compiled.prefix_route() {
                    let entry = RouteEntry { pattern: Arc::clone(&compiled), tx: tx.clone() };
                    if let Err(e) = tree.insert(prefix, entry) {
                        debug!(%method, pattern, "bare wildcard prefix left to an existing route: {e}");
                    }
                }
            }
        }
        self.table.outputs.lock().unwrap_or_else(PoisonError::into_inner).push(tx);
        debug!(?methods, pattern, "route registered");

        self.subscribe();
        rx.boxed()
    }

    pub fn get(&self, pattern: &str) -> FlowStream<Context> { self.route(Method::Get, pattern) }
    pub fn post(&self, pattern: &str) -> FlowStream<Context> { self.route(Method::Post, pattern) }
    pub fn put(&self, pattern: &str) -> FlowStream<Context> { self.route(Method::Put, pattern) }
    pub fn delete(&self, pattern: &str) -> FlowStream<Context> { self.route(Method::Delete, pattern) }
    pub fn head(&self, pattern: &str) -> FlowStream<Context> { self.route(Method::Head, pattern) }
    pub fn options(&self, pattern: &str) -> FlowStream<Context> { self.route(Method::Options, pattern) }
    pub fn patch(&self, pattern: &str) -> FlowStream<Context> { self.route(Method::Patch, pattern) }

    /// Registers `pattern` for every routable method.
    pub fn all(&self, pattern: &str) -> FlowStream<Context> {
        self.route_any(&Method::ROUTABLE, pattern)
    }

    /// The stream of contexts no route matched.
    ///
    /// # Panics
    ///
    /// Panics when called a second time: the stream has a single consumer.
    pub fn unrouted(&self) -> FlowStream<Context> {
        let rx = self
            .unrouted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| panic!("the unrouted stream was already taken"));
        self.subscribe();
        rx.boxed()
    }

    /// Spawns the dispatch task on first call; later calls do nothing.
    fn subscribe(&self) {
        let Some(mut upstream) = self.upstream.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        let table = Arc::clone(&self.table);
        tokio::spawn(async move {
            while let Some(item) = upstream.next().await {
                table.dispatch(item);
            }
            debug!("router upstream completed");
            table.close();
        });
    }
}

impl Table {
    fn dispatch(&self, item: Flow<Context>) {
        let ctx = match item {
            Ok(ctx) => ctx,
            Err(err) => return self.unroute(Err(err)),
        };

        let method = ctx.request().method();
        let matched = {
            let trees = self.trees.read().unwrap_or_else(PoisonError::into_inner);
            trees.get(&method).and_then(|tree| {
                let m = tree.at(ctx.request().path()).ok()?;
                let params = m.value.pattern.extract(m.params.iter())?;
                Some((m.value.tx.clone(), Arc::clone(&m.value.pattern), params))
            })
        };

        let Some((tx, pattern, params)) = matched else {
            debug!(request = %ctx.id(), %method, path = ctx.request().path(), "unrouted");
            return self.unroute(Ok(ctx));
        };

        debug!(request = %ctx.id(), %method, pattern = pattern.as_str(), "routed");
        let routed = ctx.with_state(Routed { params: params.into_iter().collect() });
        if let Err(e) = tx.unbounded_send(Ok(routed)) {
            warn!(request = %ctx.id(), pattern = pattern.as_str(), "route stream dropped, sending context to unrouted");
            self.unroute(e.into_inner());
        }
    }

    fn unroute(&self, item: Flow<Context>) {
        if let Err(e) = self.unrouted.unbounded_send(item) {
            match e.into_inner() {
                Ok(ctx) => error!(request = %ctx.id(), "nobody consumes unrouted contexts"),
                Err(err) => error!(request = %err.context().id(), "nobody consumes unrouted faults: {err}"),
            }
        }
    }

    fn close(&self) {
        for tx in self.outputs.lock().unwrap_or_else(PoisonError::into_inner).iter() {
            tx.close_channel();
        }
        self.unrouted.close_channel();
    }
}
