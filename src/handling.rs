//! Handlers, faults, and the operators that connect them to a stream.
//!
//! # Fault lifecycle
//!
//! ```text
//!   Context ──handle_unsafe──► Ok(Response)                        (Handled)
//!      │
//!      └─ Err / panic ───────► Err(HandlingError)                  (Faulted)
//!                                 │ catch_errors
//!                                 ├─► Ok(substitute) + Err(recovered)   (Recovered)
//!                                 │ send()
//!                                 └─► errors channel, marked diverted
//! ```
//!
//! A fault is re-emitted after its substitute response so that `send()` can
//! still hand it to the shared error channel. The `recovered` flag tells the
//! error channel a response already exists; the `diverted` flag stops a fault
//! from being forwarded twice.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use http::StatusCode;
use tracing::{debug, error};

use crate::body::Body;
use crate::context::Context;
use crate::error::BoxError;
use crate::flow::{ErrorHandlerStage, Flow, Middleware, RequestHandler, ResponseHandler, compose, merge_expand, merge_map};
use crate::response::{IntoResponse, Response, ResponseParts};

// ── HandlingError ─────────────────────────────────────────────────────────────

/// A request-level fault, bound to the context that raised it.
///
/// The only error type stages raise on purpose. Handlers may return any
/// error convertible into [`BoxError`]; those that are not a `HandlingError`
/// already are wrapped into one with status `500`.
#[derive(Clone)]
pub struct HandlingError {
    message: Arc<str>,
    ctx: Context,
    status: StatusCode,
    recovered: bool,
    diverted: bool,
}

impl HandlingError {
    /// A `500 Internal Server Error` fault for `ctx`.
    pub fn new(message: impl Into<String>, ctx: &Context) -> Self {
        Self {
            message: Arc::from(message.into()),
            ctx: ctx.clone(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            recovered: false,
            diverted: false,
        }
    }

    pub fn with_status(self, status: StatusCode) -> Self {
        Self { status, ..self }
    }

    /// Lifts any boxed error into a fault for `ctx`.
    ///
    /// A boxed `HandlingError` comes back unchanged, still bound to the
    /// context it was created for.
    pub fn wrap(err: BoxError, ctx: &Context) -> Self {
        match err.downcast::<HandlingError>() {
            Ok(err) => *err,
            Err(other) => Self::new(other.to_string(), ctx),
        }
    }

    pub fn message(&self) -> &str { &self.message }
    pub fn context(&self) -> &Context { &self.ctx }
    pub fn status(&self) -> StatusCode { self.status }

    /// Whether a substitute response was already produced for this fault.
    pub fn is_recovered(&self) -> bool { self.recovered }

    /// Whether this fault was already forwarded to the shared error channel.
    pub fn is_diverted(&self) -> bool { self.diverted }

    pub(crate) fn recovered(self) -> Self {
        Self { recovered: true, ..self }
    }

    pub(crate) fn diverted(self) -> Self {
        Self { diverted: true, ..self }
    }

    /// Default rendering: the carried status with the message as plain-text body.
    pub fn render(&self) -> Response {
        ResponseParts::new(self.status)
            .body(Body::from(self.message.to_string()))
            .into_response(&self.ctx)
    }
}

impl fmt::Display for HandlingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for HandlingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlingError")
            .field("request", &self.ctx.id())
            .field("status", &self.status.as_u16())
            .field("message", &self.message)
            .field("recovered", &self.recovered)
            .field("diverted", &self.diverted)
            .finish()
    }
}

impl std::error::Error for HandlingError {}

// ── Handler ───────────────────────────────────────────────────────────────────

/// What an async handler may resolve to.
///
/// Either anything implementing [`IntoResponse`], or a `Result` of one with
/// an error convertible into [`BoxError`].
pub trait HandlerOutput: Send + 'static {
    fn into_result(self, ctx: &Context) -> Result<Response, BoxError>;
}

impl<R, E> HandlerOutput for Result<R, E>
where
    R: IntoResponse + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    fn into_result(self, ctx: &Context) -> Result<Response, BoxError> {
        self.map(|r| r.into_response(ctx)).map_err(Into::into)
    }
}

macro_rules! infallible_output {
    ($($ty:ty),* $(,)?) => {$(
        impl HandlerOutput for $ty {
            fn into_result(self, ctx: &Context) -> Result<Response, BoxError> {
                Ok(self.into_response(ctx))
            }
        }
    )*};
}

infallible_output!(Response, StatusCode, u16, ResponseParts, &'static str, String, bytes::Bytes, Vec<u8>, Body);

/// Implemented for every valid request handler.
///
/// Satisfied automatically by any function or closure of the shape
///
/// ```text
/// async fn name(ctx: Context) -> impl HandlerOutput
/// ```
///
/// Sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn call(&self, ctx: Context) -> BoxFuture<'static, Result<Response, BoxError>>;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
}

impl<F, Fut> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, Result<Response, BoxError>> {
        let fut = self(ctx.clone());
        Box::pin(async move { fut.await.into_result(&ctx) })
    }
}

// ── ErrorHandler ──────────────────────────────────────────────────────────────

/// Turns a fault into a substitute response, or declines with `None`.
///
/// Implemented for synchronous closures `Fn(&HandlingError) -> Option<R>`.
/// Wrap async renderers in [`AsyncErrorHandler`].
pub trait ErrorHandler: Send + Sync + 'static {
    fn render(&self, err: &HandlingError) -> BoxFuture<'static, Option<Response>>;
}

impl<F, R> ErrorHandler for F
where
    F: Fn(&HandlingError) -> Option<R> + Send + Sync + 'static,
    R: IntoResponse,
{
    fn render(&self, err: &HandlingError) -> BoxFuture<'static, Option<Response>> {
        let res = self(err).map(|r| r.into_response(err.context()));
        Box::pin(future::ready(res))
    }
}

/// An error renderer that suspends, e.g. to look something up first.
///
/// ```rust,ignore
/// handle_with(handler, AsyncErrorHandler(|err: HandlingError| async move {
///     Some(err.render())
/// }))
/// ```
pub struct AsyncErrorHandler<F>(pub F);

impl<F, Fut, R> ErrorHandler for AsyncErrorHandler<F>
where
    F: Fn(HandlingError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<R>> + Send + 'static,
    R: IntoResponse,
{
    fn render(&self, err: &HandlingError) -> BoxFuture<'static, Option<Response>> {
        let ctx = err.context().clone();
        let fut = (self.0)(err.clone());
        Box::pin(async move { fut.await.map(|r| r.into_response(&ctx)) })
    }
}

/// Renders every fault with [`HandlingError::render`].
pub fn default_error_handler() -> impl ErrorHandler {
    |err: &HandlingError| Some(err.render())
}

// ── Operators ─────────────────────────────────────────────────────────────────

/// Wraps an async context transform as a middleware.
///
/// Errors and panics become [`HandlingError`]s exactly as in
/// [`handle_unsafe`], but the result stays a [`Context`].
pub fn pass_through<F, Fut, E>(f: F) -> Middleware
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Context, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    let f = Arc::new(f);
    Box::new(move |source| {
        merge_map(source, move |ctx: Context| {
            let f = Arc::clone(&f);
            let call_ctx = ctx.clone();
            settle(ctx, async move { f(call_ctx).await.map_err(|e| -> BoxError { e.into() }) })
        })
    })
}

/// Runs `handler` for every context and normalizes what it returns.
///
/// Faults come out as `Err` items; nothing here recovers them.
pub fn handle_unsafe<H: Handler>(handler: H) -> RequestHandler {
    let handler = Arc::new(handler);
    Box::new(move |source| {
        merge_map(source, move |ctx: Context| {
            let handler = Arc::clone(&handler);
            let call_ctx = ctx.clone();
            settle(ctx, async move { handler.call(call_ctx).await })
        })
    })
}

/// [`handle_unsafe`] followed by [`catch_errors`] with the default renderer.
///
/// The usual last step of a route branch before `send()`.
pub fn handle<H: Handler>(handler: H) -> RequestHandler {
    handle_with(handler, default_error_handler())
}

/// [`handle_unsafe`] followed by [`catch_errors`] with a custom renderer.
pub fn handle_with<H: Handler, R: ErrorHandler>(handler: H, renderer: R) -> RequestHandler {
    compose(handle_unsafe(handler), catch_errors(renderer))
}

/// Substitutes a response for every fault not yet recovered.
///
/// The substitute is emitted first, then the fault itself, marked recovered,
/// so that `send()` still forwards it to the error channel. When the
/// renderer declines, the fault passes on untouched.
pub fn catch_errors<R: ErrorHandler>(renderer: R) -> ResponseHandler {
    let renderer = Arc::new(renderer);
    Box::new(move |source| {
        merge_expand(source, move |item: Flow<Response>| {
            let renderer = Arc::clone(&renderer);
            async move {
                match item {
                    Ok(res) => vec![Ok(res)],
                    Err(err) if err.is_recovered() => vec![Err(err)],
                    Err(err) => match render_guarded(renderer.as_ref(), &err).await {
                        Some(res) => vec![Ok(res), Err(err.recovered())],
                        None => vec![Err(err)],
                    },
                }
            }
        })
    })
}

/// Renders faults arriving on the shared error channel.
///
/// Faults already recovered upstream are consumed: their connection has a
/// response on its way. When the renderer declines, the fault is re-raised
/// as an `Err` item.
pub fn handle_errors<R: ErrorHandler>(renderer: R) -> ErrorHandlerStage {
    let renderer = Arc::new(renderer);
    Box::new(move |source: BoxStream<'static, HandlingError>| {
        source
            .flat_map_unordered(None::<usize>, move |err| {
                let renderer = Arc::clone(&renderer);
                stream::once(async move {
                    if err.is_recovered() {
                        debug!(request = %err.context().id(), status = err.status().as_u16(), "fault already answered: {err}");
                        return None;
                    }
                    match render_guarded(renderer.as_ref(), &err).await {
                        Some(res) => Some(Ok(res)),
                        None => Some(Err(err)),
                    }
                })
                .filter_map(future::ready)
                .boxed()
            })
            .boxed()
    })
}

// ── Internals ─────────────────────────────────────────────────────────────────

/// Awaits a stage future, turning its error or panic into a fault for `ctx`.
async fn settle<T, Fut>(ctx: Context, fut: Fut) -> Flow<T>
where
    Fut: Future<Output = Result<T, BoxError>> + Send,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(HandlingError::wrap(err, &ctx)),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(request = %ctx.id(), "handler panicked: {message}");
            Err(HandlingError::new(message, &ctx))
        }
    }
}

/// A renderer that panics counts as one that declined.
async fn render_guarded<R: ErrorHandler + ?Sized>(renderer: &R, err: &HandlingError) -> Option<Response> {
    let rendered = AssertUnwindSafe(async { renderer.render(err).await }).catch_unwind().await;
    rendered.unwrap_or_else(|panic| {
        error!(request = %err.context().id(), "error handler panicked: {}", panic_message(panic.as_ref()));
        None
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}
