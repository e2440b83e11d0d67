//! # rxhttp
//!
//! An HTTP framework where requests are values in a stream.
//!
//! ## The contract
//!
//! Every accepted request becomes an immutable [`Context`]. Contexts flow
//! through *stages*, plain functions from one stream to another, until a
//! stage turns them into a [`Response`]. The response goes to a shared
//! channel and is flushed onto the connection it belongs to.
//!
//! ```text
//! socket ─► Capture ─► Router ─┬─► route stream ─► middleware ─► handle ─► send() ─► flush ─► socket
//!                              └─► unrouted ─────────────────────► handle ─► send()
//!                                                          faults ─► errors ─► handle_errors ─► send()
//! ```
//!
//! What the core owns:
//!
//! - **Immutability**: contexts, requests, responses and headers are never
//!   mutated; `with_*` returns a new value sharing what did not change
//! - **Faults as values**: a failing handler yields an `Err` item next to
//!   the other contexts' `Ok` items, so one fault never ends a shared stream
//! - **Exactly one answer**: every connection gets one response; a context
//!   dropped without one is answered `500`
//!
//! What it leaves out: TLS, body-size limits, timeouts, pooling. Put a proxy
//! in front, or write a stage.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rxhttp::{Context, FlowExt, HandlingError, Router, Server, StatusCode, Subscribe, handle, handle_errors};
//! use rxhttp::middleware::json::json_errors;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rxhttp::Error> {
//!     let server = Server::bind("0.0.0.0:3000").listen().await?;
//!     let router = Router::new(server.requests());
//!
//!     router.get("/posts/:id").pipe(handle(show_post)).pipe(server.send()).subscribe();
//!     router
//!         .unrouted()
//!         .pipe(handle(|_ctx: Context| async { StatusCode::NOT_FOUND }))
//!         .pipe(server.send())
//!         .subscribe();
//!     server.errors().pipe(handle_errors(json_errors())).pipe(server.send()).subscribe();
//!
//!     server.stopped().await
//! }
//!
//! async fn show_post(ctx: Context) -> Result<String, HandlingError> {
//!     let id = ctx.param("id").unwrap_or_default();
//!     Ok(format!("post {id}"))
//! }
//! ```

mod body;
mod context;
mod error;
mod flow;
mod handling;
mod headers;
mod method;
mod pattern;
mod request;
mod response;
mod router;
mod server;
mod state;

pub mod middleware;

pub use body::{Body, BodyError, ResponseBody};
pub use context::{Connection, Context, Id, Peer};
pub use error::{BoxError, Error};
pub use flow::{
    ErrorHandlerStage, Flow, FlowExt, FlowStream, Middleware, RequestHandler, ResponseHandler, Stage, Subscribe,
    compose, filter, map, tap,
};
pub use handling::{
    AsyncErrorHandler, ErrorHandler, Handler, HandlerOutput, HandlingError, catch_errors, default_error_handler,
    handle, handle_errors, handle_unsafe, handle_with, pass_through,
};
pub use headers::{Headers, IntoHeaderValues};
pub use method::{Method, UnknownMethod};
pub use pattern::{Pattern, PatternError, WILDCARD};
pub use request::Request;
pub use response::{DEFAULT_STATUS, IntoResponse, Response, ResponseParts};
pub use router::{Routed, Router};
pub use server::{Capture, DEFAULT_HOST, DEFAULT_PORT, Listening, Responses, Serve, Server, flush};
pub use state::State;

pub use http::StatusCode;
