//! rxhttp demo: a couple of JSON endpoints, a session counter, and JSON errors.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example serve
//!
//! Try:
//!   curl http://localhost:3000/posts/42
//!   curl -X POST http://localhost:3000/posts \
//!        -H 'content-type: application/json' \
//!        -d '{"title":"hello"}'
//!   curl -c jar -b jar http://localhost:3000/visits
//!   curl http://localhost:3000/time/2024/05/01
//!   curl http://localhost:3000/error
//!   curl http://localhost:3000/nowhere

use rxhttp::middleware::cookies::{CookieOptions, send_cookies};
use rxhttp::middleware::debug::{DumpOptions, dump_requests};
use rxhttp::middleware::json::{ParsedBody, json_errors, parse_json};
use rxhttp::middleware::session::{MemoryStorage, Session, SessionOptions, start_session};
use rxhttp::{Context, FlowExt, HandlingError, Response, Router, Server, StatusCode, Subscribe, handle, handle_errors, handle_with};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), rxhttp::Error> {
    tracing_subscriber::fmt::init();

    let server = Server::bind("0.0.0.0:3000").listen().await?;
    let router = Router::new(server.requests().pipe(dump_requests(DumpOptions::default())));

    router.get("/posts/:id").pipe(handle_with(show_post, json_errors())).pipe(server.send()).subscribe();

    router
        .post("/posts")
        .pipe(parse_json())
        .pipe(handle_with(create_post, json_errors()))
        .pipe(server.send())
        .subscribe();

    router
        .get(r"/time/:year(\d{4})/:month(\d{2})/:day(\d{2})")
        .pipe(handle(|ctx: Context| async move {
            let date = ["year", "month", "day"].map(|p| ctx.param(p).unwrap_or_default().to_owned());
            Ok::<_, HandlingError>(date.join("-"))
        }))
        .pipe(server.send())
        .subscribe();

    let sessions = SessionOptions::new(MemoryStorage::new()).path("/");
    router
        .get("/visits")
        .pipe(start_session(sessions))
        .pipe(handle(count_visit))
        .pipe(send_cookies(CookieOptions { http_only: Some(true), ..Default::default() }))
        .pipe(server.send())
        .subscribe();

    // Not caught locally: rendered by the error channel below.
    router
        .get("/error")
        .pipe(rxhttp::handle_unsafe(|ctx: Context| async move {
            Err::<Response, _>(HandlingError::new("something broke", &ctx).with_status(StatusCode::SERVICE_UNAVAILABLE))
        }))
        .pipe(server.send())
        .subscribe();

    router
        .unrouted()
        .pipe(handle(|ctx: Context| async move {
            Err::<Response, _>(HandlingError::new(format!("no route for {}", ctx.request().path()), &ctx).with_status(StatusCode::NOT_FOUND))
        }))
        .pipe(server.send())
        .subscribe();

    server.errors().pipe(handle_errors(json_errors())).pipe(server.send()).subscribe();

    server.stopped().await
}

// GET /posts/:id
async fn show_post(ctx: Context) -> Result<Response, HandlingError> {
    let id = ctx.param("id").unwrap_or_default();
    ctx.reply("").with_json_body(&json!({ "id": id, "title": "hello" }))
}

// POST /posts → 201 with a location header
async fn create_post(ctx: Context) -> Result<Response, HandlingError> {
    let title = ctx
        .require::<ParsedBody>()?
        .get("title")
        .and_then(|t| t.as_str())
        .ok_or_else(|| HandlingError::new("title is required", &ctx).with_status(StatusCode::UNPROCESSABLE_ENTITY))?
        .to_owned();
    ctx.reply("")
        .with_status(StatusCode::CREATED)
        .with_header("location", "/posts/99")
        .with_json_body(&json!({ "id": "99", "title": title }))
}

// GET /visits: per-client counter kept in the session.
async fn count_visit(ctx: Context) -> Result<String, HandlingError> {
    let session = ctx.require::<Session>()?;
    let visits = session.get("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
    session.set("visits", visits);
    Ok(format!("visit #{visits}"))
}
