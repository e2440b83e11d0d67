mod common;

use common::{Agent, MIME_JSON, app};
use http::StatusCode;
use rxhttp::middleware::json::{NOT_JSON, ParsedBody, ResponseData, json_errors, parse_if_json, parse_json, render_json};
use rxhttp::{Context, FlowExt, HandlingError, Subscribe, handle, handle_with, map, pass_through};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct NewPost {
    title: String,
    #[serde(default)]
    tags: Vec<String>,
}

fn json_agent() -> Agent {
    let (capture, serve, router) = app();

    router
        .post("/echo")
        .pipe(parse_json())
        .pipe(map(|ctx: Context| {
            let body = ctx.get::<ParsedBody>().and_then(|b| b.value().cloned()).unwrap_or_default();
            ctx.with_state(ResponseData(json!({ "received": body })))
        }))
        .pipe(render_json())
        .pipe(serve.send())
        .subscribe();

    router
        .post("/posts")
        .pipe(parse_json())
        .pipe(handle_with(
            |ctx: Context| async move {
                let post: NewPost = ctx
                    .require::<ParsedBody>()?
                    .deserialize()
                    .map_err(|e| HandlingError::new(e.to_string(), &ctx).with_status(StatusCode::UNPROCESSABLE_ENTITY))?;
                ctx.reply("")
                    .with_status(StatusCode::CREATED)
                    .with_json_body(&json!({ "title": post.title, "tags": post.tags.len() }))
            },
            json_errors(),
        ))
        .pipe(serve.send())
        .subscribe();

    router
        .post("/maybe")
        .pipe(parse_if_json())
        .pipe(map(|ctx: Context| {
            let kind = match ctx.get::<ParsedBody>().and_then(ParsedBody::value) {
                Some(_) => "json",
                None => "other",
            };
            ctx.reply(kind)
        }))
        .pipe(serve.send())
        .subscribe();

    router
        .get("/json-fault")
        .pipe(pass_through(|ctx: Context| async move {
            Err::<Context, _>(HandlingError::new("nope", &ctx).with_status(StatusCode::FORBIDDEN))
        }))
        .pipe(handle(|ctx: Context| async move { ctx.reply("unreachable") }))
        .pipe(serve.send())
        .subscribe();

    Agent::new(capture)
}

#[tokio::test]
async fn parsed_bodies_reach_the_handler() {
    let agent = json_agent();
    let reply = agent.post_json("/echo", r#"{"a":[1,2,3]}"#).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers["content-type"], MIME_JSON);
    assert_eq!(reply.json(), json!({ "received": { "a": [1, 2, 3] } }));
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let agent = json_agent();
    let reply = agent.post_json("/echo", "not-json").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.text.contains("expected"), "{}", reply.text);
}

#[tokio::test]
async fn missing_content_type_is_a_bad_request() {
    let agent = json_agent();
    let reply = agent.request("POST", "/echo", None, r#"{"a":1}"#).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.text, NOT_JSON);
}

#[tokio::test]
async fn typed_bodies_and_local_json_errors() {
    let agent = json_agent();

    let created = agent.post_json("/posts", r#"{"title":"hello","tags":["a","b"]}"#).await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.json(), json!({ "title": "hello", "tags": 2 }));

    let invalid = agent.post_json("/posts", r#"{"tags":[]}"#).await;
    assert_eq!(invalid.status, StatusCode::UNPROCESSABLE_ENTITY);
    let body = invalid.json();
    assert_eq!(body["status"], 422);
    assert!(body["msg"].as_str().unwrap().contains("title"), "{body}");
}

#[tokio::test]
async fn optional_parsing_tolerates_other_bodies() {
    let agent = json_agent();
    assert_eq!(agent.post_json("/maybe", "{}").await.text, "json");
    assert_eq!(agent.request("POST", "/maybe", Some("text/plain"), "hi").await.text, "other");
    assert_eq!(
        agent.request("POST", "/maybe", Some("application/json; charset=utf-8"), "[]").await.text,
        "json"
    );
}

#[tokio::test]
async fn middleware_faults_skip_the_handler() {
    let agent = json_agent();
    let reply = agent.get("/json-fault").await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.text, "nope");
}
