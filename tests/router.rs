mod common;

use common::{Agent, app};
use http::StatusCode;
use rxhttp::{Context, FlowExt, HandlingError, Method, Routed, Subscribe, handle, map};

async fn dump_params(ctx: Context) -> Result<rxhttp::Response, HandlingError> {
    let params = ctx.require::<Routed>()?;
    ctx.reply("").with_json_body(&serde_json::json!({ "routerParams": params }))
}

async fn routed_agent() -> Agent {
    let (capture, serve, router) = app();

    router.get("/").pipe(map(|ctx: Context| ctx.reply("GET /"))).pipe(serve.send()).subscribe();
    router.post("/login").pipe(map(|ctx: Context| ctx.reply("POST /login"))).pipe(serve.send()).subscribe();
    router.delete("/posts/:id").pipe(handle(dump_params)).pipe(serve.send()).subscribe();
    router
        .get(r"/posts/:year(^\d{4})/:month(^\d{2})/:day(^\d{2})")
        .pipe(handle(dump_params))
        .pipe(serve.send())
        .subscribe();
    router
        .get("/wildcard/*")
        .pipe(handle(|ctx: Context| async move {
            ctx.reply("").with_json_body(&serde_json::json!({
                "path": ctx.request().path(),
                "rest": ctx.param("*"),
            }))
        }))
        .pipe(serve.send())
        .subscribe();
    router
        .all("/anything")
        .pipe(map(|ctx: Context| ctx.reply(ctx.request().method().as_str())))
        .pipe(serve.send())
        .subscribe();
    router
        .route_any(&[Method::Put, Method::Patch], "/items/:id")
        .pipe(map(|ctx: Context| ctx.reply(format!("{} {}", ctx.request().method(), ctx.param("id").unwrap_or("")))))
        .pipe(serve.send())
        .subscribe();
    router
        .unrouted()
        .pipe(map(|ctx: Context| ctx.reply("").with_status(StatusCode::NOT_FOUND)))
        .pipe(serve.send())
        .subscribe();

    Agent::new(capture)
}

#[tokio::test]
async fn routes_by_method_and_path() {
    let agent = routed_agent().await;

    let root = agent.get("/").await;
    assert_eq!(root.status, StatusCode::OK);
    assert_eq!(root.text, "GET /");

    let login = agent.request("POST", "/login", None, "").await;
    assert_eq!(login.status, StatusCode::OK);
    assert_eq!(login.text, "POST /login");

    assert_eq!(agent.get("/login").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn single_param_is_attached() {
    let agent = routed_agent().await;
    let reply = agent.request("DELETE", "/posts/100500", None, "").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), serde_json::json!({ "routerParams": { "id": "100500" } }));
}

#[tokio::test]
async fn constrained_params_are_attached() {
    let agent = routed_agent().await;
    let reply = agent.get("/posts/2020/03/02").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.json(),
        serde_json::json!({ "routerParams": { "year": "2020", "month": "03", "day": "02" } })
    );
}

#[tokio::test]
async fn params_in_invalid_format_are_unrouted() {
    let agent = routed_agent().await;
    assert_eq!(agent.get("/posts/2020/Mar/02").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wildcard_matches_any_depth() {
    let agent = routed_agent().await;
    let reply = agent.get("/wildcard/any/path/here/example.png").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.json(),
        serde_json::json!({ "path": "/wildcard/any/path/here/example.png", "rest": "any/path/here/example.png" })
    );
}

#[tokio::test]
async fn unmatched_paths_get_404() {
    let agent = routed_agent().await;
    let reply = agent.get("/some/404/url").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn all_and_route_any_cover_several_methods() {
    let agent = routed_agent().await;
    for method in ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"] {
        let reply = agent.request(method, "/anything", None, "").await;
        assert_eq!(reply.status, StatusCode::OK, "{method}");
        assert_eq!(reply.text, method);
    }

    assert_eq!(agent.request("PUT", "/items/3", None, "").await.text, "PUT 3");
    assert_eq!(agent.request("PATCH", "/items/4", None, "").await.text, "PATCH 4");
    assert_eq!(agent.get("/items/5").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn routes_registered_late_still_match() {
    let (capture, serve, router) = app();
    router
        .unrouted()
        .pipe(map(|ctx: Context| ctx.reply("").with_status(StatusCode::NOT_FOUND)))
        .pipe(serve.send())
        .subscribe();
    let agent = Agent::new(capture);
    assert_eq!(agent.get("/late").await.status, StatusCode::NOT_FOUND);

    router.get("/late").pipe(map(|ctx: Context| ctx.reply("here now"))).pipe(serve.send()).subscribe();
    let reply = agent.get("/late").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text, "here now");
}

#[tokio::test]
async fn params_are_percent_decoded() {
    let agent = routed_agent().await;
    let reply = agent.request("DELETE", "/posts/hello%20w%C3%B6rld", None, "").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), serde_json::json!({ "routerParams": { "id": "hello wörld" } }));
}

#[tokio::test]
async fn wildcard_matches_the_bare_prefix() {
    let agent = routed_agent().await;
    let reply = agent.get("/wildcard/").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), serde_json::json!({ "path": "/wildcard/", "rest": "" }));
}

#[tokio::test]
async fn host_header_does_not_steer_routing() {
    let (capture, serve, router) = app();
    router.get("/public").pipe(map(|ctx: Context| ctx.reply("PUBLIC"))).pipe(serve.send()).subscribe();
    router.get("/admin/public").pipe(map(|ctx: Context| ctx.reply("ADMIN"))).pipe(serve.send()).subscribe();
    router
        .unrouted()
        .pipe(map(|ctx: Context| ctx.reply("").with_status(StatusCode::NOT_FOUND)))
        .pipe(serve.send())
        .subscribe();

    for host in ["evil/admin", "h?x", "h#x", "example.com"] {
        let req = http::Request::get("/public")
            .header("host", host)
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .unwrap();
        let (parts, body) = capture.dispatch(req, rxhttp::Peer::default()).await.into_parts();
        let text = http_body_util::BodyExt::collect(body).await.unwrap().to_bytes();
        assert_eq!(parts.status, StatusCode::OK, "host {host:?}");
        assert_eq!(&text[..], b"PUBLIC", "host {host:?}");
    }
}
