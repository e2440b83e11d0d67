//! JSON request bodies, JSON responses, and JSON error rendering.

use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::context::Context;
use crate::flow::{Middleware, RequestHandler};
use crate::handling::{ErrorHandler, HandlingError, handle_unsafe, pass_through};
use crate::request::Request;
use crate::response::Response;

const MIME_JSON: &str = "application/json";

/// Message of the fault raised by [`parse_json`] for non-JSON requests.
pub const NOT_JSON: &str = "Request body should contain JSON-encoded data";

/// State field: the decoded request body.
///
/// `None` when [`parse_if_json`] let a non-JSON request through.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedBody(pub Option<Value>);

impl ParsedBody {
    pub fn value(&self) -> Option<&Value> {
        self.0.as_ref()
    }

    /// A top-level field of an object body.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.as_ref()?.get(key)
    }

    /// Decodes the body into `T`. An absent body decodes as JSON `null`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.0.clone().unwrap_or(Value::Null))
    }
}

/// State field: the data [`render_json`] serialises as the response body.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseData(pub Value);

/// Whether the request declares an `application/json` body. Media type
/// parameters such as `charset` are ignored.
pub fn is_json(request: &Request) -> bool {
    request
        .header(CONTENT_TYPE.as_str())
        .and_then(|v| v.split(';').next().map(|m| m.trim().eq_ignore_ascii_case(MIME_JSON)))
        .unwrap_or(false)
}

/// Requires a JSON body and attaches it as [`ParsedBody`].
///
/// A request without the JSON content type, or whose body does not decode,
/// faults with `400`.
pub fn parse_json() -> Middleware {
    pass_through(|ctx: Context| async move {
        if !is_json(ctx.request()) {
            return Err(HandlingError::new(NOT_JSON, &ctx).with_status(StatusCode::BAD_REQUEST));
        }
        read_body(ctx).await
    })
}

/// Like [`parse_json`], but lets non-JSON requests through with an empty
/// [`ParsedBody`].
pub fn parse_if_json() -> Middleware {
    pass_through(|ctx: Context| async move {
        if !is_json(ctx.request()) {
            return Ok(ctx.with_state(ParsedBody(None)));
        }
        read_body(ctx).await
    })
}

/// Buffers the body, decodes it, and hands both the value and the bytes on.
async fn read_body(ctx: Context) -> Result<Context, HandlingError> {
    let bad_request = |message: String| HandlingError::new(message, &ctx).with_status(StatusCode::BAD_REQUEST);
    let bytes = ctx.request().body().bytes().await.map_err(|e| bad_request(e.to_string()))?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| bad_request(e.to_string()))?;
    let request = ctx.request().with_body(bytes);
    Ok(ctx.with_request(request).with_state(ParsedBody(Some(value))))
}

/// Terminal handler answering each context with its [`ResponseData`] as JSON.
pub fn render_json() -> RequestHandler {
    handle_unsafe(|ctx: Context| async move {
        let data = ctx.require::<ResponseData>()?;
        Response::new(&ctx).with_json_body(&data.0)
    })
}

/// Error renderer producing `{"msg": ..., "status": ...}` with the fault's status.
pub fn json_errors() -> impl ErrorHandler {
    |err: &HandlingError| {
        let body = json!({ "msg": err.message(), "status": err.status().as_u16() });
        let res = Response::new(err.context())
            .with_status(err.status())
            .with_json_body(&body)
            .unwrap_or_else(|e| e.render());
        Some(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::context::{Connection, Id};
    use crate::flow::Flow;
    use crate::{Headers, Method};
    use futures::{StreamExt, stream};

    fn ctx(content_type: Option<&str>, body: &'static str) -> Context {
        let url = url::Url::parse("http://localhost/items").unwrap();
        let headers = match content_type {
            Some(ct) => Headers::new().add("Content-Type", ct),
            None => Headers::new(),
        };
        Context::new(Id(1), Connection::detached(), Request::new(Method::Post, url, headers, Body::from(body)))
    }

    async fn run(mw: Middleware, c: Context) -> Flow<Context> {
        mw(stream::iter(vec![Ok(c)]).boxed()).next().await.unwrap()
    }

    #[test]
    fn content_type_detection() {
        assert!(is_json(ctx(Some("application/json"), "").request()));
        assert!(is_json(ctx(Some("Application/JSON; charset=utf-8"), "").request()));
        assert!(!is_json(ctx(Some("text/plain"), "").request()));
        assert!(!is_json(ctx(None, "").request()));
    }

    #[tokio::test]
    async fn parsed_body_is_attached_and_body_stays_readable() {
        let c = run(parse_json(), ctx(Some(MIME_JSON), r#"{"data":"x"}"#)).await.unwrap();
        let parsed = c.get::<ParsedBody>().unwrap();
        assert_eq!(parsed.get("data"), Some(&Value::from("x")));
        assert_eq!(c.request().body().text().await.unwrap(), r#"{"data":"x"}"#);
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let err = run(parse_json(), ctx(Some(MIME_JSON), "not-json")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("expected"), "{}", err.message());
    }

    #[tokio::test]
    async fn missing_content_type_is_a_bad_request() {
        let err = run(parse_json(), ctx(None, "{}")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), NOT_JSON);

        let passed = run(parse_if_json(), ctx(None, "{}")).await.unwrap();
        assert_eq!(passed.get::<ParsedBody>(), Some(&ParsedBody(None)));
    }

    #[tokio::test]
    async fn render_json_serialises_response_data() {
        let c = ctx(None, "").with_state(ResponseData(json!({"ok": true})));
        let res = render_json()(stream::iter(vec![Ok(c)]).boxed()).next().await.unwrap().unwrap();
        assert_eq!(res.body().as_bytes().unwrap(), r#"{"ok":true}"#);
        assert_eq!(res.headers().get_value("content-type").as_deref(), Some(MIME_JSON));
    }

    #[tokio::test]
    async fn json_errors_render_msg_and_status() {
        let err = HandlingError::new("nope", &ctx(None, "")).with_status(StatusCode::NOT_FOUND);
        let res = json_errors().render(&err).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.body().as_bytes().unwrap(), r#"{"msg":"nope","status":404}"#);
    }
}
