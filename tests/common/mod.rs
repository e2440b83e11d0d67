//! Shared helpers for the integration suites.
//!
//! [`Agent`] drives requests through a [`Capture`] in-process, without a
//! socket, and keeps a cookie jar across requests like a browser would.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::{BodyExt, Full};
use rxhttp::{Capture, FlowExt, FlowStream, Peer, Router, Serve, Subscribe, default_error_handler, handle_errors};

pub const MIME_JSON: &str = "application/json";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Capture, responses/errors owner, and a router over the requests stream,
/// with the errors channel rendered by the default renderer.
pub fn app() -> (Capture, Serve, Router) {
    app_with(|requests| requests)
}

/// Like [`app`], with global middleware applied before routing.
pub fn app_with(global: impl FnOnce(FlowStream<rxhttp::Context>) -> FlowStream<rxhttp::Context>) -> (Capture, Serve, Router) {
    init_tracing();
    let (capture, requests) = Capture::new();
    let serve = Serve::new();
    let router = Router::new(requests.pipe(global));
    serve.errors().pipe(handle_errors(default_error_handler())).pipe(serve.send()).subscribe();
    (capture, serve, router)
}

#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
}

impl Reply {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.text).unwrap_or_else(|e| panic!("not JSON ({e}): {}", self.text))
    }

    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap().to_owned())
            .collect()
    }
}

/// A client with a cookie jar.
pub struct Agent {
    capture: Capture,
    jar: Mutex<BTreeMap<String, String>>,
}

impl Agent {
    pub fn new(capture: Capture) -> Self {
        Self { capture, jar: Mutex::new(BTreeMap::new()) }
    }

    pub async fn get(&self, path: &str) -> Reply {
        self.request("GET", path, None, "").await
    }

    pub async fn post_json(&self, path: &str, body: &str) -> Reply {
        self.request("POST", path, Some(MIME_JSON), body).await
    }

    pub async fn request(&self, method: &str, path: &str, content_type: Option<&str>, body: &str) -> Reply {
        let mut builder = http::Request::builder().method(method).uri(path).header("host", "localhost");
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        let cookie = self.cookie_header();
        if !cookie.is_empty() {
            builder = builder.header("cookie", cookie);
        }
        let req = builder.body(Full::new(Bytes::from(body.to_owned()))).unwrap();

        let res = self.capture.dispatch(req, Peer::default()).await;
        let (parts, body) = res.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();

        let reply = Reply {
            status: parts.status,
            headers: parts.headers,
            text: String::from_utf8(bytes.to_vec()).unwrap(),
        };
        self.store_cookies(&reply);
        reply
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.jar.lock().unwrap().get(name).cloned()
    }

    fn cookie_header(&self) -> String {
        self.jar
            .lock()
            .unwrap()
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn store_cookies(&self, reply: &Reply) {
        let mut jar = self.jar.lock().unwrap();
        for line in reply.set_cookies() {
            let pair = line.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                jar.insert(name.trim().to_owned(), value.trim().to_owned());
            }
        }
    }
}
