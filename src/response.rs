//! Outgoing HTTP response type and the [`IntoResponse`] normalization trait.
//!
//! A [`Response`] is immutable. Each `with_*` call returns a new value that
//! shares the untouched parts (headers and bodies are reference counted) and
//! keeps a reference to the [`Context`] it answers.
//!
//! ```rust,ignore
//! ctx.reply("created")
//!     .with_status(StatusCode::CREATED)
//!     .with_header("location", "/posts/42")
//! ```
//!
//! Handlers do not have to build a `Response` themselves. Anything
//! implementing [`IntoResponse`] is normalized by [`Response::normalize`]:
//! a bare status, a bare body, a [`ResponseParts`] record, or a finished
//! `Response` (kept as is).

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::StatusCode;
use serde::Serialize;
use tracing::warn;

use crate::body::{Body, ResponseBody};
use crate::context::Context;
use crate::handling::HandlingError;
use crate::headers::{Headers, IntoHeaderValues};

/// Status of a response nobody customised.
pub const DEFAULT_STATUS: StatusCode = StatusCode::OK;

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response bound to the context it answers.
#[derive(Clone, Debug)]
pub struct Response {
    context: Context,
    status: StatusCode,
    reason: Option<Arc<str>>,
    headers: Headers,
    body: Body,
}

impl Response {
    /// Default response for `ctx`: `200`, no headers, empty body.
    pub fn new(ctx: &Context) -> Self {
        Self {
            context: ctx.clone(),
            status: DEFAULT_STATUS,
            reason: None,
            headers: Headers::new(),
            body: Body::empty(),
        }
    }

    /// Normalizes any [`IntoResponse`] value into a response for `ctx`.
    pub fn normalize(r: impl IntoResponse, ctx: &Context) -> Self {
        r.into_response(ctx)
    }

    pub fn context(&self) -> &Context { &self.context }
    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &Headers { &self.headers }
    pub fn body(&self) -> &Body { &self.body }

    /// The reason phrase: custom if one was set, otherwise the canonical one.
    pub fn reason(&self) -> &str {
        match &self.reason {
            Some(r) => r,
            None => self.status.canonical_reason().unwrap_or(""),
        }
    }

    pub fn with_status(&self, status: StatusCode) -> Self {
        Self { status, ..self.clone() }
    }

    /// Same as [`with_status`](Self::with_status) with a custom reason phrase.
    pub fn with_status_reason(&self, status: StatusCode, reason: impl Into<String>) -> Self {
        Self { status, reason: Some(Arc::from(reason.into())), ..self.clone() }
    }

    /// Appends `values` to the header `name`.
    pub fn with_header(&self, name: &str, values: impl IntoHeaderValues) -> Self {
        Self { headers: self.headers.add(name, values), ..self.clone() }
    }

    /// Replaces the whole header set.
    pub fn with_headers(&self, headers: Headers) -> Self {
        Self { headers, ..self.clone() }
    }

    pub fn with_body(&self, body: impl Into<Body>) -> Self {
        Self { body: body.into(), ..self.clone() }
    }

    /// Serialises `data` as the body and adds `content-type: application/json`.
    ///
    /// Serialisation failures come back as a `500` bound to this response's
    /// context, so handlers can simply `?` them.
    pub fn with_json_body<T: Serialize + ?Sized>(&self, data: &T) -> Result<Self, HandlingError> {
        let bytes = serde_json::to_vec(data).map_err(|e| {
            HandlingError::new(format!("cannot serialize response body: {e}"), &self.context)
        })?;
        Ok(Self {
            headers: self.headers.add(CONTENT_TYPE.as_str(), "application/json"),
            body: Body::Full(bytes.into()),
            ..self.clone()
        })
    }

    /// Converts into the hyper response written to the socket.
    ///
    /// Every stored header value becomes its own header line. Names or values
    /// hyper cannot represent are skipped with a warning.
    pub(crate) fn into_http(self) -> http::Response<ResponseBody> {
        let id = self.context.id();
        let mut res = http::Response::new(self.body.into_response_body());
        *res.status_mut() = self.status;

        for (name, values) in self.headers.entries() {
            let Ok(header) = HeaderName::from_bytes(name.as_bytes()) else {
                warn!(request = %id, name, "skipping invalid header name");
                continue;
            };
            for value in values {
                match HeaderValue::from_str(value) {
                    Ok(v) => {
                        res.headers_mut().append(header.clone(), v);
                    }
                    Err(_) => warn!(request = %id, name, "skipping invalid header value"),
                }
            }
        }

        if let Some(reason) = self.reason {
            match hyper::ext::ReasonPhrase::try_from(reason.to_string()) {
                Ok(phrase) => {
                    res.extensions_mut().insert(phrase);
                }
                Err(_) => warn!(request = %id, "skipping invalid reason phrase"),
            }
        }
        res
    }
}

// ── ResponseParts ─────────────────────────────────────────────────────────────

/// Structured response record: a status plus optional headers, body, reason.
#[derive(Clone, Debug)]
pub struct ResponseParts {
    pub status: StatusCode,
    pub headers: Option<Headers>,
    pub body: Option<Body>,
    pub reason: Option<String>,
}

impl ResponseParts {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: None, body: None, reason: None }
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into a [`Response`] answering a given context.
///
/// Implement it on your own types to return them directly from handlers.
///
/// # Example: typed `Json<T>` wrapper
///
/// ```rust,ignore
/// use rxhttp::{Context, IntoResponse, Response};
///
/// struct Json<T: serde::Serialize>(T);
///
/// impl<T: serde::Serialize> IntoResponse for Json<T> {
///     fn into_response(self, ctx: &Context) -> Response {
///         Response::new(ctx)
///             .with_json_body(&self.0)
///             .unwrap_or_else(|err| err.render())
///     }
/// }
/// ```
pub trait IntoResponse {
    fn into_response(self, ctx: &Context) -> Response;
}

/// Already normalized: returned untouched, still bound to its own context.
impl IntoResponse for Response {
    fn into_response(self, _ctx: &Context) -> Response { self }
}

impl IntoResponse for StatusCode {
    fn into_response(self, ctx: &Context) -> Response {
        Response::new(ctx).with_status(self)
    }
}

/// A bare numeric status. Codes outside `100..=999` become `500`.
impl IntoResponse for u16 {
    fn into_response(self, ctx: &Context) -> Response {
        let status = StatusCode::from_u16(self).unwrap_or_else(|_| {
            warn!(request = %ctx.id(), code = self, "handler returned an invalid status code");
            StatusCode::INTERNAL_SERVER_ERROR
        });
        Response::new(ctx).with_status(status)
    }
}

impl IntoResponse for ResponseParts {
    fn into_response(self, ctx: &Context) -> Response {
        Response {
            context: ctx.clone(),
            status: self.status,
            reason: self.reason.map(Arc::from),
            headers: self.headers.unwrap_or_default(),
            body: self.body.unwrap_or_default(),
        }
    }
}

macro_rules! body_into_response {
    ($($ty:ty),* $(,)?) => {$(
        impl IntoResponse for $ty {
            fn into_response(self, ctx: &Context) -> Response {
                Response::new(ctx).with_body(self)
            }
        }
    )*};
}

body_into_response!(&'static str, String, Bytes, Vec<u8>, Body);
