//! Incoming HTTP request type.

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use url::Url;

use crate::body::Body;
use crate::error::BoxError;
use crate::headers::Headers;
use crate::method::Method;

/// An immutable snapshot of an incoming request.
///
/// Built once per connection. The body is a single-consumption handle: at
/// most one middleware may drain it (see [`Body`]).
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    url: Arc<Url>,
    headers: Headers,
    body: Body,
}

impl Request {
    pub fn new(method: Method, url: Url, headers: Headers, body: Body) -> Self {
        Self { method, url: Arc::new(url), headers, body }
    }

    /// Wraps a raw transport request.
    ///
    /// The target URL is rebuilt from the scheme (`https` when the socket is
    /// encrypted), the `Host` header (or the URI authority for HTTP/2), and
    /// the request path. Only the path and query of the request line decide
    /// the URL path; a `Host` value that is not a plain authority is replaced
    /// by `unknown`.
    pub(crate) fn from_transport<B>(req: http::Request<B>, secure: bool) -> Result<Self, Rejection>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        let method = Method::try_from(&parts.method)
            .map_err(|e| Rejection::new(StatusCode::METHOD_NOT_ALLOWED, e.to_string()))?;

        let scheme = if secure { "https" } else { "http" };
        let host = parts
            .headers
            .get(http::header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| parts.uri.authority().map(|a| a.as_str()));
        let mut url = base_url(scheme, host)
            .map_err(|e| Rejection::new(StatusCode::BAD_REQUEST, format!("invalid request target: {e}")))?;
        url.set_path(parts.uri.path());
        url.set_query(parts.uri.query());

        Ok(Self::new(
            method,
            url,
            Headers::from_header_map(&parts.headers),
            Body::from_stream(body),
        ))
    }

    pub fn method(&self) -> Method { self.method }
    pub fn url(&self) -> &Url { &self.url }
    pub fn path(&self) -> &str { self.url.path() }
    pub fn headers(&self) -> &Headers { &self.headers }
    pub fn body(&self) -> &Body { &self.body }

    /// Case-insensitive header lookup, multiple values joined with `"; "`.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get_value(name)
    }

    /// First value of a query-string parameter.
    pub fn query(&self, key: &str) -> Option<String> {
        self.url.query_pairs().find(|(k, _)| k == key).map(|(_, v)| v.into_owned())
    }

    /// Copy of this request carrying a different body.
    ///
    /// Used by middleware that buffers the body and hands the bytes on.
    pub fn with_body(&self, body: impl Into<Body>) -> Self {
        Self { body: body.into(), ..self.clone() }
    }
}

/// `scheme://host/`, with `unknown` standing in for a missing or malformed host.
fn base_url(scheme: &str, host: Option<&str>) -> Result<Url, url::ParseError> {
    let trusted = host
        .filter(|h| h.parse::<http::uri::Authority>().is_ok())
        .and_then(|h| Url::parse(&format!("{scheme}://{h}/")).ok());
    match trusted {
        Some(url) => Ok(url),
        None => Url::parse(&format!("{scheme}://unknown/")),
    }
}

/// A request refused before it became a context.
#[derive(Debug)]
pub(crate) struct Rejection {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

impl Rejection {
    fn new(status: StatusCode, message: String) -> Self {
        Self { status, message }
    }
}
