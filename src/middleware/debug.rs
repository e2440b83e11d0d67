//! Request dumps for local development.

use std::convert::Infallible;

use tracing::{info, warn};

use crate::context::Context;
use crate::flow::{Middleware, tap};
use crate::handling::pass_through;

/// What [`dump_requests`] prints besides the request line.
#[derive(Clone, Copy, Debug)]
pub struct DumpOptions {
    pub print_headers: bool,
    /// Buffers the body to print it. Downstream stages get the buffered copy.
    pub print_body: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self { print_headers: true, print_body: false }
    }
}

/// Logs every request at `info` level: peer, method and URL, then headers
/// and body as configured.
pub fn dump_requests(options: DumpOptions) -> Middleware {
    if !options.print_body {
        return tap(move |ctx: &Context| log_head(ctx, options));
    }
    pass_through(move |ctx: Context| async move {
        log_head(&ctx, options);
        let read = ctx.request().body().bytes().await;
        let ctx = match read {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let text = text.trim();
                if !text.is_empty() {
                    info!(request = %ctx.id(), "body: {text}");
                }
                let request = ctx.request().with_body(bytes.clone());
                ctx.with_request(request)
            }
            Err(e) => {
                warn!(request = %ctx.id(), "cannot dump body: {e}");
                ctx
            }
        };
        Ok::<_, Infallible>(ctx)
    })
}

fn log_head(ctx: &Context, options: DumpOptions) {
    let peer = ctx.original().remote_addr().map(|a| a.to_string()).unwrap_or_else(|| "-".to_owned());
    let request = ctx.request();
    info!(request = %ctx.id(), "{peer} -> {} {}", request.method(), request.url());
    if options.print_headers {
        info!(request = %ctx.id(), headers = ?request.headers().build(), "headers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::context::{Connection, Id};
    use crate::{Headers, Method, Request};
    use futures::{StreamExt, stream};

    fn ctx(body: &'static str) -> Context {
        let url = url::Url::parse("http://localhost/dump").unwrap();
        Context::new(Id(1), Connection::detached(), Request::new(Method::Put, url, Headers::new(), Body::from(body)))
    }

    #[tokio::test]
    async fn dumping_keeps_the_body_readable() {
        let mw = dump_requests(DumpOptions { print_headers: false, print_body: true });
        let out = mw(stream::iter(vec![Ok(ctx("payload"))]).boxed()).next().await.unwrap().unwrap();
        assert_eq!(out.request().body().text().await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn head_only_dump_passes_contexts_through() {
        let out: Vec<_> = dump_requests(DumpOptions::default())(stream::iter(vec![Ok(ctx("")), Ok(ctx(""))]).boxed())
            .collect()
            .await;
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(Result::is_ok));
    }
}
