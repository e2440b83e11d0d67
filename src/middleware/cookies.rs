//! Request cookies in, `Set-Cookie` headers out.
//!
//! ```rust,ignore
//! router.post("/login")
//!     .pipe(use_cookies())
//!     .pipe(handle(|ctx: Context| async move {
//!         ctx.require::<Cookies>()?.set_cookie("seen", "1", CookieOptions::default());
//!         Ok::<_, HandlingError>(ctx.reply("welcome"))
//!     }))
//!     .pipe(send_cookies(CookieOptions::default()))
//!     .pipe(serve.send())
//!     .subscribe();
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use cookie::{Cookie, Expiration};
use tracing::debug;

use crate::context::Context;
use crate::flow::{Middleware, ResponseHandler, map};
use crate::response::Response;

pub use cookie::SameSite;
pub use cookie::time::OffsetDateTime;

/// Attributes of a cookie to be set. Unset fields are left out of the
/// `Set-Cookie` line, unless [`send_cookies`] supplies a default.
///
/// `expires` is a [`cookie::time::OffsetDateTime`], re-exported here as
/// [`OffsetDateTime`]; no direct `time` dependency is needed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CookieOptions {
    pub expires: Option<OffsetDateTime>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub http_only: Option<bool>,
    pub secure: Option<bool>,
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    /// Fields set here win; the rest come from `defaults`.
    fn or(&self, defaults: &CookieOptions) -> CookieOptions {
        CookieOptions {
            expires: self.expires.or(defaults.expires),
            path: self.path.clone().or_else(|| defaults.path.clone()),
            domain: self.domain.clone().or_else(|| defaults.domain.clone()),
            http_only: self.http_only.or(defaults.http_only),
            secure: self.secure.or(defaults.secure),
            same_site: self.same_site.or(defaults.same_site),
        }
    }
}

#[derive(Clone, Debug)]
struct Pending {
    name: String,
    value: String,
    options: CookieOptions,
}

impl Pending {
    fn serialize(&self, defaults: &CookieOptions) -> String {
        let opts = self.options.or(defaults);
        let mut c = Cookie::new(self.name.clone(), self.value.clone());
        if let Some(path) = opts.path {
            c.set_path(path);
        }
        if let Some(domain) = opts.domain {
            c.set_domain(domain);
        }
        if let Some(at) = opts.expires {
            c.set_expires(Expiration::DateTime(at));
        }
        if let Some(on) = opts.http_only {
            c.set_http_only(on);
        }
        if let Some(on) = opts.secure {
            c.set_secure(on);
        }
        if let Some(same_site) = opts.same_site {
            c.set_same_site(same_site);
        }
        c.encoded().to_string()
    }
}

/// State field: the cookies a request carried, plus those to be set on its
/// response.
///
/// Cookies to set are collected through a shared reference, so every clone
/// of the context sees the same list.
#[derive(Debug, Default)]
pub struct Cookies {
    received: HashMap<String, String>,
    pending: Mutex<Vec<Pending>>,
}

impl Cookies {
    /// Parses a `Cookie` header value, percent-decoding names and values.
    /// Malformed pairs are skipped; the first occurrence of a name wins.
    pub fn parse(header: &str) -> Self {
        let mut received = HashMap::new();
        for parsed in Cookie::split_parse_encoded(header) {
            match parsed {
                Ok(c) => {
                    received.entry(c.name().to_owned()).or_insert_with(|| c.value().to_owned());
                }
                Err(e) => debug!("skipping malformed cookie: {e}"),
            }
        }
        Self { received, pending: Mutex::new(Vec::new()) }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.received.get(name).map(String::as_str)
    }

    /// Every cookie the request carried.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.received
    }

    /// Schedules a cookie for the response. Setting a name twice keeps the
    /// latest value in the position of the first.
    pub fn set_cookie(&self, name: &str, value: &str, options: CookieOptions) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = Pending { name: name.to_owned(), value: value.to_owned(), options };
        match pending.iter_mut().find(|p| p.name == name) {
            Some(existing) => *existing = entry,
            None => pending.push(entry),
        }
    }

    /// Number of cookies scheduled so far.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// `Set-Cookie` values for everything scheduled, `defaults` filling in
    /// attributes the individual cookie left unset.
    pub fn serialize_pending(&self, defaults: &CookieOptions) -> Vec<String> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.serialize(defaults))
            .collect()
    }
}

/// Attaches a [`Cookies`] field parsed from the `Cookie` header.
///
/// Contexts that already carry one pass unchanged, so it is safe to pipe
/// this more than once.
pub fn use_cookies() -> Middleware {
    map(|ctx: Context| {
        if ctx.get::<Cookies>().is_some() {
            debug!(request = %ctx.id(), "cookies already parsed");
            return ctx;
        }
        let header = ctx.request().header("cookie").unwrap_or_default();
        let cookies = Cookies::parse(&header);
        debug!(request = %ctx.id(), count = cookies.received.len(), "cookies parsed");
        ctx.with_state(cookies)
    })
}

/// Adds one `Set-Cookie` header line per scheduled cookie.
pub fn send_cookies(defaults: CookieOptions) -> ResponseHandler {
    map(move |res: Response| {
        let Some(cookies) = res.context().get::<Cookies>() else {
            return res;
        };
        let lines = cookies.serialize_pending(&defaults);
        if lines.is_empty() {
            debug!(request = %res.context().id(), "no cookies to send");
            return res;
        }
        res.with_header("set-cookie", lines)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_pairs() {
        let c = Cookies::parse("name1=value1; name2=value2; name1=shadowed");
        assert_eq!(c.get("name1"), Some("value1"));
        assert_eq!(c.get("name2"), Some("value2"));
        assert_eq!(c.all().len(), 2);
        assert!(Cookies::parse("").all().is_empty());
    }

    #[test]
    fn serializes_with_defaults_filling_gaps() {
        let c = Cookies::default();
        c.set_cookie("a", "1", CookieOptions { path: Some("/".into()), ..Default::default() });
        c.set_cookie("b", "2", CookieOptions { secure: Some(false), ..Default::default() });
        let defaults = CookieOptions {
            http_only: Some(true),
            secure: Some(true),
            same_site: Some(SameSite::Strict),
            ..Default::default()
        };
        let lines = c.serialize_pending(&defaults);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("a=1"));
        for attr in ["Path=/", "HttpOnly", "Secure", "SameSite=Strict"] {
            assert!(lines[0].contains(attr), "{attr} missing from {}", lines[0]);
        }
        assert!(!lines[1].contains("Secure"));
    }

    #[test]
    fn setting_twice_replaces() {
        let c = Cookies::default();
        c.set_cookie("a", "1", CookieOptions::default());
        c.set_cookie("a", "2", CookieOptions::default());
        assert_eq!(c.pending_count(), 1);
        assert_eq!(c.serialize_pending(&CookieOptions::default()), vec!["a=2".to_owned()]);
    }

    #[test]
    fn values_cannot_smuggle_attributes() {
        let hostile = "a b; Domain=evil.com; Max-Age=99999";
        let c = Cookies::default();
        c.set_cookie("name", hostile, CookieOptions::default());
        let line = c.serialize_pending(&CookieOptions::default()).remove(0);
        assert!(line.starts_with("name=a%20b%3B"), "{line}");
        assert!(!line.contains(';') && !line.contains(' '), "{line}");
        assert_eq!(Cookies::parse(&line).get("name"), Some(hostile));
    }
}
