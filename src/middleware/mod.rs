//! Optional middleware built on the public pipeline contracts.
//!
//! Each module only uses what any application could use: [`pass_through`],
//! state fields, and response stages. Nothing here is wired in by default.
//!
//! - [`cookies`]: parse the `Cookie` header, collect and serialise `Set-Cookie`
//! - [`session`]: cookie-keyed sessions over a pluggable storage
//! - [`json`]: JSON request bodies, JSON responses, JSON error rendering
//! - [`debug`]: request dumps through `tracing`
//!
//! [`pass_through`]: crate::pass_through

pub mod cookies;
pub mod debug;
pub mod json;
pub mod session;
