//! Route pattern syntax.
//!
//! ```text
//! /posts                       literal
//! /posts/:id                   named parameter, one segment
//! /posts/:year(^\d{4})         parameter that must match a regex
//! /static/*                    trailing wildcard, exposed as param "*"
//! /time::now                   "::" is a literal colon
//! ```
//!
//! Patterns are compiled into matchit's `{name}` syntax. Regex constraints
//! are checked after the tree lookup, against the percent-decoded value. A
//! constraint that fails does not make the tree try another route: the
//! context counts as unrouted.
//!
//! A trailing wildcard also matches the bare prefix (`/static/*` matches
//! `/static/`, with `*` empty), unless another route already claims that
//! exact path.

use std::fmt;

use percent_encoding::percent_decode_str;
use regex::Regex;

/// Parameter name under which a trailing wildcard's match is exposed.
pub const WILDCARD: &str = "*";

const CATCH_ALL: &str = "_rest";
const CATCH_ALL_ROUTE: &str = "{*_rest}";

/// A compiled route pattern.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    route: String,
    constraints: Vec<(String, Regex)>,
    wildcard: bool,
}

impl Pattern {
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        if !source.starts_with('/') {
            return Err(PatternError::NotAbsolute);
        }

        let mut route = String::with_capacity(source.len() + 8);
        let mut constraints = Vec::new();
        let mut wildcard = false;
        let mut chars = source.char_indices().peekable();

        while let Some((at, c)) = chars.next() {
            match c {
                ':' if chars.peek().map(|(_, n)| *n) == Some(':') => {
                    chars.next();
                    route.push(':');
                }
                ':' => {
                    let mut name = String::new();
                    while let Some((_, n)) = chars.peek().copied() {
                        if n.is_ascii_alphanumeric() || n == '_' {
                            name.push(n);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        return Err(PatternError::EmptyName { at });
                    }
                    if chars.peek().map(|(_, n)| *n) == Some('(') {
                        chars.next();
                        let expr = take_group(&mut chars).ok_or_else(|| PatternError::UnclosedConstraint { name: name.clone() })?;
                        let regex = Regex::new(&format!("^(?:{expr})$"))
                            .map_err(|source| PatternError::InvalidConstraint { name: name.clone(), source })?;
                        constraints.push((name.clone(), regex));
                    }
                    route.push('{');
                    route.push_str(&name);
                    route.push('}');
                }
                '*' => {
                    if chars.peek().is_some() {
                        return Err(PatternError::WildcardNotLast);
                    }
                    wildcard = true;
                    route.push_str(CATCH_ALL_ROUTE);
                }
                '{' => route.push_str("{{"),
                '}' => route.push_str("}}"),
                other => route.push(other),
            }
        }

        Ok(Self { source: source.to_owned(), route, constraints, wildcard })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The matchit route this pattern compiles to.
    pub(crate) fn route(&self) -> &str {
        &self.route
    }

    /// The route matching the wildcard's bare prefix, for patterns ending
    /// in `*`.
    pub(crate) fn prefix_route(&self) -> Option<&str> {
        if !self.wildcard {
            return None;
        }
        self.route.strip_suffix(CATCH_ALL_ROUTE)
    }

    /// Decodes the parameters, checks regex constraints, and collects them
    /// under their public names. `None` when a constraint rejects its value.
    pub(crate) fn extract<'a>(&self, params: impl Iterator<Item = (&'a str, &'a str)>) -> Option<Vec<(String, String)>> {
        let mut out = Vec::new();
        let mut rest_seen = false;
        for (name, raw) in params {
            let value = percent_decode_str(raw).decode_utf8_lossy();
            if let Some((_, regex)) = self.constraints.iter().find(|(n, _)| n == name) {
                if !regex.is_match(&value) {
                    return None;
                }
            }
            let name = if name == CATCH_ALL {
                rest_seen = true;
                WILDCARD
            } else {
                name
            };
            out.push((name.to_owned(), value.into_owned()));
        }
        if self.wildcard && !rest_seen {
            out.push((WILDCARD.to_owned(), String::new()));
        }
        Some(out)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Reads a parenthesised group up to its balancing `)`, honouring escapes.
fn take_group(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> Option<String> {
    let mut depth = 1usize;
    let mut expr = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            '\\' => {
                expr.push(c);
                if let Some((_, escaped)) = chars.next() {
                    expr.push(escaped);
                }
                continue;
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(expr);
                }
            }
            _ => {}
        }
        expr.push(c);
    }
    None
}

// ── PatternError ──────────────────────────────────────────────────────────────

/// A route pattern that cannot be compiled.
#[derive(Debug)]
pub enum PatternError {
    /// Patterns must start with `/`.
    NotAbsolute,
    /// A `:` not followed by a parameter name.
    EmptyName { at: usize },
    /// A `(` constraint with no closing `)`.
    UnclosedConstraint { name: String },
    InvalidConstraint { name: String, source: regex::Error },
    /// `*` anywhere but at the very end.
    WildcardNotLast,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAbsolute => f.write_str("pattern must start with `/`"),
            Self::EmptyName { at } => write!(f, "missing parameter name after `:` at offset {at}"),
            Self::UnclosedConstraint { name } => write!(f, "unclosed constraint for parameter `{name}`"),
            Self::InvalidConstraint { name, source } => write!(f, "invalid constraint for parameter `{name}`: {source}"),
            Self::WildcardNotLast => f.write_str("`*` is only allowed at the end of a pattern"),
        }
    }
}

impl std::error::Error for PatternError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidConstraint { source, .. } => Some(source),
            _ => None,
        }
    }
}
