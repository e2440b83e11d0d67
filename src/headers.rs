//! Immutable, case-insensitive, multi-valued header container.
//!
//! Every mutator returns a new [`Headers`]; the receiver is never touched.
//! That is what lets one container be shared between a request, the
//! responses built from it, and any number of concurrent pipeline branches.
//!
//! ```rust
//! use rxhttp::Headers;
//!
//! let h = Headers::new().add("Accept", "text/html").add("accept", ["application/json"]);
//! assert!(h.has("ACCEPT"));
//! assert_eq!(h.get_value("accept").as_deref(), Some("text/html; application/json"));
//! ```

use std::fmt;
use std::sync::Arc;

/// Separator used when several values of one header are read as a single string.
const JOIN: &str = "; ";

/// Header map keyed by lower-cased name, values kept in insertion order.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Arc<Vec<(String, Vec<String>)>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a container from generic `(name, value-or-values)` pairs.
    ///
    /// Pairs sharing a name (in any case) are merged in order.
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: IntoHeaderValues,
    {
        let mut entries = Vec::new();
        for (name, values) in pairs {
            append(&mut entries, name.as_ref(), values.into_header_values());
        }
        Self { entries: Arc::new(entries) }
    }

    /// Builds a container from a raw transport header set.
    ///
    /// Values that are not visible ASCII collapse to `""` rather than being
    /// dropped, so presence checks still see the header.
    pub fn from_header_map(map: &http::HeaderMap) -> Self {
        let mut entries = Vec::with_capacity(map.keys_len());
        for name in map.keys() {
            let values = map
                .get_all(name)
                .iter()
                .map(|v| v.to_str().unwrap_or_default().to_owned())
                .collect();
            append(&mut entries, name.as_str(), values);
        }
        Self { entries: Arc::new(entries) }
    }

    /// Returns a new container with `values` appended under `name`.
    pub fn add(&self, name: &str, values: impl IntoHeaderValues) -> Self {
        let mut entries = (*self.entries).clone();
        append(&mut entries, name, values.into_header_values());
        Self { entries: Arc::new(entries) }
    }

    /// Returns a new container where `name` holds exactly `values`.
    pub fn set(&self, name: &str, values: impl IntoHeaderValues) -> Self {
        let norm = name.to_ascii_lowercase();
        let values = values.into_header_values();
        let mut entries = (*self.entries).clone();
        match entries.iter_mut().find(|(k, _)| *k == norm) {
            Some((_, existing)) => *existing = values,
            None => entries.push((norm, values)),
        }
        Self { entries: Arc::new(entries) }
    }

    /// Returns a new container without `name`.
    pub fn remove(&self, name: &str) -> Self {
        let norm = name.to_ascii_lowercase();
        let entries = self.entries.iter().filter(|(k, _)| *k != norm).cloned().collect();
        Self { entries: Arc::new(entries) }
    }

    /// Case-insensitive presence check.
    pub fn has(&self, name: &str) -> bool {
        self.get_all(name).is_some()
    }

    /// Whether `value` is one of the values stored under `name`.
    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.get_all(name).is_some_and(|vals| vals.iter().any(|v| v == value))
    }

    /// All values stored under `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// The values under `name` joined with `"; "`.
    pub fn get_value(&self, name: &str) -> Option<String> {
        self.get_all(name).map(|vals| vals.join(JOIN))
    }

    /// `(name, values)` pairs, names lower-cased.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Collapses to one string per name, for wire serialisation.
    pub fn build(&self) -> Vec<(String, String)> {
        self.entries.iter().map(|(k, v)| (k.clone(), v.join(JOIN))).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn append(entries: &mut Vec<(String, Vec<String>)>, name: &str, values: Vec<String>) {
    let norm = name.to_ascii_lowercase();
    match entries.iter_mut().find(|(k, _)| *k == norm) {
        Some((_, existing)) => existing.extend(values),
        None => entries.push((norm, values)),
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|(k, v)| (k, v))).finish()
    }
}

// ── IntoHeaderValues ──────────────────────────────────────────────────────────

/// Anything accepted as "a value or a list of values" for one header.
pub trait IntoHeaderValues {
    fn into_header_values(self) -> Vec<String>;
}

impl IntoHeaderValues for &str {
    fn into_header_values(self) -> Vec<String> {
        vec![self.to_owned()]
    }
}

impl IntoHeaderValues for String {
    fn into_header_values(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoHeaderValues for &String {
    fn into_header_values(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl IntoHeaderValues for Vec<String> {
    fn into_header_values(self) -> Vec<String> {
        self
    }
}

impl IntoHeaderValues for Vec<&str> {
    fn into_header_values(self) -> Vec<String> {
        self.into_iter().map(str::to_owned).collect()
    }
}

impl IntoHeaderValues for &[&str] {
    fn into_header_values(self) -> Vec<String> {
        self.iter().map(|s| (*s).to_owned()).collect()
    }
}

impl<const N: usize> IntoHeaderValues for [&str; N] {
    fn into_header_values(self) -> Vec<String> {
        self.iter().map(|s| (*s).to_owned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        for name in ["Content-Type", "content-type", "CONTENT-TYPE", "cOnTeNt-TyPe"] {
            let h = Headers::new().add(name, "text/plain");
            assert!(h.has(&name.to_lowercase()));
            assert!(h.has(&name.to_uppercase()));
            assert!(h.has_value("Content-type", "text/plain"));
        }
    }

    #[test]
    fn add_appends_and_set_replaces() {
        let h = Headers::new().add("X-A", "1").add("x-a", ["2", "3"]);
        assert_eq!(h.get_all("x-a").unwrap(), ["1", "2", "3"]);
        assert_eq!(h.get_value("X-A").unwrap(), "1; 2; 3");

        let replaced = h.set("X-A", "only");
        assert_eq!(replaced.get_value("x-a").unwrap(), "only");
        assert_eq!(h.get_value("x-a").unwrap(), "1; 2; 3");
    }

    #[test]
    fn mutators_leave_original_untouched() {
        let base = Headers::new().add("a", "1");
        let added = base.add("b", "2");
        let removed = added.remove("A");
        assert!(!base.has("b"));
        assert!(added.has("a") && added.has("b"));
        assert!(!removed.has("a"));
        assert_eq!(base.len(), 1);
    }

    #[test]
    fn has_value_checks_membership() {
        let h = Headers::new().add("vary", ["accept", "origin"]);
        assert!(h.has_value("Vary", "origin"));
        assert!(!h.has_value("vary", "cookie"));
        assert!(!h.has_value("missing", "x"));
        assert_eq!(h.get_value("missing"), None);
    }

    #[test]
    fn raw_transport_headers_keep_every_value() {
        let mut map = http::HeaderMap::new();
        map.append("cookie", http::HeaderValue::from_static("a=1"));
        map.append("cookie", http::HeaderValue::from_static("b=2"));
        map.insert("x-bin", http::HeaderValue::from_bytes(b"\xff").unwrap());

        let h = Headers::from_header_map(&map);
        assert_eq!(h.get_value("Cookie").unwrap(), "a=1; b=2");
        assert_eq!(h.get_value("x-bin").unwrap(), "");
    }

    #[test]
    fn build_collapses_per_name_in_order() {
        let h = Headers::from_pairs([("B", vec!["1", "2"]), ("a", vec!["x"])]);
        assert_eq!(
            h.build(),
            vec![("b".to_owned(), "1; 2".to_owned()), ("a".to_owned(), "x".to_owned())]
        );
    }
}
