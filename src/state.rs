//! Immutable, type-keyed state bag carried by every [`Context`](crate::Context).
//!
//! Middleware hand data downstream by adding *fields* to the state. A field
//! is identified by its Rust type: [`Routed`](crate::Routed) is the router's
//! field, [`Cookies`](crate::middleware::cookies::Cookies) the cookie
//! middleware's, and so on. Applications define their own field types the same
//! way:
//!
//! ```rust
//! use rxhttp::State;
//!
//! #[derive(Debug, PartialEq)]
//! struct UserId(u64);
//!
//! let state = State::new().with(UserId(7));
//! assert_eq!(state.get::<UserId>(), Some(&UserId(7)));
//! ```
//!
//! Inserting returns a new bag; the old one is left as it was. Merging is
//! shallow: values are shared between both bags, and on collision the newer
//! field shadows the older one.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
struct Field {
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

/// The state bag.
#[derive(Clone, Default)]
pub struct State {
    fields: Arc<HashMap<TypeId, Field>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a bag that additionally holds `value`, replacing any field of
    /// the same type.
    pub fn with<T: Send + Sync + 'static>(&self, value: T) -> Self {
        let mut fields = (*self.fields).clone();
        fields.insert(TypeId::of::<T>(), Field { name: type_name::<T>(), value: Arc::new(value) });
        Self { fields: Arc::new(fields) }
    }

    /// Returns a bag holding the fields of both; `other` wins on collision.
    pub fn merge(&self, other: &State) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        let mut fields = (*self.fields).clone();
        fields.extend(other.fields.iter().map(|(k, v)| (*k, v.clone())));
        Self { fields: Arc::new(fields) }
    }

    /// Returns a bag without the field of type `T`.
    pub fn without<T: 'static>(&self) -> Self {
        if !self.contains::<T>() {
            return self.clone();
        }
        let mut fields = (*self.fields).clone();
        fields.remove(&TypeId::of::<T>());
        Self { fields: Arc::new(fields) }
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.fields.get(&TypeId::of::<T>()).and_then(|f| f.value.downcast_ref())
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.fields.contains_key(&TypeId::of::<T>())
    }

    /// Type names of the fields present, for diagnostics.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.values().map(|f| f.name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.field_names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct A(u32);
    #[derive(Debug, PartialEq)]
    struct B(&'static str);

    #[test]
    fn fields_accumulate() {
        let s = State::new().with(A(1)).with(B("b"));
        assert_eq!(s.get::<A>(), Some(&A(1)));
        assert_eq!(s.get::<B>(), Some(&B("b")));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn later_field_shadows_without_losing_others() {
        let first = State::new().with(A(1)).with(B("b"));
        let second = first.with(A(2));
        assert_eq!(second.get::<A>(), Some(&A(2)));
        assert_eq!(second.get::<B>(), Some(&B("b")));
        assert_eq!(first.get::<A>(), Some(&A(1)));
    }

    #[test]
    fn merge_prefers_incoming_fields() {
        let base = State::new().with(A(1));
        let incoming = State::new().with(A(9)).with(B("x"));
        let merged = base.merge(&incoming);
        assert_eq!(merged.get::<A>(), Some(&A(9)));
        assert!(merged.contains::<B>());
        assert!(!base.contains::<B>());
    }

    #[test]
    fn without_drops_one_field() {
        let s = State::new().with(A(1)).with(B("b")).without::<A>();
        assert!(!s.contains::<A>());
        assert!(s.contains::<B>());
    }
}
