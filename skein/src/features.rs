//! Request-scoped typed feature bags.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Typed key-value store owned by one request; the value's type is its key.
///
/// Features carry local, never-transmitted context between the caller,
/// middlewares and dispatchers.
#[derive(Default)]
pub struct FeatureCollection {
    features: HashMap<TypeId, Box<dyn Any>>,
}

impl FeatureCollection {
    /// An empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, returning the previous value of the same type.
    pub fn set<T: 'static>(&mut self, value: T) -> Option<T> {
        self.features
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// The value of type `T`, if any.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.features
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Mutable access to the value of type `T`.
    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.features
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Remove and return the value of type `T`.
    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.features
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Whether a value of type `T` is present.
    pub fn contains<T: 'static>(&self) -> bool {
        self.features.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether no feature is stored.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl fmt::Debug for FeatureCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureCollection")
            .field("len", &self.features.len())
            .finish()
    }
}

/// Time budget of an invocation, counted from the moment it is invoked.
///
/// On an outgoing request it bounds the call and travels to the server as the
/// `Deadline` field; on an incoming request it holds the budget the server
/// received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(pub Duration);

/// Address of the peer that sent an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress(pub String);
