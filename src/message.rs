// src/message.rs
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Comparable identity of a message type.
///
/// Every step declares the token(s) it works with and the value slot a path
/// threads between steps carries one. Equality is by `TypeId`; the name is
/// kept purely for diagnostics and reports.
#[derive(Debug, Copy, Clone)]
pub struct TypeToken {
    id: TypeId,
    name: &'static str,
}

impl TypeToken {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeToken {}

impl Hash for TypeToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The current-value slot of a path walk.
///
/// Starts out holding the raw payload; each successful decode step replaces
/// it with the decoded value and its token. Handle steps borrow it through
/// `downcast_ref` after an eligibility check on the token.
pub struct AnyMessage {
    token: TypeToken,
    value: Box<dyn Any + Send + Sync>,
}

impl AnyMessage {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            token: TypeToken::of::<T>(),
            value: Box::new(value),
        }
    }

    pub fn token(&self) -> TypeToken {
        self.token
    }

    /// Borrow the value as `T`. `None` when the token does not match.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyMessage")
            .field("token", &self.token.name)
            .finish()
    }
}
