// src/resolver.rs
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use crate::message::TypeToken;

/// Raised when a capability instance cannot be obtained from the resolver.
#[derive(Debug, Clone, Error)]
#[error("no service registered for `{type_name}`")]
pub struct ResolutionError {
    pub type_name: &'static str,
}

/// Hands out shared capability instances by type.
///
/// Passed into the host at construction; paths resolve their filters,
/// decoders and handlers through it exactly once, at build time. Instances
/// come back as `Arc`s so every path shares the same object.
pub trait ServiceResolver: Send + Sync {
    fn resolve_entry(
        &self,
        token: TypeToken,
    ) -> Result<Arc<dyn Any + Send + Sync>, ResolutionError>;
}

/// Typed resolution on top of the object-safe trait.
pub trait ServiceResolverExt: ServiceResolver {
    fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolutionError> {
        let entry = self.resolve_entry(TypeToken::of::<T>())?;
        entry.downcast::<T>().map_err(|_| ResolutionError {
            type_name: type_name::<T>(),
        })
    }
}

impl<S: ServiceResolver + ?Sized> ServiceResolverExt for S {}

/// The default resolver: a concurrent map from type id to shared instance,
/// populated inside `configure_services` callbacks.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a shared instance of `T`, replacing any previous one.
    pub fn register<T: Send + Sync + 'static>(&self, instance: T) {
        self.register_arc(Arc::new(instance));
    }

    /// Register an instance the caller already shares.
    pub fn register_arc<T: Send + Sync + 'static>(&self, instance: Arc<T>) {
        self.entries.insert(TypeId::of::<T>(), instance);
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ServiceResolver for ServiceRegistry {
    fn resolve_entry(
        &self,
        token: TypeToken,
    ) -> Result<Arc<dyn Any + Send + Sync>, ResolutionError> {
        self.entries
            .get(&token.id())
            .map(|entry| entry.value().clone())
            .ok_or(ResolutionError {
                type_name: token.name(),
            })
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Greeter {
        greeting: String,
    }

    #[test]
    fn test_register_and_resolve_shares_one_instance() {
        let registry = ServiceRegistry::new();
        registry.register(Greeter {
            greeting: "hi".to_string(),
        });

        let first = registry.resolve::<Greeter>().expect("resolve");
        let second = registry.resolve::<Greeter>().expect("resolve");
        assert_eq!(first.greeting, "hi");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_resolving_an_unregistered_type_fails() {
        let registry = ServiceRegistry::new();
        let err = registry.resolve::<Greeter>().unwrap_err();
        assert!(err.type_name.ends_with("Greeter"));
    }

    #[test]
    fn test_register_replaces_the_previous_instance() {
        let registry = ServiceRegistry::new();
        registry.register(Greeter {
            greeting: "first".to_string(),
        });
        registry.register(Greeter {
            greeting: "second".to_string(),
        });

        assert_eq!(registry.len(), 1);
        let resolved = registry.resolve::<Greeter>().expect("resolve");
        assert_eq!(resolved.greeting, "second");
    }
}
