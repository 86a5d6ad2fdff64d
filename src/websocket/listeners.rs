use crate::error::{ReadClientError, Result};
use std::sync::Arc;

/// Callback registered for one event class. Identity is the `Arc` allocation.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

/// Bounded, ordered set of listeners deduplicated by identity.
pub struct ListenerRegistry<E> {
    listeners: Vec<Listener<E>>,
    capacity: usize,
}

impl<E> ListenerRegistry<E> {
    pub fn new(capacity: usize) -> Self {
        Self {
            listeners: Vec::new(),
            capacity,
        }
    }

    /// Adds `listener` unless it is already registered.
    ///
    /// Fails with [`ReadClientError::ListenerLimitError`] when the registry is full.
    pub fn add(&mut self, listener: Listener<E>) -> Result<()> {
        if self.contains(&listener) {
            return Ok(());
        }
        if self.listeners.len() >= self.capacity {
            return Err(ReadClientError::ListenerLimitError {
                limit: self.capacity,
            });
        }
        self.listeners.push(listener);
        Ok(())
    }

    pub fn remove(&mut self, listener: &Listener<E>) {
        if let Some(idx) = self.position(listener) {
            self.listeners.remove(idx);
        }
    }

    pub fn contains(&self, listener: &Listener<E>) -> bool {
        self.position(listener).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Listeners in registration order, cloned for deferred invocation.
    pub fn snapshot(&self) -> Vec<Listener<E>> {
        self.listeners.clone()
    }

    fn position(&self, listener: &Listener<E>) -> Option<usize> {
        self.listeners
            .iter()
            .position(|registered| same_listener(registered, listener))
    }
}

// Compare data pointers only; vtable pointers for the same closure may differ
// across codegen units.
fn same_listener<E>(a: &Listener<E>, b: &Listener<E>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener() -> Listener<u32> {
        Arc::new(|_: &u32| {})
    }

    #[test]
    fn test_add_is_idempotent_by_identity() {
        let mut registry = ListenerRegistry::new(100);
        let a = listener();
        registry.add(Arc::clone(&a)).unwrap();
        registry.add(Arc::clone(&a)).unwrap();
        assert_eq!(registry.len(), 1);

        // A different allocation of an identical closure is a distinct listener.
        registry.add(listener()).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut registry = ListenerRegistry::new(100);
        let a = listener();
        registry.add(Arc::clone(&a)).unwrap();
        registry.remove(&listener());
        assert_eq!(registry.len(), 1);

        registry.remove(&a);
        assert!(registry.is_empty());
        registry.remove(&a);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut registry = ListenerRegistry::new(100);
        for _ in 0..99 {
            registry.add(listener()).unwrap();
        }
        let last = listener();
        assert!(registry.add(Arc::clone(&last)).is_ok());
        assert_eq!(registry.len(), 100);

        let err = registry.add(listener()).unwrap_err();
        assert!(matches!(err, ReadClientError::ListenerLimitError { limit: 100 }));
        assert_eq!(registry.len(), 100);

        // Re-adding a registered listener to a full registry is still a no-op.
        assert!(registry.add(last).is_ok());
    }

    #[test]
    fn test_snapshot_keeps_registration_order() {
        let mut registry = ListenerRegistry::new(10);
        let a = listener();
        let b = listener();
        registry.add(Arc::clone(&b)).unwrap();
        registry.add(Arc::clone(&a)).unwrap();
        let snapshot = registry.snapshot();
        assert!(same_listener(&snapshot[0], &b));
        assert!(same_listener(&snapshot[1], &a));
    }
}
