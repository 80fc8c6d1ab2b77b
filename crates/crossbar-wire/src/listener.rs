//! Event listener table.

use crate::registry::Registry;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A local event callback. Callbacks are compared by identity.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Wrap a closure into an [`EventCallback`].
pub fn callback<F>(f: F) -> EventCallback
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_callback(a: &EventCallback, b: &EventCallback) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Event name → callbacks in registration order.
pub(crate) struct ListenerTable {
    listeners: Mutex<HashMap<String, Vec<EventCallback>>>,
}

impl ListenerTable {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn add(&self, name: &str, callback: EventCallback) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.entry(name.to_string()).or_default().push(callback);
    }

    /// Remove every registration of `callback` under `name`.
    pub(crate) fn remove(&self, name: &str, callback: &EventCallback) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let Some(list) = listeners.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|cb| !same_callback(cb, callback));
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(name);
        }
        removed
    }

    /// Callbacks for `name`, cloned so they can run without the lock held.
    pub(crate) fn snapshot(&self, name: &str) -> Vec<EventCallback> {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.get(name).map_or(0, Vec::len)
    }
}

/// Handle returned by `Registry::add_event_listener`.
pub struct Subscription {
    registry: Registry,
    name: String,
    callback: EventCallback,
}

impl Subscription {
    pub(crate) fn new(registry: Registry, name: String, callback: EventCallback) -> Self {
        Self {
            registry,
            name,
            callback,
        }
    }

    /// The event this subscription listens to.
    pub fn event(&self) -> &str {
        &self.name
    }

    /// The registered callback.
    pub fn callback(&self) -> &EventCallback {
        &self.callback
    }

    /// Same as `registry.remove_event_listener(event, callback)`.
    pub fn unsubscribe(self) -> bool {
        self.registry.remove_event_listener(&self.name, &self.callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_snapshot_preserves_order() {
        let table = ListenerTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            table.add("saved", callback(move |_| seen.lock().unwrap().push(i)));
        }
        for cb in table.snapshot("saved") {
            cb(&json!(null));
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_remove_by_identity() {
        let table = ListenerTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let first = callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let second = callback(|_| {});

        table.add("saved", first.clone());
        table.add("saved", second.clone());
        assert_eq!(table.count("saved"), 2);

        assert!(table.remove("saved", &first));
        assert!(!table.remove("saved", &first));
        assert_eq!(table.count("saved"), 1);

        assert!(table.remove("saved", &second));
        assert_eq!(table.count("saved"), 0);
        assert!(table.snapshot("saved").is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_unknown_event() {
        let table = ListenerTable::new();
        assert!(!table.remove("nothing", &callback(|_| {})));
    }
}
