//! Ordered listener registry with isolated invocation
//!
//! Listeners are invoked in registration order; a listener that panics is
//! caught and logged so the remaining listeners and the emitting loop are
//! unaffected.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use tracing::error;

type Listener<A> = Box<dyn Fn(&A) + Send>;

/// A named list of listeners for one event type.
pub struct CallbackRegistry<A> {
    name: &'static str,
    listeners: Mutex<Vec<Listener<A>>>,
}

impl<A> CallbackRegistry<A> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Append a listener; invocation order is registration order.
    pub fn register<F>(&self, listener: F)
    where
        F: Fn(&A) + Send + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(listener));
    }

    /// Invoke every listener with the event, isolating failures.
    pub fn emit(&self, event: &A) {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for (index, listener) in listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!("{} callback #{} panicked, continuing", self.name, index);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
