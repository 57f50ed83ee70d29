//! Listener registry for server-pushed events.
//!
//! Listeners are kept per event name in registration order and invoked
//! synchronously from the socket channel task, in the order frames arrive.
//! A listener that returns an error or panics is logged and skipped; the
//! remaining listeners still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::lock;

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A registered callback. Keep the handle returned by
/// [`ListenerRegistry::on`] to remove it again with [`ListenerRegistry::off`].
pub type Listener = Arc<dyn Fn(&Event) -> Result<(), ListenerError> + Send + Sync>;

/// A named event and its positional arguments, e.g. `tx` with the
/// transaction JSON, or the synthetic `connect`/`disconnect`/`error`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub args: Vec<Value>,
}

impl Event {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`, after any existing listeners.
    pub fn on<F>(&self, event: &str, callback: F) -> Listener
    where
        F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(callback);
        self.add(event, Arc::clone(&listener));
        listener
    }

    pub fn add(&self, event: &str, listener: Listener) {
        lock(&self.listeners)
            .entry(event.to_owned())
            .or_default()
            .push(listener);
    }

    /// Remove the first registration of `listener` for `event`.
    pub fn off(&self, event: &str, listener: &Listener) -> bool {
        let mut listeners = lock(&self.listeners);
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };
        let Some(index) = entries.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return false;
        };
        entries.remove(index);
        if entries.is_empty() {
            listeners.remove(event);
        }
        true
    }

    /// Forward every `event` into a channel.
    pub fn subscribe(&self, event: &str) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on(event, move |ev| {
            // A dropped receiver just stops caring about this event.
            let _ = tx.send(ev.clone());
            Ok(())
        });
        rx
    }

    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.listeners).get(event).map_or(0, Vec::len)
    }

    /// Deliver `event` to its listeners in registration order.
    ///
    /// Returns how many listeners completed without error.
    pub fn emit(&self, event: &Event) -> usize {
        // Snapshot so callbacks may register or remove listeners.
        let snapshot: Vec<Listener> = lock(&self.listeners)
            .get(&event.name)
            .cloned()
            .unwrap_or_default();
        trace!(event = %event.name, listeners = snapshot.len(), "dispatch event");

        let mut delivered = 0;
        for (index, listener) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    warn!(event = %event.name, listener = index, error = %err, "event listener failed");
                }
                Err(_) => {
                    warn!(event = %event.name, listener = index, "event listener panicked");
                }
            }
        }
        delivered
    }
}
