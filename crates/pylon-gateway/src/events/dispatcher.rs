//! Event dispatcher
//!
//! Fans events out to registered listeners. Shards call `dispatch` after
//! the cache has applied the frame; each listener invocation then runs as
//! its own task, so a slow or failing listener never holds up the shard.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use pylon_core::EventKind;

use super::{Event, EventListener, FnListener};

/// Typed listener registry and fan-out
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<HashMap<EventKind, Vec<Arc<dyn EventListener>>>>,
    /// Receipt sequence for dispatched events
    sequence: AtomicU64,
    failures: Arc<AtomicU64>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a listener for one event kind
    ///
    /// `EventKind::Raw` listeners receive every dispatch, including names
    /// without a typed mapping.
    pub fn register(&self, kind: EventKind, listener: Arc<dyn EventListener>) {
        self.listeners.write().entry(kind).or_default().push(listener);
        tracing::debug!(kind = %kind, "Listener registered");
    }

    /// Register an async closure for one event kind
    pub fn on<F, Fut>(&self, kind: EventKind, f: F)
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(kind, Arc::new(FnListener::new(f)));
    }

    /// Number of listeners registered for a kind
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Listener invocations that errored or panicked so far
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get the next receipt sequence number
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Hand an event to its listeners
    ///
    /// Returns the number of listener tasks spawned.
    pub fn dispatch(&self, mut event: Event) -> usize {
        event.sequence = self.next_sequence();

        let targets: Vec<Arc<dyn EventListener>> = {
            let listeners = self.listeners.read();
            let typed = event.kind.and_then(|kind| listeners.get(&kind));
            let raw = if event.is_synthetic() {
                None
            } else {
                listeners.get(&EventKind::Raw)
            };
            typed
                .into_iter()
                .chain(raw)
                .flatten()
                .cloned()
                .collect()
        };

        if targets.is_empty() {
            tracing::trace!(event = %event.name, shard_id = event.shard_id, "No listeners for event");
            return 0;
        }

        let event = Arc::new(event);
        for listener in &targets {
            self.spawn_listener(Arc::clone(listener), Arc::clone(&event));
        }
        targets.len()
    }

    fn spawn_listener(&self, listener: Arc<dyn EventListener>, event: Arc<Event>) {
        let failures = Arc::clone(&self.failures);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(listener.on_event(Arc::clone(&event)))
                .catch_unwind()
                .await;

            let failure = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };

            failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                event = %event.name,
                shard_id = event.shard_id,
                sequence = event.sequence,
                error = %failure,
                "Listener failed"
            );
        });
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("EventDispatcher")
            .field("kinds", &listeners.len())
            .field("failures", &self.failures())
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
