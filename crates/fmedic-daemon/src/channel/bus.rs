//! Typed event bus for relayed device events
//!
//! Connection tasks publish into one unbounded queue; a single dispatcher
//! task drains it and invokes subscribers. Handlers therefore run one at a
//! time, in arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc;

use fmedic_core::prelude::*;
use fmedic_core::{ChannelEvent, EventName};

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;
type HandlerMap = HashMap<EventName, Vec<Handler>>;

/// Publish/subscribe over the closed [`EventName`] set
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<Mutex<HandlerMap>>,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl EventBus {
    /// Create the bus and spawn its dispatcher.
    ///
    /// The dispatcher exits once every clone of the bus is dropped.
    pub fn new() -> Self {
        let handlers: Arc<Mutex<HandlerMap>> = Arc::default();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(dispatch(rx, Arc::clone(&handlers)));

        Self { handlers, tx }
    }

    /// Register `handler` for every relayed `name` event
    pub fn subscribe<F>(&self, name: EventName, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        lock(&self.handlers)
            .entry(name)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Merge the given events into one ordered stream
    pub fn listen(&self, names: &[EventName]) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for &name in names {
            let tx = tx.clone();
            self.subscribe(name, move |data| {
                let _ = tx.send(ChannelEvent::new(name, data.clone()));
            });
        }
        rx
    }

    /// Queue an event for dispatch. Never blocks.
    pub fn publish(&self, event: ChannelEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event bus dispatcher gone, dropping event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(handlers: &Mutex<HandlerMap>) -> MutexGuard<'_, HandlerMap> {
    handlers.lock().unwrap_or_else(|e| e.into_inner())
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<ChannelEvent>, handlers: Arc<Mutex<HandlerMap>>) {
    while let Some(event) = rx.recv().await {
        // Snapshot so a handler may subscribe without deadlocking
        let targets: Vec<Handler> = lock(&handlers)
            .get(&event.name)
            .cloned()
            .unwrap_or_default();

        trace!("Dispatching {} to {} handler(s)", event.name, targets.len());
        for handler in targets {
            handler(&event.data);
        }
    }
    debug!("Event bus dispatcher stopped");
}
