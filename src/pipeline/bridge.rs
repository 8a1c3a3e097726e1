//! Thread boundary between running items and the host.
//!
//! Items never call into the host directly. Lifecycle transitions, iteration
//! failures and context-menu requests are pushed as [`ItemEvent`]s onto a
//! bounded crossbeam channel; the host drains them at its own pace (for
//! example once per UI frame).

use crate::pipeline::id::ItemId;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// Events sent from items to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent {
    /// The item's execution context started iterating.
    Started { item: ItemId },
    /// The item's execution context has fully quiesced.
    Stopped { item: ItemId },
    /// One iteration failed; nothing from it was published.
    IterationFailed { item: ItemId, message: String },
    /// The item stopped iterating after a failure and waits for stop/restart.
    Faulted { item: ItemId, message: String },
    /// The user picked "Configure" from the item's context menu.
    ConfigureRequested { item: ItemId },
}

impl ItemEvent {
    pub fn item(&self) -> ItemId {
        match self {
            ItemEvent::Started { item }
            | ItemEvent::Stopped { item }
            | ItemEvent::IterationFailed { item, .. }
            | ItemEvent::Faulted { item, .. }
            | ItemEvent::ConfigureRequested { item } => *item,
        }
    }
}

/// Sending half handed to every item.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<ItemEvent>,
}

impl EventSink {
    /// Non-blocking send; an item thread never waits on a slow host.
    pub fn emit(&self, event: ItemEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::trace!(?event, "event channel full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Host-side handle for receiving item events.
pub struct EventBridge {
    rx: Receiver<ItemEvent>,
}

impl EventBridge {
    /// Create a new bridge pair: `(bridge_for_host, sink_for_items)`.
    pub fn new(capacity: usize) -> (Self, EventSink) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { rx }, EventSink { tx })
    }

    /// Drain all pending events.
    pub fn drain(&self) -> Vec<ItemEvent> {
        self.rx.try_iter().collect()
    }

    /// Try to receive a single event without blocking.
    pub fn try_recv(&self) -> Option<ItemEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ItemEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Wait until an event matching `pred` arrives, discarding others.
    pub fn wait_for(
        &self,
        timeout: Duration,
        mut pred: impl FnMut(&ItemEvent) -> bool,
    ) -> Option<ItemEvent> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(std::time::Instant::now())?;
            let event = self.recv_timeout(remaining)?;
            if pred(&event) {
                return Some(event);
            }
        }
    }
}
