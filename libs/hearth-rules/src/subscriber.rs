//! Event subscriber - bridge between host notifications and the engine
//!
//! Receives raw platform events, filters them against each sink's declared
//! interest and fans them out. Delivery can be paused; buffered events are
//! replayed in arrival order on resume (used while rule sources reload so
//! no notification is lost or reordered).

use crate::event::PlatformEvent;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receiver of classified platform events
///
/// The interest methods are an existence filter: a `false` answer lets the
/// subscriber skip delivery entirely. Registry shape events (add/remove/
/// update) bypass the filter and reach every sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn wants_item(&self, name: &str) -> bool;
    fn wants_channel(&self, channel: &str) -> bool;
    fn wants_thing(&self, thing: &str) -> bool;
    fn wants_start_level(&self, level: u8) -> bool;

    /// Deliver one event; the sink decides what to do with it
    async fn notify(&self, event: &PlatformEvent) -> anyhow::Result<()>;
}

/// Pausable fan-out of platform events to registered sinks
#[derive(Default)]
pub struct EventSubscriber {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    paused: AtomicBool,
    queue: Mutex<VecDeque<PlatformEvent>>,
}

impl EventSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Accept one event: buffer while paused, otherwise dispatch now
    ///
    /// The paused check runs under the queue lock, so an event observed as
    /// paused always lands behind everything already buffered.
    pub async fn receive(&self, event: PlatformEvent) {
        {
            let mut queue = self.queue.lock();
            if self.paused.load(Ordering::Acquire) {
                debug!(event = ?event, "buffering event while paused");
                queue.push_back(event);
                return;
            }
        }
        if let Err(e) = self.dispatch(&event).await {
            warn!(event = ?event, error = %e, "event dispatch failed");
        }
    }

    /// Stop delivering; subsequent events queue in arrival order
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            info!("event delivery paused");
        }
    }

    /// Resume delivery after draining the queue in arrival order
    ///
    /// Delivery stays paused until the queue is empty, so events arriving
    /// mid-drain (including reentrant ones from a sink) queue behind the
    /// buffered backlog instead of overtaking it. A dispatch error for one
    /// buffered event is logged and the drain continues; nothing is
    /// redelivered.
    pub async fn resume(&self) {
        if !self.paused.load(Ordering::Acquire) {
            return;
        }
        info!(queued = self.queued_len(), "event delivery resumed");
        loop {
            // Lock scope stays synchronous; dispatch happens outside it
            let next = {
                let mut queue = self.queue.lock();
                match queue.pop_front() {
                    Some(event) => Some(event),
                    None => {
                        // Unpause under the same lock that guards buffering,
                        // closing the window between the emptiness check and
                        // the flag flip
                        self.paused.store(false, Ordering::Release);
                        None
                    },
                }
            };
            let Some(event) = next else { break };
            if let Err(e) = self.dispatch(&event).await {
                warn!(event = ?event, error = %e, "buffered event dispatch failed");
            }
        }
    }

    /// Number of events currently buffered
    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Fan one event out to every interested sink, in registration order
    ///
    /// All sinks are attempted even if one fails; the first error is
    /// reported after the pass.
    async fn dispatch(&self, event: &PlatformEvent) -> anyhow::Result<()> {
        let sinks: Vec<Arc<dyn EventSink>> = self.sinks.read().clone();
        let mut first_error = None;
        for sink in sinks {
            if !interested(sink.as_ref(), event) {
                continue;
            }
            if let Err(e) = sink.notify(event).await {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn interested(sink: &dyn EventSink, event: &PlatformEvent) -> bool {
    match event {
        // Registry shape changes always go through (rule reload hooks)
        PlatformEvent::ItemAdded { .. }
        | PlatformEvent::ItemRemoved { .. }
        | PlatformEvent::ItemUpdated { .. }
        | PlatformEvent::ThingAdded { .. }
        | PlatformEvent::ThingRemoved { .. } => true,
        PlatformEvent::ItemCommand { item, .. }
        | PlatformEvent::ItemStateUpdated { item, .. }
        | PlatformEvent::ItemStateChanged { item, .. } => sink.wants_item(item),
        PlatformEvent::GroupStateChanged { group, .. } => sink.wants_item(group),
        PlatformEvent::ChannelTriggered { channel, .. } => sink.wants_channel(channel),
        PlatformEvent::ThingStatusChanged { thing, .. } => sink.wants_thing(thing),
        PlatformEvent::StartLevel { level } => sink.wants_start_level(*level),
    }
}
