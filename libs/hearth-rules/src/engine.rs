//! Rule Engine - trigger matching and handler dispatch
//!
//! Owns the registry of execution contexts, matches incoming notifications
//! against them, evaluates preconditions against current registry state and
//! invokes the bound handlers. Cron and time-of-day contexts are handed to
//! the timer executor, whose fires re-enter the same invocation path.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::event::{PlatformEvent, RuleEvent};
use crate::subscriber::EventSink;
use crate::timer::TimerExecutor;
use async_trait::async_trait;
use dashmap::DashMap;
use hearth_registry::StateRegistry;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// How matched handlers are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvocationMode {
    /// Inline await on the caller - deterministic, chiefly for tests
    Direct,
    /// Dispatch to the tokio worker pool - chiefly for production
    #[default]
    Spawned,
}

/// Trigger-matching and dispatch engine
///
/// Contexts are immutable `Arc`s; the match loop works on a snapshot of the
/// context list, so no lock is held across an await and concurrent entry
/// from the subscriber, timer tasks and spawned handlers is safe.
pub struct RuleEngine {
    registry: Arc<dyn StateRegistry>,
    mode: InvocationMode,
    /// Registered contexts in registration order
    contexts: RwLock<Vec<Arc<ExecutionContext>>>,
    /// Watch indexes answering the subscriber's existence filter
    watched_items: DashMap<String, usize>,
    watched_channels: DashMap<String, usize>,
    watched_things: DashMap<String, usize>,
    watched_levels: DashMap<u8, usize>,
    /// Group-scoped contexts cannot enumerate member names up front, so any
    /// of them widens the item filter to every item
    group_scoped: AtomicUsize,
    timers: Arc<TimerExecutor>,
}

impl RuleEngine {
    pub fn new(registry: Arc<dyn StateRegistry>, mode: InvocationMode) -> Arc<Self> {
        Arc::new(Self {
            registry,
            mode,
            contexts: RwLock::new(Vec::new()),
            watched_items: DashMap::new(),
            watched_channels: DashMap::new(),
            watched_things: DashMap::new(),
            watched_levels: DashMap::new(),
            group_scoped: AtomicUsize::new(0),
            timers: Arc::new(TimerExecutor::new()),
        })
    }

    /// The engine's timer executor (handlers capture this to create named
    /// timers)
    pub fn timers(&self) -> Arc<TimerExecutor> {
        Arc::clone(&self.timers)
    }

    /// Register one execution context
    ///
    /// Event-driven contexts join the match list and watch indexes;
    /// scheduled contexts go straight to the timer executor. Invalid cron
    /// expressions are rejected here, at registration time.
    pub fn add(self: &Arc<Self>, context: ExecutionContext) -> Result<()> {
        let context = Arc::new(context);
        debug!(context = %context.describe(), tags = ?context.tags(), "registering execution context");

        if context.is_scheduled() {
            // A rejected expression must leave no trace in the watch indexes
            self.timers
                .schedule_cron(Arc::clone(&context), Arc::downgrade(self))?;
        } else {
            self.index_context(&context);
            self.contexts.write().push(Arc::clone(&context));
        }

        for precondition in context.preconditions() {
            bump(&self.watched_items, precondition.target.clone());
        }
        Ok(())
    }

    /// Register a whole rule: every (context, handler) pair its
    /// introspection produced
    pub fn add_rule(
        self: &Arc<Self>,
        contexts: impl IntoIterator<Item = ExecutionContext>,
    ) -> Result<()> {
        for context in contexts {
            self.add(context)?;
        }
        Ok(())
    }

    fn index_context(&self, context: &ExecutionContext) {
        use crate::context::Trigger;
        match context.trigger() {
            Trigger::ReceivedCommand | Trigger::ReceivedUpdate | Trigger::Changed { .. } => {
                if context.member_of().is_some() {
                    self.group_scoped.fetch_add(1, Ordering::Relaxed);
                } else {
                    bump(&self.watched_items, context.target().to_string());
                }
            },
            Trigger::ChannelTriggered => {
                bump(&self.watched_channels, context.target().to_string());
            },
            Trigger::ThingStatusChanged { .. } => {
                bump(&self.watched_things, context.target().to_string());
            },
            Trigger::StartLevel { level } => {
                bump(&self.watched_levels, *level);
            },
            // Scheduled triggers never enter the match list
            Trigger::Cron { .. } | Trigger::TimeOfDay { .. } => {},
        }
    }

    /// Clear all registered contexts and cancel all live timers
    ///
    /// Used between test runs and on rule-source reloads; cancelling timers
    /// here prevents ghost invocations against a stale rule object.
    pub fn reset(&self) {
        self.contexts.write().clear();
        self.watched_items.clear();
        self.watched_channels.clear();
        self.watched_things.clear();
        self.watched_levels.clear();
        self.group_scoped.store(0, Ordering::Relaxed);
        self.timers.cancel_all();
        info!("rule engine reset");
    }

    /// Number of registered event-driven contexts
    pub fn context_count(&self) -> usize {
        self.contexts.read().len()
    }

    /// Match a notification against all compatible contexts
    ///
    /// Every context whose structural identity and value condition pass gets
    /// its preconditions evaluated against *current* registry state; all
    /// survivors are invoked in registration order. There is no
    /// first-match-wins: overlapping contexts all fire.
    pub async fn on_event(&self, event: &PlatformEvent) -> Result<()> {
        let snapshot: Vec<Arc<ExecutionContext>> = self.contexts.read().clone();
        for context in snapshot {
            if !context.matches(event, self.registry.as_ref()).await {
                continue;
            }
            if !self.preconditions_hold(&context).await {
                continue;
            }
            let payload = context.event_payload(event);
            self.invoke(context, payload).await;
        }
        Ok(())
    }

    /// Evaluate every precondition of a context against current state
    pub async fn preconditions_hold(&self, context: &ExecutionContext) -> bool {
        for precondition in context.preconditions() {
            if !precondition.holds(self.registry.as_ref()).await {
                debug!(
                    context = %context.describe(),
                    precondition = %precondition.describe(),
                    "precondition not met"
                );
                return false;
            }
        }
        true
    }

    /// Invoke one handler with one payload
    ///
    /// An error escaping the handler is caught and logged with the context
    /// identity; it never propagates to the dispatching thread.
    pub async fn invoke(&self, context: Arc<ExecutionContext>, event: RuleEvent) {
        match self.mode {
            InvocationMode::Direct => run_handler(context, event).await,
            InvocationMode::Spawned => {
                tokio::spawn(run_handler(context, event));
            },
        }
    }

    /// Whether any context (or precondition) watches this item name
    pub fn is_watching_item(&self, name: &str) -> bool {
        self.group_scoped.load(Ordering::Relaxed) > 0 || self.watched_items.contains_key(name)
    }

    pub fn is_watching_channel(&self, channel: &str) -> bool {
        self.watched_channels.contains_key(channel)
    }

    pub fn is_watching_thing(&self, thing: &str) -> bool {
        self.watched_things.contains_key(thing)
    }

    pub fn is_watching_start_level(&self, level: u8) -> bool {
        self.watched_levels.contains_key(&level)
    }
}

fn bump<K: std::hash::Hash + Eq>(index: &DashMap<K, usize>, key: K) {
    *index.entry(key).or_insert(0) += 1;
}

async fn run_handler(context: Arc<ExecutionContext>, event: RuleEvent) {
    debug!(context = %context.describe(), trigger = %event.trigger, "invoking handler");
    if let Err(e) = context.run(event).await {
        error!(context = %context.describe(), error = %e, "rule handler failed");
    }
}

#[async_trait]
impl EventSink for RuleEngine {
    fn wants_item(&self, name: &str) -> bool {
        self.is_watching_item(name)
    }

    fn wants_channel(&self, channel: &str) -> bool {
        self.is_watching_channel(channel)
    }

    fn wants_thing(&self, thing: &str) -> bool {
        self.is_watching_thing(thing)
    }

    fn wants_start_level(&self, level: u8) -> bool {
        self.is_watching_start_level(level)
    }

    async fn notify(&self, event: &PlatformEvent) -> anyhow::Result<()> {
        if event.is_registry_event() {
            // Registry shape changes carry no trigger semantics here; rule
            // reload reacts to them upstream
            debug!(event = ?event, "registry event observed");
            return Ok(());
        }
        self.on_event(event).await?;
        Ok(())
    }
}
