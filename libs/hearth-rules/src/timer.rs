//! Timer / Cron Executor
//!
//! Schedules one-shot delayed callbacks and cron-recurring context
//! invocations:
//! - Named timers: create / create-or-replace / repeat / cancel / cancel-all
//! - Cron contexts: sleep until the next occurrence, re-check preconditions,
//!   then re-enter the engine's invocation path
//!
//! Callbacks run on their own spawned task, so cancelling a timer never
//! interrupts an in-flight callback. A callback error is caught and logged;
//! it stops neither the scheduler nor other timers.

use crate::context::ExecutionContext;
use crate::engine::RuleEngine;
use crate::error::{Result, RuleError};
use chrono::{DateTime, Local};
use cron::Schedule;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Timer callback - one async closure per named timer
pub type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`TimerCallback`]
pub fn timer_callback<F, Fut>(f: F) -> TimerCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

struct TimerEntry {
    handle: JoinHandle<()>,
    /// Monotonic id distinguishing this entry from any successor under the
    /// same name; a timer task only acts on the table while its own
    /// generation is still registered
    generation: u64,
}

/// Timer and cron scheduler
///
/// Named timers are tracked in a concurrent table so a handler can cancel a
/// timer created by an earlier invocation. Cron jobs are tracked separately
/// and torn down wholesale on `cancel_all`.
#[derive(Default)]
pub struct TimerExecutor {
    timers: Arc<DashMap<String, TimerEntry>>,
    cron_jobs: Mutex<Vec<JoinHandle<()>>>,
    generation: AtomicU64,
}

impl TimerExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a one-shot timer under a unique name
    ///
    /// Rejects the name with [`RuleError::TimerExists`] while a live handle
    /// holds it; a finished entry may be replaced.
    pub fn create_timer(
        &self,
        name: &str,
        delay: Duration,
        callback: TimerCallback,
    ) -> Result<()> {
        match self.timers.entry(name.to_string()) {
            Entry::Occupied(entry) if !entry.get().handle.is_finished() => {
                Err(RuleError::TimerExists(name.to_string()))
            },
            Entry::Occupied(mut entry) => {
                let generation = self.next_generation();
                entry.insert(TimerEntry {
                    handle: self.spawn_one_shot(name.to_string(), delay, callback, generation),
                    generation,
                });
                Ok(())
            },
            Entry::Vacant(entry) => {
                let generation = self.next_generation();
                entry.insert(TimerEntry {
                    handle: self.spawn_one_shot(name.to_string(), delay, callback, generation),
                    generation,
                });
                Ok(())
            },
        }
    }

    /// Cancel any prior handle under this name, then schedule
    pub fn create_or_replace_timer(
        &self,
        name: &str,
        delay: Duration,
        callback: TimerCallback,
    ) -> Result<()> {
        self.cancel_timer(name);
        self.create_timer(name, delay, callback)
    }

    /// Schedule a repeating timer firing `repeats` times at `interval`
    ///
    /// A zero repeat count is treated as one fire. The entry self-removes
    /// after the last fire; cancellation stops future fires.
    pub fn create_repeating_timer(
        &self,
        name: &str,
        interval: Duration,
        repeats: u32,
        callback: TimerCallback,
    ) -> Result<()> {
        match self.timers.entry(name.to_string()) {
            Entry::Occupied(entry) if !entry.get().handle.is_finished() => {
                Err(RuleError::TimerExists(name.to_string()))
            },
            Entry::Occupied(mut entry) => {
                let generation = self.next_generation();
                entry.insert(TimerEntry {
                    handle: self
                        .spawn_repeating(name.to_string(), interval, repeats, callback, generation),
                    generation,
                });
                Ok(())
            },
            Entry::Vacant(entry) => {
                let generation = self.next_generation();
                entry.insert(TimerEntry {
                    handle: self
                        .spawn_repeating(name.to_string(), interval, repeats, callback, generation),
                    generation,
                });
                Ok(())
            },
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    fn spawn_one_shot(
        &self,
        name: String,
        delay: Duration,
        callback: TimerCallback,
        generation: u64,
    ) -> JoinHandle<()> {
        let timers = Arc::clone(&self.timers);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Remove before firing so the callback may recreate the name.
            // The generation check silences this task if it was cancelled or
            // replaced after its sleep elapsed but before the abort landed:
            // it must neither fire a stale callback nor remove a successor
            // entry under the same name.
            if timers
                .remove_if(&name, |_, entry| entry.generation == generation)
                .is_some()
            {
                run_callback(name, callback);
            }
        })
    }

    fn spawn_repeating(
        &self,
        name: String,
        interval: Duration,
        repeats: u32,
        callback: TimerCallback,
        generation: u64,
    ) -> JoinHandle<()> {
        let timers = Arc::clone(&self.timers);
        tokio::spawn(async move {
            let fires = repeats.max(1);
            for _ in 0..fires {
                tokio::time::sleep(interval).await;
                // A cancelled or replaced entry silences this task even if
                // the abort has not landed yet
                let current = timers
                    .get(&name)
                    .map_or(false, |entry| entry.generation == generation);
                if !current {
                    return;
                }
                run_callback(name.clone(), Arc::clone(&callback));
            }
            timers.remove_if(&name, |_, entry| entry.generation == generation);
        })
    }

    /// Cancel a named timer, returning whether a handle existed
    ///
    /// A not-yet-fired one-shot never runs its callback; cancelling after
    /// the fire is a no-op.
    pub fn cancel_timer(&self, name: &str) -> bool {
        match self.timers.remove(name) {
            Some((_, entry)) => {
                entry.handle.abort();
                debug!(timer = %name, "timer cancelled");
                true
            },
            None => false,
        }
    }

    /// Whether a named timer currently holds a live handle
    pub fn is_live(&self, name: &str) -> bool {
        self.timers
            .get(name)
            .map_or(false, |entry| !entry.handle.is_finished())
    }

    /// Number of tracked named timers
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Cancel every tracked timer and cron job without running callbacks
    pub fn cancel_all(&self) {
        let names: Vec<String> = self.timers.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.cancel_timer(&name);
        }
        let mut jobs = self.cron_jobs.lock();
        let count = jobs.len();
        for job in jobs.drain(..) {
            job.abort();
        }
        if count > 0 {
            debug!(cron_jobs = count, "cron jobs cancelled");
        }
    }

    /// Schedule a cron or time-of-day context against the engine
    ///
    /// Validates the expression up front; each fire re-checks the context's
    /// preconditions (a trigger can go stale between scheduling and firing)
    /// before re-entering [`RuleEngine::invoke`]. The loop exits when the
    /// engine is dropped.
    pub fn schedule_cron(
        &self,
        context: Arc<ExecutionContext>,
        engine: Weak<RuleEngine>,
    ) -> Result<()> {
        let expression = context.cron_expression()?;
        let schedule = Schedule::from_str(&expression)
            .map_err(|e| RuleError::InvalidCron(format!("{}: {}", expression, e)))?;
        info!(
            context = %context.describe(),
            cron = %expression,
            "cron trigger scheduled"
        );

        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Local).next() else {
                    debug!(context = %context.describe(), "cron schedule exhausted");
                    break;
                };
                sleep_until_local(next).await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if engine.preconditions_hold(&context).await {
                    engine.invoke(Arc::clone(&context), context.scheduled_payload()).await;
                }
            }
        });
        self.cron_jobs.lock().push(handle);
        Ok(())
    }
}

/// Sleep until a wall-clock instant, re-checking to absorb early wakes
async fn sleep_until_local(deadline: DateTime<Local>) {
    loop {
        let now = Local::now();
        if now >= deadline {
            return;
        }
        match (deadline - now).to_std() {
            Ok(wait) => tokio::time::sleep(wait).await,
            Err(_) => return,
        }
    }
}

fn run_callback(name: String, callback: TimerCallback) {
    // Own task: cancelling the timer cannot interrupt an in-flight callback
    tokio::spawn(async move {
        if let Err(e) = callback().await {
            error!(timer = %name, error = %e, "timer callback failed");
        }
    });
}
