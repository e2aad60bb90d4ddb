//! Hearth Rules - Trigger Matching and Dispatch Engine
//!
//! An event-driven rule engine providing:
//! - Value conditions and preconditions over named item states
//! - Execution contexts binding triggers to async handlers
//! - A pausable event subscriber bridging host notifications to the engine
//! - Named one-shot/repeating timers and cron/time-of-day scheduling
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Subscriber  │────▶│  RuleEngine  │────▶│   Handlers   │
//! │ (pause/queue)│     │ (match+gate) │     │ (rule code)  │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                             │  ▲
//!                             ▼  │ invoke
//!                      ┌──────────────┐     ┌──────────────┐
//!                      │TimerExecutor │     │StateRegistry │
//!                      │ (cron/named) │     │ (live state) │
//!                      └──────────────┘     └──────────────┘
//! ```

mod condition;
mod context;
mod engine;
mod error;
mod event;
mod subscriber;
mod timer;

// Re-export public API
pub use condition::{Precondition, ValueCondition};
pub use context::{handler, ExecutionContext, RuleHandler, Trigger};
pub use engine::{InvocationMode, RuleEngine};
pub use error::{Result, RuleError};
pub use event::{PlatformEvent, RuleEvent};
pub use subscriber::{EventSink, EventSubscriber};
pub use timer::{timer_callback, TimerCallback, TimerExecutor};

// Membership scope travels with the public API
pub use hearth_registry::MemberScope;
