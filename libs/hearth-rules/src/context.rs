//! Execution contexts - immutable trigger descriptors
//!
//! An `ExecutionContext` combines a target identity (item, channel, thing,
//! cron schedule), an optional value condition, an optional from/previous
//! condition and a list of preconditions, bound to one handler. Contexts are
//! created at rule-registration time and never mutated afterwards.

use crate::condition::{Precondition, ValueCondition};
use crate::error::{Result, RuleError};
use crate::event::{PlatformEvent, RuleEvent};
use futures::future::BoxFuture;
use hearth_registry::{MemberScope, StateRegistry};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Bound rule handler - one async callback per context
pub type RuleHandler =
    Arc<dyn Fn(RuleEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`RuleHandler`]
pub fn handler<F, Fut>(f: F) -> RuleHandler
where
    F: Fn(RuleEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Trigger kind of an execution context
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Command received by the target item
    ReceivedCommand,
    /// State update received by the target item
    ReceivedUpdate,
    /// State transition on the target item (or group)
    Changed {
        /// Exact pre-change state, when set
        from: Option<String>,
        /// Condition on the pre-change state, when set
        previous: Option<ValueCondition>,
    },
    /// Triggered event on the target channel
    ChannelTriggered,
    /// Status transition on the target thing
    ThingStatusChanged {
        /// Exact pre-change status, when set
        from: Option<String>,
    },
    /// System start level reached
    StartLevel { level: u8 },
    /// Cron schedule (6-field expression: sec min hour day month weekday)
    Cron { expression: String },
    /// Fixed time of day; unset fields default to "every"
    TimeOfDay {
        hour: Option<u32>,
        minute: Option<u32>,
        second: Option<u32>,
    },
}

impl Trigger {
    /// Short label used in invocation payloads and logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::ReceivedCommand => "command",
            Self::ReceivedUpdate => "update",
            Self::Changed { .. } => "change",
            Self::ChannelTriggered => "channel",
            Self::ThingStatusChanged { .. } => "thing_status",
            Self::StartLevel { .. } => "start_level",
            Self::Cron { .. } => "cron",
            Self::TimeOfDay { .. } => "time_of_day",
        }
    }
}

/// Immutable descriptor of one trigger bound to one handler
pub struct ExecutionContext {
    rule_name: String,
    method_name: String,
    tags: Vec<String>,
    /// Item name, channel id, thing uid or group name (with `member_of`)
    target: String,
    /// When set, `target` names a group and the firing item must be a
    /// member under this scope
    member_of: Option<MemberScope>,
    trigger: Trigger,
    /// Condition on the triggering value ("to" condition for changes)
    condition: ValueCondition,
    preconditions: Vec<Precondition>,
    handler: RuleHandler,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("rule_name", &self.rule_name)
            .field("method_name", &self.method_name)
            .field("target", &self.target)
            .field("member_of", &self.member_of)
            .field("trigger", &self.trigger)
            .field("condition", &self.condition)
            .field("preconditions", &self.preconditions)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(
        rule_name: impl Into<String>,
        method_name: impl Into<String>,
        target: impl Into<String>,
        trigger: Trigger,
        handler: RuleHandler,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            method_name: method_name.into(),
            tags: Vec::new(),
            target: target.into(),
            member_of: None,
            trigger,
            condition: ValueCondition::any(),
            preconditions: Vec::new(),
            handler,
        }
    }

    /// Attach log tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Constrain the triggering value
    pub fn with_condition(mut self, condition: ValueCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Scope the context to members of the target group
    pub fn with_member_of(mut self, scope: MemberScope) -> Self {
        self.member_of = Some(scope);
        self
    }

    /// Attach a precondition (all attached preconditions must hold)
    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn member_of(&self) -> Option<MemberScope> {
        self.member_of
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn condition(&self) -> &ValueCondition {
        &self.condition
    }

    pub fn preconditions(&self) -> &[Precondition] {
        &self.preconditions
    }

    /// Whether this context fires on a schedule instead of platform events
    pub fn is_scheduled(&self) -> bool {
        matches!(
            self.trigger,
            Trigger::Cron { .. } | Trigger::TimeOfDay { .. }
        )
    }

    /// `rule/method` identity for logs
    pub fn describe(&self) -> String {
        format!("{}/{}", self.rule_name, self.method_name)
    }

    /// Run the bound handler with an invocation payload
    pub async fn run(&self, event: RuleEvent) -> anyhow::Result<()> {
        (self.handler)(event).await
    }

    /// Structural and value match against an incoming platform event
    ///
    /// The structural gate checks event kind plus identity (or group
    /// membership under the member-of scope); value matching is delegated to
    /// the condition model. Scheduled contexts never match platform events.
    pub async fn matches(&self, event: &PlatformEvent, registry: &dyn StateRegistry) -> bool {
        match (&self.trigger, event) {
            (Trigger::ReceivedCommand, PlatformEvent::ItemCommand { item, command }) => {
                self.item_gate(item, registry).await && self.condition.matches(command)
            },
            (Trigger::ReceivedUpdate, PlatformEvent::ItemStateUpdated { item, state }) => {
                self.item_gate(item, registry).await && self.condition.matches(state)
            },
            (
                Trigger::Changed { from, previous },
                PlatformEvent::ItemStateChanged {
                    item,
                    old_state,
                    new_state,
                },
            ) => {
                self.item_gate(item, registry).await
                    && self.changed_matches(from, previous, old_state, new_state)
            },
            (
                Trigger::Changed { from, previous },
                PlatformEvent::GroupStateChanged {
                    group,
                    old_state,
                    new_state,
                    ..
                },
            ) => {
                // A group's own state transition; member-scoped contexts
                // match the member item's change events instead
                self.member_of.is_none()
                    && *group == self.target
                    && self.changed_matches(from, previous, old_state, new_state)
            },
            (Trigger::ChannelTriggered, PlatformEvent::ChannelTriggered { channel, event }) => {
                *channel == self.target && self.condition.matches(event)
            },
            (
                Trigger::ThingStatusChanged { from },
                PlatformEvent::ThingStatusChanged {
                    thing,
                    old_status,
                    new_status,
                },
            ) => {
                *thing == self.target
                    && from.as_ref().map_or(true, |f| f == old_status)
                    && self.condition.matches(new_status)
            },
            (Trigger::StartLevel { level }, PlatformEvent::StartLevel { level: reached }) => {
                level == reached
            },
            _ => false,
        }
    }

    /// Identity gate for item-shaped events: direct name match, or group
    /// membership when the context is member-scoped
    async fn item_gate(&self, item: &str, registry: &dyn StateRegistry) -> bool {
        match self.member_of {
            None => item == self.target,
            Some(scope) => match registry.is_member(item, &self.target, scope).await {
                Ok(member) => member,
                Err(e) => {
                    // Unresolvable group never matches
                    debug!(
                        context = %self.describe(),
                        group = %self.target,
                        error = %e,
                        "membership lookup failed"
                    );
                    false
                },
            },
        }
    }

    /// Change semantics: the post-change state must satisfy the "to"
    /// condition, and the pre-change state the "from"/previous condition.
    /// The two conditions see the two different states of the same event.
    fn changed_matches(
        &self,
        from: &Option<String>,
        previous: &Option<ValueCondition>,
        old_state: &str,
        new_state: &str,
    ) -> bool {
        if !self.condition.matches(new_state) {
            return false;
        }
        if let Some(from) = from {
            if old_state != from {
                return false;
            }
        }
        if let Some(previous) = previous {
            if !previous.matches(old_state) {
                return false;
            }
        }
        true
    }

    /// Build the invocation payload for a matched platform event
    pub fn event_payload(&self, event: &PlatformEvent) -> RuleEvent {
        let mut payload = RuleEvent {
            trigger: self.trigger.label().to_string(),
            ..RuleEvent::default()
        };
        match event {
            PlatformEvent::ItemCommand { item, command } => {
                payload.item = Some(item.clone());
                payload.command = Some(command.clone());
            },
            PlatformEvent::ItemStateUpdated { item, state } => {
                payload.item = Some(item.clone());
                payload.new_state = Some(state.clone());
            },
            PlatformEvent::ItemStateChanged {
                item,
                old_state,
                new_state,
            } => {
                payload.item = Some(item.clone());
                payload.old_state = Some(old_state.clone());
                payload.new_state = Some(new_state.clone());
            },
            PlatformEvent::GroupStateChanged {
                group,
                old_state,
                new_state,
                ..
            } => {
                payload.item = Some(group.clone());
                payload.old_state = Some(old_state.clone());
                payload.new_state = Some(new_state.clone());
            },
            PlatformEvent::ChannelTriggered { channel, event } => {
                payload.channel = Some(channel.clone());
                payload.channel_event = Some(event.clone());
            },
            PlatformEvent::ThingStatusChanged {
                thing,
                old_status,
                new_status,
            } => {
                payload.thing = Some(thing.clone());
                payload.old_status = Some(old_status.clone());
                payload.thing_status = Some(new_status.clone());
            },
            PlatformEvent::StartLevel { level } => {
                payload.start_level = Some(*level);
            },
            // Registry-shaped events never reach invocation
            _ => {},
        }
        payload
    }

    /// Invocation payload for a schedule fire
    pub fn scheduled_payload(&self) -> RuleEvent {
        RuleEvent {
            trigger: self.trigger.label().to_string(),
            cron_expression: self.cron_expression().ok(),
            ..RuleEvent::default()
        }
    }

    /// The 6-field cron expression this context schedules on
    ///
    /// `Cron` passes its expression through; `TimeOfDay` synthesizes a daily
    /// expression, with unset fields defaulting to `*`.
    pub fn cron_expression(&self) -> Result<String> {
        match &self.trigger {
            Trigger::Cron { expression } => Ok(expression.clone()),
            Trigger::TimeOfDay {
                hour,
                minute,
                second,
            } => {
                if hour.is_some_and(|h| h > 23)
                    || minute.is_some_and(|m| m > 59)
                    || second.is_some_and(|s| s > 59)
                {
                    return Err(RuleError::InvalidTimeOfDay(format!(
                        "{:?}:{:?}:{:?}",
                        hour, minute, second
                    )));
                }
                let field = |v: Option<u32>| match v {
                    Some(v) => v.to_string(),
                    None => "*".to_string(),
                };
                Ok(format!(
                    "{} {} {} * * *",
                    field(*second),
                    field(*minute),
                    field(*hour)
                ))
            },
            _ => Err(RuleError::NotScheduled(self.describe())),
        }
    }
}
