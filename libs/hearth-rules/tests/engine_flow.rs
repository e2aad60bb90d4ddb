//! End-to-end tests for the subscriber -> engine -> handler pipeline
//!
//! Uses the in-memory registry and direct invocation so every dispatch is
//! deterministic and observable from the test body.

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

use hearth_registry::MemoryRegistry;
use hearth_rules::{
    handler, timer_callback, EventSink, EventSubscriber, ExecutionContext, InvocationMode,
    MemberScope, PlatformEvent, Precondition, RuleEngine, Trigger, ValueCondition,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

struct Harness {
    registry: Arc<MemoryRegistry>,
    engine: Arc<RuleEngine>,
    subscriber: EventSubscriber,
    log: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn new() -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let engine = RuleEngine::new(registry.clone(), InvocationMode::Direct);
        let subscriber = EventSubscriber::new();
        subscriber.register(engine.clone() as Arc<dyn EventSink>);
        Self {
            registry,
            engine,
            subscriber,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handler appending "label:item=new_state" style entries to the log
    fn recorder(&self, label: &str) -> hearth_rules::RuleHandler {
        let log = Arc::clone(&self.log);
        let label = label.to_string();
        handler(move |event| {
            let log = Arc::clone(&log);
            let label = label.clone();
            async move {
                let detail = event
                    .new_state
                    .or(event.command)
                    .or(event.channel_event)
                    .unwrap_or_default();
                log.lock().push(format!("{label}:{detail}"));
                Ok(())
            }
        })
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    async fn change(&self, item: &str, old: &str, new: &str) {
        self.subscriber
            .receive(PlatformEvent::ItemStateChanged {
                item: item.to_string(),
                old_state: old.to_string(),
                new_state: new.to_string(),
            })
            .await;
    }

    async fn command(&self, item: &str, command: &str) {
        self.subscriber
            .receive(PlatformEvent::ItemCommand {
                item: item.to_string(),
                command: command.to_string(),
            })
            .await;
    }
}

#[tokio::test]
async fn event_flows_from_subscriber_to_handler() {
    let h = Harness::new();
    h.engine
        .add(
            ExecutionContext::new(
                "HeatingRule",
                "onThermostat",
                "thermostat",
                Trigger::Changed {
                    from: None,
                    previous: None,
                },
                h.recorder("heat"),
            )
            .with_condition(ValueCondition::default().with_lt(18.0)),
        )
        .unwrap();

    h.change("thermostat", "19.2", "17.5").await;
    h.change("thermostat", "17.5", "18.4").await;
    // Unwatched item, filtered out before the engine sees it
    h.change("porch_light", "OFF", "ON").await;

    assert_eq!(h.entries(), vec!["heat:17.5"]);
}

#[tokio::test]
async fn pause_queues_and_resume_dispatches_in_arrival_order() {
    let h = Harness::new();
    h.engine
        .add(ExecutionContext::new(
            "DemoRule",
            "onMeter",
            "meter",
            Trigger::ReceivedUpdate,
            h.recorder("meter"),
        ))
        .unwrap();

    h.subscriber.pause();
    for state in ["1", "2", "3"] {
        h.subscriber
            .receive(PlatformEvent::ItemStateUpdated {
                item: "meter".to_string(),
                state: state.to_string(),
            })
            .await;
    }
    assert_eq!(h.subscriber.queued_len(), 3);
    assert!(h.entries().is_empty());

    h.subscriber.resume().await;
    assert_eq!(h.entries(), vec!["meter:1", "meter:2", "meter:3"]);
}

#[tokio::test]
async fn precondition_gates_on_live_state_not_event_payload() {
    let h = Harness::new();
    h.engine
        .add(
            ExecutionContext::new(
                "AlarmRule",
                "onDoorOpened",
                "door",
                Trigger::Changed {
                    from: Some("CLOSED".to_string()),
                    previous: None,
                },
                h.recorder("alarm"),
            )
            .with_condition(ValueCondition::eq("OPEN"))
            .with_precondition(Precondition::new("alarm_mode", ValueCondition::eq("ARMED"))),
        )
        .unwrap();

    h.change("door", "CLOSED", "OPEN").await;
    assert!(h.entries().is_empty());

    h.registry.set_state("alarm_mode", "ARMED");
    h.change("door", "CLOSED", "OPEN").await;
    assert_eq!(h.entries(), vec!["alarm:OPEN"]);
}

#[tokio::test]
async fn group_member_change_reaches_a_member_scoped_context() {
    let h = Harness::new();
    h.registry.add_to_group("window_north", "gWindows");
    h.registry.add_to_group("window_south", "gWindows");

    h.engine
        .add(
            ExecutionContext::new(
                "WindowRule",
                "onAnyWindow",
                "gWindows",
                Trigger::Changed {
                    from: None,
                    previous: None,
                },
                h.recorder("window"),
            )
            .with_member_of(MemberScope::Items),
        )
        .unwrap();

    h.change("window_north", "CLOSED", "OPEN").await;
    h.change("kitchen_lamp", "OFF", "ON").await;
    assert_eq!(h.entries(), vec!["window:OPEN"]);
}

#[tokio::test]
async fn overlapping_triggers_both_fire_for_one_event() {
    let h = Harness::new();
    h.engine
        .add(ExecutionContext::new(
            "DemoRule",
            "onAny",
            "switch",
            Trigger::ReceivedCommand,
            h.recorder("any"),
        ))
        .unwrap();
    h.engine
        .add(
            ExecutionContext::new(
                "DemoRule",
                "onOff",
                "switch",
                Trigger::ReceivedCommand,
                h.recorder("off"),
            )
            .with_condition(ValueCondition::eq("OFF")),
        )
        .unwrap();

    h.command("switch", "OFF").await;
    assert_eq!(h.entries(), vec!["any:OFF", "off:OFF"]);
}

#[tokio::test]
async fn handler_arms_a_timer_that_reenters_later() {
    let h = Harness::new();
    let timers = h.engine.timers();
    let log = Arc::clone(&h.log);

    h.engine
        .add(
            ExecutionContext::new(
                "LightRule",
                "onMotion",
                "motion",
                Trigger::ReceivedUpdate,
                handler(move |_event| {
                    let timers = Arc::clone(&timers);
                    let log = Arc::clone(&log);
                    async move {
                        // Repeated motion extends the off delay
                        timers.create_or_replace_timer(
                            "light_off",
                            Duration::from_millis(150),
                            timer_callback(move || {
                                let log = Arc::clone(&log);
                                async move {
                                    log.lock().push("light:off".to_string());
                                    Ok(())
                                }
                            }),
                        )?;
                        Ok(())
                    }
                }),
            ),
        )
        .unwrap();

    h.subscriber
        .receive(PlatformEvent::ItemStateUpdated {
            item: "motion".to_string(),
            state: "ON".to_string(),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    // Second motion replaces the pending timer
    h.subscriber
        .receive(PlatformEvent::ItemStateUpdated {
            item: "motion".to_string(),
            state: "ON".to_string(),
        })
        .await;

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(h.entries().is_empty());
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.entries(), vec!["light:off"]);
}

#[tokio::test]
async fn reset_prevents_pending_timer_fires() {
    let h = Harness::new();
    let log = Arc::clone(&h.log);
    h.engine
        .timers()
        .create_timer(
            "pending",
            Duration::from_millis(120),
            timer_callback(move || {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push("fired".to_string());
                    Ok(())
                }
            }),
        )
        .unwrap();

    h.engine.reset();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(h.entries().is_empty());
}

#[tokio::test]
async fn start_level_and_registry_events() {
    let h = Harness::new();
    h.engine
        .add(ExecutionContext::new(
            "StartupRule",
            "onReady",
            "",
            Trigger::StartLevel { level: 100 },
            h.recorder("ready"),
        ))
        .unwrap();

    // Registry shape events reach the engine but trigger nothing
    h.subscriber
        .receive(PlatformEvent::ItemAdded {
            item: "new_item".to_string(),
        })
        .await;
    h.subscriber
        .receive(PlatformEvent::StartLevel { level: 40 })
        .await;
    h.subscriber
        .receive(PlatformEvent::StartLevel { level: 100 })
        .await;

    assert_eq!(h.entries(), vec!["ready:"]);
}

#[traced_test]
#[tokio::test]
async fn handler_failure_is_logged_with_rule_identity() {
    let h = Harness::new();
    h.engine
        .add(ExecutionContext::new(
            "BrokenRule",
            "onCommand",
            "switch",
            Trigger::ReceivedCommand,
            handler(|_event| async { anyhow::bail!("boom") }),
        ))
        .unwrap();

    h.command("switch", "ON").await;
    assert!(logs_contain("rule handler failed"));
    assert!(logs_contain("BrokenRule/onCommand"));
}
