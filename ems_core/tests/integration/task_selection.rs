//! Integration test: task selection as executed by the bridge worker.
//!
//! Every selected task runs on the worker thread in selection order; the
//! recorded execution log therefore mirrors the pool's per-tick choice.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ems_core::bridge::{BridgeTask, FnTask, SimulatedBridge};
use ems_core::cycle::{CycleContext, Phase, PhaseListener};
use ems_core::task::Priority;

const WAIT: Duration = Duration::from_secs(5);

type Log = Arc<Mutex<Vec<&'static str>>>;

fn logging(name: &'static str, priority: Priority, log: &Log) -> Arc<dyn BridgeTask> {
    let log = log.clone();
    Arc::new(FnTask::new(name, priority, move |_| {
        log.lock().push(name);
        Ok(())
    }))
}

/// Dispatch one tick and return what the worker executed.
fn tick(bridge: &mut SimulatedBridge, cycle: u64, log: &Log) -> Vec<&'static str> {
    let ctx = CycleContext {
        cycle,
        now: Instant::now(),
    };
    bridge.on_phase(Phase::ExecuteWrite, &ctx).unwrap();
    assert!(bridge.handle().wait_idle(WAIT));
    std::mem::take(&mut *log.lock())
}

fn mixed_device(bridge: &SimulatedBridge, source: &str, log: &Log) {
    let handle = bridge.handle();
    for (name, priority) in [
        ("o1", Priority::Once),
        ("o2", Priority::Once),
        ("l1", Priority::Low),
        ("l2", Priority::Low),
        ("l3", Priority::Low),
        ("h1", Priority::High),
        ("h2", Priority::High),
        ("h3", Priority::High),
    ] {
        handle.add_task(source, logging(name, priority, log));
    }
}

#[test]
fn worker_executes_priority_selection() {
    let log: Log = Arc::default();
    let mut bridge = SimulatedBridge::spawn("it0", 0).unwrap();
    mixed_device(&bridge, "battery0", &log);

    let ticks: Vec<Vec<&str>> = (1..=4).map(|cycle| tick(&mut bridge, cycle, &log)).collect();
    assert_eq!(
        ticks,
        vec![
            vec!["h1", "h2", "h3", "o1", "l1"],
            vec!["h1", "h2", "h3", "o2", "l2"],
            vec!["h1", "h2", "h3", "l3"],
            vec!["h1", "h2", "h3", "l1"],
        ]
    );
    assert_eq!(bridge.skipped(), 0);
}

#[test]
fn once_tasks_rerun_after_reset() {
    let log: Log = Arc::default();
    let mut bridge = SimulatedBridge::spawn("it0", 0).unwrap();
    let handle = bridge.handle();
    handle.add_task("meter0", logging("ident", Priority::Once, &log));

    assert_eq!(tick(&mut bridge, 1, &log), vec!["ident"]);
    assert!(tick(&mut bridge, 2, &log).is_empty());

    // Reconnect: identification is read again.
    handle.reset_once();
    assert_eq!(tick(&mut bridge, 3, &log), vec!["ident"]);
}

#[test]
fn removed_device_stops_being_polled() {
    let log: Log = Arc::default();
    let mut bridge = SimulatedBridge::spawn("it0", 0).unwrap();
    let handle = bridge.handle();
    handle.add_task("meter0", logging("meter", Priority::High, &log));
    let battery = handle.add_task("battery0", logging("battery", Priority::High, &log));

    assert_eq!(tick(&mut bridge, 1, &log), vec!["meter", "battery"]);

    assert!(handle.remove_task("battery0", battery));
    assert!(!handle.remove_task("battery0", battery));
    assert_eq!(tick(&mut bridge, 2, &log), vec!["meter"]);

    assert!(handle.remove_source("meter0"));
    assert!(tick(&mut bridge, 3, &log).is_empty());
}

#[test]
fn idle_capacity_runs_extra_tasks() {
    let log: Log = Arc::default();
    let mut bridge = SimulatedBridge::spawn("it0", 2).unwrap();
    let handle = bridge.handle();
    handle.add_task("battery0", logging("h1", Priority::High, &log));
    handle.add_task("battery0", logging("l1", Priority::Low, &log));

    let executed = tick(&mut bridge, 1, &log);
    assert_eq!(executed.len(), 4);
    assert_eq!(&executed[..2], ["h1", "l1"]);
}

#[test]
fn failing_tasks_are_counted_not_fatal() {
    let log: Log = Arc::default();
    let mut bridge = SimulatedBridge::spawn("it0", 0).unwrap();
    let handle = bridge.handle();
    handle.add_task(
        "battery0",
        Arc::new(FnTask::new("broken", Priority::High, |_| {
            Err(ems_core::error::BridgeError::Communication {
                task: "broken".into(),
                reason: "timeout".into(),
            })
        })),
    );
    handle.add_task("battery0", logging("ok", Priority::High, &log));

    assert_eq!(tick(&mut bridge, 1, &log), vec!["ok"]);
    assert_eq!(tick(&mut bridge, 2, &log), vec!["ok"]);
    assert_eq!(handle.failed_tasks(), 2);
}
