//! Asynchronous dispatch, cancellation and deadlines

use std::sync::mpsc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use qiao::engine::fixtures::FixtureEngine;
use qiao::{Bridge, BridgeConfig, BridgeError, BridgeValue, CallSpec, HostValue, ModuleHandle};

fn bridge_with_workers(async_workers: usize) -> (Bridge, ModuleHandle) {
    let config = BridgeConfig {
        async_workers,
        ..Default::default()
    };
    let bridge = Bridge::new(Box::new(FixtureEngine::new()), config);
    let module = bridge.import("fixtures").unwrap();
    (bridge, module)
}

/// Callback that blocks inside the embedded call until the test releases it,
/// reporting entry through `started`
fn gate_spec(
    bridge: &Bridge,
    module: ModuleHandle,
    started: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
) -> CallSpec {
    let release = Mutex::new(release);
    let handle = bridge.register_callback(move |_| {
        let _ = started.send(());
        let _ = release.lock().unwrap().recv();
        Ok(HostValue::Undefined)
    });
    CallSpec::function(module, "test_function_promise")
        .arg(BridgeValue::Int(0))
        .arg(BridgeValue::host_callback(handle.0))
}

#[test]
fn test_async_dispatch_resolves() {
    let (bridge, module) = bridge_with_workers(2);

    let spec = CallSpec::function(module, "calc")
        .arg(BridgeValue::Bool(true))
        .arg(BridgeValue::Int(2))
        .arg(BridgeValue::Int(3));
    let pending = bridge.dispatch_async(spec);
    assert_eq!(pending.wait(), Ok(BridgeValue::Int(5)));
    assert!(pending.is_done());
}

#[test]
fn test_async_dispatch_rejects_on_embedded_exception() {
    let (bridge, module) = bridge_with_workers(2);
    let pending = bridge.dispatch_async(CallSpec::function(module, "raise_error"));
    assert!(matches!(
        pending.wait(),
        Err(BridgeError::EmbeddedException { kind, .. }) if kind == "RuntimeError"
    ));
}

#[test]
fn test_independent_async_calls_all_complete() {
    let (bridge, module) = bridge_with_workers(3);
    let pendings: Vec<_> = (0..6)
        .map(|i| {
            let spec = CallSpec::function(module, "calc")
                .arg(BridgeValue::Bool(true))
                .arg(BridgeValue::Int(i))
                .arg(BridgeValue::Int(1));
            bridge.dispatch_async(spec)
        })
        .collect();
    for (i, pending) in pendings.into_iter().enumerate() {
        assert_eq!(pending.wait(), Ok(BridgeValue::Int(i as i64 + 1)));
    }
}

#[test]
fn test_cancel_before_start_never_enters_embedded_context() {
    let (bridge, module) = bridge_with_workers(1);

    // Occupy the single worker so the next submission stays queued
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = bridge.dispatch_async(gate_spec(&bridge, module, started_tx, release_rx));
    started_rx.recv().unwrap();

    let spec = CallSpec::function(module, "calc")
        .arg(BridgeValue::Bool(true))
        .arg(BridgeValue::Int(1))
        .arg(BridgeValue::Int(1));
    let queued = bridge.dispatch_async(spec);
    assert!(queued.cancel());
    assert_eq!(queued.wait(), Err(BridgeError::Cancelled));

    release_tx.send(()).unwrap();
    assert_eq!(gate.wait(), Ok(BridgeValue::Null));
}

#[test]
fn test_cancel_after_start_is_best_effort() {
    let (bridge, module) = bridge_with_workers(1);

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let pending = bridge.dispatch_async(gate_spec(&bridge, module, started_tx, release_rx));

    started_rx.recv().unwrap();
    // Already executing: the call runs to completion anyway
    assert!(!pending.cancel());
    release_tx.send(()).unwrap();
    assert_eq!(pending.wait(), Ok(BridgeValue::Null));
}

#[test]
fn test_deadline_expiry_while_queued_cancels() {
    let (bridge, module) = bridge_with_workers(1);

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = bridge.dispatch_async(gate_spec(&bridge, module, started_tx, release_rx));
    started_rx.recv().unwrap();

    let spec = CallSpec::function(module, "hello")
        .deadline(Instant::now() + Duration::from_millis(20));
    let queued = bridge.dispatch_async(spec);

    std::thread::sleep(Duration::from_millis(50));
    release_tx.send(()).unwrap();

    assert_eq!(queued.wait(), Err(BridgeError::Cancelled));
    assert_eq!(gate.wait(), Ok(BridgeValue::Null));
}

#[test]
fn test_deadline_overrun_during_execution_reports_timeout() {
    let (bridge, module) = bridge_with_workers(1);

    let handle = bridge.register_callback(|_| {
        std::thread::sleep(Duration::from_millis(80));
        Ok(HostValue::Undefined)
    });
    let spec = CallSpec::function(module, "test_function_promise")
        .arg(BridgeValue::Int(0))
        .arg(BridgeValue::host_callback(handle.0))
        .deadline(Instant::now() + Duration::from_millis(20));

    // The executing call is not preempted; the overrun surfaces afterwards
    assert_eq!(bridge.dispatch(spec), Err(BridgeError::Timeout));
}

#[test]
fn test_cancel_racing_dispatch_always_reaches_a_terminal_state() {
    let (bridge, module) = bridge_with_workers(2);

    // Race a cancel against the worker picking the job up; whichever side
    // wins, the cell must resolve (value or Cancelled), never hang
    for _ in 0..200 {
        let spec = CallSpec::function(module, "hello");
        let pending = bridge.dispatch_async(spec);

        let racer = pending.clone();
        let canceller = std::thread::spawn(move || {
            racer.cancel();
        });

        let outcome = pending.wait_timeout(Duration::from_secs(5));
        assert!(outcome.is_some(), "call neither resolved nor cancelled");
        match outcome.unwrap() {
            Ok(BridgeValue::Null) | Err(BridgeError::Cancelled) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        canceller.join().unwrap();
    }
}

#[test]
fn test_wait_timeout_reports_still_pending() {
    let (bridge, module) = bridge_with_workers(1);

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let pending = bridge.dispatch_async(gate_spec(&bridge, module, started_tx, release_rx));
    started_rx.recv().unwrap();

    assert!(pending.wait_timeout(Duration::from_millis(10)).is_none());
    release_tx.send(()).unwrap();
    assert!(pending.wait().is_ok());
}
