//! Host callbacks invoked from inside embedded calls

use std::sync::{Arc, Mutex};

use qiao::engine::fixtures::FixtureEngine;
use qiao::{Bridge, BridgeError, BridgeValue, CallSpec, HostValue, ModuleHandle};

fn bridge() -> (Bridge, ModuleHandle) {
    let bridge = Bridge::new(Box::new(FixtureEngine::new()), Default::default());
    let module = bridge.import("fixtures").unwrap();
    (bridge, module)
}

#[test]
fn test_callback_invoked_with_converted_arguments() {
    let (bridge, module) = bridge();
    let calls: Arc<Mutex<Vec<Vec<HostValue>>>> = Arc::new(Mutex::new(Vec::new()));

    let log = calls.clone();
    let handle = bridge.register_callback(move |args| {
        log.lock().unwrap().push(args.to_vec());
        Ok(HostValue::Int(2))
    });

    let spec = CallSpec::function(module, "test_function_promise")
        .arg(BridgeValue::Int(1))
        .arg(BridgeValue::host_callback(handle.0));
    // res = f(123, [1,2,4], {a:1,b:2}) = 2; f(2*125); return 2*22
    assert_eq!(bridge.dispatch(spec).unwrap(), BridgeValue::Int(44));

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].len(), 3);
    assert_eq!(calls[0][0], HostValue::Int(123));
    assert_eq!(
        calls[0][1],
        HostValue::array(vec![HostValue::Int(1), HostValue::Int(2), HostValue::Int(4)])
    );
    assert_eq!(
        calls[0][2],
        HostValue::object(vec![
            ("a".into(), HostValue::Int(1)),
            ("b".into(), HostValue::Int(2)),
        ])
    );
    assert_eq!(calls[1], vec![HostValue::Int(250)]);
}

#[test]
fn test_callback_no_argument_branch() {
    let (bridge, module) = bridge();
    let count = Arc::new(Mutex::new(0usize));

    let counter = count.clone();
    let handle = bridge.register_callback(move |args| {
        assert!(args.is_empty());
        *counter.lock().unwrap() += 1;
        Ok(HostValue::Undefined)
    });

    let spec = CallSpec::function(module, "test_function_promise")
        .arg(BridgeValue::Int(0))
        .arg(BridgeValue::host_callback(handle.0));
    assert_eq!(bridge.dispatch(spec).unwrap(), BridgeValue::Null);
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn test_released_handle_fails_with_handle_expired() {
    let (bridge, module) = bridge();
    let handle = bridge.register_callback(|_| Ok(HostValue::Int(1)));
    assert!(bridge.release_callback(handle));
    assert!(!bridge.release_callback(handle));

    let spec = CallSpec::function(module, "test_function_promise")
        .arg(BridgeValue::Int(1))
        .arg(BridgeValue::host_callback(handle.0));
    assert_eq!(bridge.dispatch(spec), Err(BridgeError::HandleExpired));
}

#[test]
fn test_host_error_reraises_as_embedded_exception() {
    let (bridge, module) = bridge();
    let handle =
        bridge.register_callback(|_| Err(BridgeError::raised("TypeError", "host rejected")));

    let spec = CallSpec::function(module, "test_function_promise")
        .arg(BridgeValue::Int(1))
        .arg(BridgeValue::host_callback(handle.0));
    assert!(matches!(
        bridge.dispatch(spec),
        Err(BridgeError::EmbeddedException { .. })
    ));
}

#[test]
fn test_callback_may_dispatch_reentrantly() {
    let (bridge, module) = bridge();

    // The callback dispatches back into the embedded runtime on the same
    // thread that is already inside it
    let nested_bridge = bridge.clone();
    let handle = bridge.register_callback(move |_| {
        let spec = CallSpec::function(module, "calc")
            .arg(BridgeValue::Bool(true))
            .arg(BridgeValue::Int(20))
            .arg(BridgeValue::Int(1));
        match nested_bridge.dispatch(spec)? {
            BridgeValue::Int(i) => Ok(HostValue::Int(i)),
            other => Err(BridgeError::UnsupportedType(other.variant().into())),
        }
    });

    let spec = CallSpec::function(module, "test_function_promise")
        .arg(BridgeValue::Int(1))
        .arg(BridgeValue::host_callback(handle.0));
    // res = nested calc = 21; return 21*22
    assert_eq!(bridge.dispatch(spec).unwrap(), BridgeValue::Int(462));
}
