//! Buffer transfer across the boundary

use std::sync::Arc;

use qiao::engine::fixtures::FixtureEngine;
use qiao::{
    Bridge, BridgeError, BridgeValue, BufferView, CallScope, CallSpec, CallTarget, Codec,
    HostValue, ModuleHandle,
};

fn bridge() -> (Bridge, ModuleHandle) {
    let bridge = Bridge::new(Box::new(FixtureEngine::new()), Default::default());
    let module = bridge.import("fixtures").unwrap();
    (bridge, module)
}

#[test]
fn test_buffer_round_trip_doubles() {
    let (bridge, module) = bridge();
    let spec = CallSpec::function(module, "test_buffer")
        .arg(BridgeValue::Buffer(BufferView::from_f32s(&[1.0, 2.5, -3.0])));
    let BridgeValue::Buffer(out) = bridge.dispatch(spec).unwrap() else {
        panic!("expected a buffer back");
    };
    assert_eq!(out.as_f32s().unwrap(), vec![2.0, 5.0, -6.0]);
}

#[test]
fn test_empty_buffer_round_trips_empty() {
    let (bridge, module) = bridge();
    let spec = CallSpec::function(module, "test_buffer")
        .arg(BridgeValue::Buffer(BufferView::from_f32s(&[])));
    let BridgeValue::Buffer(out) = bridge.dispatch(spec).unwrap() else {
        panic!("expected a buffer back");
    };
    assert!(out.is_empty());
}

#[test]
fn test_host_buffer_crosses_as_call_scoped_view() {
    let (bridge, module) = bridge();

    let input = HostValue::Buffer(BufferView::from_f32s(&[4.0, 0.5]));
    let target = CallTarget::Named {
        module,
        name: "test_buffer".into(),
    };
    let result = bridge.dispatch_host(target, &[input], &[]).unwrap();

    // The result buffer is an owned copy, detached from the finished call
    let HostValue::Buffer(out) = result else {
        panic!("expected a buffer back");
    };
    assert!(!out.is_borrowed());
    assert_eq!(out.as_f32s().unwrap(), vec![8.0, 1.0]);
}

#[test]
fn test_host_bytes_cross_as_borrowed_view() {
    let (bridge, module) = bridge();

    // 4 bytes = one f32 element
    let bytes: Arc<[u8]> = Arc::from(1.0f32.to_le_bytes().as_slice());
    let target = CallTarget::Named {
        module,
        name: "test_buffer".into(),
    };
    let result = bridge
        .dispatch_host(target, &[HostValue::Bytes(bytes)], &[])
        .unwrap();
    let HostValue::Buffer(out) = result else {
        panic!("expected a buffer back");
    };
    assert_eq!(out.as_f32s().unwrap(), vec![2.0]);
}

#[test]
fn test_view_stashed_past_its_call_expires() {
    let scope = CallScope::new();
    let host = HostValue::Bytes(Arc::from(&[1u8, 2, 3, 4][..]));
    let crossed = Codec::to_embedded_in(&scope, &host).unwrap();

    let BridgeValue::Buffer(view) = &crossed else {
        panic!("expected a borrowed view");
    };
    let stashed = view.clone();
    assert!(stashed.bytes().is_ok());

    scope.close();
    assert_eq!(stashed.bytes(), Err(BridgeError::ViewExpired));
    assert_eq!(stashed.to_owned_view(), Err(BridgeError::ViewExpired));
}

#[test]
fn test_misaligned_buffer_rejected_by_fixture() {
    let (bridge, module) = bridge();
    let target = CallTarget::Named {
        module,
        name: "test_buffer".into(),
    };
    let result = bridge.dispatch_host(
        target,
        &[HostValue::Bytes(Arc::from(&[1u8, 2, 3][..]))],
        &[],
    );
    assert!(matches!(result, Err(BridgeError::UnsupportedType(_))));
}
