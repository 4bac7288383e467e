//! End-to-end dispatch through the fixture engine

use qiao::engine::fixtures::FixtureEngine;
use qiao::{Bridge, BridgeError, BridgeValue, CallSpec, InstanceHandle, ModuleHandle};

fn bridge() -> (Bridge, ModuleHandle) {
    let bridge = Bridge::new(Box::new(FixtureEngine::new()), Default::default());
    let module = bridge.import("fixtures").unwrap();
    (bridge, module)
}

#[test]
fn test_unknown_module() {
    let bridge = Bridge::new(Box::new(FixtureEngine::new()), Default::default());
    assert!(matches!(
        bridge.import("nonexistent"),
        Err(BridgeError::UnknownTarget(_))
    ));
}

#[test]
fn test_import_accepts_script_paths() {
    let bridge = Bridge::new(Box::new(FixtureEngine::new()), Default::default());
    assert!(bridge.import("some/dir/fixtures.py").is_ok());
}

#[test]
fn test_calc() {
    let (bridge, module) = bridge();

    let sum = CallSpec::function(module, "calc")
        .arg(BridgeValue::Bool(true))
        .arg(BridgeValue::Int(2))
        .arg(BridgeValue::Int(3));
    assert_eq!(bridge.dispatch(sum).unwrap(), BridgeValue::Int(5));

    let product = CallSpec::function(module, "calc")
        .arg(BridgeValue::Bool(false))
        .arg(BridgeValue::Float(2.5))
        .arg(BridgeValue::Int(4));
    assert_eq!(bridge.dispatch(product).unwrap(), BridgeValue::Float(10.0));
}

#[test]
fn test_keyword_arguments_bind_by_name() {
    let (bridge, module) = bridge();

    let spec = CallSpec::function(module, "calc")
        .arg(BridgeValue::Bool(true))
        .kwarg("b", BridgeValue::Int(10))
        .kwarg("a", BridgeValue::Int(1));
    assert_eq!(bridge.dispatch(spec).unwrap(), BridgeValue::Int(11));
}

#[test]
fn test_concatenate() {
    let (bridge, module) = bridge();
    let spec = CallSpec::function(module, "concatenate")
        .arg(BridgeValue::str("aaa "))
        .arg(BridgeValue::str("bbb"));
    assert_eq!(bridge.dispatch(spec).unwrap(), BridgeValue::str("aaa bbb"));
}

#[test]
fn test_check() {
    let (bridge, module) = bridge();
    let spec = CallSpec::function(module, "check").arg(BridgeValue::Int(42));
    assert_eq!(bridge.dispatch(spec).unwrap(), BridgeValue::Bool(true));

    let spec = CallSpec::function(module, "check").arg(BridgeValue::Int(41));
    assert_eq!(bridge.dispatch(spec).unwrap(), BridgeValue::Bool(false));
}

#[test]
fn test_createtuple() {
    let (bridge, module) = bridge();
    let spec = CallSpec::function(module, "createtuple");
    assert_eq!(
        bridge.dispatch(spec).unwrap(),
        BridgeValue::Tuple(vec![
            BridgeValue::str("aaa"),
            BridgeValue::Int(1),
            BridgeValue::Float(2.3),
        ])
    );
}

#[test]
fn test_mergedict_later_wins() {
    let (bridge, module) = bridge();
    let spec = CallSpec::function(module, "mergedict")
        .arg(BridgeValue::mapping(vec![
            (BridgeValue::str("a"), BridgeValue::Int(1)),
            (BridgeValue::str("b"), BridgeValue::Int(2)),
        ]))
        .arg(BridgeValue::mapping(vec![
            (BridgeValue::str("b"), BridgeValue::Int(20)),
            (BridgeValue::str("c"), BridgeValue::Int(3)),
        ]));
    let merged = bridge.dispatch(spec).unwrap();
    assert_eq!(merged.mapping_get(&BridgeValue::str("a")), Some(&BridgeValue::Int(1)));
    assert_eq!(merged.mapping_get(&BridgeValue::str("b")), Some(&BridgeValue::Int(20)));
    assert_eq!(merged.mapping_get(&BridgeValue::str("c")), Some(&BridgeValue::Int(3)));
}

#[test]
fn test_undefined_passthrough_and_set() {
    let (bridge, module) = bridge();
    let spec = CallSpec::function(module, "undefined")
        .arg(BridgeValue::Null)
        .arg(BridgeValue::Int(9));
    assert_eq!(
        bridge.dispatch(spec).unwrap(),
        BridgeValue::Tuple(vec![
            BridgeValue::Null,
            BridgeValue::Int(9),
            BridgeValue::set(vec![
                BridgeValue::Int(1),
                BridgeValue::Int(2),
                BridgeValue::str("www"),
            ]),
        ])
    );
}

#[test]
fn test_kwargs_collected_into_varkw() {
    let (bridge, module) = bridge();

    let spec = CallSpec::function(module, "kwargstest")
        .kwarg("value", BridgeValue::Int(7))
        .kwarg("test", BridgeValue::Int(4321))
        .kwarg("extra", BridgeValue::str("x"));
    let result = bridge.dispatch(spec).unwrap();
    assert_eq!(result.mapping_get(&BridgeValue::str("test")), Some(&BridgeValue::Int(4321)));
    assert_eq!(result.mapping_get(&BridgeValue::str("value")), Some(&BridgeValue::Int(7)));
    assert_eq!(result.mapping_get(&BridgeValue::str("extra")), Some(&BridgeValue::str("x")));

    // Without an override the default survives
    let spec = CallSpec::function(module, "kwargstest").kwarg("value", BridgeValue::Int(7));
    let result = bridge.dispatch(spec).unwrap();
    assert_eq!(result.mapping_get(&BridgeValue::str("test")), Some(&BridgeValue::Int(1234)));
}

#[test]
fn test_binding_errors_precede_invocation() {
    let (bridge, module) = bridge();

    let spec = CallSpec::function(module, "calc").arg(BridgeValue::Bool(true));
    assert_eq!(
        bridge.dispatch(spec),
        Err(BridgeError::MissingArgument("a".into()))
    );

    let spec = CallSpec::function(module, "check")
        .arg(BridgeValue::Int(1))
        .kwarg("a", BridgeValue::Int(2));
    assert_eq!(
        bridge.dispatch(spec),
        Err(BridgeError::DuplicateBinding("a".into()))
    );

    let spec = CallSpec::function(module, "check").kwarg("not an ident", BridgeValue::Int(1));
    assert!(matches!(
        bridge.dispatch(spec),
        Err(BridgeError::UnsupportedType(_))
    ));
}

#[test]
fn test_unknown_function() {
    let (bridge, module) = bridge();
    let spec = CallSpec::function(module, "nonexistent");
    assert_eq!(
        bridge.dispatch(spec),
        Err(BridgeError::UnknownTarget("nonexistent".into()))
    );
}

#[test]
fn test_embedded_exception_carries_traceback() {
    let (bridge, module) = bridge();
    let spec = CallSpec::function(module, "raise_error");
    let Err(BridgeError::EmbeddedException {
        kind,
        message,
        traceback,
    }) = bridge.dispatch(spec)
    else {
        panic!("expected an embedded exception");
    };
    assert_eq!(kind, "RuntimeError");
    assert!(!message.is_empty());
    assert!(traceback.is_some());
}

#[test]
fn test_elementwise_multiply() {
    let (bridge, module) = bridge();
    let ints = |v: &[i64]| BridgeValue::Sequence(v.iter().map(|i| BridgeValue::Int(*i)).collect());

    let spec = CallSpec::function(module, "multiple")
        .arg(ints(&[1, 2, 3]))
        .arg(ints(&[4, 5, 6]));
    assert_eq!(bridge.dispatch(spec).unwrap(), ints(&[4, 10, 18]));

    let spec = CallSpec::function(module, "multiple")
        .arg(ints(&[1, 2]))
        .arg(ints(&[1]));
    assert!(matches!(
        bridge.dispatch(spec),
        Err(BridgeError::EmbeddedException { kind, .. }) if kind == "ValueError"
    ));
}

#[test]
fn test_matrix_multiply() {
    let (bridge, module) = bridge();
    let m = |rows: &[&[i64]]| {
        BridgeValue::Sequence(
            rows.iter()
                .map(|r| BridgeValue::Sequence(r.iter().map(|v| BridgeValue::Int(*v)).collect()))
                .collect(),
        )
    };
    let spec = CallSpec::function(module, "multiple2d")
        .arg(m(&[&[1, 2], &[3, 4]]))
        .arg(m(&[&[2, 3], &[4, 5]]));
    assert_eq!(
        bridge.dispatch(spec).unwrap(),
        m(&[&[10, 13], &[22, 29]])
    );
}

#[test]
fn test_instance_lifecycle() {
    let (bridge, module) = bridge();

    let ctor = CallSpec::function(module, "Calculator").arg(BridgeValue::Sequence(
        [1.0, 2.0, 3.0].iter().map(|v| BridgeValue::Float(*v)).collect(),
    ));
    let value = bridge.dispatch(ctor).unwrap();
    let instance = InstanceHandle::from_value(&value).expect("constructor returns an instance");

    let call = CallSpec::method(instance, "multiply")
        .arg(BridgeValue::Int(2))
        .arg(BridgeValue::Sequence(
            [1.0, 1.0, 1.0].iter().map(|v| BridgeValue::Float(*v)).collect(),
        ));
    assert_eq!(
        bridge.dispatch(call.clone()).unwrap(),
        BridgeValue::Sequence(vec![
            BridgeValue::Float(3.0),
            BridgeValue::Float(5.0),
            BridgeValue::Float(7.0),
        ])
    );

    bridge.release_instance(instance);
    assert_eq!(bridge.dispatch(call), Err(BridgeError::HandleExpired));
}

#[test]
fn test_unknown_method() {
    let (bridge, module) = bridge();
    let ctor = CallSpec::function(module, "Calculator")
        .arg(BridgeValue::Sequence(vec![BridgeValue::Float(1.0)]));
    let instance = InstanceHandle::from_value(&bridge.dispatch(ctor).unwrap()).unwrap();

    let call = CallSpec::method(instance, "divide");
    assert_eq!(
        bridge.dispatch(call),
        Err(BridgeError::UnknownTarget("divide".into()))
    );
}
