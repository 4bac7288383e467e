//! Property tests for the value codec

use proptest::prelude::*;
use qiao::{BridgeValue, BufferView, Codec};

fn scalar() -> impl Strategy<Value = BridgeValue> {
    prop_oneof![
        Just(BridgeValue::Null),
        any::<bool>().prop_map(BridgeValue::Bool),
        any::<i64>().prop_map(BridgeValue::Int),
        (-1.0e6..1.0e6f64).prop_map(BridgeValue::Float),
        "[a-z0-9]{0,8}".prop_map(BridgeValue::str),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(BridgeValue::bytes),
    ]
}

/// Arbitrary acyclic values over the codec-total subset: string-keyed
/// mappings, no callables, no borrowed views
fn value() -> impl Strategy<Value = BridgeValue> {
    scalar().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(BridgeValue::Sequence),
            proptest::collection::vec(inner.clone(), 0..4).prop_map(BridgeValue::set),
            proptest::collection::vec(inner.clone(), 0..4).prop_map(BridgeValue::Tuple),
            proptest::collection::vec(("[a-z]{1,6}", inner), 0..4).prop_map(|pairs| {
                BridgeValue::mapping(
                    pairs
                        .into_iter()
                        .map(|(k, v)| (BridgeValue::str(k), v)),
                )
            }),
        ]
    })
}

proptest! {
    #[test]
    fn prop_codec_round_trips(v in value()) {
        let host = Codec::to_host(&v).unwrap();
        let back = Codec::to_embedded(&host).unwrap();
        prop_assert_eq!(back, v);
    }

    #[test]
    fn prop_buffer_round_trips(elems in proptest::collection::vec(-1.0e6..1.0e6f32, 0..32)) {
        let v = BridgeValue::Buffer(BufferView::from_f32s(&elems));
        let host = Codec::to_host(&v).unwrap();
        let back = Codec::to_embedded(&host).unwrap();
        prop_assert_eq!(back, v);
    }

    #[test]
    fn prop_set_construction_is_idempotent(elems in proptest::collection::vec(any::<i64>(), 0..16)) {
        let once = BridgeValue::set(elems.iter().copied().map(BridgeValue::Int));
        let BridgeValue::Set(deduped) = once.clone() else {
            panic!("expected a set");
        };
        let twice = BridgeValue::set(deduped);
        prop_assert_eq!(once, twice);
    }
}
