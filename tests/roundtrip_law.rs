use json_objgraph::{deep_eq, Codec, TypeDescriptor, TypeRegistry, Value};
use proptest::prelude::*;

fn codec() -> Codec {
    let mut registry = TypeRegistry::new();
    registry.register(TypeDescriptor::object("Leaf")).unwrap();
    Codec::new(registry)
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::NULL),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        // JSON has no NaN/inf
        (-1.0e12..1.0e12f64).prop_map(Value::from),
        "[a-z0-9 ]{0,8}".prop_map(Value::from),
    ]
}

/// Scalars as leaves; lists, maps, sets, tuples and `Leaf` objects as branches.
fn arb_value() -> impl Strategy<Value = Value> {
    arb_scalar().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::list),
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::tuple),
            prop::collection::vec(arb_scalar(), 0..6).prop_map(Value::set),
            prop::collection::vec(("[a-z]{1,4}", inner.clone()), 0..5).prop_map(|entries| {
                Value::map(entries.into_iter().map(|(k, v)| (Value::from(k), v)))
            }),
            prop::collection::vec(("[a-z]{1,4}", inner), 0..4).prop_map(|attrs| {
                let ty = std::sync::Arc::new(TypeDescriptor::object("Leaf"));
                let mut leaf = ty.allocate();
                for (name, value) in attrs {
                    leaf.set(name, value);
                }
                Value::from(leaf)
            }),
        ]
    })
}

proptest! {
    #[test]
    fn prop_decode_encode_is_structurally_equal(v in arb_value()) {
        let codec = codec();
        let back = codec.decode(&codec.encode(&v).unwrap()).unwrap();
        prop_assert!(deep_eq(&back, &v));
    }

    #[test]
    fn prop_text_round_trip(v in arb_value()) {
        let codec = codec();
        let text = codec.to_string(&v).unwrap();
        let back = codec.from_str(&text).unwrap();
        prop_assert!(deep_eq(&back, &v));
        prop_assert_eq!(codec.to_string(&back).unwrap(), text);
    }

    #[test]
    fn prop_shared_child_stays_shared(v in arb_value()) {
        let codec = codec();
        let shared = Value::list([v]);
        let outer = Value::list([shared.clone(), Value::from(0), shared]);
        let back = codec.decode(&codec.encode(&outer).unwrap()).unwrap();
        let obj = back.as_obj().unwrap().borrow();
        let items = obj.as_list().unwrap();
        prop_assert!(items[0].is(&items[2]));
    }
}
