//! Property tests over the type algebra.

use proptest::prelude::*;

use swarm_core::types::{ObjectTypeBuilder, Primitive, Type};

fn arb_primitive() -> impl Strategy<Value = Type> {
    prop_oneof![
        Just(Type::Primitive(Primitive::Number)),
        Just(Type::Primitive(Primitive::String)),
        Just(Type::Primitive(Primitive::Boolean)),
        Just(Type::Primitive(Primitive::Type)),
        Just(Type::Primitive(Primitive::Unit)),
        Just(Type::Primitive(Primitive::Void)),
        Just(Type::Primitive(Primitive::Opaque)),
        Just(Type::Primitive(Primitive::This)),
    ]
}

/// Bounded-depth recursive types, objects included.
fn arb_type() -> impl Strategy<Value = Type> {
    arb_primitive().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(Type::enumerable),
            inner.clone().prop_map(Type::map),
            inner.clone().prop_map(Type::resource),
            inner.clone().prop_map(|r| Type::lambda(vec![], r)),
            (inner.clone(), inner.clone())
                .prop_map(|(p, r)| Type::lambda(vec![p], r)),
            prop::collection::vec((("[a-z]{1,6}").prop_map(String::from), inner), 0..4).prop_map(
                |props| {
                    let mut b = ObjectTypeBuilder::new();
                    for (name, ty) in props {
                        b.define_property(name, ty);
                    }
                    Type::Object(b.finalize())
                }
            ),
        ]
    })
}

proptest! {
    /// (P1) Assignability is reflexive for every constructible type.
    #[test]
    fn assignability_is_reflexive(ty in arb_type()) {
        prop_assert!(ty.is_assignable_to(&ty));
    }

    /// The identity transform reproduces the type.
    #[test]
    fn identity_transform_is_identity(ty in arb_type()) {
        let out = ty.transform(&|_| None);
        prop_assert_eq!(out, ty);
    }

    /// Arity equals the number of stripped leading arrows.
    #[test]
    fn arity_matches_strip(params in prop::collection::vec(arb_primitive(), 0..4)) {
        let ty = Type::lambda(params.clone(), Type::number());
        if params.is_empty() {
            prop_assert!(matches!(ty, Type::Lambda0(_)));
        } else {
            prop_assert_eq!(ty.arity(), params.len());
            prop_assert_eq!(ty.strip_arrows(params.len()), &Type::number());
        }
    }
}
