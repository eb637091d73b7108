//! Property tests over the ISA codecs: the textual and binary forms must
//! reproduce the instruction stream exactly.

use proptest::prelude::*;

use swarm_core::types::{Primitive, Type};
use swarm_isa::{
    binary, text, Affinity, Instruction, Instructions, Location, Reference,
};

fn arb_affinity() -> impl Strategy<Value = Affinity> {
    prop_oneof![
        Just(Affinity::Local),
        Just(Affinity::Shared),
        Just(Affinity::Function),
        Just(Affinity::ObjectProp),
        Just(Affinity::Primitive),
    ]
}

fn arb_location() -> impl Strategy<Value = Location> {
    (arb_affinity(), "[A-Za-z_][A-Za-z0-9_]{0,12}")
        .prop_map(|(aff, name)| Location::new(aff, name))
}

fn arb_type() -> impl Strategy<Value = Type> {
    let prim = prop_oneof![
        Just(Type::Primitive(Primitive::Number)),
        Just(Type::Primitive(Primitive::String)),
        Just(Type::Primitive(Primitive::Boolean)),
        Just(Type::Primitive(Primitive::Void)),
    ];
    prim.prop_recursive(2, 8, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(Type::enumerable),
            inner.clone().prop_map(Type::map),
            (inner.clone(), inner).prop_map(|(p, r)| Type::lambda(vec![p], r)),
        ]
    })
}

fn arb_reference() -> impl Strategy<Value = Reference> {
    prop_oneof![
        arb_location().prop_map(Reference::Location),
        // Finite, exactly-representable numbers keep equality meaningful.
        (-1_000_000i64..1_000_000i64).prop_map(|n| Reference::Number(n as f64)),
        "[ -~]{0,16}".prop_map(Reference::String),
        any::<bool>().prop_map(Reference::Boolean),
        arb_type().prop_map(Reference::Type),
    ]
}

fn arb_instruction() -> impl Strategy<Value = Instruction> {
    prop_oneof![
        (arb_location(), arb_reference())
            .prop_map(|(dest, value)| Instruction::AssignValue { dest, value }),
        (arb_location(), arb_reference(), arb_reference()).prop_map(|(dest, a, b)| {
            Instruction::AssignEval {
                dest,
                eval: Box::new(Instruction::Plus(a, b)),
            }
        }),
        (arb_reference(), arb_reference()).prop_map(|(a, b)| Instruction::IsEqual(a, b)),
        arb_location().prop_map(Instruction::ScopeOf),
        arb_location().prop_map(Instruction::Lock),
        arb_location().prop_map(Instruction::Unlock),
        (arb_reference(), arb_reference())
            .prop_map(|(a, b)| Instruction::CallIf0(a, b)),
        Just(Instruction::EnterContext),
        Just(Instruction::Drain),
        (arb_reference(), arb_reference(), arb_reference())
            .prop_map(|(a, b, c)| Instruction::EnumSet(a, b, c)),
    ]
}

proptest! {
    /// (P2) The textual form parses back to an equal stream.
    #[test]
    fn text_roundtrip(instrs in prop::collection::vec(arb_instruction(), 0..12)) {
        let instrs: Instructions = instrs;
        let emitted = text::write_program(&instrs).expect("serializable stream");
        let back = text::parse_program(&emitted).expect("parseable stream");
        prop_assert_eq!(instrs, back);
    }

    /// The binary form parses back to an equal stream.
    #[test]
    fn binary_roundtrip(instrs in prop::collection::vec(arb_instruction(), 0..12)) {
        let instrs: Instructions = instrs;
        let bytes = binary::encode_program(&instrs).expect("serializable stream");
        let back = binary::decode_program(&bytes, &binary::PlainResolver).expect("decodable");
        prop_assert_eq!(instrs, back);
    }
}
