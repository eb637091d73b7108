//! Lowering invariants: expression protocol, region balance, lock balance,
//! control-flow flattening shapes, deferred-call sequences, and textual
//! round-tripping of the emitted stream.

use swarm_check::{name_analysis, trim_dead_code, type_analysis};
use swarm_codegen::{lower, LowerOptions};
use swarm_core::ast::*;
use swarm_core::position::Position;
use swarm_core::types::Type;
use swarm_isa::{parse_program, write_program, Affinity, Instruction, Instructions, Tag};

fn p() -> Position {
    Position::new("t.swarm", 1, 1, 1, 20)
}

fn num(v: f64) -> Expression {
    Expression::NumberLiteral(NumberLiteral {
        pos: p(),
        value: v,
        ty: None,
    })
}

fn ident(name: &str) -> Expression {
    Expression::Identifier(Identifier::new(p(), name))
}

fn expr_stmt(expr: Expression) -> Statement {
    Statement::Expression(ExpressionStatement { pos: p(), expr })
}

fn decl(name: &str, ty: Type, value: Expression) -> Statement {
    Statement::VariableDeclaration(VariableDeclaration {
        pos: p(),
        shared: false,
        type_node: TypeLiteral::new(p(), ty),
        id: Identifier::new(p(), name),
        value,
    })
}

fn shared_decl(name: &str, ty: Type, value: Expression) -> Statement {
    Statement::VariableDeclaration(VariableDeclaration {
        pos: p(),
        shared: true,
        type_node: TypeLiteral::new(p(), ty),
        id: Identifier::new(p(), name),
        value,
    })
}

fn assign(dest: Expression, value: Expression) -> Statement {
    expr_stmt(Expression::Assign(AssignExpression {
        pos: p(),
        dest: Box::new(dest),
        value: Box::new(value),
        ty: None,
    }))
}

fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    Expression::Binary(BinaryExpression {
        pos: p(),
        op,
        left: Box::new(left),
        right: Box::new(right),
        concatenation: false,
        ty: None,
    })
}

fn call(func: Expression, args: Vec<Expression>) -> Expression {
    Expression::Call(CallExpression {
        pos: p(),
        func: Box::new(func),
        args,
        constructor: None,
        ty: None,
    })
}

fn function(params: Vec<(&str, Type)>, ret: Type, body: Vec<Statement>) -> Expression {
    let formals = params
        .iter()
        .map(|(name, ty)| Formal {
            type_node: TypeLiteral::new(p(), ty.clone()),
            id: Identifier::new(p(), *name),
        })
        .collect();
    let fn_ty = Type::lambda(params.iter().map(|(_, t)| t.clone()).collect(), ret);
    Expression::Function(Box::new(FunctionNode {
        pos: p(),
        formals,
        type_node: TypeLiteral::new(p(), fn_ty),
        body,
        used_symbols: vec![],
        var_decld_to: None,
        ty: None,
    }))
}

fn program(body: Vec<Statement>) -> Program {
    Program { pos: p(), body }
}

/// Full middle-end pipeline minus optimization.
fn lower_program(mut program: Program) -> Instructions {
    let mut arena = name_analysis(&mut program).expect("name analysis");
    type_analysis(&mut program, &mut arena).expect("type analysis");
    trim_dead_code(&mut program);
    lower(&program, &arena, &LowerOptions::default()).expect("lowering")
}

fn count_tag(instrs: &Instructions, tag: Tag) -> usize {
    instrs.iter().filter(|i| i.tag() == tag).count()
}

/// (I1)/(P3): every region opens once and closes once.
fn assert_region_balance(instrs: &Instructions) {
    let begins = count_tag(instrs, Tag::BeginFn);
    let returns = count_tag(instrs, Tag::Return0) + count_tag(instrs, Tag::Return1);
    assert_eq!(begins, returns, "region balance violated");
}

/// (I3)/(P4): lock and unlock multisets match.
fn assert_lock_balance(instrs: &Instructions) {
    let mut locks = std::collections::HashMap::new();
    for i in instrs {
        match i {
            Instruction::Lock(l) => *locks.entry(l.fq_name()).or_insert(0i64) += 1,
            Instruction::Unlock(l) => *locks.entry(l.fq_name()).or_insert(0i64) -= 1,
            _ => {}
        }
    }
    for (name, n) in locks {
        assert_eq!(n, 0, "unbalanced lock on {name}");
    }
}

#[test]
fn empty_program_lowers_to_empty_stream() {
    let instrs = lower_program(program(vec![]));
    assert!(instrs.is_empty());
}

#[test]
fn nullary_function_lowers_to_region_with_return() {
    let instrs = lower_program(program(vec![decl(
        "f",
        Type::lambda(vec![], Type::void()),
        function(vec![], Type::void(), vec![]),
    )]));
    assert_eq!(count_tag(&instrs, Tag::BeginFn), 1);
    assert_eq!(count_tag(&instrs, Tag::Return0), 1);
    assert_region_balance(&instrs);

    // The declaration site binds the function value.
    assert!(instrs.iter().any(|i| matches!(
        i,
        Instruction::AssignValue { value: swarm_isa::Reference::Location(l), .. }
            if l.affinity == Affinity::Function
    )));
}

#[test]
fn curried_call_chains_curry_then_call1() {
    let f = function(
        vec![("a", Type::number()), ("b", Type::number())],
        Type::number(),
        vec![Statement::Return(ReturnStatement {
            pos: p(),
            value: Some(binary(BinaryOp::Add, ident("a"), ident("b"))),
        })],
    );
    // f(2, 3) in one call: one curry plus the terminal call.
    let instrs = lower_program(program(vec![
        decl("f", Type::lambda(vec![Type::number(), Type::number()], Type::number()), f),
        decl(
            "r",
            Type::number(),
            call(ident("f"), vec![num(2.0), num(3.0)]),
        ),
    ]));
    assert_eq!(count_tag(&instrs, Tag::Curry), 1);
    assert_eq!(count_tag(&instrs, Tag::Call1), 1);
    assert_region_balance(&instrs);
}

#[test]
fn void_call_lowers_to_bare_call() {
    let f = function(vec![], Type::void(), vec![]);
    let instrs = lower_program(program(vec![
        decl("f", Type::lambda(vec![], Type::void()), f),
        expr_stmt(call(ident("f"), vec![])),
    ]));
    // The terminal Call0 is a statement, not an assignment operand.
    let bare_call0 = instrs
        .iter()
        .any(|i| matches!(i, Instruction::Call0(_)));
    assert!(bare_call0);
    let assigned_call0 = instrs.iter().any(|i| {
        matches!(i, Instruction::AssignEval { eval, .. } if eval.tag() == Tag::Call0)
    });
    assert!(!assigned_call0);
}

#[test]
fn if_statement_emits_region_and_callif() {
    let instrs = lower_program(program(vec![
        decl("x", Type::number(), num(1.0)),
        Statement::If(IfStatement {
            pos: p(),
            condition: binary(
                BinaryOp::Comparison(ComparisonOp::LessThan),
                ident("x"),
                num(10.0),
            ),
            body: vec![assign(ident("x"), num(2.0))],
        }),
    ]));
    assert_eq!(count_tag(&instrs, Tag::CallIf0), 1);
    let has_ifbody = instrs.iter().any(|i| matches!(
        i,
        Instruction::BeginFunction { func, .. } if func.name.starts_with("IFBODY_")
    ));
    assert!(has_ifbody);
    assert_region_balance(&instrs);
}

#[test]
fn while_with_break_splits_the_condition() {
    let body = vec![
        Statement::If(IfStatement {
            pos: p(),
            condition: binary(BinaryOp::Equals, ident("i"), num(3.0)),
            body: vec![Statement::Break { pos: p() }],
        }),
        assign(ident("i"), binary(BinaryOp::Add, ident("i"), num(1.0))),
    ];
    let instrs = lower_program(program(vec![
        decl("i", Type::number(), num(0.0)),
        Statement::While(WhileStatement {
            pos: p(),
            condition: binary(
                BinaryOp::Comparison(ComparisonOp::LessThan),
                ident("i"),
                num(10.0),
            ),
            body,
        }),
    ]));

    let names: Vec<&str> = instrs
        .iter()
        .filter_map(|i| match i {
            Instruction::BeginFunction { func, .. } => Some(func.name.as_str()),
            _ => None,
        })
        .collect();
    assert!(names.iter().any(|n| n.starts_with("WHILECOND_INNER_")));
    assert!(names.iter().any(|n| n.starts_with("WHILECOND_OUTER_")));
    assert!(names.iter().any(|n| n.starts_with("WHILE_")));
    // The statement after the breaker-containing block is peeled.
    assert!(names.iter().any(|n| n.starts_with("SUBFUNC_")));
    assert_eq!(count_tag(&instrs, Tag::While), 1);
    assert_region_balance(&instrs);
}

#[test]
fn while_without_break_keeps_a_single_condition_region() {
    let instrs = lower_program(program(vec![
        decl("i", Type::number(), num(0.0)),
        Statement::While(WhileStatement {
            pos: p(),
            condition: binary(
                BinaryOp::Comparison(ComparisonOp::LessThan),
                ident("i"),
                num(3.0),
            ),
            body: vec![assign(ident("i"), binary(BinaryOp::Add, ident("i"), num(1.0)))],
        }),
    ]));
    let inner = instrs.iter().any(|i| matches!(
        i,
        Instruction::BeginFunction { func, .. } if func.name.starts_with("WHILECOND_INNER_")
    ));
    assert!(!inner, "no break/return means no split condition");
    assert_region_balance(&instrs);
}

#[test]
fn enumerate_emits_body_region_and_enumerate() {
    let lit = Expression::EnumerationLiteral(EnumerationLiteral {
        pos: p(),
        actuals: vec![num(10.0), num(20.0), num(30.0)],
        ty: None,
    });
    let instrs = lower_program(program(vec![Statement::Enumerate(EnumerateStatement {
        pos: p(),
        enumerable: lit,
        shared: false,
        local: Identifier::new(p(), "v"),
        index: Some(Identifier::new(p(), "i")),
        body: vec![expr_stmt(binary(BinaryOp::Add, ident("v"), ident("i")))],
    })]));
    assert_eq!(count_tag(&instrs, Tag::Enumerate), 1);
    assert_eq!(count_tag(&instrs, Tag::EnumInit), 1);
    assert_eq!(count_tag(&instrs, Tag::EnumAppend), 3);
    // The body region declares both formals.
    assert_eq!(count_tag(&instrs, Tag::FnParam), 2);
    assert_region_balance(&instrs);
}

#[test]
fn contended_shared_statement_is_locked_and_balanced() {
    // count = count + 1 references the shared cell twice.
    let instrs = lower_program(program(vec![
        shared_decl("count", Type::number(), num(0.0)),
        assign(
            ident("count"),
            binary(BinaryOp::Add, ident("count"), num(1.0)),
        ),
    ]));
    assert_eq!(count_tag(&instrs, Tag::Lock), 1);
    assert_eq!(count_tag(&instrs, Tag::Unlock), 1);
    assert_lock_balance(&instrs);

    // Single-reference statements stay lock-free.
    let single = lower_program(program(vec![
        shared_decl("count", Type::number(), num(0.0)),
        assign(ident("count"), num(5.0)),
    ]));
    assert_eq!(count_tag(&single, Tag::Lock), 0);
}

#[test]
fn deferred_call_pushes_and_reads_synchronize() {
    let f = function(vec![], Type::number(), vec![Statement::Return(ReturnStatement {
        pos: p(),
        value: Some(num(7.0)),
    })]);
    let instrs = lower_program(program(vec![
        decl("f", Type::lambda(vec![], Type::number()), f),
        decl(
            "x",
            Type::number(),
            Expression::DeferCall(DeferCall {
                pos: p(),
                call: CallExpression {
                    pos: p(),
                    func: Box::new(ident("f")),
                    args: vec![],
                    constructor: None,
                    ty: None,
                },
                ty: None,
            }),
        ),
        // Reading x forces Resume/Drain/RetMapGet/Pop materialization.
        decl("y", Type::number(), binary(BinaryOp::Add, ident("x"), num(1.0))),
    ]));

    assert_eq!(count_tag(&instrs, Tag::EnterContext), 1);
    assert_eq!(count_tag(&instrs, Tag::PushCall0), 1);
    assert_eq!(count_tag(&instrs, Tag::ResumeContext), 1);
    assert_eq!(count_tag(&instrs, Tag::Drain), 1);
    assert_eq!(count_tag(&instrs, Tag::RetMapGet), 1);
    // One PopContext closes the defer, one closes the materialization.
    assert_eq!(count_tag(&instrs, Tag::PopContext), 2);

    // The synchronization lands before the consuming Plus.
    let resume_at = instrs
        .iter()
        .position(|i| i.tag() == Tag::ResumeContext)
        .unwrap();
    let plus_at = instrs
        .iter()
        .position(|i| matches!(i, Instruction::AssignEval { eval, .. } if eval.tag() == Tag::Plus))
        .unwrap();
    assert!(resume_at < plus_at);
}

#[test]
fn lowered_streams_roundtrip_through_text() {
    let samples = vec![
        program(vec![decl("x", Type::number(), num(5.0))]),
        program(vec![
            decl("i", Type::number(), num(0.0)),
            Statement::While(WhileStatement {
                pos: p(),
                condition: binary(
                    BinaryOp::Comparison(ComparisonOp::LessThan),
                    ident("i"),
                    num(3.0),
                ),
                body: vec![assign(
                    ident("i"),
                    binary(BinaryOp::Add, ident("i"), num(1.0)),
                )],
            }),
        ]),
        program(vec![
            shared_decl("count", Type::number(), num(0.0)),
            assign(
                ident("count"),
                binary(BinaryOp::Add, ident("count"), num(1.0)),
            ),
        ]),
    ];
    for sample in samples {
        let instrs = lower_program(sample);
        let text = write_program(&instrs).expect("emit");
        let back = parse_program(&text).expect("parse");
        assert_eq!(instrs, back, "textual roundtrip changed the stream");
    }
}

#[test]
fn statements_after_return_are_trimmed_before_lowering() {
    let f = function(
        vec![],
        Type::number(),
        vec![
            Statement::Return(ReturnStatement {
                pos: p(),
                value: Some(num(1.0)),
            }),
            expr_stmt(num(2.0)),
        ],
    );
    let instrs = lower_program(program(vec![decl(
        "f",
        Type::lambda(vec![], Type::number()),
        f,
    )]));
    // The dead trailing literal never lowers.
    let has_two = instrs.iter().any(|i| matches!(
        i,
        Instruction::AssignValue { value: swarm_isa::Reference::Number(n), .. } if *n == 2.0
    ));
    assert!(!has_two);
}

#[test]
fn debug_mode_emits_position_annotations() {
    let mut prog = program(vec![decl("x", Type::number(), num(5.0))]);
    let mut arena = name_analysis(&mut prog).unwrap();
    type_analysis(&mut prog, &mut arena).unwrap();
    let instrs = lower(&prog, &arena, &LowerOptions { debug: true }).unwrap();
    assert!(count_tag(&instrs, Tag::Position) > 0);

    let plain = lower(&prog, &arena, &LowerOptions { debug: false }).unwrap();
    assert_eq!(count_tag(&plain, Tag::Position), 0);
}
