//! Name- and type-analysis behavior over hand-built ASTs: symbol
//! attachment, diagnostic accumulation, constructor dispatch, and
//! definite-assignment validation.

use swarm_check::{name_analysis, type_analysis};
use swarm_core::ast::*;
use swarm_core::error::CompileError;
use swarm_core::position::Position;
use swarm_core::types::Type;

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

fn string(s: &str) -> Expression {
    Expression::StringLiteral(StringLiteral {
        pos: p(),
        value: s.into(),
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

fn assign(dest: Expression, value: Expression) -> Expression {
    Expression::Assign(AssignExpression {
        pos: p(),
        dest: Box::new(dest),
        value: Box::new(value),
        ty: None,
    })
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

fn constructor(params: Vec<(&str, Type)>, body: Vec<Statement>) -> ConstructorNode {
    let formals: Vec<Formal> = params
        .iter()
        .map(|(name, ty)| Formal {
            type_node: TypeLiteral::new(p(), ty.clone()),
            id: Identifier::new(p(), *name),
        })
        .collect();
    let fn_ty = Type::lambda(params.iter().map(|(_, t)| t.clone()).collect(), Type::void());
    ConstructorNode {
        pos: p(),
        name: String::new(),
        func: FunctionNode {
            pos: p(),
            formals,
            type_node: TypeLiteral::new(p(), fn_ty),
            body,
            used_symbols: vec![],
            var_decld_to: None,
            ty: None,
        },
        parent_constructors: vec![],
        part_of: None,
    }
}

/// `type T = type { number x; constructor() => { x = 0; } constructor(n) => { x = n; } }`
fn point_like_type(name: &str) -> Statement {
    let tb = TypeBodyNode {
        pos: p(),
        parents: vec![],
        declarations: vec![Statement::UninitializedVariableDeclaration(
            UninitializedVariableDeclaration {
                pos: p(),
                type_node: TypeLiteral::new(p(), Type::number()),
                id: Identifier::new(p(), "x"),
            },
        )],
        constructors: vec![
            constructor(vec![], vec![expr_stmt(assign(ident("x"), num(0.0)))]),
            constructor(
                vec![("n", Type::number())],
                vec![expr_stmt(assign(ident("x"), ident("n")))],
            ),
        ],
        value: None,
        ty: None,
    };
    decl(name, Type::type_of_types(), Expression::TypeBody(Box::new(tb)))
}

#[test]
fn free_identifier_is_reported() {
    let mut program = Program {
        pos: p(),
        body: vec![expr_stmt(ident("nowhere"))],
    };
    let errors = name_analysis(&mut program).unwrap_err();
    assert!(matches!(
        errors[0],
        CompileError::FreeIdentifier { ref name, .. } if name == "nowhere"
    ));
}

#[test]
fn redeclaration_is_reported_with_first_position() {
    let mut program = Program {
        pos: p(),
        body: vec![
            decl("x", Type::number(), num(1.0)),
            decl("x", Type::number(), num(2.0)),
        ],
    };
    let errors = name_analysis(&mut program).unwrap_err();
    assert!(matches!(
        errors[0],
        CompileError::Redeclaration { ref name, .. } if name == "x"
    ));
}

#[test]
fn prologue_names_resolve_without_declarations() {
    let mut program = Program {
        pos: p(),
        body: vec![expr_stmt(call(ident("log"), vec![string("hi")]))],
    };
    let mut arena = name_analysis(&mut program).expect("log is a prologue symbol");
    type_analysis(&mut program, &mut arena).expect("string argument fits");
}

#[test]
fn string_addition_sets_the_concatenation_flag() {
    let mut program = Program {
        pos: p(),
        body: vec![decl(
            "s",
            Type::string(),
            binary(BinaryOp::Add, string("a"), string("b")),
        )],
    };
    let mut arena = name_analysis(&mut program).unwrap();
    type_analysis(&mut program, &mut arena).unwrap();

    let Statement::VariableDeclaration(d) = &program.body[0] else {
        panic!()
    };
    let Expression::Binary(b) = &d.value else { panic!() };
    assert!(b.concatenation);
    assert_eq!(b.ty, Some(Type::string()));
}

#[test]
fn numeric_addition_does_not_set_the_flag() {
    let mut program = Program {
        pos: p(),
        body: vec![decl(
            "n",
            Type::number(),
            binary(BinaryOp::Add, num(1.0), num(2.0)),
        )],
    };
    let mut arena = name_analysis(&mut program).unwrap();
    type_analysis(&mut program, &mut arena).unwrap();
    let Statement::VariableDeclaration(d) = &program.body[0] else {
        panic!()
    };
    let Expression::Binary(b) = &d.value else { panic!() };
    assert!(!b.concatenation);
}

#[test]
fn return_outside_function_is_a_placement_error() {
    let mut program = Program {
        pos: p(),
        body: vec![Statement::Return(ReturnStatement {
            pos: p(),
            value: None,
        })],
    };
    let mut arena = name_analysis(&mut program).unwrap();
    let errors = type_analysis(&mut program, &mut arena).unwrap_err();
    assert!(matches!(errors[0], CompileError::ReturnOutsideFunction { .. }));
}

#[test]
fn break_outside_loop_is_a_placement_error() {
    let mut program = Program {
        pos: p(),
        body: vec![Statement::Break { pos: p() }],
    };
    let mut arena = name_analysis(&mut program).unwrap();
    let errors = type_analysis(&mut program, &mut arena).unwrap_err();
    assert!(matches!(errors[0], CompileError::BreakOutsideLoop { .. }));
}

#[test]
fn arity_overflow_is_reported() {
    let f = Expression::Function(Box::new(FunctionNode {
        pos: p(),
        formals: vec![Formal {
            type_node: TypeLiteral::new(p(), Type::number()),
            id: Identifier::new(p(), "a"),
        }],
        type_node: TypeLiteral::new(p(), Type::lambda(vec![Type::number()], Type::number())),
        body: vec![Statement::Return(ReturnStatement {
            pos: p(),
            value: Some(ident("a")),
        })],
        used_symbols: vec![],
        var_decld_to: None,
        ty: None,
    }));
    let mut program = Program {
        pos: p(),
        body: vec![
            decl("f", Type::lambda(vec![Type::number()], Type::number()), f),
            decl("r", Type::number(), call(ident("f"), vec![num(1.0), num(2.0)])),
        ],
    };
    let mut arena = name_analysis(&mut program).unwrap();
    let errors = type_analysis(&mut program, &mut arena).unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e, CompileError::InvalidArity { .. })));
}

#[test]
fn constructor_dispatch_picks_the_matching_arity() {
    let mut program = Program {
        pos: p(),
        body: vec![
            point_like_type("T"),
            decl(
                "t",
                Type::Ambiguous { name: "T".into() },
                call(ident("T"), vec![num(7.0)]),
            ),
        ],
    };
    let mut arena = name_analysis(&mut program).unwrap();
    type_analysis(&mut program, &mut arena).unwrap();

    let Statement::VariableDeclaration(d) = &program.body[1] else {
        panic!()
    };
    let Expression::Call(c) = &d.value else { panic!() };
    let binding = c.constructor.as_ref().expect("constructor bound");
    assert_eq!(binding.name, "CONSTRUCTOR_1");
    assert!(matches!(c.ty, Some(Type::Object(_))));
}

#[test]
fn mismatched_constructor_arguments_are_rejected() {
    // T(true): neither constructor accepts a boolean.
    let mut program = Program {
        pos: p(),
        body: vec![
            point_like_type("T"),
            expr_stmt(call(
                ident("T"),
                vec![Expression::BooleanLiteral(BooleanLiteral {
                    pos: p(),
                    value: true,
                    ty: None,
                })],
            )),
        ],
    };
    let mut arena = name_analysis(&mut program).unwrap();
    let errors = type_analysis(&mut program, &mut arena).unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e, CompileError::NoMatchingConstructor { .. })));
}

#[test]
fn constructor_must_initialize_every_uninitialized_property() {
    // A constructor that assigns x only conditionally fails validation.
    let tb = TypeBodyNode {
        pos: p(),
        parents: vec![],
        declarations: vec![Statement::UninitializedVariableDeclaration(
            UninitializedVariableDeclaration {
                pos: p(),
                type_node: TypeLiteral::new(p(), Type::number()),
                id: Identifier::new(p(), "x"),
            },
        )],
        constructors: vec![constructor(
            vec![("flag", Type::boolean())],
            vec![Statement::If(IfStatement {
                pos: p(),
                condition: ident("flag"),
                body: vec![expr_stmt(assign(ident("x"), num(1.0)))],
            })],
        )],
        value: None,
        ty: None,
    };
    let mut program = Program {
        pos: p(),
        body: vec![decl("T", Type::type_of_types(), Expression::TypeBody(Box::new(tb)))],
    };
    let mut arena = name_analysis(&mut program).unwrap();
    let errors = type_analysis(&mut program, &mut arena).unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e, CompileError::UninitializedProperties { .. })));
}

#[test]
fn enumerate_local_adopts_the_element_type() {
    let lit = Expression::EnumerationLiteral(EnumerationLiteral {
        pos: p(),
        actuals: vec![num(1.0)],
        ty: None,
    });
    let mut program = Program {
        pos: p(),
        body: vec![Statement::Enumerate(EnumerateStatement {
            pos: p(),
            enumerable: lit,
            shared: false,
            local: Identifier::new(p(), "v"),
            index: None,
            body: vec![expr_stmt(binary(BinaryOp::Add, ident("v"), num(1.0)))],
        })],
    };
    let mut arena = name_analysis(&mut program).unwrap();
    type_analysis(&mut program, &mut arena).unwrap();

    let Statement::Enumerate(e) = &program.body[0] else {
        panic!()
    };
    let sym = e.local.symbol.expect("local symbol attached");
    assert_eq!(arena.get(sym).ty, Some(Type::number()));
}

#[test]
fn type_variable_reassignment_is_rejected() {
    let mut program = Program {
        pos: p(),
        body: vec![
            point_like_type("T"),
            expr_stmt(assign(ident("T"), num(1.0))),
        ],
    };
    let mut arena = name_analysis(&mut program).unwrap();
    let errors = type_analysis(&mut program, &mut arena).unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e, CompileError::TypeVariableReassignment { .. })));
}
