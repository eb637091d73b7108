//! End-to-end scenarios: AST → analysis → lowering → optimization →
//! execution, asserting observable stream output and storage state.

use swarm_check::{name_analysis, trim_dead_code, type_analysis};
use swarm_codegen::{lower, optimize, LowerOptions, OptimizeOptions};
use swarm_core::ast::*;
use swarm_core::position::Position;
use swarm_core::types::Type;
use swarm_isa::{Instructions, Reference};
use swarm_vm::{RuntimeExCode, VirtualMachine, VmConfig, VmError};

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

/// `log(numberToString(<e>))`
fn log_number(e: Expression) -> Statement {
    expr_stmt(call(
        ident("log"),
        vec![call(ident("numberToString"), vec![e])],
    ))
}

fn compile(mut program: Program, optimized: bool) -> Instructions {
    let mut arena = name_analysis(&mut program).expect("name analysis");
    type_analysis(&mut program, &mut arena).expect("type analysis");
    trim_dead_code(&mut program);
    let instrs = lower(&program, &arena, &LowerOptions::default()).expect("lowering");
    if optimized {
        optimize(instrs, &OptimizeOptions::default())
    } else {
        instrs
    }
}

fn run(program: Program, threads: usize) -> VirtualMachine {
    let instrs = compile(program, true);
    let config = VmConfig {
        max_threads: threads,
        ..VmConfig::default()
    };
    let mut vm = VirtualMachine::new(instrs, config).expect("load");
    vm.execute().expect("execution");
    vm
}

#[test]
fn curried_call_prints_five() {
    // fn f = (a: number, b: number): number => { return a + b; };
    // log(numberToString(f(2)(3)));
    let f = function(
        vec![("a", Type::number()), ("b", Type::number())],
        Type::number(),
        vec![Statement::Return(ReturnStatement {
            pos: p(),
            value: Some(binary(BinaryOp::Add, ident("a"), ident("b"))),
        })],
    );
    let program = Program {
        pos: p(),
        body: vec![
            decl(
                "f",
                Type::lambda(vec![Type::number(), Type::number()], Type::number()),
                f,
            ),
            log_number(call(call(ident("f"), vec![num(2.0)]), vec![num(3.0)])),
        ],
    };
    let vm = run(program, 0);
    assert_eq!(vm.io_log(), vec!["5".to_string()]);
}

#[test]
fn shared_counter_survives_concurrent_deferred_increments() {
    // shared number count = 0;
    // fn bump = (): void => { count = count + 1; };
    // defer bump(); defer bump();
    let bump = function(
        vec![],
        Type::void(),
        vec![assign(
            ident("count"),
            binary(BinaryOp::Add, ident("count"), num(1.0)),
        )],
    );
    let defer_bump = || {
        expr_stmt(Expression::DeferCall(DeferCall {
            pos: p(),
            call: CallExpression {
                pos: p(),
                func: Box::new(ident("bump")),
                args: vec![],
                constructor: None,
                ty: None,
            },
            ty: None,
        }))
    };
    let program = Program {
        pos: p(),
        body: vec![
            shared_decl("count", Type::number(), num(0.0)),
            decl("bump", Type::lambda(vec![], Type::void()), bump),
            defer_bump(),
            defer_bump(),
        ],
    };
    let vm = run(program, 2);
    assert_eq!(
        vm.peek_shared("var_count_"),
        Some(Reference::Number(2.0)),
        "no update may be lost"
    );
}

#[test]
fn enumerate_with_index_prints_offsets() {
    // enumerate [10, 20, 30] as v, i { log(numberToString(v + i)); }
    let lit = Expression::EnumerationLiteral(EnumerationLiteral {
        pos: p(),
        actuals: vec![num(10.0), num(20.0), num(30.0)],
        ty: None,
    });
    let program = Program {
        pos: p(),
        body: vec![Statement::Enumerate(EnumerateStatement {
            pos: p(),
            enumerable: lit,
            shared: false,
            local: Identifier::new(p(), "v"),
            index: Some(Identifier::new(p(), "i")),
            body: vec![log_number(binary(BinaryOp::Add, ident("v"), ident("i")))],
        })],
    };
    let vm = run(program, 0);
    assert_eq!(vm.io_log(), vec!["10", "21", "32"]);
}

#[test]
fn empty_enumerable_invokes_the_body_zero_times() {
    let lit = Expression::EnumerationLiteral(EnumerationLiteral {
        pos: p(),
        actuals: vec![],
        ty: None,
    });
    let program = Program {
        pos: p(),
        body: vec![
            decl("xs", Type::enumerable(Type::number()), lit),
            Statement::Enumerate(EnumerateStatement {
                pos: p(),
                enumerable: ident("xs"),
                shared: false,
                local: Identifier::new(p(), "v"),
                index: None,
                body: vec![log_number(ident("v"))],
            }),
        ],
    };
    let vm = run(program, 0);
    assert!(vm.io_log().is_empty());
}

#[test]
fn constructor_dispatch_initializes_properties() {
    // type T { number x; constructor() => { x = 0; }
    //          constructor(n: number) => { x = n; } };
    // T() yields x = 0, T(7) yields x = 7.
    fn ctor(params: Vec<(&str, Type)>, body: Vec<Statement>) -> ConstructorNode {
        let formals: Vec<Formal> = params
            .iter()
            .map(|(name, ty)| Formal {
                type_node: TypeLiteral::new(p(), ty.clone()),
                id: Identifier::new(p(), *name),
            })
            .collect();
        let fn_ty =
            Type::lambda(params.iter().map(|(_, t)| t.clone()).collect(), Type::void());
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
            ctor(vec![], vec![assign(ident("x"), num(0.0))]),
            ctor(
                vec![("n", Type::number())],
                vec![assign(ident("x"), ident("n"))],
            ),
        ],
        value: None,
        ty: None,
    };

    fn access_x(obj: &str) -> Expression {
        Expression::ClassAccess(ClassAccess {
            pos: p(),
            path: Box::new(ident(obj)),
            end: Identifier::new(p(), "x"),
            ty: None,
        })
    }

    let program = Program {
        pos: p(),
        body: vec![
            decl(
                "T",
                Type::type_of_types(),
                Expression::TypeBody(Box::new(tb)),
            ),
            decl(
                "a",
                Type::Ambiguous { name: "T".into() },
                call(ident("T"), vec![]),
            ),
            decl(
                "b",
                Type::Ambiguous { name: "T".into() },
                call(ident("T"), vec![num(7.0)]),
            ),
            log_number(access_x("a")),
            log_number(access_x("b")),
        ],
    };
    let vm = run(program, 0);
    assert_eq!(vm.io_log(), vec!["0", "7"]);
}

#[test]
fn break_exits_the_while_loop_at_three() {
    // number i = 0;
    // while (i < 10) { if (i == 3) { break; } i = i + 1; }
    let program = Program {
        pos: p(),
        body: vec![
            decl("i", Type::number(), num(0.0)),
            Statement::While(WhileStatement {
                pos: p(),
                condition: binary(
                    BinaryOp::Comparison(ComparisonOp::LessThan),
                    ident("i"),
                    num(10.0),
                ),
                body: vec![
                    Statement::If(IfStatement {
                        pos: p(),
                        condition: binary(BinaryOp::Equals, ident("i"), num(3.0)),
                        body: vec![Statement::Break { pos: p() }],
                    }),
                    assign(ident("i"), binary(BinaryOp::Add, ident("i"), num(1.0))),
                ],
            }),
        ],
    };
    let vm = run(program, 0);
    assert_eq!(vm.peek_local("var_i_"), Some(Reference::Number(3.0)));
}

#[test]
fn while_terminates_without_break() {
    let program = Program {
        pos: p(),
        body: vec![
            decl("i", Type::number(), num(0.0)),
            Statement::While(WhileStatement {
                pos: p(),
                condition: binary(
                    BinaryOp::Comparison(ComparisonOp::LessThan),
                    ident("i"),
                    num(4.0),
                ),
                body: vec![assign(
                    ident("i"),
                    binary(BinaryOp::Add, ident("i"), num(1.0)),
                )],
            }),
            log_number(ident("i")),
        ],
    };
    let vm = run(program, 0);
    assert_eq!(vm.io_log(), vec!["4"]);
}

#[test]
fn deferred_result_synchronizes_on_first_read() {
    // fn seven = (): number => { return 7; };
    // number x = defer seven();
    // log(numberToString(x + 1));
    let seven = function(
        vec![],
        Type::number(),
        vec![Statement::Return(ReturnStatement {
            pos: p(),
            value: Some(num(7.0)),
        })],
    );
    let program = Program {
        pos: p(),
        body: vec![
            decl("seven", Type::lambda(vec![], Type::number()), seven),
            decl(
                "x",
                Type::number(),
                Expression::DeferCall(DeferCall {
                    pos: p(),
                    call: CallExpression {
                        pos: p(),
                        func: Box::new(ident("seven")),
                        args: vec![],
                        constructor: None,
                        ty: None,
                    },
                    ty: None,
                }),
            ),
            log_number(binary(BinaryOp::Add, ident("x"), num(1.0))),
        ],
    };
    let vm = run(program, 2);
    assert_eq!(vm.io_log(), vec!["8"]);
}

#[test]
fn division_by_zero_traps_with_code_eight() {
    let program = Program {
        pos: p(),
        body: vec![decl(
            "x",
            Type::number(),
            binary(BinaryOp::Divide, num(1.0), num(0.0)),
        )],
    };
    let instrs = compile(program, true);
    let mut vm = VirtualMachine::new(
        instrs,
        VmConfig {
            max_threads: 0,
            ..VmConfig::default()
        },
    )
    .unwrap();
    match vm.execute() {
        Err(VmError::Runtime(e)) => assert_eq!(e.code, RuntimeExCode::DivisionByZero),
        other => panic!("expected a division trap, got {other:?}"),
    }
}

#[test]
fn optimization_preserves_observable_output() {
    let make = || Program {
        pos: p(),
        body: vec![
            decl("a", Type::number(), num(5.0)),
            decl("b", Type::number(), binary(BinaryOp::Add, ident("a"), ident("a"))),
            log_number(ident("b")),
        ],
    };
    let config = || VmConfig {
        max_threads: 0,
        ..VmConfig::default()
    };

    let mut plain = VirtualMachine::new(compile(make(), false), config()).unwrap();
    plain.execute().unwrap();
    let mut opt = VirtualMachine::new(compile(make(), true), config()).unwrap();
    opt.execute().unwrap();

    assert_eq!(plain.io_log(), vec!["10"]);
    assert_eq!(plain.io_log(), opt.io_log());
}
