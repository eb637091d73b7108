//! AST-level dead-code trimming and control-flow-breaker predicates.
//!
//! Runs before lowering: statements after a `return`/`continue`/`break` in
//! the same list are unreachable and removed, a trailing `continue` in a
//! while body is a no-op, and a trailing void `return` in a function body is
//! implied by the region's own return. Iterates to a fixpoint.
//!
//! The `has_*` predicates answer whether a subtree contains a control-flow
//! breaker, without descending into nested function literals or type bodies
//! (their breakers are their own).

use tracing::debug;

use swarm_core::ast::*;

/// True if the subtree contains a `return` (not counting nested functions).
pub fn has_return(stmt: &Statement) -> bool {
    contains_breaker(stmt, BreakerKind::Return)
}

/// True if the subtree contains a `break` (not counting nested functions).
pub fn has_break(stmt: &Statement) -> bool {
    contains_breaker(stmt, BreakerKind::Break)
}

/// True if the subtree contains a `continue` (not counting nested functions).
pub fn has_continue(stmt: &Statement) -> bool {
    contains_breaker(stmt, BreakerKind::Continue)
}

pub fn any_has_return(stmts: &[Statement]) -> bool {
    stmts.iter().any(has_return)
}

pub fn any_has_break(stmts: &[Statement]) -> bool {
    stmts.iter().any(has_break)
}

pub fn any_has_continue(stmts: &[Statement]) -> bool {
    stmts.iter().any(has_continue)
}

#[derive(Clone, Copy, PartialEq)]
enum BreakerKind {
    Return,
    Break,
    Continue,
}

fn contains_breaker(stmt: &Statement, kind: BreakerKind) -> bool {
    match stmt {
        Statement::Return(_) => kind == BreakerKind::Return,
        Statement::Break { .. } => kind == BreakerKind::Break,
        Statement::Continue { .. } => kind == BreakerKind::Continue,
        Statement::If(s) => s.body.iter().any(|s| contains_breaker(s, kind)),
        Statement::While(s) => s.body.iter().any(|s| contains_breaker(s, kind)),
        Statement::Enumerate(s) => s.body.iter().any(|s| contains_breaker(s, kind)),
        Statement::With(s) => s.body.iter().any(|s| contains_breaker(s, kind)),
        _ => false,
    }
}

/// Remove unreachable and redundant control-flow statements, iterating until
/// nothing changes.
pub fn trim_dead_code(program: &mut Program) {
    while trim_once(program) {}
}

fn trim_once(program: &mut Program) -> bool {
    let mut changed = false;
    for stmt in &mut program.body {
        changed |= trim_statement(stmt);
    }
    changed
}

fn trim_statement(stmt: &mut Statement) -> bool {
    match stmt {
        Statement::If(s) => trim_list(&mut s.body, ListKind::Block),
        Statement::While(s) => trim_list(&mut s.body, ListKind::WhileBody),
        Statement::Enumerate(s) => trim_list(&mut s.body, ListKind::Block),
        Statement::With(s) => trim_list(&mut s.body, ListKind::Block),
        Statement::Expression(s) => trim_expression(&mut s.expr),
        Statement::VariableDeclaration(d) => trim_expression(&mut d.value),
        Statement::Return(s) => s
            .value
            .as_mut()
            .map(trim_expression)
            .unwrap_or(false),
        _ => false,
    }
}

fn trim_expression(expr: &mut Expression) -> bool {
    match expr {
        Expression::Function(f) => trim_list(&mut f.body, ListKind::FunctionBody),
        Expression::TypeBody(tb) => {
            let mut changed = false;
            for decl in &mut tb.declarations {
                changed |= trim_statement(decl);
            }
            for c in &mut tb.constructors {
                changed |= trim_list(&mut c.func.body, ListKind::FunctionBody);
            }
            changed
        }
        Expression::Assign(a) => {
            let mut changed = trim_expression(&mut a.dest);
            changed |= trim_expression(&mut a.value);
            changed
        }
        Expression::Call(c) => {
            let mut changed = trim_expression(&mut c.func);
            for a in &mut c.args {
                changed |= trim_expression(a);
            }
            changed
        }
        Expression::DeferCall(d) => {
            let mut changed = trim_expression(&mut d.call.func);
            for a in &mut d.call.args {
                changed |= trim_expression(a);
            }
            changed
        }
        Expression::Binary(b) => {
            let mut changed = trim_expression(&mut b.left);
            changed |= trim_expression(&mut b.right);
            changed
        }
        Expression::Unary(u) => trim_expression(&mut u.exp),
        Expression::EnumerationLiteral(lit) => {
            let mut changed = false;
            for a in &mut lit.actuals {
                changed |= trim_expression(a);
            }
            changed
        }
        Expression::MapLiteral(lit) => {
            let mut changed = false;
            for e in &mut lit.entries {
                changed |= trim_expression(&mut e.value);
            }
            changed
        }
        _ => false,
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ListKind {
    Block,
    WhileBody,
    FunctionBody,
}

fn trim_list(body: &mut Vec<Statement>, kind: ListKind) -> bool {
    let mut changed = false;

    // Drop everything after the first control-flow breaker.
    if let Some(idx) = body.iter().position(|s| {
        matches!(
            s,
            Statement::Return(_) | Statement::Continue { .. } | Statement::Break { .. }
        )
    }) {
        if idx + 1 < body.len() {
            debug!("{} removing dead statements", body[idx + 1].pos());
            body.truncate(idx + 1);
            changed = true;
        }
    }

    // A trailing continue re-enters the loop exactly like falling off the
    // end does.
    if kind == ListKind::WhileBody {
        if matches!(body.last(), Some(Statement::Continue { .. })) {
            debug!("removing continue at end of while body");
            body.pop();
            changed = true;
        }
    }

    // A trailing void return duplicates the region's own return.
    if kind == ListKind::FunctionBody {
        if matches!(body.last(), Some(Statement::Return(r)) if r.value.is_none()) {
            debug!("removing void return at end of function body");
            body.pop();
            changed = true;
        }
    }

    for stmt in body.iter_mut() {
        changed |= trim_statement(stmt);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::position::Position;

    fn p() -> Position {
        Position::new("t", 1, 1, 1, 2)
    }

    fn while_with(body: Vec<Statement>) -> Statement {
        Statement::While(WhileStatement {
            pos: p(),
            condition: Expression::BooleanLiteral(BooleanLiteral {
                pos: p(),
                value: true,
                ty: None,
            }),
            body,
        })
    }

    fn num_stmt(v: f64) -> Statement {
        Statement::Expression(ExpressionStatement {
            pos: p(),
            expr: Expression::NumberLiteral(NumberLiteral {
                pos: p(),
                value: v,
                ty: None,
            }),
        })
    }

    #[test]
    fn statements_after_break_are_removed() {
        let mut program = Program {
            pos: p(),
            body: vec![while_with(vec![
                Statement::Break { pos: p() },
                num_stmt(1.0),
                num_stmt(2.0),
            ])],
        };
        trim_dead_code(&mut program);
        let Statement::While(w) = &program.body[0] else {
            panic!()
        };
        assert_eq!(w.body.len(), 1);
        assert!(matches!(w.body[0], Statement::Break { .. }));
    }

    #[test]
    fn trailing_continue_in_while_is_removed() {
        let mut program = Program {
            pos: p(),
            body: vec![while_with(vec![num_stmt(1.0), Statement::Continue { pos: p() }])],
        };
        trim_dead_code(&mut program);
        let Statement::While(w) = &program.body[0] else {
            panic!()
        };
        assert_eq!(w.body.len(), 1);
    }

    #[test]
    fn breaker_predicates_do_not_cross_function_boundaries() {
        // A return nested inside a function literal is not a return of the
        // enclosing block.
        let inner_fn = Expression::Function(Box::new(FunctionNode {
            pos: p(),
            formals: vec![],
            type_node: TypeLiteral::new(p(), swarm_core::types::Type::lambda(vec![], swarm_core::types::Type::void())),
            body: vec![Statement::Return(ReturnStatement { pos: p(), value: None })],
            used_symbols: vec![],
            var_decld_to: None,
            ty: None,
        }));
        let stmt = Statement::Expression(ExpressionStatement {
            pos: p(),
            expr: inner_fn,
        });
        assert!(!has_return(&stmt));
    }
}
