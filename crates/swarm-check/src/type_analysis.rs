//! Type analysis.
//!
//! A top-down walk that fills the `ty` slot on every expression node and
//! checks the typing rules: assignability of declarations and assignments,
//! call arity and partial application over the curried arrow chains,
//! constructor dispatch for type-valued callees, operator operand rules, and
//! placement of `return`/`continue`/`break`. A stack of enclosing callable
//! types (with their formal counts) supports multi-argument lambdas that are
//! represented by right-nested `Lambda1`s.
//!
//! After a function body checks out, its set of free variables is recorded
//! on the node for the lowering pass to lift into parameters.

use std::collections::HashSet;

use tracing::{debug, warn};

use swarm_core::ast::*;
use swarm_core::error::CompileError;
use swarm_core::symbol::{SymbolArena, SymbolId};
use swarm_core::types::{Primitive, Type};

use crate::ctor_validation;
use crate::scope::Diagnostics;

/// Run type analysis over a name-resolved program.
pub fn analyze(program: &mut Program, arena: &mut SymbolArena) -> Result<(), Vec<CompileError>> {
    let mut walk = TypeAnalysis {
        arena,
        diags: Diagnostics::new(),
        func_types: Vec::new(),
        func_args: Vec::new(),
        func_count: 0,
        while_count: 0,
    };

    for stmt in &mut program.body {
        walk.walk_statement(stmt);
        debug!("{} finished statement", stmt.pos());
    }

    if walk.diags.is_ok() {
        Ok(())
    } else {
        Err(walk.diags.into_errors())
    }
}

struct TypeAnalysis<'a> {
    arena: &'a mut SymbolArena,
    diags: Diagnostics,
    /// Types of enclosing callables, innermost last.
    func_types: Vec<Type>,
    /// Formal counts of enclosing callables.
    func_args: Vec<usize>,
    func_count: usize,
    while_count: usize,
}

impl<'a> TypeAnalysis<'a> {
    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn walk_statement(&mut self, stmt: &mut Statement) {
        match stmt {
            Statement::Expression(s) => {
                self.walk_expression(&mut s.expr);
            }
            Statement::VariableDeclaration(decl) => self.walk_variable_declaration(decl),
            Statement::UninitializedVariableDeclaration(decl) => {
                decl.type_node.ty = Some(Type::type_of_types());
                self.walk_identifier(&mut decl.id);
            }
            Statement::Return(s) => self.walk_return(s),
            Statement::Continue { pos } => {
                if self.while_count == 0 {
                    self.diags
                        .report(CompileError::ContinueOutsideLoop { pos: pos.clone() });
                }
            }
            Statement::Break { pos } => {
                if self.while_count == 0 {
                    self.diags
                        .report(CompileError::BreakOutsideLoop { pos: pos.clone() });
                }
            }
            Statement::If(s) => {
                let cond = self.walk_expression(&mut s.condition);
                self.expect_boolean_condition(cond, s.pos.clone());
                for stmt in &mut s.body {
                    self.walk_statement(stmt);
                }
            }
            Statement::While(s) => {
                let cond = self.walk_expression(&mut s.condition);
                self.expect_boolean_condition(cond, s.pos.clone());
                self.while_count += 1;
                for stmt in &mut s.body {
                    self.walk_statement(stmt);
                }
                self.while_count -= 1;
            }
            Statement::Enumerate(s) => self.walk_enumerate(s),
            Statement::With(s) => self.walk_with(s),
            Statement::Include(_) => {}
        }
    }

    fn walk_variable_declaration(&mut self, decl: &mut VariableDeclaration) {
        decl.type_node.ty = Some(Type::type_of_types());
        self.walk_identifier(&mut decl.id);

        // Empty container literals take their element type from the
        // declaration when the syntax alone cannot fix it.
        pretype_empty_literal(&mut decl.value, &decl.type_node.value);

        let value_ty = self.walk_expression(&mut decl.value);
        let declared = decl.id.ty.clone().unwrap_or_else(Type::error);
        if !value_ty.is_assignable_to(&declared) && !value_ty.is_error() && !declared.is_error() {
            self.diags.report(CompileError::AssignmentTypeMismatch {
                pos: decl.pos.clone(),
                expected: declared.to_string(),
                actual: value_ty.to_string(),
            });
        }
    }

    fn walk_return(&mut self, stmt: &mut ReturnStatement) {
        if self.func_count == 0 {
            self.diags.report(CompileError::ReturnOutsideFunction {
                pos: stmt.pos.clone(),
            });
            return;
        }

        let func_type = self.func_types.last().cloned().unwrap_or_else(Type::error);
        let args = self.func_args.last().copied().unwrap_or(0);
        let expected = match &func_type {
            Type::Lambda0(r) => (**r).clone(),
            other => other.strip_arrows(args).clone(),
        };

        match &mut stmt.value {
            None => {
                if !expected.is_primitive(Primitive::Void) {
                    self.diags.report(CompileError::InvalidReturnType {
                        pos: stmt.pos.clone(),
                        expected: expected.to_string(),
                        actual: Type::void().to_string(),
                    });
                }
            }
            Some(value) => {
                let actual = self.walk_expression(value);
                if !actual.is_assignable_to(&expected) && !actual.is_error() {
                    self.diags.report(CompileError::InvalidReturnType {
                        pos: stmt.pos.clone(),
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
        }
    }

    fn walk_enumerate(&mut self, stmt: &mut EnumerateStatement) {
        let source = self.walk_expression(&mut stmt.enumerable);
        let inner = match &source {
            Type::Enumerable(inner) => (**inner).clone(),
            other => {
                if !other.is_error() {
                    self.diags.report(CompileError::InvalidEnumerationSource {
                        pos: stmt.pos.clone(),
                        actual: other.to_string(),
                    });
                }
                Type::error()
            }
        };

        // The block-local adopts the element type.
        if let Some(sym) = stmt.local.symbol {
            self.arena.get_mut(sym).ty = Some(inner.clone());
        }
        stmt.local.ty = Some(inner);
        if let Some(index) = &mut stmt.index {
            index.ty = Some(Type::number());
        }

        // The body lowers to its own function region: returns and loop
        // breaks from the surrounding scopes do not reach into it.
        let saved_func = self.func_count;
        let saved_while = self.while_count;
        self.func_count = 0;
        self.while_count = 0;
        for s in &mut stmt.body {
            self.walk_statement(s);
        }
        self.func_count = saved_func;
        self.while_count = saved_while;
    }

    fn walk_with(&mut self, stmt: &mut WithStatement) {
        let source = self.walk_expression(&mut stmt.resource);
        let local_ty = match &source {
            Type::Resource(yields) => {
                if !yields.is_primitive(Primitive::Opaque) && !yields.is_error() {
                    self.diags.report(CompileError::InvalidResourceYield {
                        pos: stmt.local.pos.clone(),
                    });
                    Type::error()
                } else {
                    (**yields).clone()
                }
            }
            other => {
                if !other.is_error() {
                    self.diags.report(CompileError::InvalidResource {
                        pos: stmt.pos.clone(),
                        actual: other.to_string(),
                    });
                }
                Type::error()
            }
        };

        if let Some(sym) = stmt.local.symbol {
            self.arena.get_mut(sym).ty = Some(local_ty.clone());
        }
        stmt.local.ty = Some(local_ty);

        for s in &mut stmt.body {
            self.walk_statement(s);
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn walk_expression(&mut self, expr: &mut Expression) -> Type {
        match expr {
            Expression::Identifier(id) => self.walk_identifier(id),
            Expression::NumberLiteral(n) => {
                n.ty = Some(Type::number());
                Type::number()
            }
            Expression::StringLiteral(s) => {
                s.ty = Some(Type::string());
                Type::string()
            }
            Expression::BooleanLiteral(b) => {
                b.ty = Some(Type::boolean());
                Type::boolean()
            }
            Expression::TypeLiteral(lit) => {
                lit.ty = Some(Type::type_of_types());
                Type::type_of_types()
            }
            Expression::EnumerationLiteral(lit) => self.walk_enumeration_literal(lit),
            Expression::MapLiteral(lit) => self.walk_map_literal(lit),
            Expression::EnumerableAccess(a) => self.walk_enumerable_access(a),
            Expression::EnumerableAppend(a) => self.walk_enumerable_append(a),
            Expression::MapAccess(a) => self.walk_map_access(a),
            Expression::ClassAccess(a) => self.walk_class_access(a),
            Expression::Assign(a) => self.walk_assign(a),
            Expression::Function(f) => self.walk_function(f),
            Expression::TypeBody(tb) => self.walk_type_body(tb),
            Expression::Call(call) => self.walk_call(call),
            Expression::DeferCall(defer) => {
                let ty = self.walk_call(&mut defer.call);
                defer.ty = Some(ty.clone());
                ty
            }
            Expression::Binary(b) => self.walk_binary(b),
            Expression::Unary(u) => self.walk_unary(u),
        }
    }

    fn walk_identifier(&mut self, id: &mut Identifier) -> Type {
        let Some(sym) = id.symbol else {
            id.ty = Some(Type::error());
            return Type::error();
        };
        match self.arena.get(sym).ty.clone() {
            Some(ty) => {
                id.ty = Some(ty.clone());
                ty
            }
            None => {
                self.diags.report(CompileError::FreeIdentifier {
                    pos: id.pos.clone(),
                    name: id.name.clone(),
                });
                id.ty = Some(Type::error());
                Type::error()
            }
        }
    }

    fn walk_enumeration_literal(&mut self, lit: &mut EnumerationLiteral) -> Type {
        let mut inner = match &lit.ty {
            Some(Type::Enumerable(i)) => Some((**i).clone()),
            _ => None,
        };

        let mut ok = true;
        let actual_types: Vec<Type> = lit
            .actuals
            .iter_mut()
            .map(|a| self.walk_expression(a))
            .collect();
        for (idx, at) in actual_types.iter().enumerate() {
            match &inner {
                None => inner = Some(at.clone()),
                Some(expected) => {
                    if !at.is_assignable_to(expected) && !at.is_error() {
                        self.diags.report(CompileError::EnumerableEntryMismatch {
                            pos: lit.pos.clone(),
                            index: idx,
                            expected: expected.to_string(),
                            actual: at.to_string(),
                        });
                        ok = false;
                    }
                }
            }
        }

        // An empty literal with no context falls back to an opaque element
        // type; a later use against a concrete enumerable reports there.
        let ty = if ok {
            Type::enumerable(inner.unwrap_or_else(Type::opaque))
        } else {
            Type::error()
        };
        lit.ty = Some(ty.clone());
        ty
    }

    fn walk_map_literal(&mut self, lit: &mut MapLiteral) -> Type {
        let mut inner = match &lit.ty {
            Some(Type::Map(i)) => Some((**i).clone()),
            _ => None,
        };

        let mut ok = true;
        for (idx, entry) in lit.entries.iter_mut().enumerate() {
            let at = self.walk_expression(&mut entry.value);
            entry.ty = Some(at.clone());
            match &inner {
                None => inner = Some(at),
                Some(expected) => {
                    if !at.is_assignable_to(expected) && !at.is_error() {
                        self.diags.report(CompileError::MapEntryMismatch {
                            pos: entry.pos.clone(),
                            index: idx,
                            expected: expected.to_string(),
                            actual: at.to_string(),
                        });
                        ok = false;
                    }
                }
            }
        }

        let ty = if ok {
            Type::map(inner.unwrap_or_else(Type::opaque))
        } else {
            Type::error()
        };
        lit.ty = Some(ty.clone());
        ty
    }

    fn walk_enumerable_access(&mut self, a: &mut EnumerableAccess) -> Type {
        let path_ty = self.walk_expression(&mut a.path);
        let inner = match &path_ty {
            Type::Enumerable(i) => (**i).clone(),
            other => {
                if !other.is_error() {
                    self.diags.report(CompileError::InvalidEnumerableAccess {
                        pos: a.pos.clone(),
                        actual: other.to_string(),
                    });
                }
                a.ty = Some(Type::error());
                return Type::error();
            }
        };

        let index_ty = self.walk_expression(&mut a.index);
        if !index_ty.is_primitive(Primitive::Number) && !index_ty.is_error() {
            self.diags.report(CompileError::InvalidIndexType {
                pos: a.pos.clone(),
                actual: index_ty.to_string(),
            });
            a.ty = Some(Type::error());
            return Type::error();
        }

        a.ty = Some(inner.clone());
        inner
    }

    fn walk_enumerable_append(&mut self, a: &mut EnumerableAppend) -> Type {
        let path_ty = self.walk_expression(&mut a.path);
        let inner = match &path_ty {
            Type::Enumerable(i) => (**i).clone(),
            other => {
                if !other.is_error() {
                    self.diags.report(CompileError::InvalidEnumerableAccess {
                        pos: a.pos.clone(),
                        actual: other.to_string(),
                    });
                }
                Type::error()
            }
        };
        a.ty = Some(inner.clone());
        inner
    }

    fn walk_map_access(&mut self, a: &mut MapAccess) -> Type {
        let path_ty = self.walk_expression(&mut a.path);
        let inner = match &path_ty {
            Type::Map(i) => (**i).clone(),
            other => {
                if !other.is_error() {
                    self.diags.report(CompileError::InvalidMapAccess {
                        pos: a.pos.clone(),
                        actual: other.to_string(),
                    });
                }
                Type::error()
            }
        };
        a.ty = Some(inner.clone());
        inner
    }

    fn walk_class_access(&mut self, a: &mut ClassAccess) -> Type {
        let path_ty = self.walk_expression(&mut a.path);
        let obj = match &path_ty {
            Type::Object(o) => o.clone(),
            other => {
                if !other.is_error() {
                    self.diags.report(CompileError::InvalidPropertyAccess {
                        pos: a.pos.clone(),
                        name: a.end.name.clone(),
                        actual: other.to_string(),
                    });
                }
                a.ty = Some(Type::error());
                return Type::error();
            }
        };

        match obj.get_property(&a.end.name) {
            Some(prop_ty) => {
                let ty = prop_ty.clone();
                a.end.ty = Some(ty.clone());
                a.ty = Some(ty.clone());
                ty
            }
            None => {
                self.diags.report(CompileError::UnknownProperty {
                    pos: a.end.pos.clone(),
                    name: a.end.name.clone(),
                    ty: path_ty.to_string(),
                });
                a.ty = Some(Type::error());
                Type::error()
            }
        }
    }

    fn walk_assign(&mut self, a: &mut AssignExpression) -> Type {
        let dest_ty = self.walk_expression(&mut a.dest);

        if dest_ty.is_primitive(Primitive::Type) {
            self.diags.report(CompileError::TypeVariableReassignment {
                pos: a.pos.clone(),
            });
            a.ty = Some(Type::error());
            return Type::error();
        }

        pretype_empty_literal(&mut a.value, &dest_ty);
        let value_ty = self.walk_expression(&mut a.value);
        if !value_ty.is_assignable_to(&dest_ty) && !value_ty.is_error() && !dest_ty.is_error() {
            self.diags.report(CompileError::AssignmentTypeMismatch {
                pos: a.pos.clone(),
                expected: dest_ty.to_string(),
                actual: value_ty.to_string(),
            });
            a.ty = Some(Type::error());
            return Type::error();
        }

        a.ty = Some(Type::unit());
        Type::unit()
    }

    fn walk_function(&mut self, func: &mut FunctionNode) -> Type {
        func.type_node.ty = Some(Type::type_of_types());
        let fn_ty = func.type_node.value.clone();

        for formal in &mut func.formals {
            formal.type_node.ty = Some(Type::type_of_types());
            self.walk_identifier(&mut formal.id);
        }

        self.func_types.push(fn_ty.clone());
        self.func_args.push(func.formals.len());
        self.func_count += 1;
        let saved_while = self.while_count;
        self.while_count = 0;
        for stmt in &mut func.body {
            self.walk_statement(stmt);
        }
        self.while_count = saved_while;
        self.func_count -= 1;
        self.func_args.pop();
        self.func_types.pop();

        // Record the free variables for lowering's capture lifting.
        func.used_symbols = free_variables(self.arena, func, &[]);

        func.ty = Some(fn_ty.clone());
        fn_ty
    }

    fn walk_type_body(&mut self, tb: &mut TypeBodyNode) -> Type {
        for decl in &mut tb.declarations {
            self.walk_statement(decl);
        }

        let mut ctor_sig_types: Vec<Vec<Type>> = Vec::new();
        for c in &mut tb.constructors {
            self.walk_constructor(c);
            let params: Vec<Type> = c
                .func
                .formals
                .iter()
                .map(|f| f.type_node.value.clone())
                .collect();
            let duplicate = ctor_sig_types.iter().any(|existing| {
                existing.len() == params.len()
                    && existing
                        .iter()
                        .zip(&params)
                        .all(|(a, b)| a.is_assignable_to(b) && b.is_assignable_to(a))
            });
            if duplicate {
                warn!(
                    "{} constructors with duplicate type signatures will be removed in compilation",
                    c.pos
                );
            }
            ctor_sig_types.push(params);
        }

        // Definite-assignment validation runs over the finished tree.
        for c in &tb.constructors {
            ctor_validation::validate_constructor(self.arena, tb, c, &mut self.diags);
        }

        tb.ty = Some(Type::type_of_types());
        Type::type_of_types()
    }

    fn walk_constructor(&mut self, c: &mut ConstructorNode) {
        self.walk_function(&mut c.func);

        for pc in &mut c.parent_constructors {
            self.walk_call(pc);
        }

        // Arguments to parent constructor calls are evaluated in the
        // constructor's scope; fold their free symbols into the capture set.
        let parent_calls: Vec<CallExpression> = c.parent_constructors.clone();
        c.func.used_symbols = free_variables(self.arena, &c.func, &parent_calls);
    }

    fn walk_call(&mut self, call: &mut CallExpression) -> Type {
        let callee_ty = self.walk_expression(&mut call.func);
        let arg_types: Vec<Type> = call
            .args
            .iter_mut()
            .map(|a| self.walk_expression(a))
            .collect();

        if !callee_ty.is_callable() {
            // A type-valued identifier invokes a constructor.
            if callee_ty.is_primitive(Primitive::Type) {
                let callee = match call.func.as_ref() {
                    Expression::Identifier(id) => Some(id.clone()),
                    _ => None,
                };
                if let Some(id) = callee {
                    return self.dispatch_constructor(call, id, &arg_types);
                }
            }
            if !callee_ty.is_error() {
                self.diags.report(CompileError::CalleeNotCallable {
                    pos: call.pos.clone(),
                    actual: callee_ty.to_string(),
                });
            }
            call.ty = Some(Type::error());
            return Type::error();
        }

        let params: Vec<Type> = callee_ty.params().into_iter().cloned().collect();
        let arity = params.len();
        if arg_types.len() > arity
            || (arg_types.is_empty() && matches!(callee_ty, Type::Lambda1 { .. }))
        {
            self.diags.report(CompileError::InvalidArity {
                pos: call.pos.clone(),
                expected: arity,
                actual: arg_types.len(),
            });
            call.ty = Some(Type::error());
            return Type::error();
        }

        let mut ok = true;
        let mut result = callee_ty.clone();
        if let Type::Lambda0(r) = &result {
            result = (**r).clone();
        }
        for (i, at) in arg_types.iter().enumerate() {
            if !at.is_assignable_to(&params[i]) && !at.is_error() {
                self.diags.report(CompileError::InvalidArgument {
                    pos: call.pos.clone(),
                    index: i,
                    expected: params[i].to_string(),
                    actual: at.to_string(),
                });
                ok = false;
            }
            result = result.returns().cloned().unwrap_or_else(Type::error);
        }

        let ty = if ok { result } else { Type::error() };
        call.ty = Some(ty.clone());
        ty
    }

    fn dispatch_constructor(
        &mut self,
        call: &mut CallExpression,
        id: Identifier,
        arg_types: &[Type],
    ) -> Type {
        let Some(sym) = id.symbol else {
            call.ty = Some(Type::error());
            return Type::error();
        };
        let Some(otv) = self.arena.get(sym).object_type().cloned() else {
            self.diags.report(CompileError::InvalidInstantiation {
                pos: call.pos.clone(),
                name: id.name.clone(),
            });
            call.ty = Some(Type::error());
            return Type::error();
        };

        // No partial application of constructors: the arity must match
        // exactly and every parameter must accept its argument.
        let matches: Vec<_> = otv
            .constructors
            .iter()
            .filter(|sig| {
                sig.params.len() == arg_types.len()
                    && sig
                        .params
                        .iter()
                        .zip(arg_types)
                        .all(|(p, a)| a.is_assignable_to(p))
            })
            .collect();

        match matches.len() {
            0 => {
                let signature = arg_types
                    .iter()
                    .map(|t| t.to_string())
                    .chain(std::iter::once(Type::Object(otv.object.clone()).to_string()))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                self.diags.report(CompileError::NoMatchingConstructor {
                    pos: call.pos.clone(),
                    name: id.name.clone(),
                    signature,
                });
                call.ty = Some(Type::error());
                Type::error()
            }
            1 => {
                call.constructor = Some(ConstructorBinding {
                    name: matches[0].name.clone(),
                    part_of: otv.object.clone(),
                });
                let ty = Type::Object(otv.object);
                call.ty = Some(ty.clone());
                ty
            }
            _ => {
                self.diags.report(CompileError::AmbiguousConstructor {
                    pos: call.pos.clone(),
                    name: id.name.clone(),
                });
                call.ty = Some(Type::error());
                Type::error()
            }
        }
    }

    fn walk_binary(&mut self, b: &mut BinaryExpression) -> Type {
        let left = self.walk_expression(&mut b.left);
        let right = self.walk_expression(&mut b.right);

        let ty = match b.op {
            BinaryOp::And | BinaryOp::Or => {
                let mut ok = true;
                ok &= self.expect_operand(&left, &Type::boolean(), "left-hand", &b.pos);
                ok &= self.expect_operand(&right, &Type::boolean(), "right-hand", &b.pos);
                if ok {
                    Type::boolean()
                } else {
                    Type::error()
                }
            }
            BinaryOp::Equals | BinaryOp::NotEquals => {
                let mutual = left.is_assignable_to(&right) && right.is_assignable_to(&left);
                if !mutual && !left.is_error() && !right.is_error() {
                    self.diags.report(CompileError::InvalidComparison {
                        pos: b.pos.clone(),
                        left: left.to_string(),
                        right: right.to_string(),
                    });
                    Type::error()
                } else {
                    Type::boolean()
                }
            }
            BinaryOp::Add => {
                if left.is_assignable_to(&Type::number()) {
                    if self.expect_operand(&right, &Type::number(), "right-hand", &b.pos) {
                        Type::number()
                    } else {
                        Type::error()
                    }
                } else if left.is_assignable_to(&Type::string()) {
                    b.concatenation = true;
                    if self.expect_operand(&right, &Type::string(), "right-hand", &b.pos) {
                        Type::string()
                    } else {
                        Type::error()
                    }
                } else {
                    if !left.is_error() {
                        self.diags.report(CompileError::InvalidOperand {
                            pos: b.pos.clone(),
                            side: "left-hand",
                            expected: "Primitive<NUMBER> or Primitive<STRING>".into(),
                            actual: left.to_string(),
                        });
                    }
                    Type::error()
                }
            }
            BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::Modulus
            | BinaryOp::Power
            | BinaryOp::NthRoot => {
                let mut ok = true;
                ok &= self.expect_operand(&left, &Type::number(), "left-hand", &b.pos);
                ok &= self.expect_operand(&right, &Type::number(), "right-hand", &b.pos);
                if ok {
                    Type::number()
                } else {
                    Type::error()
                }
            }
            BinaryOp::Comparison(_) => {
                let mut ok = true;
                ok &= self.expect_operand(&left, &Type::number(), "left-hand", &b.pos);
                ok &= self.expect_operand(&right, &Type::number(), "right-hand", &b.pos);
                if ok {
                    Type::boolean()
                } else {
                    Type::error()
                }
            }
            BinaryOp::EnumConcat => {
                let both_enumerable =
                    matches!(left, Type::Enumerable(_)) && matches!(right, Type::Enumerable(_));
                if both_enumerable
                    && left.is_assignable_to(&right)
                    && right.is_assignable_to(&left)
                {
                    left.clone()
                } else {
                    if !left.is_error() && !right.is_error() {
                        self.diags.report(CompileError::InvalidComparison {
                            pos: b.pos.clone(),
                            left: left.to_string(),
                            right: right.to_string(),
                        });
                    }
                    Type::error()
                }
            }
        };

        b.ty = Some(ty.clone());
        ty
    }

    fn walk_unary(&mut self, u: &mut UnaryExpression) -> Type {
        let exp = self.walk_expression(&mut u.exp);
        let expected = match u.op {
            UnaryOp::Not => Type::boolean(),
            UnaryOp::Negative => Type::number(),
        };
        let ty = if self.expect_operand(&exp, &expected, "single", &u.pos) {
            expected
        } else {
            Type::error()
        };
        u.ty = Some(ty.clone());
        ty
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn expect_operand(
        &mut self,
        actual: &Type,
        expected: &Type,
        side: &'static str,
        pos: &swarm_core::position::Position,
    ) -> bool {
        if actual.is_assignable_to(expected) {
            return true;
        }
        if !actual.is_error() {
            self.diags.report(CompileError::InvalidOperand {
                pos: pos.clone(),
                side,
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        false
    }

    fn expect_boolean_condition(&mut self, cond: Type, pos: swarm_core::position::Position) {
        if !cond.is_assignable_to(&Type::boolean()) && !cond.is_error() {
            self.diags
                .report(CompileError::NonBooleanCondition { pos, actual: cond.to_string() });
        }
    }
}

/// Give an empty container literal the element type its destination implies.
fn pretype_empty_literal(value: &mut Expression, declared: &Type) {
    match (value, declared) {
        (Expression::EnumerationLiteral(lit), Type::Enumerable(_)) if lit.actuals.is_empty() => {
            lit.ty = Some(declared.clone());
        }
        (Expression::MapLiteral(lit), Type::Map(_)) if lit.entries.is_empty() => {
            lit.ty = Some(declared.clone());
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Free-variable computation
// ---------------------------------------------------------------------------

/// Symbols referenced by a function body (plus `extra` expressions evaluated
/// in its scope) that are declared outside it, in first-reference order.
///
/// Prologue functions and type names are excluded: the former resolve to
/// global `$f:` locations, the latter to globally-registered constructors.
pub fn free_variables(
    arena: &SymbolArena,
    func: &FunctionNode,
    extra: &[CallExpression],
) -> Vec<SymbolId> {
    let mut declared: HashSet<SymbolId> = func.formals.iter().filter_map(|f| f.id.symbol).collect();
    let mut used: Vec<SymbolId> = Vec::new();

    for stmt in &func.body {
        collect_stmt(arena, stmt, &mut declared, &mut used);
    }
    for call in extra {
        collect_expr(arena, &Expression::Call(call.clone()), &mut declared, &mut used);
    }

    used.retain(|id| !declared.contains(id));
    used
}

fn note_use(
    arena: &SymbolArena,
    id: SymbolId,
    declared: &HashSet<SymbolId>,
    used: &mut Vec<SymbolId>,
) {
    if declared.contains(&id) || used.contains(&id) {
        return;
    }
    let sym = arena.get(id);
    if sym.is_prologue() {
        return;
    }
    if sym.ty == Some(Type::type_of_types()) {
        return;
    }
    used.push(id);
}

fn collect_stmt(
    arena: &SymbolArena,
    stmt: &Statement,
    declared: &mut HashSet<SymbolId>,
    used: &mut Vec<SymbolId>,
) {
    match stmt {
        Statement::Expression(s) => collect_expr(arena, &s.expr, declared, used),
        Statement::VariableDeclaration(d) => {
            // The declared symbol is in scope inside its own value for
            // function literals (recursion); references to a same-named
            // outer variable were already bound to the outer symbol.
            if let Some(sym) = d.id.symbol {
                declared.insert(sym);
            }
            collect_expr(arena, &d.value, declared, used);
        }
        Statement::UninitializedVariableDeclaration(d) => {
            if let Some(sym) = d.id.symbol {
                declared.insert(sym);
            }
        }
        Statement::Return(s) => {
            if let Some(v) = &s.value {
                collect_expr(arena, v, declared, used);
            }
        }
        Statement::Continue { .. } | Statement::Break { .. } | Statement::Include(_) => {}
        Statement::If(s) => {
            collect_expr(arena, &s.condition, declared, used);
            for stmt in &s.body {
                collect_stmt(arena, stmt, declared, used);
            }
        }
        Statement::While(s) => {
            collect_expr(arena, &s.condition, declared, used);
            for stmt in &s.body {
                collect_stmt(arena, stmt, declared, used);
            }
        }
        Statement::Enumerate(s) => {
            collect_expr(arena, &s.enumerable, declared, used);
            if let Some(sym) = s.local.symbol {
                declared.insert(sym);
            }
            if let Some(index) = &s.index {
                if let Some(sym) = index.symbol {
                    declared.insert(sym);
                }
            }
            for stmt in &s.body {
                collect_stmt(arena, stmt, declared, used);
            }
        }
        Statement::With(s) => {
            collect_expr(arena, &s.resource, declared, used);
            if let Some(sym) = s.local.symbol {
                declared.insert(sym);
            }
            for stmt in &s.body {
                collect_stmt(arena, stmt, declared, used);
            }
        }
    }
}

fn collect_expr(
    arena: &SymbolArena,
    expr: &Expression,
    declared: &mut HashSet<SymbolId>,
    used: &mut Vec<SymbolId>,
) {
    match expr {
        Expression::Identifier(id) => {
            if let Some(sym) = id.symbol {
                note_use(arena, sym, declared, used);
            }
        }
        Expression::NumberLiteral(_)
        | Expression::StringLiteral(_)
        | Expression::BooleanLiteral(_)
        | Expression::TypeLiteral(_) => {}
        Expression::EnumerationLiteral(lit) => {
            for a in &lit.actuals {
                collect_expr(arena, a, declared, used);
            }
        }
        Expression::MapLiteral(lit) => {
            for e in &lit.entries {
                collect_expr(arena, &e.value, declared, used);
            }
        }
        Expression::EnumerableAccess(a) => {
            collect_expr(arena, &a.path, declared, used);
            collect_expr(arena, &a.index, declared, used);
        }
        Expression::EnumerableAppend(a) => collect_expr(arena, &a.path, declared, used),
        Expression::MapAccess(a) => collect_expr(arena, &a.path, declared, used),
        Expression::ClassAccess(a) => collect_expr(arena, &a.path, declared, used),
        Expression::Assign(a) => {
            collect_expr(arena, &a.dest, declared, used);
            collect_expr(arena, &a.value, declared, used);
        }
        Expression::Function(f) => {
            // A nested literal's free symbols are free here too unless this
            // function declares them; its own formals/locals are not.
            let mut inner_declared = declared.clone();
            for formal in &f.formals {
                if let Some(sym) = formal.id.symbol {
                    inner_declared.insert(sym);
                }
            }
            let mut inner_used = Vec::new();
            for stmt in &f.body {
                collect_stmt(arena, stmt, &mut inner_declared, &mut inner_used);
            }
            for id in inner_used {
                note_use(arena, id, declared, used);
            }
        }
        Expression::TypeBody(_) => {}
        Expression::Call(c) => {
            collect_expr(arena, &c.func, declared, used);
            for a in &c.args {
                collect_expr(arena, a, declared, used);
            }
        }
        Expression::DeferCall(d) => {
            collect_expr(arena, &d.call.func, declared, used);
            for a in &d.call.args {
                collect_expr(arena, a, declared, used);
            }
        }
        Expression::Binary(b) => {
            collect_expr(arena, &b.left, declared, used);
            collect_expr(arena, &b.right, declared, used);
        }
        Expression::Unary(u) => collect_expr(arena, &u.exp, declared, used),
    }
}
