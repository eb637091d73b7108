//! Constructor definite-assignment validation.
//!
//! Simulates the assignments along a constructor body to prove every
//! uninitialized property is written on every control path before any
//! `return`. Conditional blocks are approximated conservatively: assignments
//! inside them do not establish initialization. A symbol that may hold one
//! of several function literals carries a *possible-functions* set; calling
//! it unions the post-states of walking every candidate. Callees with no
//! known candidates are ambiguous and establish nothing.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use swarm_core::ast::*;
use swarm_core::error::CompileError;
use swarm_core::symbol::{SymbolArena, SymbolId, SymbolKind};

use crate::scope::Diagnostics;

/// Validate one constructor of a type body, reporting failures into `diags`.
pub fn validate_constructor(
    arena: &SymbolArena,
    tb: &TypeBodyNode,
    ctor: &ConstructorNode,
    diags: &mut Diagnostics,
) {
    debug!("validating constructor {}", ctor.name);
    let mut v = Validator {
        arena,
        required: HashSet::new(),
        possible: HashMap::new(),
        in_top_layer: true,
        failures: Vec::new(),
    };
    v.populate(tb, ctor);

    for stmt in &ctor.func.body {
        v.walk_stmt(stmt);
    }

    if !v.required.is_empty() {
        let mut names: Vec<&str> = v.required.iter().map(|s| s.as_str()).collect();
        names.sort();
        diags.report(CompileError::UninitializedProperties {
            pos: ctor.pos.clone(),
            names: names.join(", "),
        });
    }
    for (pos, names) in v.failures {
        diags.report(CompileError::UninitializedProperties { pos, names });
    }
}

struct Validator<'a> {
    arena: &'a SymbolArena,
    /// Property names still needing a definite assignment.
    required: HashSet<String>,
    /// Function-typed symbols whose concrete body is statically known.
    possible: HashMap<SymbolId, Vec<&'a FunctionNode>>,
    in_top_layer: bool,
    /// Returns reached with unassigned properties, and which were missing.
    failures: Vec<(swarm_core::position::Position, String)>,
}

impl<'a> Validator<'a> {
    fn populate(&mut self, tb: &'a TypeBodyNode, ctor: &ConstructorNode) {
        // Parents whose constructor is not explicitly called leave their
        // uninitialized properties to this constructor.
        for pid in &tb.parents {
            let Some(sid) = pid.symbol else { continue };
            let explicitly_called = ctor.parent_constructors.iter().any(|pc| {
                matches!(pc.func.as_ref(), Expression::Identifier(id) if id.symbol == Some(sid))
            });
            if explicitly_called {
                continue;
            }
            if let Some(otv) = self.arena.get(sid).object_type() {
                for name in &otv.uninitialized {
                    debug!("adding {name} to list of required initializations");
                    self.required.insert(name.clone());
                }
            }
        }

        for decl in &tb.declarations {
            match decl {
                Statement::UninitializedVariableDeclaration(d) => {
                    debug!("adding {} to list of required initializations", d.id.name);
                    self.required.insert(d.id.name.clone());
                }
                Statement::VariableDeclaration(d) => {
                    // A default value in the child satisfies an inherited
                    // uninitialized property.
                    self.required.remove(&d.id.name);
                    if d.type_node.value.is_callable() {
                        if let Some(sym) = d.id.symbol {
                            self.set_possible(sym, &d.value);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn walk_stmt(&mut self, stmt: &'a Statement) {
        match stmt {
            Statement::Expression(s) => self.walk_expr(&s.expr),
            Statement::VariableDeclaration(d) => {
                if d.type_node.value.is_callable() {
                    if let Some(sym) = d.id.symbol {
                        self.set_possible(sym, &d.value);
                    }
                }
                self.walk_expr(&d.value);
            }
            Statement::UninitializedVariableDeclaration(_) => {}
            Statement::Return(s) => {
                if let Some(v) = &s.value {
                    self.walk_expr(v);
                }
                if !self.required.is_empty() {
                    let mut names: Vec<&str> =
                        self.required.iter().map(|s| s.as_str()).collect();
                    names.sort();
                    self.failures.push((s.pos.clone(), names.join(", ")));
                }
            }
            Statement::Continue { .. } | Statement::Break { .. } | Statement::Include(_) => {}
            // Conditional or repeated blocks may not run: their assignments
            // establish nothing.
            Statement::If(s) => {
                self.walk_expr(&s.condition);
                self.walk_block(&s.body);
            }
            Statement::While(s) => {
                self.walk_expr(&s.condition);
                self.walk_block(&s.body);
            }
            Statement::Enumerate(s) => {
                self.walk_expr(&s.enumerable);
                self.walk_block(&s.body);
            }
            // A with body executes unconditionally.
            Statement::With(s) => {
                self.walk_expr(&s.resource);
                for stmt in &s.body {
                    self.walk_stmt(stmt);
                }
            }
        }
    }

    fn walk_block(&mut self, body: &'a [Statement]) {
        let saved_layer = self.in_top_layer;
        let saved_required = self.required.clone();
        self.in_top_layer = false;
        for stmt in body {
            self.walk_stmt(stmt);
        }
        self.required = saved_required;
        self.in_top_layer = saved_layer;
    }

    fn walk_expr(&mut self, expr: &'a Expression) {
        match expr {
            Expression::Assign(a) => {
                if let Expression::Identifier(dest) = a.dest.as_ref() {
                    if let Some(sym) = dest.symbol {
                        let s = self.arena.get(sym);
                        if s.kind == SymbolKind::ObjectProperty {
                            self.required.remove(&s.name);
                        }
                        if s.ty.as_ref().map(|t| t.is_callable()).unwrap_or(false) {
                            self.set_possible(sym, &a.value);
                        }
                    }
                }
                self.walk_expr(&a.value);
            }
            Expression::Call(c) => self.walk_call(c),
            Expression::DeferCall(d) => self.walk_call(&d.call),
            Expression::Binary(b) => {
                self.walk_expr(&b.left);
                self.walk_expr(&b.right);
            }
            Expression::Unary(u) => self.walk_expr(&u.exp),
            Expression::EnumerationLiteral(lit) => {
                for a in &lit.actuals {
                    self.walk_expr(a);
                }
            }
            Expression::MapLiteral(lit) => {
                for e in &lit.entries {
                    self.walk_expr(&e.value);
                }
            }
            Expression::EnumerableAccess(a) => {
                self.walk_expr(&a.path);
                self.walk_expr(&a.index);
            }
            Expression::EnumerableAppend(a) => self.walk_expr(&a.path),
            Expression::MapAccess(a) => self.walk_expr(&a.path),
            Expression::ClassAccess(a) => self.walk_expr(&a.path),
            Expression::Function(f) => {
                // Only walked when invoked through a possible-functions set.
                let _ = f;
            }
            Expression::Identifier(_)
            | Expression::NumberLiteral(_)
            | Expression::StringLiteral(_)
            | Expression::BooleanLiteral(_)
            | Expression::TypeLiteral(_)
            | Expression::TypeBody(_) => {}
        }
    }

    fn walk_call(&mut self, call: &'a CallExpression) {
        for arg in &call.args {
            self.walk_expr(arg);
        }
        let Expression::Identifier(id) = call.func.as_ref() else {
            return;
        };
        let Some(sym) = id.symbol else { return };

        if call.constructor.is_some() {
            // Parent constructor calls were accounted for during populate;
            // sibling-type constructions touch no local requirement.
            return;
        }

        if let Some(candidates) = self.possible.get(&sym).cloned() {
            let pre = self.required.clone();
            let mut post_union: HashSet<String> = HashSet::new();
            for f in candidates {
                self.required = pre.clone();
                for stmt in &f.body {
                    self.walk_stmt(stmt);
                }
                // A symbol unassigned by any candidate stays required.
                post_union.extend(self.required.iter().cloned());
            }
            self.required = post_union;
        } else {
            debug!(
                "function {} is too ambiguous for constructor validation",
                id.name
            );
        }
    }

    fn set_possible(&mut self, dest: SymbolId, value: &'a Expression) {
        let entry = self.possible.entry(dest).or_default();
        if self.in_top_layer {
            entry.clear();
        }
        match value {
            Expression::Function(f) => {
                debug!("recording possible function body for {dest}");
                self.possible.entry(dest).or_default().push(f);
            }
            Expression::Identifier(id) => {
                if let Some(src) = id.symbol {
                    if let Some(fns) = self.possible.get(&src).cloned() {
                        self.possible.entry(dest).or_default().extend(fns);
                        return;
                    }
                }
                self.possible.remove(&dest);
            }
            _ => {
                debug!("value too ambiguous for constructor validation; {dest} is now ambiguous");
                self.possible.remove(&dest);
            }
        }
    }
}
