//! Name analysis.
//!
//! A single top-down walk that resolves every identifier to a
//! [`SymbolId`], disambiguates `Ambiguous` type references in place, builds
//! and finalizes object types (rewriting self-references to `This`), and
//! assigns constructor region names. Declarations whose declared type is
//! `type`, or whose value is a function literal, insert their symbol
//! *before* walking the value so recursion and type self-reference resolve.

use std::collections::HashMap;

use tracing::debug;

use swarm_core::ast::*;
use swarm_core::error::CompileError;
use swarm_core::position::Position;
use swarm_core::symbol::{
    ConstructorSig, ObjectTypeValue, SymbolArena, SymbolId, SymbolKind, TypeValue,
};
use swarm_core::types::{ObjectType, ObjectTypeBuilder, Primitive, Type};

use crate::scope::{Diagnostics, SymbolTable};

/// Run name analysis over a program. On success, returns the symbol arena
/// the identifier nodes now point into.
pub fn analyze(program: &mut Program) -> Result<SymbolArena, Vec<CompileError>> {
    let mut arena = SymbolArena::new();
    let table = SymbolTable::with_prologue(&mut arena);
    let mut walk = NameAnalysis {
        arena,
        table,
        diags: Diagnostics::new(),
        ctor_counter: 0,
        skip_functions: false,
    };

    walk.table.enter();
    for stmt in &mut program.body {
        walk.walk_statement(stmt);
        debug!("{} finished statement", stmt.pos());
    }
    walk.table.leave();

    if walk.diags.is_ok() {
        Ok(walk.arena)
    } else {
        Err(walk.diags.into_errors())
    }
}

struct NameAnalysis {
    arena: SymbolArena,
    table: SymbolTable,
    diags: Diagnostics,
    ctor_counter: usize,
    /// Set while pre-validating directly-executed member default values;
    /// function literals are skipped (they are walked later with the
    /// property scope available).
    skip_functions: bool,
}

impl NameAnalysis {
    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn walk_statement(&mut self, stmt: &mut Statement) {
        match stmt {
            Statement::Expression(s) => self.walk_expression(&mut s.expr),
            Statement::VariableDeclaration(decl) => self.walk_variable_declaration(decl),
            // Symbols for uninitialized members are added while walking the
            // enclosing type body.
            Statement::UninitializedVariableDeclaration(_) => {}
            Statement::Return(s) => {
                if let Some(v) = &mut s.value {
                    self.walk_expression(v);
                }
            }
            Statement::Continue { .. } | Statement::Break { .. } => {}
            Statement::If(s) => {
                self.walk_expression(&mut s.condition);
                self.table.enter();
                for stmt in &mut s.body {
                    self.walk_statement(stmt);
                }
                self.table.leave();
            }
            Statement::While(s) => {
                self.walk_expression(&mut s.condition);
                self.table.enter();
                for stmt in &mut s.body {
                    self.walk_statement(stmt);
                }
                self.table.leave();
            }
            Statement::Enumerate(s) => self.walk_enumerate(s),
            Statement::With(s) => self.walk_with(s),
            Statement::Include(_) => {}
        }
    }

    fn walk_variable_declaration(&mut self, decl: &mut VariableDeclaration) {
        if decl.id.symbol.is_some() {
            // Already processed (type-body member walked by the enclosing
            // type body); only the value remains.
            self.walk_expression(&mut decl.value);
            return;
        }

        self.walk_type_literal(&mut decl.type_node);
        let name = decl.id.name.clone();
        let declared = decl.type_node.value.clone();

        if self.table.is_clashing(&name) {
            let first = self
                .table
                .lookup(&name)
                .map(|id| self.arena.get(id).declared_at.start())
                .unwrap_or_default();
            self.diags.report(CompileError::Redeclaration {
                pos: decl.pos.clone(),
                name,
                first,
            });
            return;
        }

        let is_type_decl = declared.is_primitive(Primitive::Type);
        let is_fn_literal = matches!(decl.value, Expression::Function(_));

        if is_type_decl || is_fn_literal {
            // Insert before walking the value: allows recursion through the
            // declared name and self-referential type bodies.
            let sym = self.arena.alloc(
                name.clone(),
                Some(declared),
                decl.pos.clone(),
                decl.shared,
                SymbolKind::Variable,
            );
            self.table.insert(name, sym);
            decl.id.symbol = Some(sym);

            if is_type_decl {
                match &mut decl.value {
                    Expression::TypeLiteral(lit) => {
                        self.walk_type_literal(lit);
                        self.arena.get_mut(sym).type_value =
                            Some(TypeValue::Alias(lit.value.clone()));
                    }
                    Expression::TypeBody(tb) => {
                        self.walk_type_body(tb, sym);
                    }
                    Expression::Identifier(alias_of) => {
                        self.walk_identifier(alias_of);
                        let tv = alias_of
                            .symbol
                            .and_then(|vid| self.arena.get(vid).type_value.clone());
                        if tv.is_none() {
                            self.diags.report(CompileError::NotAType {
                                pos: alias_of.pos.clone(),
                                name: alias_of.name.clone(),
                            });
                        }
                        debug!("assigned aliased type to symbol {}", self.arena.get(sym));
                        self.arena.get_mut(sym).type_value = tv;
                    }
                    _ => {
                        self.diags.report(CompileError::NontrivialTypeAssignment {
                            pos: decl.value.pos().clone(),
                        });
                    }
                }
            } else {
                if let Expression::Function(f) = &mut decl.value {
                    f.var_decld_to = Some(sym);
                }
                self.walk_expression(&mut decl.value);
            }
        } else {
            // Walk the value first; the declared name is not visible in it.
            self.walk_expression(&mut decl.value);
            let sym = self.arena.alloc(
                name.clone(),
                Some(declared),
                decl.pos.clone(),
                decl.shared,
                SymbolKind::Variable,
            );
            self.table.insert(name, sym);
            decl.id.symbol = Some(sym);
        }
    }

    fn walk_enumerate(&mut self, stmt: &mut EnumerateStatement) {
        self.walk_expression(&mut stmt.enumerable);

        // The block-local's type is the enumerable's element type, unknown
        // until type analysis; register it untyped.
        self.table.enter();
        let sym = self.arena.alloc(
            stmt.local.name.clone(),
            None,
            stmt.local.pos.clone(),
            stmt.shared,
            SymbolKind::Variable,
        );
        self.table.insert(stmt.local.name.clone(), sym);
        stmt.local.symbol = Some(sym);

        if let Some(index) = &mut stmt.index {
            let isym = self.arena.alloc(
                index.name.clone(),
                Some(Type::number()),
                index.pos.clone(),
                false,
                SymbolKind::Variable,
            );
            self.table.insert(index.name.clone(), isym);
            index.symbol = Some(isym);
        }

        for s in &mut stmt.body {
            self.walk_statement(s);
        }
        self.table.leave();
    }

    fn walk_with(&mut self, stmt: &mut WithStatement) {
        self.walk_expression(&mut stmt.resource);

        // The local's concrete type comes from the resource's yield during
        // type analysis.
        self.table.enter();
        let sym = self.arena.alloc(
            stmt.local.name.clone(),
            None,
            stmt.local.pos.clone(),
            stmt.shared,
            SymbolKind::Variable,
        );
        self.table.insert(stmt.local.name.clone(), sym);
        stmt.local.symbol = Some(sym);

        for s in &mut stmt.body {
            self.walk_statement(s);
        }
        self.table.leave();
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn walk_expression(&mut self, expr: &mut Expression) {
        match expr {
            Expression::Identifier(id) => self.walk_identifier(id),
            Expression::NumberLiteral(_)
            | Expression::StringLiteral(_)
            | Expression::BooleanLiteral(_) => {}
            Expression::TypeLiteral(lit) => self.walk_type_literal(lit),
            Expression::EnumerationLiteral(lit) => {
                for actual in &mut lit.actuals {
                    self.walk_expression(actual);
                }
            }
            Expression::MapLiteral(lit) => self.walk_map_literal(lit),
            Expression::EnumerableAccess(a) => {
                self.walk_expression(&mut a.path);
                self.walk_expression(&mut a.index);
            }
            Expression::EnumerableAppend(a) => self.walk_expression(&mut a.path),
            Expression::MapAccess(a) => self.walk_expression(&mut a.path),
            // Property names cannot be checked until type analysis.
            Expression::ClassAccess(a) => self.walk_expression(&mut a.path),
            Expression::Assign(a) => {
                self.walk_expression(&mut a.dest);
                self.walk_expression(&mut a.value);
            }
            Expression::Function(f) => {
                if !self.skip_functions {
                    self.walk_function(f);
                }
            }
            Expression::TypeBody(tb) => {
                if !self.skip_functions {
                    // Anonymous type body: give it a detached symbol so the
                    // finalized type still has a home.
                    let sym = self.arena.alloc(
                        "<anonymous type>",
                        Some(Type::type_of_types()),
                        tb.pos.clone(),
                        false,
                        SymbolKind::Variable,
                    );
                    self.walk_type_body(tb, sym);
                }
            }
            Expression::Call(call) => self.walk_call(call),
            Expression::DeferCall(defer) => self.walk_call(&mut defer.call),
            Expression::Binary(b) => {
                self.walk_expression(&mut b.left);
                self.walk_expression(&mut b.right);
            }
            Expression::Unary(u) => self.walk_expression(&mut u.exp),
        }
    }

    fn walk_identifier(&mut self, id: &mut Identifier) {
        if id.symbol.is_some() {
            return;
        }
        match self.table.lookup(&id.name) {
            Some(sym) => id.symbol = Some(sym),
            None => self.diags.report(CompileError::FreeIdentifier {
                pos: id.pos.clone(),
                name: id.name.clone(),
            }),
        }
    }

    fn walk_map_literal(&mut self, lit: &mut MapLiteral) {
        for entry in &lit.entries {
            let count = lit
                .entries
                .iter()
                .filter(|e| e.id.name == entry.id.name)
                .count();
            if count > 1 {
                self.diags.report(CompileError::DuplicateMapKey {
                    pos: entry.pos.clone(),
                    key: entry.id.name.clone(),
                });
            }
        }
        for entry in &mut lit.entries {
            self.walk_expression(&mut entry.value);
        }
    }

    fn walk_call(&mut self, call: &mut CallExpression) {
        self.walk_expression(&mut call.func);
        for arg in &mut call.args {
            self.walk_expression(arg);
        }
    }

    fn walk_function(&mut self, func: &mut FunctionNode) {
        self.table.enter();
        for formal in &mut func.formals {
            self.walk_type_literal(&mut formal.type_node);
            let name = formal.id.name.clone();
            if self.table.is_clashing(&name) {
                let first = self
                    .table
                    .lookup(&name)
                    .map(|id| self.arena.get(id).declared_at.start())
                    .unwrap_or_default();
                self.diags.report(CompileError::Redeclaration {
                    pos: formal.id.pos.clone(),
                    name: name.clone(),
                    first,
                });
            }
            let sym = self.arena.alloc(
                name.clone(),
                Some(formal.type_node.value.clone()),
                formal.id.pos.clone(),
                false,
                SymbolKind::Variable,
            );
            self.table.insert(name, sym);
            formal.id.symbol = Some(sym);
        }
        self.walk_type_literal(&mut func.type_node);
        for stmt in &mut func.body {
            self.walk_statement(stmt);
        }
        self.table.leave();
    }

    // -----------------------------------------------------------------------
    // Type bodies
    // -----------------------------------------------------------------------

    fn walk_type_body(&mut self, tb: &mut TypeBodyNode, self_symbol: SymbolId) {
        // Resolve parents; single inheritance plus a duplicate check.
        let mut parents: Vec<(SymbolId, ObjectType)> = Vec::new();
        for pid in &mut tb.parents {
            self.walk_identifier(pid);
            let Some(sid) = pid.symbol else { continue };
            match self.arena.get(sid).object_type() {
                Some(otv) => {
                    if parents.iter().any(|(_, o)| o.id() == otv.object.id()) {
                        self.diags.report(CompileError::DuplicateParent {
                            pos: pid.pos.clone(),
                            name: pid.name.clone(),
                        });
                    } else {
                        parents.push((sid, otv.object.clone()));
                    }
                }
                None => self.diags.report(CompileError::NotAType {
                    pos: pid.pos.clone(),
                    name: pid.name.clone(),
                }),
            }
        }

        // Assemble and finalize the object type. References to the type
        // under construction resolve to `This` (its symbol has no bound
        // type value yet), breaking the self-cycle.
        let mut builder = match parents.first() {
            Some((_, parent)) => ObjectTypeBuilder::with_parent(parent.clone()),
            None => ObjectTypeBuilder::new(),
        };
        for decl in &tb.declarations {
            match decl {
                Statement::VariableDeclaration(d) => {
                    let ty = self.resolve_type(&d.type_node.value, &d.pos);
                    builder.define_property(d.id.name.clone(), ty);
                }
                Statement::UninitializedVariableDeclaration(d) => {
                    let ty = self.resolve_type(&d.type_node.value, &d.pos);
                    builder.define_property(d.id.name.clone(), ty);
                }
                _ => {}
            }
        }
        let obj = builder.finalize();
        tb.value = Some(obj.clone());

        // Bind the finalized object to the declaring symbol immediately so
        // constructor formals of the own type resolve to it.
        let mut uninitialized: Vec<String> = parents
            .first()
            .and_then(|(sid, _)| self.arena.get(*sid).object_type())
            .map(|otv| otv.uninitialized.clone())
            .unwrap_or_default();
        for decl in &tb.declarations {
            match decl {
                Statement::UninitializedVariableDeclaration(d) => {
                    if !uninitialized.contains(&d.id.name) {
                        uninitialized.push(d.id.name.clone());
                    }
                }
                Statement::VariableDeclaration(d) => {
                    uninitialized.retain(|n| n != &d.id.name);
                }
                _ => {}
            }
        }
        self.arena.get_mut(self_symbol).type_value = Some(TypeValue::Object(ObjectTypeValue {
            object: obj.clone(),
            constructors: Vec::new(),
            uninitialized,
        }));

        // Directly-executed default values are evaluated once per
        // constructor against the *enclosing* scope; validate them before
        // the property scope opens. Function literals wait for it.
        self.skip_functions = true;
        for decl in &mut tb.declarations {
            if let Statement::VariableDeclaration(d) = decl {
                self.walk_expression(&mut d.value);
            }
        }
        self.skip_functions = false;

        // Property scope: one ObjectProperty symbol per linearized property
        // (inherited ones included).
        self.table.enter();
        for (pname, pty) in obj.properties() {
            let sym = self.arena.alloc(
                pname.clone(),
                Some(pty.clone()),
                tb.pos.clone(),
                false,
                SymbolKind::ObjectProperty,
            );
            self.arena.get_mut(sym).property_of = Some(obj.clone());
            self.table.insert(pname.clone(), sym);
        }
        for decl in &mut tb.declarations {
            match decl {
                Statement::VariableDeclaration(d) => {
                    if d.shared {
                        self.diags.report(CompileError::SharedVariableInTypeBody {
                            pos: d.pos.clone(),
                            name: d.id.name.clone(),
                        });
                    }
                    self.walk_type_literal(&mut d.type_node);
                    d.id.symbol = self.table.lookup(&d.id.name);
                }
                Statement::UninitializedVariableDeclaration(d) => {
                    self.walk_type_literal(&mut d.type_node);
                    d.id.symbol = self.table.lookup(&d.id.name);
                }
                _ => {}
            }
        }
        // Walk member values after every property is in scope.
        for decl in &mut tb.declarations {
            if let Statement::VariableDeclaration(d) = decl {
                self.walk_expression(&mut d.value);
            }
        }

        let mut sigs = Vec::new();
        for c in &mut tb.constructors {
            self.walk_constructor(c, &obj, &parents);
            sigs.push(ConstructorSig {
                name: c.name.clone(),
                params: c
                    .func
                    .formals
                    .iter()
                    .map(|f| f.type_node.value.clone())
                    .collect(),
            });
        }
        if let Some(TypeValue::Object(otv)) = &mut self.arena.get_mut(self_symbol).type_value {
            otv.constructors = sigs;
        }
        self.table.leave();
    }

    fn walk_constructor(
        &mut self,
        c: &mut ConstructorNode,
        obj: &ObjectType,
        parents: &[(SymbolId, ObjectType)],
    ) {
        c.name = format!("CONSTRUCTOR_{}", self.ctor_counter);
        self.ctor_counter += 1;
        c.part_of = Some(obj.clone());

        self.table.enter();
        for formal in &mut c.func.formals {
            self.walk_type_literal(&mut formal.type_node);
            let name = formal.id.name.clone();
            if self.table.is_clashing(&name) {
                let first = self
                    .table
                    .lookup(&name)
                    .map(|id| self.arena.get(id).declared_at.start())
                    .unwrap_or_default();
                self.diags.report(CompileError::Redeclaration {
                    pos: formal.id.pos.clone(),
                    name: name.clone(),
                    first,
                });
            }
            let sym = self.arena.alloc(
                name.clone(),
                Some(formal.type_node.value.clone()),
                formal.id.pos.clone(),
                false,
                SymbolKind::Variable,
            );
            self.table.insert(name, sym);
            formal.id.symbol = Some(sym);
        }
        self.walk_type_literal(&mut c.func.type_node);

        // Parent constructor calls: each must target a declared parent, and
        // no parent may be constructed twice.
        let mut called: Vec<u64> = Vec::new();
        for pc in &mut c.parent_constructors {
            self.walk_call(pc);
            let Expression::Identifier(id) = pc.func.as_ref() else {
                self.diags.report(CompileError::InvalidParentConstructor {
                    pos: pc.pos.clone(),
                    name: "<expression>".into(),
                });
                continue;
            };
            let Some(sid) = id.symbol else { continue };
            match self.arena.get(sid).object_type() {
                Some(otv) => {
                    let oid = otv.object.id();
                    if !parents.iter().any(|(_, o)| o.id() == oid) {
                        self.diags.report(CompileError::InvalidParentConstructor {
                            pos: pc.pos.clone(),
                            name: id.name.clone(),
                        });
                    } else if called.contains(&oid) {
                        self.diags
                            .report(CompileError::DuplicateParentConstructorCall {
                                pos: pc.pos.clone(),
                                name: id.name.clone(),
                            });
                    } else {
                        called.push(oid);
                    }
                }
                None => self.diags.report(CompileError::InvalidParentConstructor {
                    pos: pc.pos.clone(),
                    name: id.name.clone(),
                }),
            }
        }

        for stmt in &mut c.func.body {
            self.walk_statement(stmt);
        }
        self.table.leave();
    }

    // -----------------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------------

    fn walk_type_literal(&mut self, lit: &mut TypeLiteral) {
        lit.value = self.resolve_type(&lit.value, &lit.pos);
    }

    /// Collapse every `Ambiguous` node to the type its name resolves to.
    /// A name bound to a type-typed symbol whose value is still being built
    /// resolves to `This`.
    fn resolve_type(&mut self, ty: &Type, pos: &Position) -> Type {
        if !ty.contains_ambiguous() {
            return ty.clone();
        }

        let mut names = Vec::new();
        collect_ambiguous_names(ty, &mut names);

        let mut mapping: HashMap<String, Type> = HashMap::new();
        for name in names {
            let resolved = match self.table.lookup(&name) {
                None => {
                    self.diags.report(CompileError::FreeIdentifier {
                        pos: pos.clone(),
                        name: name.clone(),
                    });
                    Type::error()
                }
                Some(id) => {
                    let sym = self.arena.get(id);
                    match &sym.type_value {
                        Some(tv) => tv.as_type(),
                        None if sym.ty == Some(Type::type_of_types()) => {
                            // The type currently being declared.
                            Type::this()
                        }
                        None => {
                            self.diags.report(CompileError::NotAType {
                                pos: pos.clone(),
                                name: name.clone(),
                            });
                            Type::error()
                        }
                    }
                }
            };
            mapping.insert(name, resolved);
        }

        ty.transform(&|t| match t {
            Type::Ambiguous { name } => mapping.get(name).cloned(),
            _ => None,
        })
    }
}

fn collect_ambiguous_names(ty: &Type, out: &mut Vec<String>) {
    match ty {
        Type::Ambiguous { name } => {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        Type::Primitive(_) => {}
        Type::Enumerable(i) | Type::Map(i) | Type::Resource(i) | Type::Lambda0(i) => {
            collect_ambiguous_names(i, out)
        }
        Type::Lambda1 { param, returns } => {
            collect_ambiguous_names(param, out);
            collect_ambiguous_names(returns, out);
        }
        Type::Object(o) => {
            for t in o.properties().values() {
                collect_ambiguous_names(t, out);
            }
        }
    }
}
