//! Per-statement shared-location analysis.
//!
//! Individual instructions are atomic, so a shared location referenced once
//! in a statement needs no lock. A statement that references the same shared
//! symbol more than once could interleave with a worker between those uses;
//! the lowering wraps such statements in a `Lock`/`Unlock` critical section.
//!
//! This pre-pass counts shared-symbol references per statement on the AST.
//! Blocks count only their scrutinee (condition / enumerable / resource):
//! their bodies lower to separate statements with their own analysis.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use swarm_core::ast::*;
use swarm_core::symbol::{SemanticSymbol, SymbolArena};

use swarm_isa::{Affinity, Location};

/// The lowered location name of a variable symbol.
pub fn symbol_location(sym: &SemanticSymbol) -> Location {
    let affinity = if sym.shared {
        Affinity::Shared
    } else {
        Affinity::Local
    };
    Location::new(affinity, format!("var_{}_{}", sym.name, sym.uuid))
}

/// Lock bookkeeping for the statement currently being lowered.
#[derive(Debug, Default)]
pub struct SharedLocations {
    /// Fully-qualified names of shared locations referenced more than once.
    lockable: HashSet<String>,
    /// Locks taken so far, in acquisition order.
    locked: Vec<Location>,
}

impl SharedLocations {
    /// Analyze one statement.
    pub fn for_statement(stmt: &Statement, arena: &SymbolArena) -> SharedLocations {
        let mut counts: HashMap<String, usize> = HashMap::new();
        count_stmt(stmt, arena, &mut counts);

        let lockable: HashSet<String> = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(name, _)| name)
            .collect();
        if !lockable.is_empty() {
            debug!("{} lockable locations: {:?}", stmt.pos(), lockable);
        }
        SharedLocations {
            lockable,
            locked: Vec::new(),
        }
    }

    /// True if this location must be locked before its next use.
    pub fn needs_lock(&self, loc: &Location) -> bool {
        loc.affinity == Affinity::Shared
            && self.lockable.contains(&loc.fq_name())
            && !self.locked.iter().any(|l| l == loc)
    }

    pub fn mark_locked(&mut self, loc: Location) {
        self.locked.push(loc);
    }

    /// Drain the held locks for end-of-statement release.
    pub fn take_locked(&mut self) -> Vec<Location> {
        std::mem::take(&mut self.locked)
    }

    pub fn is_clear(&self) -> bool {
        self.locked.is_empty()
    }
}

fn count_symbol(
    id: &Identifier,
    arena: &SymbolArena,
    counts: &mut HashMap<String, usize>,
) {
    let Some(sid) = id.symbol else { return };
    let sym = arena.get(sid);
    if !sym.shared {
        return;
    }
    *counts.entry(symbol_location(sym).fq_name()).or_insert(0) += 1;
}

fn count_stmt(stmt: &Statement, arena: &SymbolArena, counts: &mut HashMap<String, usize>) {
    match stmt {
        Statement::Expression(s) => count_expr(&s.expr, arena, counts),
        Statement::VariableDeclaration(d) => {
            count_symbol(&d.id, arena, counts);
            count_expr(&d.value, arena, counts);
        }
        Statement::UninitializedVariableDeclaration(_) => {}
        Statement::Return(s) => {
            if let Some(v) = &s.value {
                count_expr(v, arena, counts);
            }
        }
        Statement::Continue { .. } | Statement::Break { .. } | Statement::Include(_) => {}
        // Block bodies are analyzed statement-by-statement during lowering;
        // only the scrutinee belongs to this statement.
        Statement::If(s) => count_expr(&s.condition, arena, counts),
        Statement::While(s) => count_expr(&s.condition, arena, counts),
        Statement::Enumerate(s) => count_expr(&s.enumerable, arena, counts),
        Statement::With(s) => count_expr(&s.resource, arena, counts),
    }
}

fn count_expr(expr: &Expression, arena: &SymbolArena, counts: &mut HashMap<String, usize>) {
    match expr {
        Expression::Identifier(id) => count_symbol(id, arena, counts),
        Expression::NumberLiteral(_)
        | Expression::StringLiteral(_)
        | Expression::BooleanLiteral(_)
        | Expression::TypeLiteral(_) => {}
        Expression::EnumerationLiteral(lit) => {
            for a in &lit.actuals {
                count_expr(a, arena, counts);
            }
        }
        // Map literal values are single-instruction inserts over a fresh
        // local; nothing lockable surfaces.
        Expression::MapLiteral(_) => {}
        Expression::EnumerableAccess(a) => {
            count_expr(&a.path, arena, counts);
            count_expr(&a.index, arena, counts);
        }
        Expression::EnumerableAppend(a) => count_expr(&a.path, arena, counts),
        Expression::MapAccess(a) => count_expr(&a.path, arena, counts),
        Expression::ClassAccess(a) => count_expr(&a.path, arena, counts),
        Expression::Assign(a) => {
            count_expr(&a.dest, arena, counts);
            count_expr(&a.value, arena, counts);
        }
        // Function and type bodies lower to their own regions with their
        // own statement analysis.
        Expression::Function(_) | Expression::TypeBody(_) => {}
        Expression::Call(c) => {
            count_expr(&c.func, arena, counts);
            for a in &c.args {
                count_expr(a, arena, counts);
            }
        }
        Expression::DeferCall(d) => {
            count_expr(&d.call.func, arena, counts);
            for a in &d.call.args {
                count_expr(a, arena, counts);
            }
        }
        Expression::Binary(b) => {
            count_expr(&b.left, arena, counts);
            count_expr(&b.right, arena, counts);
        }
        Expression::Unary(u) => count_expr(&u.exp, arena, counts),
    }
}
