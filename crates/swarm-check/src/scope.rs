//! Scope stack and diagnostic accumulation for the analysis walks.
//!
//! The [`SymbolTable`] is a stack of per-scope name maps over a shared
//! [`SymbolArena`]. The outermost scope is pre-seeded with the prologue
//! standard-library functions; identifiers that resolve to those lower to
//! `$f:<SVI_NAME>` function locations.

use std::collections::HashMap;

use tracing::debug;

use swarm_core::error::CompileError;
use swarm_core::position::Position;
use swarm_core::symbol::{SymbolArena, SymbolId, SymbolKind};
use swarm_core::types::Type;

/// Accumulates positional diagnostics; the pipeline stage fails if any were
/// collected, but the walks keep going where safe to report more.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn report(&mut self, error: CompileError) {
        tracing::error!("{error}");
        self.errors.push(error);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<CompileError> {
        self.errors
    }
}

/// Stack of scope tables; the innermost scope is last.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, SymbolId>>,
}

impl SymbolTable {
    /// A table whose outermost scope holds the prologue functions.
    pub fn with_prologue(arena: &mut SymbolArena) -> Self {
        let mut table = SymbolTable { scopes: vec![HashMap::new()] };
        for (name, params, returns, svi) in prologue_signatures() {
            let ty = Type::lambda(params, returns);
            let id = arena.alloc(
                name,
                Some(ty),
                Position::prologue(name),
                false,
                SymbolKind::PrologueFunction,
            );
            arena.get_mut(id).svi_name = Some(svi.to_string());
            table.insert(name.to_string(), id);
        }
        table
    }

    /// Push a new scope.
    pub fn enter(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Pop the current scope.
    pub fn leave(&mut self) {
        debug_assert!(self.scopes.len() > 1, "attempted to pop prologue scope");
        self.scopes.pop();
    }

    /// Find a name, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        for scope in self.scopes.iter().rev() {
            if let Some(&id) = scope.get(name) {
                return Some(id);
            }
        }
        debug!("unable to find symbol in table for identifier: {name}");
        None
    }

    /// True if the current scope already binds `name`.
    pub fn is_clashing(&self, name: &str) -> bool {
        self.scopes
            .last()
            .map(|s| s.contains_key(name))
            .unwrap_or(false)
    }

    /// Bind a name in the current scope. Returns false on clash.
    pub fn insert(&mut self, name: String, id: SymbolId) -> bool {
        if self.is_clashing(&name) {
            return false;
        }
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name, id);
        true
    }
}

/// The prologue surface: `(name, params, return, svi_name)`.
///
/// `log`/`err` are intercepted by lowering and become `StreamPush`
/// instructions; everything else is called through its `$f:` location and
/// executed as a VM builtin.
fn prologue_signatures() -> Vec<(&'static str, Vec<Type>, Type, &'static str)> {
    vec![
        ("log", vec![Type::string()], Type::void(), "LOG"),
        ("err", vec![Type::string()], Type::void(), "ERR"),
        (
            "numberToString",
            vec![Type::number()],
            Type::string(),
            "NUMBER_TO_STRING",
        ),
        (
            "booleanToString",
            vec![Type::boolean()],
            Type::string(),
            "BOOLEAN_TO_STRING",
        ),
        (
            "stringToNumber",
            vec![Type::string()],
            Type::number(),
            "STRING_TO_NUMBER",
        ),
        (
            "min",
            vec![Type::number(), Type::number()],
            Type::number(),
            "MIN",
        ),
        (
            "max",
            vec![Type::number(), Type::number()],
            Type::number(),
            "MAX",
        ),
        ("floor", vec![Type::number()], Type::number(), "FLOOR"),
        ("ceiling", vec![Type::number()], Type::number(), "CEILING"),
        ("random", vec![], Type::number(), "RANDOM"),
        (
            "range",
            vec![Type::number(), Type::number(), Type::number()],
            Type::enumerable(Type::number()),
            "RANGE",
        ),
        (
            "nthRoot",
            vec![Type::number(), Type::number()],
            Type::number(),
            "NTH_ROOT",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prologue_scope_resolves_log() {
        let mut arena = SymbolArena::new();
        let table = SymbolTable::with_prologue(&mut arena);
        let id = table.lookup("log").expect("log is in the prologue");
        let sym = arena.get(id);
        assert!(sym.is_prologue());
        assert_eq!(sym.svi_name.as_deref(), Some("LOG"));
        assert_eq!(sym.ty, Some(Type::lambda(vec![Type::string()], Type::void())));
    }

    #[test]
    fn inner_scope_shadows_and_pops() {
        let mut arena = SymbolArena::new();
        let mut table = SymbolTable::with_prologue(&mut arena);
        let outer = arena.alloc(
            "x",
            Some(Type::number()),
            Position::new("t", 1, 1, 1, 2),
            false,
            SymbolKind::Variable,
        );
        table.enter();
        assert!(table.insert("x".into(), outer));

        let inner = arena.alloc(
            "x",
            Some(Type::string()),
            Position::new("t", 2, 1, 2, 2),
            false,
            SymbolKind::Variable,
        );
        table.enter();
        assert!(table.insert("x".into(), inner));
        assert_eq!(table.lookup("x"), Some(inner));
        assert!(!table.is_clashing("y"));

        table.leave();
        assert_eq!(table.lookup("x"), Some(outer));
    }

    #[test]
    fn clash_is_scope_local() {
        let mut arena = SymbolArena::new();
        let mut table = SymbolTable::with_prologue(&mut arena);
        let a = arena.alloc(
            "x",
            Some(Type::number()),
            Position::new("t", 1, 1, 1, 2),
            false,
            SymbolKind::Variable,
        );
        table.enter();
        table.insert("x".into(), a);
        assert!(table.is_clashing("x"));
        table.enter();
        assert!(!table.is_clashing("x"));
    }
}
