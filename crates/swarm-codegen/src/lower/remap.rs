//! Symbol remap scopes.
//!
//! Inside a function region, certain symbols resolve to a different location
//! than their default `var_<name>_<uuid>` cell: a recursive function's
//! declared name maps straight to the `$f:` region location (so direct
//! recursion skips the curried-closure value), and formals map to their
//! parameter cells.

use std::collections::HashMap;

use swarm_core::symbol::SymbolId;
use swarm_isa::Location;

#[derive(Debug, Default)]
pub struct RemapScopes {
    stack: Vec<HashMap<SymbolId, Location>>,
}

impl RemapScopes {
    pub fn new() -> Self {
        RemapScopes {
            stack: vec![HashMap::new()],
        }
    }

    pub fn enter(&mut self) {
        self.stack.push(HashMap::new());
    }

    pub fn leave(&mut self) {
        debug_assert!(self.stack.len() > 1, "attempted to leave the root scope");
        self.stack.pop();
    }

    pub fn register(&mut self, symbol: SymbolId, location: Location) {
        self.stack
            .last_mut()
            .expect("scope stack is never empty")
            .insert(symbol, location);
    }

    /// The remapped location for `symbol`, innermost scope first.
    pub fn replace(&self, symbol: SymbolId) -> Option<Location> {
        self.stack
            .iter()
            .rev()
            .find_map(|scope| scope.get(&symbol).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_mapping_wins_until_popped() {
        let mut remap = RemapScopes::new();
        let sym = SymbolId(3);
        remap.register(sym, Location::function("FUNC_0"));
        remap.enter();
        remap.register(sym, Location::local("arg_f"));
        assert_eq!(remap.replace(sym), Some(Location::local("arg_f")));
        remap.leave();
        assert_eq!(remap.replace(sym), Some(Location::function("FUNC_0")));
        assert_eq!(remap.replace(SymbolId(9)), None);
    }
}
