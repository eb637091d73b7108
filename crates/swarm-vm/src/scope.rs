//! Runtime scope frames.
//!
//! A [`ScopeFrame`] is a linked frame with a shadow map: `ScopeOf(l)`
//! rewrites `l` to a frame-suffixed name (`l@<id>`), and `map(l)` resolves a
//! location to its nearest shadow up the chain. Entering a scope copies no
//! state; cloned VMs share parent frames through `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use swarm_isa::Location;

#[derive(Debug, Clone)]
pub struct ScopeFrame {
    id: String,
    parent: Option<Arc<ScopeFrame>>,
    /// The function-region name this frame was entered for, when it is a
    /// call frame.
    call: Option<String>,
    shadows: HashMap<String, Location>,
}

impl ScopeFrame {
    pub fn root() -> Self {
        ScopeFrame {
            id: Uuid::new_v4().to_string(),
            parent: None,
            call: None,
            shadows: HashMap::new(),
        }
    }

    pub fn call(&self) -> Option<&str> {
        self.call.as_deref()
    }

    /// Shadow `loc` in this frame. Re-shadowing the same location in the
    /// same frame is idempotent.
    pub fn shadow(&mut self, loc: &Location) {
        let key = loc.fq_name();
        if self.shadows.contains_key(&key) {
            return;
        }
        let shadowed = Location::new(loc.affinity, format!("{}@{}", loc.name, self.id));
        self.shadows.insert(key, shadowed);
    }

    /// Resolve to the nearest shadow, or the location itself.
    pub fn map(&self, loc: &Location) -> Location {
        let key = loc.fq_name();
        let mut frame = Some(self);
        while let Some(f) = frame {
            if let Some(shadowed) = f.shadows.get(&key) {
                return shadowed.clone();
            }
            frame = f.parent.as_deref();
        }
        loc.clone()
    }

    /// Fork a child frame.
    pub fn new_child(self) -> ScopeFrame {
        ScopeFrame {
            id: Uuid::new_v4().to_string(),
            parent: Some(Arc::new(self)),
            call: None,
            shadows: HashMap::new(),
        }
    }

    /// Fork a call frame for the named function region.
    pub fn new_call(self, function: impl Into<String>) -> ScopeFrame {
        ScopeFrame {
            id: Uuid::new_v4().to_string(),
            parent: Some(Arc::new(self)),
            call: Some(function.into()),
            shadows: HashMap::new(),
        }
    }

    /// Pop back to the parent frame, which may be shared with job clones.
    pub fn exit(self) -> Option<ScopeFrame> {
        self.parent.map(|p| (*p).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_isa::Affinity;

    #[test]
    fn shadow_rewrites_and_resolves() {
        let mut frame = ScopeFrame::root();
        let loc = Location::local("retVal");
        frame.shadow(&loc);
        let mapped = frame.map(&loc);
        assert_ne!(mapped, loc);
        assert!(mapped.name.starts_with("retVal@"));
        assert_eq!(mapped.affinity, Affinity::Local);
    }

    #[test]
    fn unshadowed_locations_map_to_themselves() {
        let frame = ScopeFrame::root();
        let loc = Location::shared("var_count_0");
        assert_eq!(frame.map(&loc), loc);
    }

    #[test]
    fn child_sees_parent_shadows_until_it_reshadows() {
        let mut root = ScopeFrame::root();
        let loc = Location::local("CFB");
        root.shadow(&loc);
        let outer = root.map(&loc);

        let mut child = root.new_child();
        assert_eq!(child.map(&loc), outer, "inherited shadow");

        child.shadow(&loc);
        let inner = child.map(&loc);
        assert_ne!(inner, outer, "re-shadow hides the parent cell");

        let back = child.exit().unwrap();
        assert_eq!(back.map(&loc), outer);
    }
}
