//! Deferred-location scopes.
//!
//! A `defer f(x)` binds its destination location to the `(job-id, context-id)`
//! pair of the enqueued call. The first later instruction that *reads* such a
//! location forces synchronization: the lowering materializes a
//! `ResumeContext` / `Drain` / `RetMapGet` / `PopContext` sequence right
//! there. Scopes nest with copy-down semantics: entering a function region
//! sees the bindings of its definition site.

use std::collections::HashMap;

use swarm_isa::Location;

/// The job-id and context-id locations recorded for a deferred destination.
pub type JobData = (Location, Location);

#[derive(Debug, Default)]
pub struct DeferredScopes {
    stack: Vec<HashMap<String, (Location, JobData)>>,
}

impl DeferredScopes {
    pub fn new() -> Self {
        DeferredScopes {
            stack: vec![HashMap::new()],
        }
    }

    /// Enter a nested scope carrying a copy of the current bindings.
    pub fn enter(&mut self) {
        let top = self.stack.last().cloned().unwrap_or_default();
        self.stack.push(top);
    }

    pub fn leave(&mut self) {
        debug_assert!(self.stack.len() > 1, "attempted to leave the root scope");
        self.stack.pop();
    }

    pub fn add(&mut self, location: Location, jobid: Location, context: Location) {
        debug_assert!(!self.contains(&location));
        let key = location.fq_name();
        self.stack
            .last_mut()
            .expect("scope stack is never empty")
            .insert(key, (location, (jobid, context)));
    }

    /// Drop any binding for `location` (it is being overwritten).
    pub fn remove(&mut self, location: &Location) {
        let key = location.fq_name();
        if let Some(top) = self.stack.last_mut() {
            top.remove(&key);
        }
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.stack
            .last()
            .map(|top| top.contains_key(&location.fq_name()))
            .unwrap_or(false)
    }

    /// Take the binding for `location`, removing it.
    pub fn drain(&mut self, location: &Location) -> Option<JobData> {
        self.stack
            .last_mut()
            .and_then(|top| top.remove(&location.fq_name()))
            .map(|(_, data)| data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_copy_down_and_pop() {
        let mut scopes = DeferredScopes::new();
        let x = Location::local("var_x_1");
        scopes.add(x.clone(), Location::local("tmp0"), Location::local("tmp1"));
        assert!(scopes.contains(&x));

        scopes.enter();
        assert!(scopes.contains(&x), "bindings copy into nested scopes");
        scopes.remove(&x);
        assert!(!scopes.contains(&x));

        scopes.leave();
        assert!(scopes.contains(&x), "outer binding untouched by inner removal");

        let data = scopes.drain(&x).unwrap();
        assert_eq!(data.0, Location::local("tmp0"));
        assert!(!scopes.contains(&x));
    }
}
