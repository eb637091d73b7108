//! ISA optimization passes over the control-flow graph.
//!
//! Two passes iterate together until a fixpoint:
//!
//! - *Self-assign removal* deletes `AssignValue(x, x)` no-ops. Disabling it
//!   weakens the statement-atomicity story of shared semantics, so doing so
//!   logs a warning.
//! - *Constant propagation* tracks `AssignValue` bindings in a tiered map
//!   scoped by call depth: a call edge pushes a fresh tier, a return edge
//!   resets, and a fall edge resets conservatively (a known-pure callee
//!   could keep them; see DESIGN.md). Shared destinations are never
//!   recorded.

use std::collections::HashMap;

use petgraph::stable_graph::NodeIndex;
use tracing::{debug, warn};

use swarm_isa::{Affinity, Instruction, Instructions, Reference, Tag};

use super::{ControlFlowGraph, EdgeKind};

#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    pub remove_self_assign: bool,
    pub const_prop: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        OptimizeOptions {
            remove_self_assign: true,
            const_prop: true,
        }
    }
}

/// Build a CFG, run the enabled passes to a fixpoint, and linearize back.
pub fn optimize(instrs: Instructions, options: &OptimizeOptions) -> Instructions {
    let mut cfg = ControlFlowGraph::build(instrs);
    optimize_graph(&mut cfg, options);
    cfg.reconstruct()
}

/// Run the enabled passes in place.
pub fn optimize_graph(cfg: &mut ControlFlowGraph, options: &OptimizeOptions) {
    if !options.remove_self_assign {
        warn!(
            "disabling removal of self-assignments can result in the loss of \
             atomicity in swarm statements"
        );
    }

    let mut iteration = 1;
    loop {
        debug!("starting CFG optimization pass {iteration}");
        iteration += 1;
        let mut changed = false;
        if options.remove_self_assign {
            changed |= remove_self_assigns(cfg);
        }
        if options.const_prop {
            changed |= ConstantPropagation::run(cfg);
        }
        if !changed {
            break;
        }
    }
}

/// Delete `AssignValue(x, x)` instructions from every block.
fn remove_self_assigns(cfg: &mut ControlFlowGraph) -> bool {
    let mut changed = false;
    for idx in cfg.block_indices() {
        let block = cfg.block_mut(idx);
        let before = block.instructions.len();
        block.instructions.retain(|i| match i {
            Instruction::AssignValue {
                dest,
                value: Reference::Location(l),
            } => {
                if l == dest {
                    debug!("removed self-assign of {l}");
                    false
                } else {
                    true
                }
            }
            _ => true,
        });
        changed |= block.instructions.len() != before;
    }
    changed
}

/// Value bindings keyed by fully-qualified location name, tiered per call
/// depth.
#[derive(Debug, Default)]
struct TieredMap {
    tiers: Vec<HashMap<String, Reference>>,
}

impl TieredMap {
    fn new() -> Self {
        TieredMap {
            tiers: vec![HashMap::new()],
        }
    }

    fn get(&self, name: &str) -> Option<&Reference> {
        self.tiers.iter().rev().find_map(|t| t.get(name))
    }

    fn set(&mut self, name: String, value: Reference) {
        self.tiers
            .last_mut()
            .expect("tier stack is never empty")
            .insert(name, value);
    }

    fn push_tier(&mut self) {
        self.tiers.push(HashMap::new());
    }

    fn reset(&mut self) {
        self.tiers.clear();
        self.tiers.push(HashMap::new());
    }
}

struct ConstantPropagation {
    values: TieredMap,
}

impl ConstantPropagation {
    fn run(cfg: &mut ControlFlowGraph) -> bool {
        let mut cp = ConstantPropagation {
            values: TieredMap::new(),
        };
        let mut changed = false;
        for start in cfg.function_starts() {
            changed |= cp.block_propagate(cfg, start, 0);
            cp.values.reset();
        }
        changed |= cp.block_propagate(cfg, cfg.first(), 0);
        cp.values.reset();
        changed
    }

    fn substitute(&self, slot: &mut Reference) -> bool {
        if let Reference::Location(l) = &*slot {
            if let Some(v) = self.values.get(&l.fq_name()) {
                if v != &*slot {
                    debug!("replaced {l} with {v}");
                    *slot = v.clone();
                    return true;
                }
            }
        }
        false
    }

    fn block_propagate(
        &mut self,
        cfg: &mut ControlFlowGraph,
        node: NodeIndex,
        depth: isize,
    ) -> bool {
        let mut changed = false;
        debug!("propagating through {}", cfg.block(node).id);

        if depth == 0 {
            for instr in cfg.block_mut(node).instructions.iter_mut() {
                match instr {
                    Instruction::AssignValue { dest, value } => {
                        // Self-assigns would feed themselves forever.
                        if matches!(&*value, Reference::Location(l) if l == dest) {
                            continue;
                        }
                        changed |= self.substitute(value);
                        // Shared cells can change under other workers' feet.
                        if dest.affinity != Affinity::Shared {
                            self.values.set(dest.fq_name(), value.clone());
                        }
                    }
                    Instruction::AssignEval { eval, .. } => {
                        for slot in eval.propagatable_slots() {
                            changed |= self.substitute(slot);
                        }
                    }
                    other => {
                        if matches!(
                            other.tag(),
                            Tag::FnParam | Tag::ScopeOf | Tag::Typify | Tag::Lock | Tag::Unlock
                        ) {
                            continue;
                        }
                        for slot in other.propagatable_slots() {
                            changed |= self.substitute(slot);
                        }
                    }
                }
            }
        }

        if let Some(d) = cfg.out_edge(node, EdgeKind::Fall) {
            // FallEdge after a call: a pure callee could preserve these.
            self.values.reset();
            changed |= self.block_propagate(cfg, d, depth);
        } else if let Some(d) = cfg.out_edge(node, EdgeKind::Call) {
            self.values.push_tier();
            changed |= self.block_propagate(cfg, d, depth + 1);
        } else if let Some(d) = cfg.out_edge(node, EdgeKind::Return) {
            self.values.reset();
            changed |= self.block_propagate(cfg, d, depth - 1);
        }
        changed
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_isa::Location;

    fn prop_input() -> Instructions {
        vec![
            Instruction::AssignValue {
                dest: Location::local("a"),
                value: Reference::Number(5.0),
            },
            Instruction::AssignEval {
                dest: Location::local("b"),
                eval: Box::new(Instruction::Plus(
                    Reference::Location(Location::local("a")),
                    Reference::Location(Location::local("a")),
                )),
            },
        ]
    }

    #[test]
    fn constant_propagation_substitutes_both_operands() {
        let out = optimize(prop_input(), &OptimizeOptions::default());
        assert_eq!(out.len(), 2);
        match &out[1] {
            Instruction::AssignEval { eval, .. } => match eval.as_ref() {
                Instruction::Plus(a, b) => {
                    assert_eq!(*a, Reference::Number(5.0));
                    assert_eq!(*b, Reference::Number(5.0));
                }
                other => panic!("expected Plus, got {other:?}"),
            },
            other => panic!("expected AssignEval, got {other:?}"),
        }
    }

    #[test]
    fn constant_propagation_is_idempotent() {
        let once = optimize(prop_input(), &OptimizeOptions::default());
        let twice = optimize(once.clone(), &OptimizeOptions::default());
        assert_eq!(once, twice);
    }

    #[test]
    fn shared_destinations_are_not_recorded() {
        let instrs = vec![
            Instruction::AssignValue {
                dest: Location::shared("var_c_0"),
                value: Reference::Number(1.0),
            },
            Instruction::AssignEval {
                dest: Location::local("b"),
                eval: Box::new(Instruction::Plus(
                    Reference::Location(Location::shared("var_c_0")),
                    Reference::Number(1.0),
                )),
            },
        ];
        let out = optimize(instrs.clone(), &OptimizeOptions::default());
        assert_eq!(out, instrs, "shared loads must not be folded");
    }

    #[test]
    fn self_assigns_are_removed() {
        let instrs = vec![
            Instruction::AssignValue {
                dest: Location::local("x"),
                value: Reference::Location(Location::local("x")),
            },
            Instruction::AssignValue {
                dest: Location::local("y"),
                value: Reference::Number(2.0),
            },
        ];
        let out = optimize(instrs, &OptimizeOptions::default());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn disabled_passes_leave_stream_unchanged() {
        let instrs = vec![
            Instruction::AssignValue {
                dest: Location::local("x"),
                value: Reference::Location(Location::local("x")),
            },
            Instruction::AssignEval {
                dest: Location::local("b"),
                eval: Box::new(Instruction::Plus(
                    Reference::Location(Location::local("x")),
                    Reference::Number(1.0),
                )),
            },
        ];
        let out = optimize(
            instrs.clone(),
            &OptimizeOptions {
                remove_self_assign: false,
                const_prop: false,
            },
        );
        assert_eq!(out, instrs);
    }
}
