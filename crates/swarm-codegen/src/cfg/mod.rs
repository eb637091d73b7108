//! Control-flow graph over the linear instruction stream.
//!
//! A linear scan opens a basic block per `BeginFunction` region and closes
//! it at the matching `Return`. Every call-like instruction
//! (`Call*`/`CallIf*`/`CallElse*`/`With`/`While`/`Enumerate`) ends the
//! current block, creates a `POSTCALL:<name>` successor, and wires edges:
//! known targets have their whole region *cloned* (with a fresh copy index)
//! and connected with a call edge in and a return edge out; unknown targets
//! get an ambiguous-function placeholder block. Conditional calls add a
//! fall edge that bypasses the callee.
//!
//! `reconstruct` linearizes the graph back into an instruction stream,
//! walking fall/return/call edges with a function-depth counter so cloned
//! callees are traversed but not re-emitted.

pub mod optimize;

use std::collections::HashMap;

use indexmap::IndexMap;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tracing::debug;

use swarm_isa::text::write_instruction;
use swarm_isa::{Instruction, Instructions, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Block,
    Function,
    AmbiguousFunction,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: String,
    pub kind: BlockKind,
    /// How many times this block has been cloned from its original.
    pub copy: usize,
    /// Index of the instruction that created the block.
    pub idx: usize,
    pub instructions: Instructions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Call,
    Fall,
    Return,
}

impl EdgeKind {
    fn label(self) -> &'static str {
        match self {
            EdgeKind::Call => "call",
            EdgeKind::Fall => "fall",
            EdgeKind::Return => "return",
        }
    }
}

/// A function region: its entry block, its closing block, and every block
/// that belongs to it (nested postcalls, ambiguous placeholders, and callee
/// clones included).
#[derive(Debug)]
struct CfgFunction {
    start: NodeIndex,
    end: Option<NodeIndex>,
    blocks: Vec<NodeIndex>,
}

pub struct ControlFlowGraph {
    graph: StableDiGraph<Block, EdgeKind>,
    first: NodeIndex,
    functions: IndexMap<String, CfgFunction>,
}

impl ControlFlowGraph {
    /// Build the graph from a linear instruction stream.
    pub fn build(instrs: Instructions) -> ControlFlowGraph {
        let mut graph: StableDiGraph<Block, EdgeKind> = StableDiGraph::new();
        let mut functions: IndexMap<String, CfgFunction> = IndexMap::new();

        let first = graph.add_node(Block {
            id: "Top".into(),
            kind: BlockKind::Block,
            copy: 0,
            idx: 0,
            instructions: Vec::new(),
        });
        let mut bstack: Vec<NodeIndex> = vec![first];
        let mut call_stack: Vec<String> = Vec::new();

        for (i, instr) in instrs.into_iter().enumerate() {
            match instr.tag() {
                Tag::BeginFn => {
                    let name = match &instr {
                        Instruction::BeginFunction { func, .. } => func.fq_name(),
                        _ => unreachable!("tag/variant mismatch"),
                    };
                    let node = graph.add_node(Block {
                        id: name.clone(),
                        kind: BlockKind::Function,
                        copy: 0,
                        idx: i,
                        instructions: vec![instr],
                    });
                    debug!("created function {name}");
                    bstack.push(node);
                    functions.insert(
                        name.clone(),
                        CfgFunction {
                            start: node,
                            end: None,
                            blocks: vec![node],
                        },
                    );
                    call_stack.push(name);
                }
                Tag::Return0 | Tag::Return1 => {
                    let top = *bstack.last().expect("block stack is never empty");
                    graph[top].instructions.push(instr);
                    if let Some(fname) = call_stack.pop() {
                        if let Some(f) = functions.get_mut(&fname) {
                            f.end = Some(top);
                        }
                        while graph[*bstack.last().expect("function block below")].kind
                            != BlockKind::Function
                        {
                            bstack.pop();
                        }
                        bstack.pop();
                    }
                }
                _ => {
                    let target = call_target(&instr);
                    let top = *bstack.last().expect("block stack is never empty");
                    graph[top].instructions.push(instr);

                    let Some((name, conditional)) = target else {
                        continue;
                    };

                    let postcall = graph.add_node(Block {
                        id: format!("POSTCALL:{name}"),
                        kind: BlockKind::Block,
                        copy: 0,
                        idx: i,
                        instructions: Vec::new(),
                    });
                    bstack.push(postcall);
                    if let Some(f) = call_stack.last() {
                        functions
                            .get_mut(f)
                            .expect("call stack entries are registered")
                            .blocks
                            .push(postcall);
                    }

                    // A target that is unknown -- or whose region has not
                    // closed yet (direct recursion) -- stays ambiguous.
                    let cloneable = functions
                        .get(&name)
                        .map(|f| f.end.is_some())
                        .unwrap_or(false);
                    if !cloneable {
                        let amb = graph.add_node(Block {
                            id: name.clone(),
                            kind: BlockKind::AmbiguousFunction,
                            copy: 0,
                            idx: i,
                            instructions: Vec::new(),
                        });
                        debug!("created ambiguous function {name}");
                        graph.add_edge(top, amb, EdgeKind::Call);
                        graph.add_edge(amb, postcall, EdgeKind::Return);
                        if let Some(f) = call_stack.last() {
                            functions
                                .get_mut(f)
                                .expect("call stack entries are registered")
                                .blocks
                                .push(amb);
                        }
                    } else {
                        let (start, end) = make_copy(
                            &mut graph,
                            &mut functions,
                            &name,
                            i,
                            call_stack.last().cloned(),
                        );
                        debug!("copied function {name}");
                        graph.add_edge(top, start, EdgeKind::Call);
                        graph.add_edge(end, postcall, EdgeKind::Return);
                    }

                    if conditional {
                        graph.add_edge(top, postcall, EdgeKind::Fall);
                    }
                }
            }
        }

        ControlFlowGraph {
            graph,
            first,
            functions,
        }
    }

    pub fn first(&self) -> NodeIndex {
        self.first
    }

    pub fn block(&self, node: NodeIndex) -> &Block {
        &self.graph[node]
    }

    pub fn block_mut(&mut self, node: NodeIndex) -> &mut Block {
        &mut self.graph[node]
    }

    pub fn block_indices(&self) -> Vec<NodeIndex> {
        self.graph.node_indices().collect()
    }

    /// Entry blocks of the registered function regions, in definition order.
    pub fn function_starts(&self) -> Vec<NodeIndex> {
        self.functions.values().map(|f| f.start).collect()
    }

    pub fn out_edge(&self, node: NodeIndex, kind: EdgeKind) -> Option<NodeIndex> {
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .find(|e| *e.weight() == kind)
            .map(|e| e.target())
    }

    /// Linearize back into an instruction stream: function regions in
    /// definition order, then the top-level region.
    pub fn reconstruct(&self) -> Instructions {
        let mut out = Vec::new();
        for f in self.functions.values() {
            self.reconstruct_from(f.start, 0, &mut out);
        }
        self.reconstruct_from(self.first, 0, &mut out);
        out
    }

    fn reconstruct_from(&self, node: NodeIndex, depth: isize, out: &mut Instructions) {
        if depth == 0 {
            out.extend(self.graph[node].instructions.iter().cloned());
        }
        if let Some(d) = self.out_edge(node, EdgeKind::Fall) {
            self.reconstruct_from(d, depth, out);
        } else if let Some(d) = self.out_edge(node, EdgeKind::Return) {
            self.reconstruct_from(d, depth - 1, out);
        } else if let Some(d) = self.out_edge(node, EdgeKind::Call) {
            self.reconstruct_from(d, depth + 1, out);
        }
    }

    /// Emit the graph in DOT form.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph cfg {\n");
        for idx in self.graph.node_indices() {
            let b = &self.graph[idx];
            let nid = format!("{}:{}:{}", b.id, b.copy, b.idx);
            if b.kind == BlockKind::AmbiguousFunction {
                out.push_str(&format!(
                    "\t\"{nid}\" [shape=rectangle,label=\"AmbiguousFunction:{nid}\"]\n"
                ));
            } else {
                let mut label = format!("{nid}\\n");
                for i in &b.instructions {
                    let line = write_instruction(i)
                        .unwrap_or_else(|_| i.tag().mnemonic().to_string());
                    label.push_str(&line.replace('"', "\\\""));
                    label.push_str("\\n");
                }
                out.push_str(&format!("\t\"{nid}\" [shape=rectangle,label=\"{label}\"]\n"));
            }
            for e in self.graph.edges_directed(idx, Direction::Outgoing) {
                let d = &self.graph[e.target()];
                let did = format!("{}:{}:{}", d.id, d.copy, d.idx);
                out.push_str(&format!(
                    "\t\"{nid}\"->\"{did}\" [label=\"{}\"]\n",
                    e.weight().label()
                ));
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Clone a function region, returning the clone's (start, end). The clone's
/// blocks are registered with the enclosing function, if any.
fn make_copy(
    graph: &mut StableDiGraph<Block, EdgeKind>,
    functions: &mut IndexMap<String, CfgFunction>,
    name: &str,
    idx: usize,
    enclosing: Option<String>,
) -> (NodeIndex, NodeIndex) {
    let (orig_blocks, orig_start, orig_end) = {
        let f = &functions[name];
        (
            f.blocks.clone(),
            f.start,
            f.end.expect("only closed regions are cloned"),
        )
    };

    let mut copy_of: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut new_nodes = Vec::new();
    for &b in &orig_blocks {
        let mut blk = graph[b].clone();
        blk.copy += 1;
        blk.idx = idx;
        let nb = graph.add_node(blk);
        copy_of.insert(b, nb);
        new_nodes.push(nb);
    }

    for &b in &orig_blocks {
        for kind in [EdgeKind::Call, EdgeKind::Fall, EdgeKind::Return] {
            // The end block's call-out belongs to the caller's context.
            if kind == EdgeKind::Call && b == orig_end {
                continue;
            }
            let dest = graph
                .edges_directed(b, Direction::Outgoing)
                .find(|e| *e.weight() == kind)
                .map(|e| e.target());
            if let Some(dest) = dest {
                if let (Some(&nb), Some(&nd)) = (copy_of.get(&b), copy_of.get(&dest)) {
                    graph.add_edge(nb, nd, kind);
                }
            }
        }
    }

    if let Some(encl) = enclosing {
        if let Some(f) = functions.get_mut(&encl) {
            f.blocks.extend(new_nodes);
        }
    }
    (copy_of[&orig_start], copy_of[&orig_end])
}

/// The call-like target of an instruction: `(function fq-name, conditional)`.
fn call_target(instr: &Instruction) -> Option<(String, bool)> {
    let effective = match instr {
        Instruction::AssignEval { eval, .. } => eval.as_ref(),
        other => other,
    };
    let (func, conditional) = match effective {
        Instruction::Call0(f) => (f, false),
        Instruction::Call1(f, _) => (f, false),
        Instruction::CallIf0(_, f) => (f, true),
        Instruction::CallIf1(_, f, _) => (f, true),
        Instruction::CallElse0(_, f) => (f, true),
        Instruction::CallElse1(_, f, _) => (f, true),
        Instruction::While(_, body) => (body, false),
        Instruction::With(_, body) => (body, false),
        Instruction::Enumerate(_, _, body) => (body, false),
        _ => return None,
    };
    func.as_location().map(|l| (l.fq_name(), conditional))
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_isa::{Affinity, Location, Reference};

    fn simple_region() -> Instructions {
        use swarm_core::types::Type;
        vec![
            Instruction::BeginFunction {
                func: Location::function("IFBODY_0"),
                return_type: Reference::Type(Type::void()),
            },
            Instruction::AssignValue {
                dest: Location::local("x"),
                value: Reference::Number(1.0),
            },
            Instruction::Return0,
            Instruction::AssignValue {
                dest: Location::local("c"),
                value: Reference::Boolean(true),
            },
            Instruction::CallIf0(
                Reference::location(Affinity::Local, "c"),
                Reference::location(Affinity::Function, "IFBODY_0"),
            ),
            Instruction::AssignValue {
                dest: Location::local("y"),
                value: Reference::Number(2.0),
            },
        ]
    }

    #[test]
    fn conditional_call_gets_call_fall_and_return_edges() {
        let cfg = ControlFlowGraph::build(simple_region());
        // Top block holds everything up to the CallIf0.
        let top = cfg.first();
        assert!(cfg.out_edge(top, EdgeKind::Call).is_some());
        assert!(cfg.out_edge(top, EdgeKind::Fall).is_some());

        let clone_start = cfg.out_edge(top, EdgeKind::Call).unwrap();
        assert_eq!(cfg.block(clone_start).copy, 1);
        assert_eq!(cfg.block(clone_start).id, "f:IFBODY_0");
    }

    #[test]
    fn reconstruct_restores_the_stream() {
        let instrs = simple_region();
        let cfg = ControlFlowGraph::build(instrs.clone());
        assert_eq!(cfg.reconstruct(), instrs);
    }

    #[test]
    fn unknown_target_becomes_ambiguous_block(){
        let instrs = vec![Instruction::Call0(Reference::location(
            Affinity::Function,
            "NTH_ROOT",
        ))];
        let cfg = ControlFlowGraph::build(instrs.clone());
        let top = cfg.first();
        let amb = cfg.out_edge(top, EdgeKind::Call).unwrap();
        assert_eq!(cfg.block(amb).kind, BlockKind::AmbiguousFunction);
        assert_eq!(cfg.reconstruct(), instrs);
    }

    #[test]
    fn dot_output_has_digraph_wrapper() {
        let cfg = ControlFlowGraph::build(simple_region());
        let dot = cfg.to_dot();
        assert!(dot.starts_with("digraph cfg {"));
        assert!(dot.contains("label=\"call\""));
        assert!(dot.contains("label=\"fall\""));
        assert!(dot.contains("label=\"return\""));
        assert!(dot.ends_with("}\n"));
    }
}
