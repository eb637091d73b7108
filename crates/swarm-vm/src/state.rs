//! Loaded program state.
//!
//! Loading extracts `PositionAnnotation` instructions into a pc → position
//! side-table and indexes function regions: `fjumps` maps a region name to
//! its `BeginFunction` pc, `fskips` to the pc just past its `Return`, so the
//! linear executor can jump over unexecuted regions.

use std::collections::HashMap;
use std::sync::Arc;

use swarm_core::types::Type;
use swarm_isa::{Instruction, Instructions, Tag};

use crate::error::VmError;

/// A source position recorded for a pc.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePosition {
    pub file: String,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone)]
pub struct State {
    instructions: Arc<Instructions>,
    fjumps: Arc<HashMap<String, usize>>,
    fskips: Arc<HashMap<String, usize>>,
    positions: Arc<HashMap<usize, SourcePosition>>,
}

impl State {
    /// Strip annotations, build the position side-table, and index function
    /// regions. Duplicate region names and unmatched returns are load
    /// errors.
    pub fn load(raw: Instructions) -> Result<State, VmError> {
        let mut instructions = Vec::with_capacity(raw.len());
        let mut positions = HashMap::new();
        for instr in raw {
            match instr {
                Instruction::PositionAnnotation { file, line, col } => {
                    // Annotations describe the next real instruction.
                    positions.insert(instructions.len(), SourcePosition { file, line, col });
                }
                other => instructions.push(other),
            }
        }

        let mut fjumps = HashMap::new();
        let mut fskips = HashMap::new();
        let mut nesting: Vec<String> = Vec::new();
        for (pc, instr) in instructions.iter().enumerate() {
            match instr.tag() {
                Tag::BeginFn => {
                    let Instruction::BeginFunction { func, .. } = instr else {
                        unreachable!("tag/variant mismatch");
                    };
                    if fjumps.contains_key(&func.name) {
                        return Err(VmError::Internal(format!(
                            "duplicate function region identifier: {} (inline function names must be unique)",
                            func.name
                        )));
                    }
                    fjumps.insert(func.name.clone(), pc);
                    nesting.push(func.name.clone());
                }
                Tag::Return0 | Tag::Return1 => match nesting.pop() {
                    Some(name) => {
                        fskips.insert(name, pc + 1);
                    }
                    None => {
                        return Err(VmError::Internal(format!(
                            "return detected outside function scope (pc: {pc})"
                        )))
                    }
                },
                _ => {}
            }
        }

        Ok(State {
            instructions: Arc::new(instructions),
            fjumps: Arc::new(fjumps),
            fskips: Arc::new(fskips),
            positions: Arc::new(positions),
        })
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instruction(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    pub fn position_of(&self, pc: usize) -> Option<&SourcePosition> {
        self.positions.get(&pc)
    }

    /// The `BeginFunction` pc of a named inline function.
    pub fn function_pc(&self, name: &str) -> Option<usize> {
        self.fjumps.get(name).copied()
    }

    /// The pc just past a region's return.
    pub fn skip_pc(&self, name: &str) -> Option<usize> {
        self.fskips.get(name).copied()
    }

    /// The parameter run immediately following a region header:
    /// `(type, location)` pairs.
    pub fn function_params(&self, begin_pc: usize) -> Vec<(Type, swarm_isa::Location)> {
        let mut out = Vec::new();
        let mut pc = begin_pc + 1;
        while let Some(Instruction::FunctionParam { ty, loc }) = self.instructions.get(pc) {
            let t = ty.as_type().unwrap_or_else(Type::error);
            out.push((t, loc.clone()));
            pc += 1;
        }
        out
    }

    /// The declared return type of a region.
    pub fn function_return_type(&self, begin_pc: usize) -> Type {
        match self.instructions.get(begin_pc) {
            Some(Instruction::BeginFunction { return_type, .. }) => {
                return_type.as_type().unwrap_or_else(Type::error)
            }
            _ => Type::error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_isa::{Location, Reference};

    fn program() -> Instructions {
        vec![
            Instruction::PositionAnnotation {
                file: "t.swarm".into(),
                line: 1,
                col: 1,
            },
            Instruction::BeginFunction {
                func: Location::function("FUNC_0"),
                return_type: Reference::Type(Type::number()),
            },
            Instruction::FunctionParam {
                ty: Reference::Type(Type::number()),
                loc: Location::local("var_a_0"),
            },
            Instruction::Return1(Reference::Location(Location::local("retVal"))),
            Instruction::AssignValue {
                dest: Location::local("x"),
                value: Reference::Number(1.0),
            },
        ]
    }

    #[test]
    fn load_strips_annotations_and_indexes_regions() {
        let state = State::load(program()).unwrap();
        assert_eq!(state.len(), 4);
        assert_eq!(state.function_pc("FUNC_0"), Some(0));
        assert_eq!(state.skip_pc("FUNC_0"), Some(3));
        assert_eq!(state.position_of(0).unwrap().line, 1);

        let params = state.function_params(0);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].0, Type::number());
        assert_eq!(state.function_return_type(0), Type::number());
    }

    #[test]
    fn duplicate_region_names_are_rejected() {
        let instrs = vec![
            Instruction::BeginFunction {
                func: Location::function("F"),
                return_type: Reference::Type(Type::void()),
            },
            Instruction::Return0,
            Instruction::BeginFunction {
                func: Location::function("F"),
                return_type: Reference::Type(Type::void()),
            },
            Instruction::Return0,
        ];
        assert!(State::load(instrs).is_err());
    }

    #[test]
    fn stray_return_is_rejected() {
        assert!(State::load(vec![Instruction::Return0]).is_err());
    }
}
