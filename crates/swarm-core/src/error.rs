//! Compile-time error taxonomy.
//!
//! Every diagnostic carries the [`Position`] it was raised at. The analysis
//! walks accumulate these and keep going where safe, so a single run reports
//! as many independent problems as possible; the pipeline stage then fails
//! if any were collected.

use thiserror::Error;

use crate::position::Position;

/// A positional compile-time diagnostic.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("{pos} Parse error: {message}")]
    Parse { pos: Position, message: String },

    // -- name analysis --
    #[error("{pos} Use of free identifier \"{name}\"")]
    FreeIdentifier { pos: Position, name: String },

    #[error("{pos} Redeclaration of identifier \"{name}\" first declared at {first}")]
    Redeclaration {
        pos: Position,
        name: String,
        first: String,
    },

    #[error("{pos} Duplicate map key: \"{key}\"")]
    DuplicateMapKey { pos: Position, key: String },

    #[error("{pos} Attempted to create a shared variable {name} within type body")]
    SharedVariableInTypeBody { pos: Position, name: String },

    #[error("{pos} Duplicate superclass {name}")]
    DuplicateParent { pos: Position, name: String },

    #[error("{pos} {name} is not a parent constructor of the enclosing type")]
    InvalidParentConstructor { pos: Position, name: String },

    #[error("{pos} Duplicate constructor calls to parent type: {name}")]
    DuplicateParentConstructorCall { pos: Position, name: String },

    #[error("{pos} Attempt to assign nontrivial value to a type variable")]
    NontrivialTypeAssignment { pos: Position },

    #[error("{pos} {name} does not name a type")]
    NotAType { pos: Position, name: String },

    // -- type analysis --
    #[error("{pos} Attempted to assign value of type {actual} to lval of type {expected}")]
    AssignmentTypeMismatch {
        pos: Position,
        expected: String,
        actual: String,
    },

    #[error("{pos} Attempted to reassign variable of type Primitive<TYPE>")]
    TypeVariableReassignment { pos: Position },

    #[error("{pos} Attempted to call non-callable type {actual}")]
    CalleeNotCallable { pos: Position, actual: String },

    #[error("{pos} Invalid number of arguments for call (expected at most {expected}, found {actual})")]
    InvalidArity {
        pos: Position,
        expected: usize,
        actual: usize,
    },

    #[error("{pos} Invalid argument of type {actual} in position {index} (expected: {expected})")]
    InvalidArgument {
        pos: Position,
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("{pos} No {name} constructor matches the arguments: {signature}")]
    NoMatchingConstructor {
        pos: Position,
        name: String,
        signature: String,
    },

    #[error("{pos} Ambiguous constructor call: multiple {name} constructors match the arguments")]
    AmbiguousConstructor { pos: Position, name: String },

    #[error("{pos} Attempted to create object instance of non-object type {name}")]
    InvalidInstantiation { pos: Position, name: String },

    #[error("{pos} Invalid type {actual} of {side} operand to expression (expected: {expected})")]
    InvalidOperand {
        pos: Position,
        side: &'static str,
        expected: String,
        actual: String,
    },

    #[error("{pos} Invalid comparison between left-hand type {left} and right-hand type {right}")]
    InvalidComparison {
        pos: Position,
        left: String,
        right: String,
    },

    #[error("{pos} Invalid entry in enumerable at position {index}. Expected: {expected}; Found: {actual}")]
    EnumerableEntryMismatch {
        pos: Position,
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("{pos} Invalid entry in map at position {index}. Expected: {expected}; Found: {actual}")]
    MapEntryMismatch {
        pos: Position,
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("{pos} Attempted to enumerate invalid value of type {actual}")]
    InvalidEnumerationSource { pos: Position, actual: String },

    #[error("{pos} Expected a resource, found: {actual}")]
    InvalidResource { pos: Position, actual: String },

    #[error("{pos} Resource does not yield an opaque type")]
    InvalidResourceYield { pos: Position },

    #[error("{pos} Condition is not boolean: {actual}")]
    NonBooleanCondition { pos: Position, actual: String },

    #[error("{pos} Invalid return type. Expected: {expected}; Found: {actual}")]
    InvalidReturnType {
        pos: Position,
        expected: String,
        actual: String,
    },

    #[error("{pos} Attempt to access property {name} of non-object type {actual}")]
    InvalidPropertyAccess {
        pos: Position,
        name: String,
        actual: String,
    },

    #[error("{pos} {name} is not a member of type {ty}")]
    UnknownProperty {
        pos: Position,
        name: String,
        ty: String,
    },

    #[error("{pos} Invalid array access on type {actual}")]
    InvalidEnumerableAccess { pos: Position, actual: String },

    #[error("{pos} Invalid index type: {actual}")]
    InvalidIndexType { pos: Position, actual: String },

    #[error("{pos} Invalid map access on type {actual}")]
    InvalidMapAccess { pos: Position, actual: String },

    #[error("{pos} Unable to determine value of {{ {names} }} in type constructor")]
    UninitializedProperties { pos: Position, names: String },

    // -- syntax (placement) --
    #[error("{pos} Found return statement outside of a function")]
    ReturnOutsideFunction { pos: Position },

    #[error("{pos} Found continue statement outside of a while statement")]
    ContinueOutsideLoop { pos: Position },

    #[error("{pos} Found break statement outside of a while statement")]
    BreakOutsideLoop { pos: Position },
}

impl CompileError {
    pub fn pos(&self) -> &Position {
        match self {
            CompileError::Parse { pos, .. }
            | CompileError::FreeIdentifier { pos, .. }
            | CompileError::Redeclaration { pos, .. }
            | CompileError::DuplicateMapKey { pos, .. }
            | CompileError::SharedVariableInTypeBody { pos, .. }
            | CompileError::DuplicateParent { pos, .. }
            | CompileError::InvalidParentConstructor { pos, .. }
            | CompileError::DuplicateParentConstructorCall { pos, .. }
            | CompileError::NontrivialTypeAssignment { pos }
            | CompileError::NotAType { pos, .. }
            | CompileError::AssignmentTypeMismatch { pos, .. }
            | CompileError::TypeVariableReassignment { pos }
            | CompileError::CalleeNotCallable { pos, .. }
            | CompileError::InvalidArity { pos, .. }
            | CompileError::InvalidArgument { pos, .. }
            | CompileError::NoMatchingConstructor { pos, .. }
            | CompileError::AmbiguousConstructor { pos, .. }
            | CompileError::InvalidInstantiation { pos, .. }
            | CompileError::InvalidOperand { pos, .. }
            | CompileError::InvalidComparison { pos, .. }
            | CompileError::EnumerableEntryMismatch { pos, .. }
            | CompileError::MapEntryMismatch { pos, .. }
            | CompileError::InvalidEnumerationSource { pos, .. }
            | CompileError::InvalidResource { pos, .. }
            | CompileError::InvalidResourceYield { pos }
            | CompileError::NonBooleanCondition { pos, .. }
            | CompileError::InvalidReturnType { pos, .. }
            | CompileError::InvalidPropertyAccess { pos, .. }
            | CompileError::UnknownProperty { pos, .. }
            | CompileError::InvalidEnumerableAccess { pos, .. }
            | CompileError::InvalidIndexType { pos, .. }
            | CompileError::InvalidMapAccess { pos, .. }
            | CompileError::UninitializedProperties { pos, .. }
            | CompileError::ReturnOutsideFunction { pos }
            | CompileError::ContinueOutsideLoop { pos }
            | CompileError::BreakOutsideLoop { pos } => pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_with_positions() {
        let e = CompileError::FreeIdentifier {
            pos: Position::new("t.swarm", 3, 7, 3, 9),
            name: "zig".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("t.swarm"));
        assert!(msg.contains("zig"));
        assert_eq!(e.pos().start_line, 3);
    }
}
