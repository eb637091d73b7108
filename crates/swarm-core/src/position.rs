//! Source positions attached to AST nodes and carried through lowering.
//!
//! A [`Position`] is an immutable character range in an input file. Every AST
//! node carries one, and the lowering pass re-emits them as annotation
//! instructions so the VM can report runtime diagnostics against source
//! locations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A character range `(file, startLine, startCol, endLine, endCol)` in the
/// input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub file: String,
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl Position {
    pub fn new(
        file: impl Into<String>,
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
    ) -> Self {
        Position {
            file: file.into(),
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// A position spanning from the start of `start` to the end of `end`.
    /// Both must come from the same file.
    pub fn span(start: &Position, end: &Position) -> Self {
        debug_assert_eq!(start.file, end.file);
        Position {
            file: start.file.clone(),
            start_line: start.start_line,
            start_col: start.start_col,
            end_line: end.end_line,
            end_col: end.end_col,
        }
    }

    /// Placeholder position for symbols defined by the prologue standard
    /// library rather than user code.
    pub fn prologue(symbol_name: &str) -> Self {
        Position {
            file: format!("PROLOGUE:{symbol_name}"),
            start_line: 0,
            start_col: 0,
            end_line: 0,
            end_col: 0,
        }
    }

    /// Render just the start of the range, e.g. `[main.swarm: 3,14]`.
    pub fn start(&self) -> String {
        format!("[{}: {},{}]", self.file, self.start_line, self.start_col)
    }

    /// Render just the end of the range.
    pub fn end(&self) -> String {
        format!("[{}: {},{}]", self.file, self.end_line, self.end_col)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start(), self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_merges_endpoints() {
        let a = Position::new("t.swarm", 1, 2, 1, 9);
        let b = Position::new("t.swarm", 4, 1, 4, 12);
        let s = Position::span(&a, &b);
        assert_eq!(s.start_line, 1);
        assert_eq!(s.start_col, 2);
        assert_eq!(s.end_line, 4);
        assert_eq!(s.end_col, 12);
    }

    #[test]
    fn display_shows_both_endpoints() {
        let p = Position::new("t.swarm", 1, 2, 3, 4);
        assert_eq!(p.to_string(), "[t.swarm: 1,2]-[t.swarm: 3,4]");
    }

    #[test]
    fn serde_roundtrip() {
        let p = Position::new("t.swarm", 1, 2, 3, 4);
        let json = serde_json::to_string(&p).unwrap();
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
