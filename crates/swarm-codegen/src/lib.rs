pub mod cfg;
pub mod error;
pub mod lower;

// Re-export commonly used entry points
pub use cfg::optimize::{optimize, optimize_graph, OptimizeOptions};
pub use cfg::ControlFlowGraph;
pub use error::CodegenError;
pub use lower::{lower, LowerOptions};
