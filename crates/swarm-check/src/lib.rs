pub mod ctor_validation;
pub mod dead_code;
pub mod name_analysis;
pub mod scope;
pub mod type_analysis;

// Re-export commonly used entry points
pub use dead_code::{
    any_has_break, any_has_continue, any_has_return, has_break, has_continue, has_return,
    trim_dead_code,
};
pub use name_analysis::analyze as name_analysis;
pub use scope::{Diagnostics, SymbolTable};
pub use type_analysis::{analyze as type_analysis, free_variables};
