pub mod ast;
pub mod error;
pub mod position;
pub mod symbol;
pub mod types;

// Re-export commonly used types
pub use error::CompileError;
pub use position::Position;
pub use symbol::{
    ConstructorSig, ObjectTypeValue, SemanticSymbol, SymbolArena, SymbolId, SymbolKind, TypeValue,
};
pub use types::{ObjectType, ObjectTypeBuilder, Primitive, Type};
