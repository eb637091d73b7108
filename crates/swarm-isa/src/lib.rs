pub mod binary;
pub mod error;
pub mod instruction;
pub mod reference;
pub mod text;

// Re-export commonly used types
pub use binary::{decode_program, encode_program, PlainResolver, ReferenceResolver};
pub use error::IsaError;
pub use instruction::{Instruction, Instructions, Tag};
pub use reference::{
    Affinity, EnumerationValue, FunctionReference, Location, MappingValue, ObjectValue, Reference,
    ResourceValue, StreamReference,
};
pub use text::{parse_program, write_program};
