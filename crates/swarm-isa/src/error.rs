//! Errors raised by the ISA codecs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IsaError {
    #[error("unknown instruction tag: {0}")]
    UnknownTag(u16),

    #[error("unknown instruction mnemonic: {0}")]
    UnknownMnemonic(String),

    #[error("bad operand for {mnemonic}: {detail}")]
    BadOperand {
        mnemonic: &'static str,
        detail: String,
    },

    #[error("ASSIGNEVAL without a nested instruction")]
    MissingNestedInstruction,

    #[error("line {line}: {detail}")]
    TextParse { line: usize, detail: String },

    #[error("invalid type encoding at byte {at}: {detail}")]
    TypeCodec { at: usize, detail: String },

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unknown reference kind: {0}")]
    UnknownReferenceKind(u8),

    #[error("unknown affinity byte: {0}")]
    UnknownAffinity(u8),

    #[error("invalid utf-8 in serialized string")]
    InvalidUtf8,

    #[error("reference is not serializable: {0}")]
    UnserializableReference(String),

    #[error("unresolvable function reference: {0}")]
    UnresolvedFunction(String),

    #[error("unresolvable stream reference: {0}")]
    UnresolvedStream(String),
}
