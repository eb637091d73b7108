//! The ISA instruction set.
//!
//! Each instruction is a tagged variant with a fixed operand shape. The
//! [`Tag`] enum carries the stable `u16` discriminants used by the binary
//! form; [`Instruction::operands`] and [`Instruction::from_parts`] give the
//! serializers a uniform `{tag, operands[]}` view so the textual and binary
//! codecs share one shape definition.
//!
//! `AssignEval` nests the evaluated instruction; serializers flatten it by
//! emitting the destination followed by the inner instruction.

use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::error::IsaError;
use crate::reference::{Location, Reference};

/// Stable instruction tags (binary form uses these as `u16`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, Serialize, Deserialize)]
#[repr(u16)]
pub enum Tag {
    Position = 0,
    BeginFn = 1,
    FnParam = 2,
    Return0 = 3,
    Return1 = 4,
    AssignValue = 5,
    AssignEval = 6,
    ScopeOf = 7,
    Typify = 8,
    Lock = 9,
    Unlock = 10,
    Plus = 11,
    Minus = 12,
    Times = 13,
    Divide = 14,
    Power = 15,
    Mod = 16,
    Neg = 17,
    Gt = 18,
    Gte = 19,
    Lt = 20,
    Lte = 21,
    And = 22,
    Or = 23,
    Not = 24,
    IsEqual = 25,
    StrConcat = 26,
    MapInit = 27,
    MapSet = 28,
    MapGet = 29,
    EnumInit = 30,
    EnumAppend = 31,
    EnumGet = 32,
    EnumSet = 33,
    EnumConcat = 34,
    Curry = 35,
    Call0 = 36,
    Call1 = 37,
    CallIf0 = 38,
    CallIf1 = 39,
    CallElse0 = 40,
    CallElse1 = 41,
    PushCall0 = 42,
    PushCall1 = 43,
    While = 44,
    Enumerate = 45,
    With = 46,
    EnterContext = 47,
    PopContext = 48,
    ResumeContext = 49,
    Drain = 50,
    RetMapGet = 51,
    ObjInit = 52,
    ObjSet = 53,
    ObjGet = 54,
    ObjInstance = 55,
    OTypeInit = 56,
    OTypeProp = 57,
    OTypeFinalize = 58,
    StreamPush = 59,
    StreamPop = 60,
}

impl Tag {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Tag::Position => "POSITION",
            Tag::BeginFn => "BEGINFN",
            Tag::FnParam => "FNPARAM",
            Tag::Return0 => "RETURN0",
            Tag::Return1 => "RETURN1",
            Tag::AssignValue => "ASSIGNVALUE",
            Tag::AssignEval => "ASSIGNEVAL",
            Tag::ScopeOf => "SCOPEOF",
            Tag::Typify => "TYPIFY",
            Tag::Lock => "LOCK",
            Tag::Unlock => "UNLOCK",
            Tag::Plus => "PLUS",
            Tag::Minus => "MINUS",
            Tag::Times => "TIMES",
            Tag::Divide => "DIVIDE",
            Tag::Power => "POWER",
            Tag::Mod => "MOD",
            Tag::Neg => "NEG",
            Tag::Gt => "GT",
            Tag::Gte => "GTE",
            Tag::Lt => "LT",
            Tag::Lte => "LTE",
            Tag::And => "AND",
            Tag::Or => "OR",
            Tag::Not => "NOT",
            Tag::IsEqual => "ISEQUAL",
            Tag::StrConcat => "STRCONCAT",
            Tag::MapInit => "MAPINIT",
            Tag::MapSet => "MAPSET",
            Tag::MapGet => "MAPGET",
            Tag::EnumInit => "ENUMINIT",
            Tag::EnumAppend => "ENUMAPPEND",
            Tag::EnumGet => "ENUMGET",
            Tag::EnumSet => "ENUMSET",
            Tag::EnumConcat => "ENUMCONCAT",
            Tag::Curry => "CURRY",
            Tag::Call0 => "CALL0",
            Tag::Call1 => "CALL1",
            Tag::CallIf0 => "CALLIF0",
            Tag::CallIf1 => "CALLIF1",
            Tag::CallElse0 => "CALLELSE0",
            Tag::CallElse1 => "CALLELSE1",
            Tag::PushCall0 => "PUSHCALL0",
            Tag::PushCall1 => "PUSHCALL1",
            Tag::While => "WHILE",
            Tag::Enumerate => "ENUMERATE",
            Tag::With => "WITH",
            Tag::EnterContext => "ENTERCONTEXT",
            Tag::PopContext => "POPCONTEXT",
            Tag::ResumeContext => "RESUMECONTEXT",
            Tag::Drain => "DRAIN",
            Tag::RetMapGet => "RETMAPGET",
            Tag::ObjInit => "OBJINIT",
            Tag::ObjSet => "OBJSET",
            Tag::ObjGet => "OBJGET",
            Tag::ObjInstance => "OBJINSTANCE",
            Tag::OTypeInit => "OTYPEINIT",
            Tag::OTypeProp => "OTYPEPROP",
            Tag::OTypeFinalize => "OTYPEFINALIZE",
            Tag::StreamPush => "STREAMPUSH",
            Tag::StreamPop => "STREAMPOP",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Tag> {
        // Probe the full tag range; TryFromPrimitive makes this total.
        (0u16..=60)
            .filter_map(|v| Tag::try_from(v).ok())
            .find(|t| t.mnemonic() == s)
    }
}

/// A single ISA instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Debug-build source annotation, stripped into a side-table at load.
    PositionAnnotation {
        file: String,
        line: usize,
        col: usize,
    },

    // -- function regions --
    BeginFunction {
        func: Location,
        return_type: Reference,
    },
    FunctionParam {
        ty: Reference,
        loc: Location,
    },
    Return0,
    Return1(Reference),

    // -- assignment --
    AssignValue {
        dest: Location,
        value: Reference,
    },
    AssignEval {
        dest: Location,
        eval: Box<Instruction>,
    },

    // -- scoping / typing / locks --
    ScopeOf(Location),
    Typify {
        loc: Location,
        ty: Reference,
    },
    Lock(Location),
    Unlock(Location),

    // -- arithmetic --
    Plus(Reference, Reference),
    Minus(Reference, Reference),
    Times(Reference, Reference),
    Divide(Reference, Reference),
    Power(Reference, Reference),
    Mod(Reference, Reference),
    Negative(Reference),

    // -- comparison --
    GreaterThan(Reference, Reference),
    GreaterThanOrEqual(Reference, Reference),
    LessThan(Reference, Reference),
    LessThanOrEqual(Reference, Reference),

    // -- logic --
    And(Reference, Reference),
    Or(Reference, Reference),
    Not(Reference),
    IsEqual(Reference, Reference),

    // -- strings --
    StringConcat(Reference, Reference),

    // -- containers --
    MapInit(Reference),
    /// `MapSet(key, value, map)`
    MapSet(Reference, Reference, Reference),
    /// `MapGet(key, map)`
    MapGet(Reference, Reference),
    EnumInit(Reference),
    /// `EnumAppend(value, enum)`
    EnumAppend(Reference, Reference),
    /// `EnumGet(enum, index)`
    EnumGet(Reference, Reference),
    /// `EnumSet(enum, index, value)`
    EnumSet(Reference, Reference, Reference),
    EnumConcat(Reference, Reference),

    // -- calls --
    Curry(Reference, Reference),
    Call0(Reference),
    Call1(Reference, Reference),
    /// `CallIf0(condition, function)`
    CallIf0(Reference, Reference),
    CallIf1(Reference, Reference, Reference),
    /// `CallElse0(condition, function)`
    CallElse0(Reference, Reference),
    CallElse1(Reference, Reference, Reference),
    PushCall0(Reference),
    PushCall1(Reference, Reference),

    // -- loops / resources --
    /// `While(conditionFn, bodyFn)`
    While(Reference, Reference),
    /// `Enumerate(elemType, enumerable, bodyFn)`
    Enumerate(Reference, Reference, Reference),
    /// `With(resource, bodyFn)`
    With(Reference, Reference),

    // -- concurrency --
    EnterContext,
    PopContext,
    ResumeContext(Reference),
    Drain,
    /// `RetMapGet(returnMap, jobId)`
    RetMapGet(Reference, Reference),

    // -- objects --
    ObjInit(Reference),
    /// `ObjSet(object, property, value)`
    ObjSet(Reference, Reference, Reference),
    /// `ObjGet(object, property)`
    ObjGet(Reference, Reference),
    ObjInstance(Reference),
    OTypeInit,
    /// `OTypeProp(prototype, property, type)`
    OTypeProp(Reference, Reference, Reference),
    OTypeFinalize(Reference),

    // -- streams --
    StreamPush(Reference, Reference),
    StreamPop(Reference),
}

pub type Instructions = Vec<Instruction>;

impl Instruction {
    pub fn tag(&self) -> Tag {
        match self {
            Instruction::PositionAnnotation { .. } => Tag::Position,
            Instruction::BeginFunction { .. } => Tag::BeginFn,
            Instruction::FunctionParam { .. } => Tag::FnParam,
            Instruction::Return0 => Tag::Return0,
            Instruction::Return1(_) => Tag::Return1,
            Instruction::AssignValue { .. } => Tag::AssignValue,
            Instruction::AssignEval { .. } => Tag::AssignEval,
            Instruction::ScopeOf(_) => Tag::ScopeOf,
            Instruction::Typify { .. } => Tag::Typify,
            Instruction::Lock(_) => Tag::Lock,
            Instruction::Unlock(_) => Tag::Unlock,
            Instruction::Plus(..) => Tag::Plus,
            Instruction::Minus(..) => Tag::Minus,
            Instruction::Times(..) => Tag::Times,
            Instruction::Divide(..) => Tag::Divide,
            Instruction::Power(..) => Tag::Power,
            Instruction::Mod(..) => Tag::Mod,
            Instruction::Negative(_) => Tag::Neg,
            Instruction::GreaterThan(..) => Tag::Gt,
            Instruction::GreaterThanOrEqual(..) => Tag::Gte,
            Instruction::LessThan(..) => Tag::Lt,
            Instruction::LessThanOrEqual(..) => Tag::Lte,
            Instruction::And(..) => Tag::And,
            Instruction::Or(..) => Tag::Or,
            Instruction::Not(_) => Tag::Not,
            Instruction::IsEqual(..) => Tag::IsEqual,
            Instruction::StringConcat(..) => Tag::StrConcat,
            Instruction::MapInit(_) => Tag::MapInit,
            Instruction::MapSet(..) => Tag::MapSet,
            Instruction::MapGet(..) => Tag::MapGet,
            Instruction::EnumInit(_) => Tag::EnumInit,
            Instruction::EnumAppend(..) => Tag::EnumAppend,
            Instruction::EnumGet(..) => Tag::EnumGet,
            Instruction::EnumSet(..) => Tag::EnumSet,
            Instruction::EnumConcat(..) => Tag::EnumConcat,
            Instruction::Curry(..) => Tag::Curry,
            Instruction::Call0(_) => Tag::Call0,
            Instruction::Call1(..) => Tag::Call1,
            Instruction::CallIf0(..) => Tag::CallIf0,
            Instruction::CallIf1(..) => Tag::CallIf1,
            Instruction::CallElse0(..) => Tag::CallElse0,
            Instruction::CallElse1(..) => Tag::CallElse1,
            Instruction::PushCall0(_) => Tag::PushCall0,
            Instruction::PushCall1(..) => Tag::PushCall1,
            Instruction::While(..) => Tag::While,
            Instruction::Enumerate(..) => Tag::Enumerate,
            Instruction::With(..) => Tag::With,
            Instruction::EnterContext => Tag::EnterContext,
            Instruction::PopContext => Tag::PopContext,
            Instruction::ResumeContext(_) => Tag::ResumeContext,
            Instruction::Drain => Tag::Drain,
            Instruction::RetMapGet(..) => Tag::RetMapGet,
            Instruction::ObjInit(_) => Tag::ObjInit,
            Instruction::ObjSet(..) => Tag::ObjSet,
            Instruction::ObjGet(..) => Tag::ObjGet,
            Instruction::ObjInstance(_) => Tag::ObjInstance,
            Instruction::OTypeInit => Tag::OTypeInit,
            Instruction::OTypeProp(..) => Tag::OTypeProp,
            Instruction::OTypeFinalize(_) => Tag::OTypeFinalize,
            Instruction::StreamPush(..) => Tag::StreamPush,
            Instruction::StreamPop(_) => Tag::StreamPop,
        }
    }

    /// The destination location when this is an assignment.
    pub fn assign_dest(&self) -> Option<&Location> {
        match self {
            Instruction::AssignValue { dest, .. } | Instruction::AssignEval { dest, .. } => {
                Some(dest)
            }
            _ => None,
        }
    }

    /// Owned `{tag, operands[]}` view for the serializers. `AssignEval`
    /// reports only its destination; the nested instruction is emitted
    /// separately (see the text/binary modules).
    pub fn operands(&self) -> SmallVec<[Reference; 3]> {
        use Instruction::*;
        match self {
            PositionAnnotation { file, line, col } => smallvec![
                Reference::String(file.clone()),
                Reference::Number(*line as f64),
                Reference::Number(*col as f64),
            ],
            BeginFunction { func, return_type } => {
                smallvec![Reference::Location(func.clone()), return_type.clone()]
            }
            FunctionParam { ty, loc } => {
                smallvec![ty.clone(), Reference::Location(loc.clone())]
            }
            Return0 | EnterContext | PopContext | Drain | OTypeInit => smallvec![],
            Return1(a) | Negative(a) | Not(a) | MapInit(a) | EnumInit(a) => {
                smallvec![a.clone()]
            }
            AssignValue { dest, value } => {
                smallvec![Reference::Location(dest.clone()), value.clone()]
            }
            AssignEval { dest, .. } => smallvec![Reference::Location(dest.clone())],
            ScopeOf(l) | Lock(l) | Unlock(l) => smallvec![Reference::Location(l.clone())],
            Typify { loc, ty } => smallvec![Reference::Location(loc.clone()), ty.clone()],
            Plus(a, b) | Minus(a, b) | Times(a, b) | Divide(a, b) | Power(a, b) | Mod(a, b)
            | GreaterThan(a, b) | GreaterThanOrEqual(a, b) | LessThan(a, b)
            | LessThanOrEqual(a, b) | And(a, b) | Or(a, b) | IsEqual(a, b)
            | StringConcat(a, b) | MapGet(a, b) | EnumAppend(a, b) | EnumGet(a, b)
            | EnumConcat(a, b) | Curry(a, b) | Call1(a, b) | CallIf0(a, b) | CallElse0(a, b)
            | PushCall1(a, b) | While(a, b) | With(a, b) | RetMapGet(a, b) | ObjGet(a, b)
            | StreamPush(a, b) => smallvec![a.clone(), b.clone()],
            MapSet(a, b, c) | EnumSet(a, b, c) | CallIf1(a, b, c) | CallElse1(a, b, c)
            | Enumerate(a, b, c) | ObjSet(a, b, c) | OTypeProp(a, b, c) => {
                smallvec![a.clone(), b.clone(), c.clone()]
            }
            Call0(a) | PushCall0(a) | ResumeContext(a) | ObjInit(a) | ObjInstance(a)
            | OTypeFinalize(a) | StreamPop(a) => smallvec![a.clone()],
        }
    }

    /// Rebuild an instruction from its serialized parts. `inner` carries the
    /// nested instruction for `AssignEval`.
    pub fn from_parts(
        tag: Tag,
        mut operands: Vec<Reference>,
        inner: Option<Instruction>,
    ) -> Result<Instruction, IsaError> {
        fn loc(r: Reference, tag: Tag) -> Result<Location, IsaError> {
            match r {
                Reference::Location(l) => Ok(l),
                other => Err(IsaError::BadOperand {
                    mnemonic: tag.mnemonic(),
                    detail: format!("expected location, found {other}"),
                }),
            }
        }
        fn arity(ops: &[Reference], want: usize, tag: Tag) -> Result<(), IsaError> {
            if ops.len() != want {
                return Err(IsaError::BadOperand {
                    mnemonic: tag.mnemonic(),
                    detail: format!("expected {want} operands, found {}", ops.len()),
                });
            }
            Ok(())
        }

        macro_rules! pop {
            () => {
                operands.remove(0)
            };
        }

        use Instruction::*;
        let instr = match tag {
            Tag::Position => {
                arity(&operands, 3, tag)?;
                let file = match pop!() {
                    Reference::String(s) => s,
                    other => {
                        return Err(IsaError::BadOperand {
                            mnemonic: tag.mnemonic(),
                            detail: format!("expected string, found {other}"),
                        })
                    }
                };
                let line = match pop!() {
                    Reference::Number(n) => n as usize,
                    other => {
                        return Err(IsaError::BadOperand {
                            mnemonic: tag.mnemonic(),
                            detail: format!("expected number, found {other}"),
                        })
                    }
                };
                let col = match pop!() {
                    Reference::Number(n) => n as usize,
                    other => {
                        return Err(IsaError::BadOperand {
                            mnemonic: tag.mnemonic(),
                            detail: format!("expected number, found {other}"),
                        })
                    }
                };
                PositionAnnotation { file, line, col }
            }
            Tag::BeginFn => {
                arity(&operands, 2, tag)?;
                let func = loc(pop!(), tag)?;
                BeginFunction {
                    func,
                    return_type: pop!(),
                }
            }
            Tag::FnParam => {
                arity(&operands, 2, tag)?;
                let ty = pop!();
                FunctionParam {
                    ty,
                    loc: loc(pop!(), tag)?,
                }
            }
            Tag::Return0 => {
                arity(&operands, 0, tag)?;
                Return0
            }
            Tag::Return1 => {
                arity(&operands, 1, tag)?;
                Return1(pop!())
            }
            Tag::AssignValue => {
                arity(&operands, 2, tag)?;
                let dest = loc(pop!(), tag)?;
                AssignValue { dest, value: pop!() }
            }
            Tag::AssignEval => {
                arity(&operands, 1, tag)?;
                let dest = loc(pop!(), tag)?;
                let eval = inner.ok_or(IsaError::MissingNestedInstruction)?;
                AssignEval {
                    dest,
                    eval: Box::new(eval),
                }
            }
            Tag::ScopeOf => {
                arity(&operands, 1, tag)?;
                ScopeOf(loc(pop!(), tag)?)
            }
            Tag::Typify => {
                arity(&operands, 2, tag)?;
                let l = loc(pop!(), tag)?;
                Typify { loc: l, ty: pop!() }
            }
            Tag::Lock => {
                arity(&operands, 1, tag)?;
                Lock(loc(pop!(), tag)?)
            }
            Tag::Unlock => {
                arity(&operands, 1, tag)?;
                Unlock(loc(pop!(), tag)?)
            }
            Tag::Plus => {
                arity(&operands, 2, tag)?;
                Plus(pop!(), pop!())
            }
            Tag::Minus => {
                arity(&operands, 2, tag)?;
                Minus(pop!(), pop!())
            }
            Tag::Times => {
                arity(&operands, 2, tag)?;
                Times(pop!(), pop!())
            }
            Tag::Divide => {
                arity(&operands, 2, tag)?;
                Divide(pop!(), pop!())
            }
            Tag::Power => {
                arity(&operands, 2, tag)?;
                Power(pop!(), pop!())
            }
            Tag::Mod => {
                arity(&operands, 2, tag)?;
                Mod(pop!(), pop!())
            }
            Tag::Neg => {
                arity(&operands, 1, tag)?;
                Negative(pop!())
            }
            Tag::Gt => {
                arity(&operands, 2, tag)?;
                GreaterThan(pop!(), pop!())
            }
            Tag::Gte => {
                arity(&operands, 2, tag)?;
                GreaterThanOrEqual(pop!(), pop!())
            }
            Tag::Lt => {
                arity(&operands, 2, tag)?;
                LessThan(pop!(), pop!())
            }
            Tag::Lte => {
                arity(&operands, 2, tag)?;
                LessThanOrEqual(pop!(), pop!())
            }
            Tag::And => {
                arity(&operands, 2, tag)?;
                And(pop!(), pop!())
            }
            Tag::Or => {
                arity(&operands, 2, tag)?;
                Or(pop!(), pop!())
            }
            Tag::Not => {
                arity(&operands, 1, tag)?;
                Not(pop!())
            }
            Tag::IsEqual => {
                arity(&operands, 2, tag)?;
                IsEqual(pop!(), pop!())
            }
            Tag::StrConcat => {
                arity(&operands, 2, tag)?;
                StringConcat(pop!(), pop!())
            }
            Tag::MapInit => {
                arity(&operands, 1, tag)?;
                MapInit(pop!())
            }
            Tag::MapSet => {
                arity(&operands, 3, tag)?;
                MapSet(pop!(), pop!(), pop!())
            }
            Tag::MapGet => {
                arity(&operands, 2, tag)?;
                MapGet(pop!(), pop!())
            }
            Tag::EnumInit => {
                arity(&operands, 1, tag)?;
                EnumInit(pop!())
            }
            Tag::EnumAppend => {
                arity(&operands, 2, tag)?;
                EnumAppend(pop!(), pop!())
            }
            Tag::EnumGet => {
                arity(&operands, 2, tag)?;
                EnumGet(pop!(), pop!())
            }
            Tag::EnumSet => {
                arity(&operands, 3, tag)?;
                EnumSet(pop!(), pop!(), pop!())
            }
            Tag::EnumConcat => {
                arity(&operands, 2, tag)?;
                EnumConcat(pop!(), pop!())
            }
            Tag::Curry => {
                arity(&operands, 2, tag)?;
                Curry(pop!(), pop!())
            }
            Tag::Call0 => {
                arity(&operands, 1, tag)?;
                Call0(pop!())
            }
            Tag::Call1 => {
                arity(&operands, 2, tag)?;
                Call1(pop!(), pop!())
            }
            Tag::CallIf0 => {
                arity(&operands, 2, tag)?;
                CallIf0(pop!(), pop!())
            }
            Tag::CallIf1 => {
                arity(&operands, 3, tag)?;
                CallIf1(pop!(), pop!(), pop!())
            }
            Tag::CallElse0 => {
                arity(&operands, 2, tag)?;
                CallElse0(pop!(), pop!())
            }
            Tag::CallElse1 => {
                arity(&operands, 3, tag)?;
                CallElse1(pop!(), pop!(), pop!())
            }
            Tag::PushCall0 => {
                arity(&operands, 1, tag)?;
                PushCall0(pop!())
            }
            Tag::PushCall1 => {
                arity(&operands, 2, tag)?;
                PushCall1(pop!(), pop!())
            }
            Tag::While => {
                arity(&operands, 2, tag)?;
                While(pop!(), pop!())
            }
            Tag::Enumerate => {
                arity(&operands, 3, tag)?;
                Enumerate(pop!(), pop!(), pop!())
            }
            Tag::With => {
                arity(&operands, 2, tag)?;
                With(pop!(), pop!())
            }
            Tag::EnterContext => {
                arity(&operands, 0, tag)?;
                EnterContext
            }
            Tag::PopContext => {
                arity(&operands, 0, tag)?;
                PopContext
            }
            Tag::ResumeContext => {
                arity(&operands, 1, tag)?;
                ResumeContext(pop!())
            }
            Tag::Drain => {
                arity(&operands, 0, tag)?;
                Drain
            }
            Tag::RetMapGet => {
                arity(&operands, 2, tag)?;
                RetMapGet(pop!(), pop!())
            }
            Tag::ObjInit => {
                arity(&operands, 1, tag)?;
                ObjInit(pop!())
            }
            Tag::ObjSet => {
                arity(&operands, 3, tag)?;
                ObjSet(pop!(), pop!(), pop!())
            }
            Tag::ObjGet => {
                arity(&operands, 2, tag)?;
                ObjGet(pop!(), pop!())
            }
            Tag::ObjInstance => {
                arity(&operands, 1, tag)?;
                ObjInstance(pop!())
            }
            Tag::OTypeInit => {
                arity(&operands, 0, tag)?;
                OTypeInit
            }
            Tag::OTypeProp => {
                arity(&operands, 3, tag)?;
                OTypeProp(pop!(), pop!(), pop!())
            }
            Tag::OTypeFinalize => {
                arity(&operands, 1, tag)?;
                OTypeFinalize(pop!())
            }
            Tag::StreamPush => {
                arity(&operands, 2, tag)?;
                StreamPush(pop!(), pop!())
            }
            Tag::StreamPop => {
                arity(&operands, 1, tag)?;
                StreamPop(pop!())
            }
        };
        Ok(instr)
    }

    /// Mutable slots the constant-propagation pass may substitute into.
    /// Destination locations, region headers, and scope/lock bookkeeping are
    /// structurally excluded.
    pub fn propagatable_slots(&mut self) -> SmallVec<[&mut Reference; 3]> {
        use Instruction::*;
        match self {
            AssignValue { value, .. } => smallvec![value],
            Return1(a) | Negative(a) | Not(a) | Call0(a) | PushCall0(a) | ResumeContext(a)
            | ObjInit(a) | ObjInstance(a) | OTypeFinalize(a) | StreamPop(a) | MapInit(a)
            | EnumInit(a) => smallvec![a],
            Plus(a, b) | Minus(a, b) | Times(a, b) | Divide(a, b) | Power(a, b) | Mod(a, b)
            | GreaterThan(a, b) | GreaterThanOrEqual(a, b) | LessThan(a, b)
            | LessThanOrEqual(a, b) | And(a, b) | Or(a, b) | IsEqual(a, b)
            | StringConcat(a, b) | MapGet(a, b) | EnumAppend(a, b) | EnumGet(a, b)
            | EnumConcat(a, b) | Curry(a, b) | Call1(a, b) | CallIf0(a, b) | CallElse0(a, b)
            | PushCall1(a, b) | While(a, b) | With(a, b) | RetMapGet(a, b) | ObjGet(a, b)
            | StreamPush(a, b) => smallvec![a, b],
            MapSet(a, b, c) | EnumSet(a, b, c) | CallIf1(a, b, c) | CallElse1(a, b, c)
            | Enumerate(a, b, c) | ObjSet(a, b, c) | OTypeProp(a, b, c) => smallvec![a, b, c],
            _ => smallvec![],
        }
    }
}
