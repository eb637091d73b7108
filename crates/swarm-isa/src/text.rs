//! Textual ISA form.
//!
//! One instruction per line, mnemonic first, operands separated by spaces:
//!
//! ```text
//! ASSIGNVALUE $l:a 5
//! ASSIGNEVAL $l:b PLUS $l:a $l:a
//! ```
//!
//! Operand syntax: `$<affinity>:<name>` locations, decimal numbers,
//! double-quoted strings, `true`/`false`, `t:<type>` type references and
//! `o:<type>` object-type references. Types use a compact whitespace-free
//! encoding so line splitting stays trivial. The form round-trips: parsing
//! the emitted text yields an instruction sequence equal to the original.

use indexmap::IndexMap;

use swarm_core::types::{ObjectType, Primitive, Type};

use crate::error::IsaError;
use crate::instruction::{Instruction, Instructions, Tag};
use crate::reference::{Affinity, FunctionReference, Location, Reference, StreamReference};

// ---------------------------------------------------------------------------
// Type codec
// ---------------------------------------------------------------------------

/// Encode a type with the compact grammar:
/// `NUMBER`, `ENUMERABLE<T>`, `MAP<T>`, `RESOURCE<T>`, `FN0<T>`,
/// `FN1<P,R>`, `AMBIG<name>`, `OBJ#id<parent|_>{k:T;...}`.
pub fn encode_type(ty: &Type) -> String {
    match ty {
        Type::Primitive(p) => p.name().to_string(),
        Type::Enumerable(i) => format!("ENUMERABLE<{}>", encode_type(i)),
        Type::Map(i) => format!("MAP<{}>", encode_type(i)),
        Type::Resource(i) => format!("RESOURCE<{}>", encode_type(i)),
        Type::Lambda0(r) => format!("FN0<{}>", encode_type(r)),
        Type::Lambda1 { param, returns } => {
            format!("FN1<{},{}>", encode_type(param), encode_type(returns))
        }
        Type::Object(o) => encode_object(o),
        Type::Ambiguous { name } => format!("AMBIG<{name}>"),
    }
}

fn encode_object(o: &ObjectType) -> String {
    let parent = match o.parent() {
        Some(p) => encode_object(p),
        None => "_".into(),
    };
    let props = o
        .properties()
        .iter()
        .map(|(k, v)| format!("{k}:{}", encode_type(v)))
        .collect::<Vec<_>>()
        .join(";");
    format!("OBJ#{}<{parent}>{{{props}}}", o.id())
}

/// Parse a type produced by [`encode_type`].
pub fn parse_type(s: &str) -> Result<Type, IsaError> {
    let mut cur = Cursor {
        bytes: s.as_bytes(),
        pos: 0,
    };
    let ty = cur.parse_type()?;
    if cur.pos != cur.bytes.len() {
        return Err(IsaError::TypeCodec {
            at: cur.pos,
            detail: "trailing input".into(),
        });
    }
    Ok(ty)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn err(&self, detail: impl Into<String>) -> IsaError {
        IsaError::TypeCodec {
            at: self.pos,
            detail: detail.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), IsaError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err(format!("expected '{}'", c as char)))
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn number(&mut self) -> Result<u64, IsaError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.err("expected digits"));
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos])
            .parse()
            .map_err(|_| self.err("bad integer"))
    }

    fn parse_type(&mut self) -> Result<Type, IsaError> {
        let word = self.ident();
        if let Some(p) = Primitive::from_name(&word) {
            return Ok(Type::Primitive(p));
        }
        match word.as_str() {
            "ENUMERABLE" => {
                self.expect(b'<')?;
                let inner = self.parse_type()?;
                self.expect(b'>')?;
                Ok(Type::enumerable(inner))
            }
            "MAP" => {
                self.expect(b'<')?;
                let inner = self.parse_type()?;
                self.expect(b'>')?;
                Ok(Type::map(inner))
            }
            "RESOURCE" => {
                self.expect(b'<')?;
                let inner = self.parse_type()?;
                self.expect(b'>')?;
                Ok(Type::resource(inner))
            }
            "FN0" => {
                self.expect(b'<')?;
                let r = self.parse_type()?;
                self.expect(b'>')?;
                Ok(Type::Lambda0(Box::new(r)))
            }
            "FN1" => {
                self.expect(b'<')?;
                let p = self.parse_type()?;
                self.expect(b',')?;
                let r = self.parse_type()?;
                self.expect(b'>')?;
                Ok(Type::Lambda1 {
                    param: Box::new(p),
                    returns: Box::new(r),
                })
            }
            "AMBIG" => {
                self.expect(b'<')?;
                let name = self.ident();
                self.expect(b'>')?;
                Ok(Type::Ambiguous { name })
            }
            "OBJ" => Ok(Type::Object(self.parse_object_tail()?)),
            other => Err(self.err(format!("unknown type keyword '{other}'"))),
        }
    }

    /// Parses the `#id<parent>{props}` tail; the `OBJ` keyword is consumed.
    fn parse_object_tail(&mut self) -> Result<ObjectType, IsaError> {
        self.expect(b'#')?;
        let id = self.number()?;
        self.expect(b'<')?;
        let parent = if self.peek() == Some(b'_') {
            self.pos += 1;
            None
        } else {
            let word = self.ident();
            if word != "OBJ" {
                return Err(self.err("expected parent object or '_'"));
            }
            Some(self.parse_object_tail()?)
        };
        self.expect(b'>')?;
        self.expect(b'{')?;
        let mut properties = IndexMap::new();
        while self.peek() != Some(b'}') {
            let name = self.ident();
            if name.is_empty() {
                return Err(self.err("expected property name"));
            }
            self.expect(b':')?;
            let ty = self.parse_type()?;
            properties.insert(name, ty);
            if self.peek() == Some(b';') {
                self.pos += 1;
            }
        }
        self.expect(b'}')?;
        Ok(ObjectType::from_parts(id, parent, properties))
    }
}

// ---------------------------------------------------------------------------
// Reference codec
// ---------------------------------------------------------------------------

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Emit one operand.
pub fn write_reference(r: &Reference) -> Result<String, IsaError> {
    match r {
        Reference::Location(l) => Ok(format!("${}:{}", l.affinity.prefix(), l.name)),
        Reference::Number(n) => Ok(format_number(*n)),
        Reference::String(s) => Ok(escape_string(s)),
        Reference::Boolean(b) => Ok(b.to_string()),
        Reference::Type(t) => Ok(format!("t:{}", encode_type(t))),
        Reference::ObjectType(o) => Ok(format!("o:{}", encode_object(o))),
        Reference::Function(f) => {
            if !f.partial.is_empty() {
                return Err(IsaError::UnserializableReference(format!(
                    "partially-applied function {}",
                    f.name
                )));
            }
            Ok(format!("fn:{}", f.name))
        }
        Reference::Stream(s) => Ok(format!("stream:{}:{}", s.id, encode_type(&s.inner))),
        other => Err(IsaError::UnserializableReference(other.to_string())),
    }
}

fn parse_reference(token: &TextToken) -> Result<Reference, IsaError> {
    let raw = match token {
        TextToken::Str(s) => return Ok(Reference::String(s.clone())),
        TextToken::Raw(r) => r.as_str(),
    };
    if let Some(rest) = raw.strip_prefix('$') {
        let (aff, name) = rest.split_once(':').ok_or_else(|| IsaError::BadOperand {
            mnemonic: "",
            detail: format!("malformed location '{raw}'"),
        })?;
        let affinity = Affinity::from_prefix(aff).ok_or_else(|| IsaError::BadOperand {
            mnemonic: "",
            detail: format!("unknown affinity '{aff}'"),
        })?;
        return Ok(Reference::Location(Location::new(affinity, name)));
    }
    if raw == "true" {
        return Ok(Reference::Boolean(true));
    }
    if raw == "false" {
        return Ok(Reference::Boolean(false));
    }
    if let Some(rest) = raw.strip_prefix("t:") {
        return Ok(Reference::Type(parse_type(rest)?));
    }
    if let Some(rest) = raw.strip_prefix("o:") {
        match parse_type(rest)? {
            Type::Object(o) => return Ok(Reference::ObjectType(o)),
            other => {
                return Err(IsaError::BadOperand {
                    mnemonic: "",
                    detail: format!("o: operand is not an object type: {other}"),
                })
            }
        }
    }
    if let Some(rest) = raw.strip_prefix("fn:") {
        return Ok(Reference::Function(FunctionReference::new(
            rest,
            Type::error(),
        )));
    }
    if let Some(rest) = raw.strip_prefix("stream:") {
        let (id, ty) = rest.split_once(':').ok_or_else(|| IsaError::BadOperand {
            mnemonic: "",
            detail: format!("malformed stream ref '{raw}'"),
        })?;
        return Ok(Reference::Stream(StreamReference {
            id: id.into(),
            inner: parse_type(ty)?,
        }));
    }
    raw.parse::<f64>()
        .map(Reference::Number)
        .map_err(|_| IsaError::BadOperand {
            mnemonic: "",
            detail: format!("unrecognized operand '{raw}'"),
        })
}

// ---------------------------------------------------------------------------
// Instruction codec
// ---------------------------------------------------------------------------

/// Emit one instruction (no trailing newline).
pub fn write_instruction(instr: &Instruction) -> Result<String, IsaError> {
    if let Instruction::AssignEval { dest, eval } = instr {
        let inner = write_instruction(eval)?;
        return Ok(format!(
            "{} ${}:{} {inner}",
            Tag::AssignEval.mnemonic(),
            dest.affinity.prefix(),
            dest.name
        ));
    }
    let mut out = instr.tag().mnemonic().to_string();
    for op in instr.operands() {
        out.push(' ');
        out.push_str(&write_reference(&op)?);
    }
    Ok(out)
}

/// Emit a whole program, one instruction per line.
pub fn write_program(instrs: &Instructions) -> Result<String, IsaError> {
    let mut out = String::new();
    for i in instrs {
        out.push_str(&write_instruction(i)?);
        out.push('\n');
    }
    Ok(out)
}

#[derive(Debug, Clone)]
enum TextToken {
    Raw(String),
    Str(String),
}

fn tokenize(line: &str, lineno: usize) -> Result<Vec<TextToken>, IsaError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    None => {
                        return Err(IsaError::TextParse {
                            line: lineno,
                            detail: "unterminated string literal".into(),
                        })
                    }
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some('r') => s.push('\r'),
                        Some('\'') => s.push('\''),
                        Some('"') => s.push('"'),
                        Some('\\') => s.push('\\'),
                        other => {
                            return Err(IsaError::TextParse {
                                line: lineno,
                                detail: format!("bad escape: {other:?}"),
                            })
                        }
                    },
                    Some(other) => s.push(other),
                }
            }
            tokens.push(TextToken::Str(s));
        } else {
            let mut s = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                s.push(c);
                chars.next();
            }
            tokens.push(TextToken::Raw(s));
        }
    }
    Ok(tokens)
}

fn parse_tokens(tokens: &[TextToken], lineno: usize) -> Result<Instruction, IsaError> {
    let mnemonic = match tokens.first() {
        Some(TextToken::Raw(m)) => m.as_str(),
        _ => {
            return Err(IsaError::TextParse {
                line: lineno,
                detail: "missing mnemonic".into(),
            })
        }
    };
    let tag = Tag::from_mnemonic(mnemonic)
        .ok_or_else(|| IsaError::UnknownMnemonic(mnemonic.to_string()))?;

    if tag == Tag::AssignEval {
        if tokens.len() < 3 {
            return Err(IsaError::TextParse {
                line: lineno,
                detail: "ASSIGNEVAL needs a destination and a nested instruction".into(),
            });
        }
        let dest = parse_reference(&tokens[1])?;
        let inner = parse_tokens(&tokens[2..], lineno)?;
        return Instruction::from_parts(tag, vec![dest], Some(inner));
    }

    let operands = tokens[1..]
        .iter()
        .map(parse_reference)
        .collect::<Result<Vec<_>, _>>()?;
    Instruction::from_parts(tag, operands, None)
}

/// Parse one line of the textual form.
pub fn parse_instruction(line: &str, lineno: usize) -> Result<Instruction, IsaError> {
    let tokens = tokenize(line, lineno)?;
    parse_tokens(&tokens, lineno)
}

/// Parse a whole program. Blank lines are skipped.
pub fn parse_program(text: &str) -> Result<Instructions, IsaError> {
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        out.push(parse_instruction(line, i + 1)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::types::ObjectTypeBuilder;

    #[test]
    fn type_codec_roundtrip() {
        let types = vec![
            Type::number(),
            Type::enumerable(Type::string()),
            Type::map(Type::enumerable(Type::boolean())),
            Type::resource(Type::opaque()),
            Type::lambda(vec![], Type::void()),
            Type::lambda(vec![Type::number(), Type::number()], Type::number()),
            Type::Ambiguous { name: "Vec2".into() },
        ];
        for t in types {
            let enc = encode_type(&t);
            assert!(!enc.contains(' '), "encoding contains space: {enc}");
            assert_eq!(parse_type(&enc).unwrap(), t, "roundtrip failed for {enc}");
        }
    }

    #[test]
    fn object_codec_roundtrip_with_parent() {
        let mut b = ObjectTypeBuilder::new();
        b.define_property("x", Type::number());
        let parent = b.finalize();
        let mut b = ObjectTypeBuilder::with_parent(parent);
        b.define_property("next", Type::this());
        let child = b.finalize();

        let t = Type::Object(child);
        let enc = encode_type(&t);
        assert_eq!(parse_type(&enc).unwrap(), t);
    }

    #[test]
    fn instruction_roundtrip() {
        let instrs: Instructions = vec![
            Instruction::AssignValue {
                dest: Location::local("a"),
                value: Reference::Number(5.0),
            },
            Instruction::AssignEval {
                dest: Location::local("b"),
                eval: Box::new(Instruction::Plus(
                    Reference::location(Affinity::Local, "a"),
                    Reference::location(Affinity::Local, "a"),
                )),
            },
            Instruction::BeginFunction {
                func: Location::function("FUNC_0"),
                return_type: Reference::Type(Type::number()),
            },
            Instruction::FunctionParam {
                ty: Reference::Type(Type::number()),
                loc: Location::local("arg_x"),
            },
            Instruction::Return1(Reference::location(Affinity::Local, "retVal")),
            Instruction::AssignValue {
                dest: Location::local("msg"),
                value: Reference::String("hi there\n\"quoted\"".into()),
            },
            Instruction::Lock(Location::shared("var_c_1")),
            Instruction::Unlock(Location::shared("var_c_1")),
            Instruction::EnterContext,
            Instruction::Drain,
        ];
        let text = write_program(&instrs).unwrap();
        let back = parse_program(&text).unwrap();
        assert_eq!(instrs, back);
    }

    #[test]
    fn position_annotation_roundtrip() {
        let i = Instruction::PositionAnnotation {
            file: "main.swarm".into(),
            line: 12,
            col: 3,
        };
        let text = write_instruction(&i).unwrap();
        let back = parse_instruction(&text, 1).unwrap();
        assert_eq!(i, back);
    }

    #[test]
    fn runtime_values_do_not_serialize() {
        let i = Instruction::AssignValue {
            dest: Location::local("x"),
            value: Reference::Enumeration(crate::reference::EnumerationValue {
                inner: Type::number(),
                items: vec![],
            }),
        };
        assert!(write_instruction(&i).is_err());
    }
}
