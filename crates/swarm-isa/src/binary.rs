//! Binary ISA form.
//!
//! A length-prefixed record list: `u32` instruction count, then one record
//! per instruction — `{u16 tag, u8 operand_count, operand...}`. Each operand
//! is `{u8 kind, payload}` with kinds 0 Location, 1 Number, 2 String,
//! 3 Boolean, 4 Type, 5 ObjectType, 6 Function (name + partial-application
//! stack), 7 Stream. All integers little-endian; strings are `u32` length +
//! UTF-8 bytes; types reuse the compact textual codec.
//!
//! An `ASSIGNEVAL` record carries only its destination and is immediately
//! followed by the record of the nested instruction.
//!
//! Deserialization is parametrized by a [`ReferenceResolver`] so a VM can
//! rebind function references (by name + partial stack) and stream
//! references (by id + inner type) against its own state.

use swarm_core::types::Type;

use crate::error::IsaError;
use crate::instruction::{Instruction, Instructions, Tag};
use crate::reference::{Affinity, FunctionReference, Location, Reference, StreamReference};
use crate::text::{encode_type, parse_type};

/// Resolves context-dependent references during deserialization.
pub trait ReferenceResolver {
    fn resolve_function(&self, name: &str, partial: Vec<Reference>)
        -> Result<Reference, IsaError>;
    fn resolve_stream(&self, id: &str, inner: Type) -> Result<Reference, IsaError>;
}

/// Context-free resolver: reconstructs plain references without binding them
/// to any VM state.
pub struct PlainResolver;

impl ReferenceResolver for PlainResolver {
    fn resolve_function(
        &self,
        name: &str,
        partial: Vec<Reference>,
    ) -> Result<Reference, IsaError> {
        let mut f = FunctionReference::new(name, Type::error());
        f.partial = partial;
        Ok(Reference::Function(f))
    }

    fn resolve_stream(&self, id: &str, inner: Type) -> Result<Reference, IsaError> {
        Ok(Reference::Stream(StreamReference {
            id: id.into(),
            inner,
        }))
    }
}

fn affinity_byte(a: Affinity) -> u8 {
    match a {
        Affinity::Local => 0,
        Affinity::Shared => 1,
        Affinity::Function => 2,
        Affinity::ObjectProp => 3,
        Affinity::Primitive => 4,
    }
}

fn affinity_from_byte(b: u8) -> Result<Affinity, IsaError> {
    Ok(match b {
        0 => Affinity::Local,
        1 => Affinity::Shared,
        2 => Affinity::Function,
        3 => Affinity::ObjectProp,
        4 => Affinity::Primitive,
        other => return Err(IsaError::UnknownAffinity(other)),
    })
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn put_reference(out: &mut Vec<u8>, r: &Reference) -> Result<(), IsaError> {
    match r {
        Reference::Location(l) => {
            out.push(0);
            out.push(affinity_byte(l.affinity));
            put_str(out, &l.name);
        }
        Reference::Number(n) => {
            out.push(1);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Reference::String(s) => {
            out.push(2);
            put_str(out, s);
        }
        Reference::Boolean(b) => {
            out.push(3);
            out.push(u8::from(*b));
        }
        Reference::Type(t) => {
            out.push(4);
            put_str(out, &encode_type(t));
        }
        Reference::ObjectType(o) => {
            out.push(5);
            put_str(out, &encode_type(&Type::Object(o.clone())));
        }
        Reference::Function(f) => {
            out.push(6);
            put_str(out, &f.name);
            out.push(f.partial.len() as u8);
            for p in &f.partial {
                put_reference(out, p)?;
            }
        }
        Reference::Stream(s) => {
            out.push(7);
            put_str(out, &s.id);
            put_str(out, &encode_type(&s.inner));
        }
        other => return Err(IsaError::UnserializableReference(other.to_string())),
    }
    Ok(())
}

fn put_record(out: &mut Vec<u8>, instr: &Instruction) -> Result<(), IsaError> {
    let ops = instr.operands();
    out.extend_from_slice(&(instr.tag() as u16).to_le_bytes());
    out.push(ops.len() as u8);
    for op in &ops {
        put_reference(out, op)?;
    }
    if let Instruction::AssignEval { eval, .. } = instr {
        put_record(out, eval)?;
    }
    Ok(())
}

/// Serialize a program to the binary form.
pub fn encode_program(instrs: &Instructions) -> Result<Vec<u8>, IsaError> {
    let mut out = Vec::new();
    out.extend_from_slice(&(instrs.len() as u32).to_le_bytes());
    for i in instrs {
        put_record(&mut out, i)?;
    }
    Ok(out)
}

struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], IsaError> {
        if self.pos + n > self.bytes.len() {
            return Err(IsaError::UnexpectedEof);
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, IsaError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, IsaError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, IsaError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Result<f64, IsaError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(f64::from_le_bytes(buf))
    }

    fn str(&mut self) -> Result<String, IsaError> {
        let len = self.u32()? as usize;
        let b = self.take(len)?;
        String::from_utf8(b.to_vec()).map_err(|_| IsaError::InvalidUtf8)
    }

    fn reference<R: ReferenceResolver>(&mut self, resolver: &R) -> Result<Reference, IsaError> {
        let kind = self.u8()?;
        match kind {
            0 => {
                let aff = affinity_from_byte(self.u8()?)?;
                let name = self.str()?;
                Ok(Reference::Location(Location::new(aff, name)))
            }
            1 => Ok(Reference::Number(self.f64()?)),
            2 => Ok(Reference::String(self.str()?)),
            3 => Ok(Reference::Boolean(self.u8()? != 0)),
            4 => Ok(Reference::Type(parse_type(&self.str()?)?)),
            5 => match parse_type(&self.str()?)? {
                Type::Object(o) => Ok(Reference::ObjectType(o)),
                other => Err(IsaError::BadOperand {
                    mnemonic: "",
                    detail: format!("object-type operand is not an object: {other}"),
                }),
            },
            6 => {
                let name = self.str()?;
                let count = self.u8()? as usize;
                let mut partial = Vec::with_capacity(count);
                for _ in 0..count {
                    partial.push(self.reference(resolver)?);
                }
                resolver.resolve_function(&name, partial)
            }
            7 => {
                let id = self.str()?;
                let inner = parse_type(&self.str()?)?;
                resolver.resolve_stream(&id, inner)
            }
            other => Err(IsaError::UnknownReferenceKind(other)),
        }
    }

    fn record<R: ReferenceResolver>(&mut self, resolver: &R) -> Result<Instruction, IsaError> {
        let raw_tag = self.u16()?;
        let tag = Tag::try_from(raw_tag).map_err(|_| IsaError::UnknownTag(raw_tag))?;
        let count = self.u8()? as usize;
        let mut operands = Vec::with_capacity(count);
        for _ in 0..count {
            operands.push(self.reference(resolver)?);
        }
        let inner = if tag == Tag::AssignEval {
            Some(self.record(resolver)?)
        } else {
            None
        };
        Instruction::from_parts(tag, operands, inner)
    }
}

/// Deserialize a program from the binary form.
pub fn decode_program<R: ReferenceResolver>(
    bytes: &[u8],
    resolver: &R,
) -> Result<Instructions, IsaError> {
    let mut cur = ByteCursor { bytes, pos: 0 };
    let count = cur.u32()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(cur.record(resolver)?);
    }
    if cur.pos != bytes.len() {
        return Err(IsaError::BadOperand {
            mnemonic: "",
            detail: format!("{} trailing bytes", bytes.len() - cur.pos),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_roundtrip() {
        let instrs: Instructions = vec![
            Instruction::AssignValue {
                dest: Location::local("a"),
                value: Reference::Number(5.0),
            },
            Instruction::AssignEval {
                dest: Location::local("b"),
                eval: Box::new(Instruction::Plus(
                    Reference::location(Affinity::Local, "a"),
                    Reference::Number(0.5),
                )),
            },
            Instruction::BeginFunction {
                func: Location::function("IF_3"),
                return_type: Reference::Type(Type::void()),
            },
            Instruction::Return0,
            Instruction::CallIf0(
                Reference::location(Affinity::Local, "tmp1"),
                Reference::location(Affinity::Function, "IF_3"),
            ),
            Instruction::AssignValue {
                dest: Location::shared("var_count_0"),
                value: Reference::Boolean(false),
            },
        ];
        let bytes = encode_program(&instrs).unwrap();
        let back = decode_program(&bytes, &PlainResolver).unwrap();
        assert_eq!(instrs, back);
    }

    #[test]
    fn function_reference_partials_roundtrip() {
        let mut f = FunctionReference::new("FUNC_0", Type::error());
        f.partial = vec![Reference::Number(2.0), Reference::String("x".into())];
        let instrs: Instructions = vec![Instruction::AssignValue {
            dest: Location::local("g"),
            value: Reference::Function(f),
        }];
        let bytes = encode_program(&instrs).unwrap();
        let back = decode_program(&bytes, &PlainResolver).unwrap();
        assert_eq!(instrs, back);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let instrs: Instructions = vec![Instruction::Drain];
        let mut bytes = encode_program(&instrs).unwrap();
        bytes.pop();
        assert!(matches!(
            decode_program(&bytes[..4], &PlainResolver),
            Err(IsaError::UnexpectedEof)
        ));
    }
}
