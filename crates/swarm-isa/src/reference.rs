//! ISA value references and locations.
//!
//! A [`Location`] is a named, affinity-scoped cell. A [`Reference`] is
//! anything an instruction operand can denote: a location, an immediate
//! (number/string/boolean), a type, or one of the runtime-only values the
//! VM stores into locations (containers, object instances, function values,
//! streams). Runtime-only variants never appear in serialized programs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use swarm_core::types::{ObjectType, Type};

/// The namespace of a location, determining its storage and synchronization
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Affinity {
    Local,
    Shared,
    Function,
    ObjectProp,
    Primitive,
}

impl Affinity {
    /// The one-letter prefix used in the textual form (`$l:`, `$s:`, ...).
    pub fn prefix(self) -> &'static str {
        match self {
            Affinity::Local => "l",
            Affinity::Shared => "s",
            Affinity::Function => "f",
            Affinity::ObjectProp => "o",
            Affinity::Primitive => "p",
        }
    }

    pub fn from_prefix(s: &str) -> Option<Affinity> {
        Some(match s {
            "l" => Affinity::Local,
            "s" => Affinity::Shared,
            "f" => Affinity::Function,
            "o" => Affinity::ObjectProp,
            "p" => Affinity::Primitive,
            _ => return None,
        })
    }
}

/// A named addressable cell. Equality is by `affinity:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub affinity: Affinity,
    pub name: String,
}

impl Location {
    pub fn new(affinity: Affinity, name: impl Into<String>) -> Self {
        Location {
            affinity,
            name: name.into(),
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Location::new(Affinity::Local, name)
    }

    pub fn shared(name: impl Into<String>) -> Self {
        Location::new(Affinity::Shared, name)
    }

    pub fn function(name: impl Into<String>) -> Self {
        Location::new(Affinity::Function, name)
    }

    pub fn object_prop(name: impl Into<String>) -> Self {
        Location::new(Affinity::ObjectProp, name)
    }

    /// Fully-qualified name, e.g. `l:tmp3`.
    pub fn fq_name(&self) -> String {
        format!("{}:{}", self.affinity.prefix(), self.name)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}:{}", self.affinity.prefix(), self.name)
    }
}

/// A function value: a named function region plus the stack of partially
/// applied arguments accumulated by `Curry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionReference {
    pub name: String,
    pub partial: Vec<Reference>,
    /// The remaining (uncurried) lambda type, maintained by the VM.
    pub ty: Type,
}

impl FunctionReference {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        FunctionReference {
            name: name.into(),
            partial: Vec::new(),
            ty,
        }
    }
}

/// A cooperative stream (stdout/stderr and friends).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamReference {
    pub id: String,
    pub inner: Type,
}

/// Runtime enumeration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumerationValue {
    pub inner: Type,
    pub items: Vec<Reference>,
}

/// Runtime map value. Insertion-ordered for deterministic iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingValue {
    pub inner: Type,
    pub entries: IndexMap<String, Reference>,
}

/// Runtime object instance. `finalized` flips when `ObjInstance` freezes the
/// constructed object into its immutable view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectValue {
    pub otype: ObjectType,
    pub properties: IndexMap<String, Reference>,
    pub finalized: bool,
}

/// Runtime resource value; yields an opaque inner value while in scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceValue {
    pub id: String,
    pub yields: Box<Reference>,
}

/// Anything an operand can denote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reference {
    Location(Location),
    Number(f64),
    String(String),
    Boolean(bool),
    Type(Type),
    ObjectType(ObjectType),
    Function(FunctionReference),
    Stream(StreamReference),
    // -- runtime-only values --
    Enumeration(EnumerationValue),
    Mapping(MappingValue),
    ObjectValue(ObjectValue),
    Resource(ResourceValue),
}

impl Reference {
    pub fn location(affinity: Affinity, name: impl Into<String>) -> Reference {
        Reference::Location(Location::new(affinity, name))
    }

    pub fn as_location(&self) -> Option<&Location> {
        match self {
            Reference::Location(l) => Some(l),
            _ => None,
        }
    }

    pub fn is_location(&self) -> bool {
        matches!(self, Reference::Location(_))
    }

    /// The Swarm type of the value this reference denotes. Locations have no
    /// intrinsic type (resolve them first); they report `ERROR`.
    pub fn type_of(&self) -> Type {
        match self {
            Reference::Location(_) => Type::error(),
            Reference::Number(_) => Type::number(),
            Reference::String(_) => Type::string(),
            Reference::Boolean(_) => Type::boolean(),
            Reference::Type(_) | Reference::ObjectType(_) => Type::type_of_types(),
            Reference::Function(f) => f.ty.clone(),
            Reference::Stream(s) => Type::resource(s.inner.clone()),
            Reference::Enumeration(e) => Type::enumerable(e.inner.clone()),
            Reference::Mapping(m) => Type::map(m.inner.clone()),
            Reference::ObjectValue(o) => Type::Object(o.otype.clone()),
            Reference::Resource(_) => Type::resource(Type::opaque()),
        }
    }

    /// The referenced type, when this is a `Type` or `ObjectType` reference.
    pub fn as_type(&self) -> Option<Type> {
        match self {
            Reference::Type(t) => Some(t.clone()),
            Reference::ObjectType(o) => Some(Type::Object(o.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Location(l) => write!(f, "{l}"),
            Reference::Number(n) => write!(f, "{n}"),
            Reference::String(s) => write!(f, "{s:?}"),
            Reference::Boolean(b) => write!(f, "{b}"),
            Reference::Type(t) => write!(f, "t:{t}"),
            Reference::ObjectType(o) => write!(f, "o:{o}"),
            Reference::Function(r) => write!(f, "fn:{}[{}]", r.name, r.partial.len()),
            Reference::Stream(s) => write!(f, "stream:{}", s.id),
            Reference::Enumeration(e) => write!(f, "enum[{}]", e.items.len()),
            Reference::Mapping(m) => write!(f, "map[{}]", m.entries.len()),
            Reference::ObjectValue(o) => write!(f, "obj#{}", o.otype.id()),
            Reference::Resource(r) => write!(f, "resource:{}", r.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fq_name_is_affinity_qualified() {
        let a = Location::local("tmp0");
        let b = Location::shared("tmp0");
        assert_eq!(a.fq_name(), "l:tmp0");
        assert_eq!(b.fq_name(), "s:tmp0");
        assert_ne!(a, b);
    }

    #[test]
    fn affinity_prefix_roundtrip() {
        for aff in [
            Affinity::Local,
            Affinity::Shared,
            Affinity::Function,
            Affinity::ObjectProp,
            Affinity::Primitive,
        ] {
            assert_eq!(Affinity::from_prefix(aff.prefix()), Some(aff));
        }
    }

    #[test]
    fn reference_types() {
        assert_eq!(Reference::Number(1.0).type_of(), Type::number());
        assert_eq!(Reference::Boolean(true).type_of(), Type::boolean());
        let e = Reference::Enumeration(EnumerationValue {
            inner: Type::number(),
            items: vec![],
        });
        assert_eq!(e.type_of(), Type::enumerable(Type::number()));
    }
}
