//! The Swarm type system.
//!
//! A closed algebraic sum: interned primitives (unit variants), the
//! `Enumerable`/`Map`/`Resource` containers, right-nested curried lambdas
//! (`Lambda0`/`Lambda1`), nominal objects with single inheritance, and the
//! `Ambiguous` placeholder that stands for an unresolved identifier until
//! name analysis binds it.
//!
//! Objects use [`IndexMap`] for insertion-ordered properties and are built in
//! two phases: collect property signatures in an [`ObjectTypeBuilder`], then
//! freeze into an immutable [`ObjectType`] with a stable monotonic id.
//! Self-references must be rewritten to the `This` primitive before
//! finalization (see [`Type::transform`]) so no type value ever contains
//! itself.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Intrinsic primitive types. Unit variants, so "interning" is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    Number,
    String,
    Boolean,
    /// The type of type-valued expressions (`type T = ...`).
    Type,
    /// The type of statements and other valueless-but-successful nodes.
    Unit,
    Void,
    /// Produced when analysis fails; never reachable after a clean pipeline.
    Error,
    /// The yield of a resource; only the runtime knows its shape.
    Opaque,
    /// Stand-in for an object's own type inside its property signatures.
    This,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Number => "NUMBER",
            Primitive::String => "STRING",
            Primitive::Boolean => "BOOLEAN",
            Primitive::Type => "TYPE",
            Primitive::Unit => "UNIT",
            Primitive::Void => "VOID",
            Primitive::Error => "ERROR",
            Primitive::Opaque => "OPAQUE",
            Primitive::This => "THIS",
        }
    }

    pub fn from_name(name: &str) -> Option<Primitive> {
        Some(match name {
            "NUMBER" => Primitive::Number,
            "STRING" => Primitive::String,
            "BOOLEAN" => Primitive::Boolean,
            "TYPE" => Primitive::Type,
            "UNIT" => Primitive::Unit,
            "VOID" => Primitive::Void,
            "ERROR" => Primitive::Error,
            "OPAQUE" => Primitive::Opaque,
            "THIS" => Primitive::This,
            _ => return None,
        })
    }
}

/// A Swarm type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Primitive(Primitive),

    /// Ordered homogeneous collection.
    Enumerable(Box<Type>),

    /// Unordered string-keyed mapping.
    Map(Box<Type>),

    /// A scoped value acquired via `with`, yielding the inner type.
    Resource(Box<Type>),

    /// Nullary function.
    Lambda0(Box<Type>),

    /// Unary function. N-ary arrows are right-nested `Lambda1`s.
    Lambda1 { param: Box<Type>, returns: Box<Type> },

    /// Nominal object type with single inheritance.
    Object(ObjectType),

    /// An identifier standing for a type until name analysis resolves it.
    Ambiguous { name: String },
}

impl Type {
    pub fn number() -> Type {
        Type::Primitive(Primitive::Number)
    }

    pub fn string() -> Type {
        Type::Primitive(Primitive::String)
    }

    pub fn boolean() -> Type {
        Type::Primitive(Primitive::Boolean)
    }

    pub fn unit() -> Type {
        Type::Primitive(Primitive::Unit)
    }

    pub fn void() -> Type {
        Type::Primitive(Primitive::Void)
    }

    pub fn error() -> Type {
        Type::Primitive(Primitive::Error)
    }

    pub fn opaque() -> Type {
        Type::Primitive(Primitive::Opaque)
    }

    pub fn this() -> Type {
        Type::Primitive(Primitive::This)
    }

    pub fn type_of_types() -> Type {
        Type::Primitive(Primitive::Type)
    }

    pub fn enumerable(inner: Type) -> Type {
        Type::Enumerable(Box::new(inner))
    }

    pub fn map(inner: Type) -> Type {
        Type::Map(Box::new(inner))
    }

    pub fn resource(yields: Type) -> Type {
        Type::Resource(Box::new(yields))
    }

    /// Build the right-nested arrow `p1 -> p2 -> ... -> returns`.
    /// With no params this is `Lambda0(returns)`.
    pub fn lambda(params: Vec<Type>, returns: Type) -> Type {
        if params.is_empty() {
            return Type::Lambda0(Box::new(returns));
        }
        let mut ty = returns;
        for p in params.into_iter().rev() {
            ty = Type::Lambda1 {
                param: Box::new(p),
                returns: Box::new(ty),
            };
        }
        ty
    }

    pub fn is_primitive(&self, p: Primitive) -> bool {
        matches!(self, Type::Primitive(q) if *q == p)
    }

    pub fn is_error(&self) -> bool {
        self.is_primitive(Primitive::Error)
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Type::Ambiguous { .. })
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Type::Lambda0(_) | Type::Lambda1 { .. })
    }

    /// The return side of a callable, one arrow deep.
    pub fn returns(&self) -> Option<&Type> {
        match self {
            Type::Lambda0(r) => Some(r),
            Type::Lambda1 { returns, .. } => Some(returns),
            _ => None,
        }
    }

    /// Flattened parameter list of a curried arrow chain.
    pub fn params(&self) -> Vec<&Type> {
        let mut out = Vec::new();
        let mut cur = self;
        while let Type::Lambda1 { param, returns } = cur {
            out.push(param.as_ref());
            cur = returns;
        }
        out
    }

    /// Number of `Lambda1` arrows in the chain.
    pub fn arity(&self) -> usize {
        self.params().len()
    }

    /// The type after consuming `n` leading arrows. A leading `Lambda0`
    /// counts as one arrow when `n > 0`.
    pub fn strip_arrows(&self, n: usize) -> &Type {
        let mut cur = self;
        for _ in 0..n {
            match cur {
                Type::Lambda0(r) => cur = r,
                Type::Lambda1 { returns, .. } => cur = returns,
                _ => return cur,
            }
        }
        cur
    }

    /// The final return type of a callable: everything after the full
    /// arrow chain.
    pub fn final_return(&self) -> &Type {
        match self {
            Type::Lambda0(r) => r.final_return(),
            Type::Lambda1 { returns, .. } => returns.final_return(),
            other => other,
        }
    }

    /// Assignability: reflexive, structural on containers, contravariant on
    /// lambda parameters and covariant on returns, and honoring object
    /// parent chains.
    pub fn is_assignable_to(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        // Opaque accepts any value; only the runtime knows its shape.
        if other.is_primitive(Primitive::Opaque) {
            return true;
        }
        match (self, other) {
            (Type::Enumerable(a), Type::Enumerable(b)) => a.is_assignable_to(b),
            (Type::Map(a), Type::Map(b)) => a.is_assignable_to(b),
            (Type::Resource(a), Type::Resource(b)) => a.is_assignable_to(b),
            (Type::Lambda0(a), Type::Lambda0(b)) => a.is_assignable_to(b),
            (
                Type::Lambda1 {
                    param: pa,
                    returns: ra,
                },
                Type::Lambda1 {
                    param: pb,
                    returns: rb,
                },
            ) => pb.is_assignable_to(pa) && ra.is_assignable_to(rb),
            (Type::Object(a), Type::Object(b)) => a.extends(b),
            _ => false,
        }
    }

    /// Fixpoint structural rewrite. `f` is consulted at every node; when it
    /// returns `Some`, the replacement is taken as-is (no recursion into
    /// it), otherwise the rewrite recurses into children.
    pub fn transform<F>(&self, f: &F) -> Type
    where
        F: Fn(&Type) -> Option<Type>,
    {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        match self {
            Type::Primitive(_) | Type::Ambiguous { .. } => self.clone(),
            Type::Enumerable(inner) => Type::Enumerable(Box::new(inner.transform(f))),
            Type::Map(inner) => Type::Map(Box::new(inner.transform(f))),
            Type::Resource(inner) => Type::Resource(Box::new(inner.transform(f))),
            Type::Lambda0(r) => Type::Lambda0(Box::new(r.transform(f))),
            Type::Lambda1 { param, returns } => Type::Lambda1 {
                param: Box::new(param.transform(f)),
                returns: Box::new(returns.transform(f)),
            },
            Type::Object(obj) => Type::Object(obj.map_types(f)),
        }
    }

    /// True if any node in the type (including itself) is `Ambiguous`.
    pub fn contains_ambiguous(&self) -> bool {
        match self {
            Type::Ambiguous { .. } => true,
            Type::Primitive(_) => false,
            Type::Enumerable(i) | Type::Map(i) | Type::Resource(i) | Type::Lambda0(i) => {
                i.contains_ambiguous()
            }
            Type::Lambda1 { param, returns } => {
                param.contains_ambiguous() || returns.contains_ambiguous()
            }
            Type::Object(obj) => obj.properties.values().any(Type::contains_ambiguous),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "Primitive<{}>", p.name()),
            Type::Enumerable(i) => write!(f, "Enumerable<{i}>"),
            Type::Map(i) => write!(f, "Map<{i}>"),
            Type::Resource(i) => write!(f, "Resource<{i}>"),
            Type::Lambda0(r) => write!(f, "Lambda<-> {r}>"),
            Type::Lambda1 { param, returns } => write!(f, "Lambda<{param} -> {returns}>"),
            Type::Object(o) => write!(f, "Object<#{}>", o.id()),
            Type::Ambiguous { name } => write!(f, "Ambiguous<{name}>"),
        }
    }
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// A finalized object type: stable id, optional parent, and the linearized
/// insertion-ordered property map (parent properties first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectType {
    id: u64,
    parent: Option<Box<ObjectType>>,
    properties: IndexMap<String, Type>,
}

impl ObjectType {
    /// Reassemble a previously-finalized object, preserving its id. For
    /// deserializers only; fresh objects go through [`ObjectTypeBuilder`].
    pub fn from_parts(
        id: u64,
        parent: Option<ObjectType>,
        properties: IndexMap<String, Type>,
    ) -> ObjectType {
        ObjectType {
            id,
            parent: parent.map(Box::new),
            properties,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn parent(&self) -> Option<&ObjectType> {
        self.parent.as_deref()
    }

    /// Linearized property map; parent properties come first.
    pub fn properties(&self) -> &IndexMap<String, Type> {
        &self.properties
    }

    pub fn get_property(&self, name: &str) -> Option<&Type> {
        self.properties.get(name)
    }

    /// True if `self` is `other` or a descendant of it.
    pub fn extends(&self, other: &ObjectType) -> bool {
        if self.id == other.id {
            return true;
        }
        let mut cur = self.parent();
        while let Some(p) = cur {
            if p.id == other.id {
                return true;
            }
            cur = p.parent();
        }
        false
    }

    /// Rewrite every property type with `f`, preserving id and parent chain.
    fn map_types<F>(&self, f: &F) -> ObjectType
    where
        F: Fn(&Type) -> Option<Type>,
    {
        ObjectType {
            id: self.id,
            parent: self.parent.clone(),
            properties: self
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.transform(f)))
                .collect(),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object<#{}, #properties: {}>", self.id, self.properties.len())
    }
}

/// Phase-one object construction: collect property signatures, then freeze.
///
/// Callers must rewrite references to the object under construction into
/// `This` *before* defining the property (there is no way to reference a
/// not-yet-finalized object by value, so such references can only appear as
/// `Ambiguous` names, which the name analyzer maps to `This`).
#[derive(Debug, Default)]
pub struct ObjectTypeBuilder {
    parent: Option<ObjectType>,
    properties: IndexMap<String, Type>,
}

impl ObjectTypeBuilder {
    pub fn new() -> Self {
        ObjectTypeBuilder::default()
    }

    pub fn with_parent(parent: ObjectType) -> Self {
        ObjectTypeBuilder {
            parent: Some(parent),
            properties: IndexMap::new(),
        }
    }

    pub fn define_property(&mut self, name: impl Into<String>, ty: Type) {
        self.properties.insert(name.into(), ty);
    }

    /// Freeze into an [`ObjectType`] with a fresh monotonic id. Property
    /// maps are linearized: the parent's properties come first, own
    /// declarations follow (overriding on name clash).
    pub fn finalize(self) -> ObjectType {
        let id = NEXT_OBJECT_ID.fetch_add(1, Ordering::SeqCst);
        let mut properties = match &self.parent {
            Some(p) => p.properties.clone(),
            None => IndexMap::new(),
        };
        for (k, v) in self.properties {
            properties.insert(k, v);
        }
        ObjectType {
            id,
            parent: self.parent.map(Box::new),
            properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_type() -> ObjectType {
        let mut b = ObjectTypeBuilder::new();
        b.define_property("x", Type::number());
        b.define_property("y", Type::number());
        b.finalize()
    }

    #[test]
    fn lambda_builder_right_nests() {
        let ty = Type::lambda(vec![Type::number(), Type::number()], Type::string());
        match &ty {
            Type::Lambda1 { param, returns } => {
                assert_eq!(**param, Type::number());
                assert!(matches!(**returns, Type::Lambda1 { .. }));
            }
            other => panic!("expected Lambda1, got {other:?}"),
        }
        assert_eq!(ty.arity(), 2);
        assert_eq!(*ty.final_return(), Type::string());
    }

    #[test]
    fn assignability_is_reflexive() {
        let types = vec![
            Type::number(),
            Type::string(),
            Type::boolean(),
            Type::void(),
            Type::enumerable(Type::number()),
            Type::map(Type::string()),
            Type::resource(Type::opaque()),
            Type::lambda(vec![Type::number()], Type::number()),
            Type::Object(point_type()),
        ];
        for t in &types {
            assert!(t.is_assignable_to(t), "{t} not assignable to itself");
        }
    }

    #[test]
    fn lambda_params_are_contravariant() {
        let mut b = ObjectTypeBuilder::new();
        b.define_property("x", Type::number());
        let parent = b.finalize();
        let mut b = ObjectTypeBuilder::with_parent(parent.clone());
        b.define_property("y", Type::number());
        let child = b.finalize();

        // fn taking parent is usable where fn taking child is expected
        let takes_parent = Type::lambda(vec![Type::Object(parent.clone())], Type::void());
        let takes_child = Type::lambda(vec![Type::Object(child.clone())], Type::void());
        assert!(takes_parent.is_assignable_to(&takes_child));
        assert!(!takes_child.is_assignable_to(&takes_parent));
    }

    #[test]
    fn lambda_returns_are_covariant() {
        let mut b = ObjectTypeBuilder::new();
        b.define_property("x", Type::number());
        let parent = b.finalize();
        let mut b = ObjectTypeBuilder::with_parent(parent.clone());
        b.define_property("y", Type::number());
        let child = b.finalize();

        let returns_child = Type::lambda(vec![], Type::Object(child));
        let returns_parent = Type::lambda(vec![], Type::Object(parent));
        assert!(returns_child.is_assignable_to(&returns_parent));
        assert!(!returns_parent.is_assignable_to(&returns_child));
    }

    #[test]
    fn object_ids_are_monotonic_and_unique() {
        let a = point_type();
        let b = point_type();
        assert!(b.id() > a.id());
    }

    #[test]
    fn child_extends_parent_chain() {
        let grandparent = point_type();
        let parent = ObjectTypeBuilder::with_parent(grandparent.clone()).finalize();
        let mut b = ObjectTypeBuilder::with_parent(parent.clone());
        b.define_property("z", Type::number());
        let child = b.finalize();

        assert!(child.extends(&parent));
        assert!(child.extends(&grandparent));
        assert!(!grandparent.extends(&child));
        assert!(Type::Object(child).is_assignable_to(&Type::Object(grandparent)));
    }

    #[test]
    fn finalize_linearizes_parent_properties_first() {
        let parent = point_type();
        let mut b = ObjectTypeBuilder::with_parent(parent);
        b.define_property("label", Type::string());
        let child = b.finalize();
        let keys: Vec<&str> = child.properties().keys().map(|s| s.as_str()).collect();
        assert_eq!(keys, vec!["x", "y", "label"]);
    }

    #[test]
    fn transform_rewrites_ambiguous_to_this() {
        let ty = Type::enumerable(Type::Ambiguous {
            name: "Node".into(),
        });
        let rewritten = ty.transform(&|t| match t {
            Type::Ambiguous { name } if name == "Node" => Some(Type::this()),
            _ => None,
        });
        assert_eq!(rewritten, Type::enumerable(Type::this()));
        assert!(!rewritten.contains_ambiguous());
    }

    #[test]
    fn serde_roundtrip_object() {
        let obj = Type::Object(point_type());
        let json = serde_json::to_string(&obj).unwrap();
        let back: Type = serde_json::from_str(&json).unwrap();
        assert_eq!(obj, back);
    }
}
