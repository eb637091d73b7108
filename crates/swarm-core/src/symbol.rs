//! Semantic symbols and the arena that owns them.
//!
//! Name analysis allocates one [`SemanticSymbol`] per declared name and
//! attaches its [`SymbolId`] to the identifier nodes that reference it. The
//! arena is carried through the rest of the pipeline; the UUID on each symbol
//! disambiguates same-named variables from different scopes in lowered
//! location names (`var_<name>_<uuid>`).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::position::Position;
use crate::types::{ObjectType, Type};

/// Index of a symbol in the [`SymbolArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sym{}", self.0)
    }
}

/// The kinds of things a name may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    Variable,
    Function,
    ObjectProperty,
    PrologueFunction,
}

/// The concrete value bound to a `type`-typed variable, used to resolve
/// `Ambiguous` type references and constructor calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeValue {
    /// `type T = <existing type>` — a plain alias.
    Alias(Type),
    /// `type T = type { ... }` — an object with constructors.
    Object(ObjectTypeValue),
}

impl TypeValue {
    pub fn as_type(&self) -> Type {
        match self {
            TypeValue::Alias(t) => t.clone(),
            TypeValue::Object(o) => Type::Object(o.object.clone()),
        }
    }
}

/// A finalized object type together with its constructor signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectTypeValue {
    pub object: ObjectType,
    pub constructors: Vec<ConstructorSig>,
    /// Transitive property names with no default value. A subtype that does
    /// not call this type's constructor must prove it assigns these.
    pub uninitialized: Vec<String>,
}

/// Enough of a constructor to dispatch a call: its generated function name
/// and the (disambiguated) parameter types, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructorSig {
    pub name: String,
    pub params: Vec<Type>,
}

/// A name identified in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticSymbol {
    pub uuid: Uuid,
    pub name: String,
    /// `None` only for implicitly-typed block locals (enumerate/with) until
    /// type analysis fills them in.
    pub ty: Option<Type>,
    pub declared_at: Position,
    pub shared: bool,
    pub kind: SymbolKind,
    /// For prologue functions: the VM-level function name the identifier
    /// lowers to.
    pub svi_name: Option<String>,
    /// For `type`-typed variables: the bound type value.
    pub type_value: Option<TypeValue>,
    /// For object properties: the owning object type.
    pub property_of: Option<ObjectType>,
}

impl SemanticSymbol {
    pub fn is_prologue(&self) -> bool {
        self.kind == SymbolKind::PrologueFunction
    }

    pub fn is_property(&self) -> bool {
        self.kind == SymbolKind::ObjectProperty
    }

    /// The bound object type value, when this symbol names an object type.
    pub fn object_type(&self) -> Option<&ObjectTypeValue> {
        match &self.type_value {
            Some(TypeValue::Object(o)) => Some(o),
            _ => None,
        }
    }
}

impl fmt::Display for SemanticSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SemanticSymbol<name: {}, type: {}, declaredAt: {}, uuid: {}>",
            self.name,
            self.ty
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "(unset)".into()),
            self.declared_at.start(),
            self.uuid
        )
    }
}

/// Owns every symbol allocated during analysis.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SymbolArena {
    symbols: Vec<SemanticSymbol>,
}

impl SymbolArena {
    pub fn new() -> Self {
        SymbolArena::default()
    }

    pub fn alloc(
        &mut self,
        name: impl Into<String>,
        ty: Option<Type>,
        declared_at: Position,
        shared: bool,
        kind: SymbolKind,
    ) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(SemanticSymbol {
            uuid: Uuid::new_v4(),
            name: name.into(),
            ty,
            declared_at,
            shared,
            kind,
            svi_name: None,
            type_value: None,
            property_of: None,
        });
        id
    }

    pub fn get(&self, id: SymbolId) -> &SemanticSymbol {
        &self.symbols[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut SemanticSymbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &SemanticSymbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_assigns_sequential_ids_and_unique_uuids() {
        let mut arena = SymbolArena::new();
        let a = arena.alloc(
            "x",
            Some(Type::number()),
            Position::new("t", 1, 1, 1, 2),
            false,
            SymbolKind::Variable,
        );
        let b = arena.alloc(
            "x",
            Some(Type::number()),
            Position::new("t", 2, 1, 2, 2),
            true,
            SymbolKind::Variable,
        );
        assert_eq!(a, SymbolId(0));
        assert_eq!(b, SymbolId(1));
        assert_ne!(arena.get(a).uuid, arena.get(b).uuid);
        assert!(arena.get(b).shared);
    }

    #[test]
    fn object_type_accessor_distinguishes_alias() {
        let mut arena = SymbolArena::new();
        let id = arena.alloc(
            "T",
            Some(Type::type_of_types()),
            Position::new("t", 1, 1, 1, 2),
            false,
            SymbolKind::Variable,
        );
        arena.get_mut(id).type_value = Some(TypeValue::Alias(Type::number()));
        assert!(arena.get(id).object_type().is_none());
        assert_eq!(
            arena.get(id).type_value.as_ref().unwrap().as_type(),
            Type::number()
        );
    }
}
