//! The Swarm abstract syntax tree.
//!
//! One variant per language construct. Every node carries a [`Position`];
//! expression nodes carry a `ty` slot filled by type analysis, and
//! identifier-bearing nodes carry an optional [`SymbolId`] attached by name
//! analysis. The whole tree is serde-serializable: the out-of-scope frontend
//! hands programs to this crate as JSON.

use serde::{Deserialize, Serialize};

use crate::position::Position;
use crate::symbol::SymbolId;
use crate::types::{ObjectType, Type};

/// A whole compilation unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub pos: Position,
    pub body: Vec<Statement>,
}

/// Statement-level constructs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Statement {
    Expression(ExpressionStatement),
    VariableDeclaration(VariableDeclaration),
    UninitializedVariableDeclaration(UninitializedVariableDeclaration),
    Return(ReturnStatement),
    Continue { pos: Position },
    Break { pos: Position },
    If(IfStatement),
    While(WhileStatement),
    Enumerate(EnumerateStatement),
    With(WithStatement),
    Include(IncludeStatement),
}

impl Statement {
    pub fn pos(&self) -> &Position {
        match self {
            Statement::Expression(s) => &s.pos,
            Statement::VariableDeclaration(s) => &s.pos,
            Statement::UninitializedVariableDeclaration(s) => &s.pos,
            Statement::Return(s) => &s.pos,
            Statement::Continue { pos } | Statement::Break { pos } => pos,
            Statement::If(s) => &s.pos,
            Statement::While(s) => &s.pos,
            Statement::Enumerate(s) => &s.pos,
            Statement::With(s) => &s.pos,
            Statement::Include(s) => &s.pos,
        }
    }

    /// Block statements introduce a nested statement list with their own
    /// control-flow story (if/while/enumerate/with).
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            Statement::If(_) | Statement::While(_) | Statement::Enumerate(_) | Statement::With(_)
        )
    }

    /// The nested statement list of a block statement.
    pub fn block_body(&self) -> Option<&[Statement]> {
        match self {
            Statement::If(s) => Some(&s.body),
            Statement::While(s) => Some(&s.body),
            Statement::Enumerate(s) => Some(&s.body),
            Statement::With(s) => Some(&s.body),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionStatement {
    pub pos: Position,
    pub expr: Expression,
}

/// `[shared] <type> <id> = <value>;`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub pos: Position,
    pub shared: bool,
    pub type_node: TypeLiteral,
    pub id: Identifier,
    pub value: Expression,
}

/// `<type> <id>;` — only legal inside type bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UninitializedVariableDeclaration {
    pub pos: Position,
    pub type_node: TypeLiteral,
    pub id: Identifier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnStatement {
    pub pos: Position,
    pub value: Option<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfStatement {
    pub pos: Position,
    pub condition: Expression,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhileStatement {
    pub pos: Position,
    pub condition: Expression,
    pub body: Vec<Statement>,
}

/// `enumerate <e> as <local>[, <index>] { ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumerateStatement {
    pub pos: Position,
    pub enumerable: Expression,
    pub shared: bool,
    pub local: Identifier,
    pub index: Option<Identifier>,
    pub body: Vec<Statement>,
}

/// `with <r> as <local> { ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithStatement {
    pub pos: Position,
    pub resource: Expression,
    pub shared: bool,
    pub local: Identifier,
    pub body: Vec<Statement>,
}

/// `include <path>;` — resolved by the frontend; inert past parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeStatement {
    pub pos: Position,
    pub path: String,
}

/// Expression-level constructs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expression {
    Identifier(Identifier),
    NumberLiteral(NumberLiteral),
    StringLiteral(StringLiteral),
    BooleanLiteral(BooleanLiteral),
    TypeLiteral(TypeLiteral),
    EnumerationLiteral(EnumerationLiteral),
    MapLiteral(MapLiteral),
    EnumerableAccess(EnumerableAccess),
    EnumerableAppend(EnumerableAppend),
    MapAccess(MapAccess),
    ClassAccess(ClassAccess),
    Assign(AssignExpression),
    Function(Box<FunctionNode>),
    TypeBody(Box<TypeBodyNode>),
    Call(CallExpression),
    DeferCall(DeferCall),
    Binary(BinaryExpression),
    Unary(UnaryExpression),
}

impl Expression {
    pub fn pos(&self) -> &Position {
        match self {
            Expression::Identifier(e) => &e.pos,
            Expression::NumberLiteral(e) => &e.pos,
            Expression::StringLiteral(e) => &e.pos,
            Expression::BooleanLiteral(e) => &e.pos,
            Expression::TypeLiteral(e) => &e.pos,
            Expression::EnumerationLiteral(e) => &e.pos,
            Expression::MapLiteral(e) => &e.pos,
            Expression::EnumerableAccess(e) => &e.pos,
            Expression::EnumerableAppend(e) => &e.pos,
            Expression::MapAccess(e) => &e.pos,
            Expression::ClassAccess(e) => &e.pos,
            Expression::Assign(e) => &e.pos,
            Expression::Function(e) => &e.pos,
            Expression::TypeBody(e) => &e.pos,
            Expression::Call(e) => &e.pos,
            Expression::DeferCall(e) => &e.pos,
            Expression::Binary(e) => &e.pos,
            Expression::Unary(e) => &e.pos,
        }
    }

    /// The post-analysis type of this expression, if the type walk has run.
    pub fn ty(&self) -> Option<&Type> {
        match self {
            Expression::Identifier(e) => e.ty.as_ref(),
            Expression::NumberLiteral(e) => e.ty.as_ref(),
            Expression::StringLiteral(e) => e.ty.as_ref(),
            Expression::BooleanLiteral(e) => e.ty.as_ref(),
            Expression::TypeLiteral(e) => e.ty.as_ref(),
            Expression::EnumerationLiteral(e) => e.ty.as_ref(),
            Expression::MapLiteral(e) => e.ty.as_ref(),
            Expression::EnumerableAccess(e) => e.ty.as_ref(),
            Expression::EnumerableAppend(e) => e.ty.as_ref(),
            Expression::MapAccess(e) => e.ty.as_ref(),
            Expression::ClassAccess(e) => e.ty.as_ref(),
            Expression::Assign(e) => e.ty.as_ref(),
            Expression::Function(e) => e.ty.as_ref(),
            Expression::TypeBody(e) => e.ty.as_ref(),
            Expression::Call(e) => e.ty.as_ref(),
            Expression::DeferCall(e) => e.ty.as_ref(),
            Expression::Binary(e) => e.ty.as_ref(),
            Expression::Unary(e) => e.ty.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    pub pos: Position,
    pub name: String,
    /// Attached by name analysis.
    pub symbol: Option<SymbolId>,
    pub ty: Option<Type>,
}

impl Identifier {
    pub fn new(pos: Position, name: impl Into<String>) -> Self {
        Identifier {
            pos,
            name: name.into(),
            symbol: None,
            ty: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberLiteral {
    pub pos: Position,
    pub value: f64,
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringLiteral {
    pub pos: Position,
    pub value: String,
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BooleanLiteral {
    pub pos: Position,
    pub value: bool,
    pub ty: Option<Type>,
}

/// A type used as a value or annotation. `value` may contain `Ambiguous`
/// nodes until name analysis disambiguates it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeLiteral {
    pub pos: Position,
    pub value: Type,
    pub ty: Option<Type>,
}

impl TypeLiteral {
    pub fn new(pos: Position, value: Type) -> Self {
        TypeLiteral {
            pos,
            value,
            ty: None,
        }
    }
}

/// `[a, b, c]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumerationLiteral {
    pub pos: Position,
    pub actuals: Vec<Expression>,
    pub ty: Option<Type>,
}

/// `{ k: v, ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapLiteral {
    pub pos: Position,
    pub entries: Vec<MapEntry>,
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapEntry {
    pub pos: Position,
    pub id: Identifier,
    pub value: Expression,
    pub ty: Option<Type>,
}

/// `xs[i]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumerableAccess {
    pub pos: Position,
    pub path: Box<Expression>,
    pub index: Box<Expression>,
    pub ty: Option<Type>,
}

/// `xs[]` as an assignment destination — append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumerableAppend {
    pub pos: Position,
    pub path: Box<Expression>,
    pub ty: Option<Type>,
}

/// `m.key` where the path is map-typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapAccess {
    pub pos: Position,
    pub path: Box<Expression>,
    pub end: Identifier,
    pub ty: Option<Type>,
}

/// `obj.prop` where the path is object-typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassAccess {
    pub pos: Position,
    pub path: Box<Expression>,
    pub end: Identifier,
    pub ty: Option<Type>,
}

/// `dest = value` (also the desugared body of a variable declaration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignExpression {
    pub pos: Position,
    pub dest: Box<Expression>,
    pub value: Box<Expression>,
    pub ty: Option<Type>,
}

/// One formal parameter: its annotated type and name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formal {
    pub type_node: TypeLiteral,
    pub id: Identifier,
}

/// A first-class function literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionNode {
    pub pos: Position,
    pub formals: Vec<Formal>,
    /// The full (curried) lambda type of the literal.
    pub type_node: TypeLiteral,
    pub body: Vec<Statement>,
    /// Free symbols referenced by the body but declared outside it, in
    /// capture order. Filled by type analysis; consumed by lowering.
    pub used_symbols: Vec<SymbolId>,
    /// The symbol of the name this literal is declared to, when it is the
    /// direct RHS of a declaration (enables recursion via symbol remap).
    pub var_decld_to: Option<SymbolId>,
    pub ty: Option<Type>,
}

impl FunctionNode {
    /// The return type after consuming every declared formal (a nullary
    /// literal still strips its single `Lambda0` arrow).
    pub fn return_type(&self) -> &Type {
        self.type_node.value.strip_arrows(self.formals.len().max(1))
    }
}

/// `type { ...decls... constructor(...) => {...} }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeBodyNode {
    pub pos: Position,
    /// `use`d parent types, in order. Single inheritance: at most one is
    /// accepted past name analysis.
    pub parents: Vec<Identifier>,
    /// VariableDeclaration / UninitializedVariableDeclaration members.
    pub declarations: Vec<Statement>,
    pub constructors: Vec<ConstructorNode>,
    /// The finalized object type, set by name analysis.
    pub value: Option<ObjectType>,
    pub ty: Option<Type>,
}

/// A constructor inside a type body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructorNode {
    pub pos: Position,
    /// Generated function-region name (`CONSTRUCTOR_k`), assigned by name
    /// analysis.
    pub name: String,
    pub func: FunctionNode,
    /// `from Parent(...)` calls preceding the body.
    pub parent_constructors: Vec<CallExpression>,
    /// The owning object type, set by name analysis.
    pub part_of: Option<ObjectType>,
}

/// The constructor a call expression resolved to, recorded by type analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructorBinding {
    pub name: String,
    pub part_of: ObjectType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallExpression {
    pub pos: Position,
    pub func: Box<Expression>,
    pub args: Vec<Expression>,
    /// Set by type analysis when the callee is a type-valued identifier.
    pub constructor: Option<ConstructorBinding>,
    pub ty: Option<Type>,
}

/// `defer f(x)` — enqueue instead of executing inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferCall {
    pub pos: Position,
    pub call: CallExpression,
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    Equals,
    NotEquals,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    Power,
    NthRoot,
    EnumConcat,
    Comparison(ComparisonOp),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryExpression {
    pub pos: Position,
    pub op: BinaryOp,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
    /// Set by type analysis when `Add` is string concatenation.
    pub concatenation: bool,
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnaryExpression {
    pub pos: Position,
    pub op: UnaryOp,
    pub exp: Box<Expression>,
    pub ty: Option<Type>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p() -> Position {
        Position::new("t.swarm", 1, 1, 1, 10)
    }

    #[test]
    fn block_statements_are_blocks() {
        let cond = Expression::BooleanLiteral(BooleanLiteral {
            pos: p(),
            value: true,
            ty: None,
        });
        let stmt = Statement::If(IfStatement {
            pos: p(),
            condition: cond,
            body: vec![],
        });
        assert!(stmt.is_block());
        assert_eq!(stmt.block_body().unwrap().len(), 0);
        assert!(!Statement::Break { pos: p() }.is_block());
    }

    #[test]
    fn function_return_type_strips_formals() {
        let ty = Type::lambda(vec![Type::number(), Type::number()], Type::number());
        let func = FunctionNode {
            pos: p(),
            formals: vec![
                Formal {
                    type_node: TypeLiteral::new(p(), Type::number()),
                    id: Identifier::new(p(), "a"),
                },
                Formal {
                    type_node: TypeLiteral::new(p(), Type::number()),
                    id: Identifier::new(p(), "b"),
                },
            ],
            type_node: TypeLiteral::new(p(), ty),
            body: vec![],
            used_symbols: vec![],
            var_decld_to: None,
            ty: None,
        };
        assert_eq!(*func.return_type(), Type::number());
    }

    #[test]
    fn nullary_function_return_type_strips_lambda0() {
        let func = FunctionNode {
            pos: p(),
            formals: vec![],
            type_node: TypeLiteral::new(p(), Type::lambda(vec![], Type::string())),
            body: vec![],
            used_symbols: vec![],
            var_decld_to: None,
            ty: None,
        };
        assert_eq!(*func.return_type(), Type::string());
    }

    #[test]
    fn serde_roundtrip_program() {
        let program = Program {
            pos: p(),
            body: vec![Statement::Expression(ExpressionStatement {
                pos: p(),
                expr: Expression::Binary(BinaryExpression {
                    pos: p(),
                    op: BinaryOp::Add,
                    left: Box::new(Expression::NumberLiteral(NumberLiteral {
                        pos: p(),
                        value: 2.0,
                        ty: None,
                    })),
                    right: Box::new(Expression::NumberLiteral(NumberLiteral {
                        pos: p(),
                        value: 3.0,
                        ty: None,
                    })),
                    concatenation: false,
                    ty: None,
                }),
            })],
        };
        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        let json2 = serde_json::to_string(&back).unwrap();
        assert_eq!(json, json2);
    }
}
