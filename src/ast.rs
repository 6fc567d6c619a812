// File: src/ast.rs
//
// Syntactic tree for Kestrel. Declarations are the root unit; the
// variants mirror the grammar. Trees are built by the parser, consumed
// by the compiler, and dropped before execution begins.

use crate::lexer::Token;

/// Whether an identifier / property / subscript position reads or
/// writes; the parser rewrites targets to `Store` and the compiler
/// picks the matching opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprContext {
    Load,
    Store,
}

pub struct Ast {
    pub body: Vec<Decl>,
}

pub enum Decl {
    Import(ImportDecl),
    Class(ClassDecl),
    Function(FunctionDecl),
    Variable(VariableDecl),
    Statement(Stmt),
}

pub struct ImportDecl {
    pub module_name: Expr,
    pub kind: ImportKind,
}

pub enum ImportKind {
    /// `import m;`
    All,
    /// `import m as alias;`
    As(Token),
    /// `import m for a, b;`
    For(Vec<Token>),
}

pub struct ClassDecl {
    pub identifier: Token,
    pub superclass: Option<Token>,
    pub methods: Vec<Method>,
}

pub struct Method {
    pub is_static: bool,
    pub function: NamedFunction,
}

pub struct FunctionDecl {
    pub function: NamedFunction,
}

pub struct NamedFunction {
    pub identifier: Token,
    pub function: FunctionLit,
    pub coroutine: bool,
}

pub struct FunctionLit {
    pub parameters: Vec<Token>,
    pub body: FunctionBody,
}

pub enum FunctionBody {
    Block(Vec<Decl>),
    Expression(Box<Expr>),
}

pub struct VariableDecl {
    pub target: VariableTarget,
    pub value: Option<Expr>,
}

pub enum VariableTarget {
    Single(Token),
    Unpack(Vec<Token>),
}

pub enum Stmt {
    For {
        initializer: Option<Box<Decl>>,
        condition: Option<Expr>,
        increment: Option<Expr>,
        body: Box<Stmt>,
    },
    ForIn {
        target: VariableTarget,
        collection: Expr,
        body: Box<Stmt>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        condition: Expr,
    },
    Break(Token),
    Continue(Token),
    When {
        control: Expr,
        entries: Vec<WhenEntry>,
        else_branch: Option<Box<Stmt>>,
    },
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    Return {
        keyword: Token,
        value: Option<Expr>,
    },
    Print(Expr),
    Block(Vec<Decl>),
    Expression(Expr),
}

pub struct WhenEntry {
    pub cases: Vec<Expr>,
    pub body: Stmt,
}

pub enum AssignmentTarget {
    Single(Box<Expr>),
    Unpack(Vec<Expr>),
}

pub enum Expr {
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    Property {
        object: Box<Expr>,
        name: Token,
        context: ExprContext,
        safe: bool,
    },
    Subscript {
        object: Box<Expr>,
        index: Box<Expr>,
        context: ExprContext,
        safe: bool,
    },
    Super {
        keyword: Token,
        method: Token,
    },
    Assignment {
        target: AssignmentTarget,
        value: Box<Expr>,
    },
    CompoundAssignment {
        target: Box<Expr>,
        op: Token,
        value: Box<Expr>,
    },
    Coroutine {
        keyword: Token,
        inner: Box<Expr>,
    },
    Yield {
        keyword: Token,
        value: Option<Box<Expr>>,
    },
    PrefixInc {
        op: Token,
        target: Box<Expr>,
    },
    PostfixInc {
        op: Token,
        target: Box<Expr>,
    },
    Logical {
        left: Box<Expr>,
        op: Token,
        right: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Elvis {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: Token,
        right: Box<Expr>,
    },
    Unary {
        op: Token,
        operand: Box<Expr>,
    },
    Literal(Token),
    StringInterp {
        parts: Vec<Expr>,
    },
    Range {
        begin: Box<Expr>,
        end: Box<Expr>,
        step: Option<Box<Expr>>,
    },
    Lambda(FunctionLit),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Tuple(Vec<Expr>),
    Identifier {
        name: Token,
        context: ExprContext,
    },
}
