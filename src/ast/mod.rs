use serde::{Deserialize, Serialize};

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Self {
        Span { start: r.start, end: r.end }
    }
}

/// Wraps a node with its source span. Transparent to serde (serializes as inner node only).
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Spanned { node, span }
    }

    pub fn unknown(node: T) -> Self {
        Spanned { node, span: Span::UNKNOWN }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

impl<T> std::ops::DerefMut for Spanned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.node
    }
}

impl<T: Serialize> Serialize for Spanned<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Spanned<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(|node| Spanned { node, span: Span::UNKNOWN })
    }
}

// ---- Core AST types ----

pub type Stmt = Spanned<StmtKind>;
pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclKind {
    Const,
    Let,
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `const name = value;` / `let name = value;`
    Declaration {
        kind: DeclKind,
        name: String,
        value: Expr,
    },

    /// `function name(params) { body }`
    Function {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },

    /// `return expr;` or bare `return;`
    Return(Option<Expr>),

    /// `if (test) { .. } else { .. }`; an `else if` chain nests in `alternate`
    If {
        test: Expr,
        consequent: Vec<Stmt>,
        alternate: Option<Vec<Stmt>>,
    },

    /// The single loop primitive. `latch` runs inside the iteration environment
    /// after the body (and on `continue`), `update` runs after it is popped.
    /// Plain `while` loops leave both empty; `for` loops are lowered into this.
    While {
        test: Expr,
        body: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        latch: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        update: Option<Expr>,
    },

    /// `for (init; test; update) { body }`, removed by desugaring
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Vec<Stmt>,
    },

    /// `for (const name of iterable) { body }`, parsed only to be rejected
    ForOf {
        name: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },

    Break,
    Continue,

    /// `{ ... }`
    Block(Vec<Stmt>),

    /// Expression as statement
    Expr(Expr),
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),

    /// Variable reference
    Ident(String),

    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `&&` / `||`, short-circuiting
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    /// `test ? consequent : alternate`
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },

    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },

    /// `object[index]`
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },

    /// `object.property`
    Member {
        object: Box<Expr>,
        property: String,
    },

    /// `target = value`; target is an identifier, index or member expression
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },

    /// `[a, b, c]`
    Array(Vec<Expr>),

    /// `{ key: value }`
    Object(Vec<(String, Expr)>),

    /// Arrow function or function expression
    Lambda {
        params: Vec<String>,
        body: LambdaBody,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LambdaBody {
    /// `x => expr`
    Expr(Box<Expr>),
    /// `x => { stmts }` or `function (x) { stmts }`
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Subtract => "-",
            BinOp::Multiply => "*",
            BinOp::Divide => "/",
            BinOp::Modulo => "%",
            BinOp::Equals => "===",
            BinOp::NotEquals => "!==",
            BinOp::GreaterThan => ">",
            BinOp::LessThan => "<",
            BinOp::GreaterOrEqual => ">=",
            BinOp::LessOrEqual => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// A complete program is a list of top-level statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub body: Vec<Stmt>,
    #[serde(skip)]
    pub source: Option<String>,
}

impl StmtKind {
    /// Short name used in diagnostics for unsupported or out-of-chapter nodes.
    pub fn describe(&self) -> &'static str {
        match self {
            StmtKind::Declaration { kind: DeclKind::Const, .. } => "const declaration",
            StmtKind::Declaration { kind: DeclKind::Let, .. } => "let declaration",
            StmtKind::Function { .. } => "function declaration",
            StmtKind::Return(_) => "return statement",
            StmtKind::If { .. } => "if statement",
            StmtKind::While { .. } => "while loop",
            StmtKind::For { .. } => "for loop",
            StmtKind::ForOf { .. } => "for-of loop",
            StmtKind::Break => "break",
            StmtKind::Continue => "continue",
            StmtKind::Block(_) => "block",
            StmtKind::Expr(_) => "expression statement",
        }
    }
}

impl ExprKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ExprKind::Literal(Literal::Null) => "null literal",
            ExprKind::Literal(_) => "literal",
            ExprKind::Ident(_) => "identifier",
            ExprKind::Binary { .. } => "binary operator",
            ExprKind::Logical { .. } => "logical operator",
            ExprKind::Unary { .. } => "unary operator",
            ExprKind::Conditional { .. } => "conditional expression",
            ExprKind::Call { .. } => "call",
            ExprKind::Index { .. } => "array access",
            ExprKind::Member { .. } => "property access",
            ExprKind::Assign { .. } => "assignment",
            ExprKind::Array(_) => "array literal",
            ExprKind::Object(_) => "object literal",
            ExprKind::Lambda { .. } => "function expression",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_unknown_is_zero() {
        assert_eq!(Span::UNKNOWN, Span { start: 0, end: 0 });
    }

    #[test]
    fn span_merge_takes_extremes() {
        let a = Span { start: 5, end: 10 };
        let b = Span { start: 2, end: 15 };
        assert_eq!(a.merge(b), Span { start: 2, end: 15 });
    }

    #[test]
    fn span_from_range() {
        assert_eq!(Span::from(3..9), Span::new(3, 9));
    }

    #[test]
    fn spanned_deref() {
        let s = Spanned::new(42, Span { start: 0, end: 2 });
        assert_eq!(*s, 42);
    }

    #[test]
    fn spanned_serialize_transparent() {
        let s = Spanned::new(42i32, Span { start: 5, end: 10 });
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn spanned_deserialize_transparent() {
        let s: Spanned<i32> = serde_json::from_str("42").unwrap();
        assert_eq!(s.node, 42);
        assert_eq!(s.span, Span::UNKNOWN);
    }

    #[test]
    fn expr_serializes_without_span() {
        let expr = Expr::new(ExprKind::Literal(Literal::Number(3.5)), Span::new(0, 3));
        let json = serde_json::to_string(&expr).unwrap();
        assert!(json.contains("Number"));
        assert!(!json.contains("span"));
    }

    #[test]
    fn plain_while_omits_latch_and_update() {
        let stmt = Stmt::unknown(StmtKind::While {
            test: Expr::unknown(ExprKind::Literal(Literal::Bool(false))),
            body: vec![],
            latch: vec![],
            update: None,
        });
        let json = serde_json::to_string(&stmt).unwrap();
        assert!(!json.contains("latch"));
        assert!(!json.contains("update"));
    }

    #[test]
    fn program_source_not_serialized() {
        let prog = Program {
            body: vec![Stmt::unknown(StmtKind::Break)],
            source: Some("break;".to_string()),
        };
        let json = serde_json::to_string(&prog).unwrap();
        assert!(!json.contains("source"));
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body.len(), 1);
        assert!(back.source.is_none());
    }

    #[test]
    fn describe_names_unsupported_nodes() {
        let member = ExprKind::Member {
            object: Box::new(Expr::unknown(ExprKind::Ident("o".into()))),
            property: "x".into(),
        };
        assert_eq!(member.describe(), "property access");
        assert_eq!(StmtKind::Break.describe(), "break");
    }
}
