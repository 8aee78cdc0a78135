use crate::value::Value;

/// Byte-offset range into the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// First byte of the construct
    pub start: usize,
    /// One past its last byte
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Wraps an AST node with the source range it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    /// Binding strength; higher binds tighter. Every level is left associative.
    pub fn precedence(&self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne => 3,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div | BinOp::Mod => 6,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!x`
    Not,
    /// `-x`
    Neg,
}

pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Number, string or bool literal
    Literal(Value),
    /// Loop binding or caller variable
    Var(String),
    /// `[a, b, c]`
    Tuple(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `test ? then : otherwise`
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `collection[index]`
    Index(Box<Expr>, Box<Expr>),
    /// `name(args...)`, resolved against the function table at evaluation
    Call(String, Vec<Expr>),
}

pub type Node = Spanned<NodeKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Literal text, already unescaped and whitespace-stripped
    Text(String),
    /// `${ expr }`
    Interpolation(Expr),
    /// `%{ for [key,] value in collection }...%{ endfor }`
    For {
        /// Name bound to the zero-based index, when given
        key: Option<String>,
        /// Name bound to each element
        value: String,
        /// Must evaluate to a tuple
        collection: Expr,
        body: Vec<Node>,
    },
    /// `%{ if test }...%{ else }...%{ endif }`
    If {
        /// Must evaluate to a bool
        test: Expr,
        then_body: Vec<Node>,
        /// Empty when there is no `%{ else }`
        else_body: Vec<Node>,
    },
}

/// A parsed template. Immutable once built, so a single instance can be
/// rendered by any number of threads at once.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub nodes: Vec<Node>,
}
