//! The range expression AST. Immutable after parsing; the evaluator returns
//! result vectors instead of annotating the tree.

/// An expression node. Set operators are left-associative; unary prefixes
/// bind tighter; key expansion binds tightest of all the graph operators.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// An empty production, e.g. a missing brace side.
    Null,

    /// A bare name.
    Word(String),

    /// A quoted string.
    Literal(String),

    /// A `/…/` pattern. `positive` flips when the pattern is used on the
    /// right-hand side of a difference.
    Regex { pattern: String, positive: bool },

    /// `a , b` — set union.
    Union(Box<Expr>, Box<Expr>),

    /// `a - b` — set difference, or regex rejection filter.
    Difference(Box<Expr>, Box<Expr>),

    /// `a & b` — set intersection, or regex acceptance filter.
    Intersection(Box<Expr>, Box<Expr>),

    /// `lhs..rhs` — numeric sequence expansion.
    Sequence { lhs: String, rhs: String },

    /// `%a` — expand to forward edges.
    Expand(Box<Expr>),

    /// `*a` — expand to reverse edges.
    GetCluster(Box<Expr>),

    /// `^a` — nearest ADMIN_NODE values up the reverse graph.
    Admin(Box<Expr>),

    /// `!a` — preserved in the tree; no core evaluation.
    Negate(Box<Expr>),

    /// `( a )` — grouping, evaluation-transparent.
    Group(Box<Expr>),

    /// `left{center}right` — cartesian concatenation; empty sides act as
    /// identity.
    BraceExpand { left: Box<Expr>, center: Box<Expr>, right: Box<Expr> },

    /// The `;`-separated argument list of a function call.
    FunctionArguments(Vec<Expr>),

    /// `fn(a; b)` — a registered range function applied to argument vectors.
    Function { name: String, args: Box<Expr> },

    /// `a:KEY` — tag values of KEY on each node of `a`; `a:KEYS` lists the
    /// tag keys themselves.
    KeyExpand { lhs: Box<Expr>, key: String },
}

impl Expr {
    pub fn word(s: impl Into<String>) -> Self {
        Expr::Word(s.into())
    }

    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }
}
