//! Template node tree
//!
//! Parsing produces a tree of [`Node`]s; the compiler resolves inheritance
//! over it, the optimizer rewrites it and the renderer walks it. Nodes are
//! serializable because the compiled artifact *is* the node tree.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Literal output
    Text(String),
    /// `#[expr]`: escaped unless the value is marked raw
    Emit(Expr),
    If(IfNode),
    Foreach(ForeachNode),
    /// `#section name ... #endsection`
    Section(SectionNode),
    /// `#yield('name')` / `#yield('name', 'default')`
    Yield(YieldNode),
    /// `#connect('partial')`, replaced by the partial's nodes at compile time
    Connect(String),
    /// `#-- ... --#`, never rendered
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfNode {
    /// `#if` followed by any `#elseif`s, in order
    pub branches: Vec<Branch>,
    /// `#else` body
    pub otherwise: Option<Vec<Node>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub condition: Expr,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeachNode {
    pub iterable: Expr,
    /// `$k` in `$map as $k => $v`
    pub key: Option<String>,
    pub value: String,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionNode {
    pub name: String,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldNode {
    pub name: String,
    pub default: Option<String>,
}

/// Expression inside `#[...]`, a condition, or a directive argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    List(Vec<Expr>),
    Var(String),
    Field {
        base: Box<Expr>,
        field: String,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// Call to a template-global function
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// `expr | name(args)`
    Filter {
        expr: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// `~`, string concatenation
    Concat,
}

impl Expr {
    /// Visit this expression and every sub-expression, outermost first
    pub fn walk(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Literal(_) | Expr::Var(_) => {}
            Expr::List(items) => items.iter().for_each(|e| e.walk(f)),
            Expr::Field { base, .. } => base.walk(f),
            Expr::Index { base, index } => {
                base.walk(f);
                index.walk(f);
            }
            Expr::Call { args, .. } => args.iter().for_each(|e| e.walk(f)),
            Expr::Filter { expr, args, .. } => {
                expr.walk(f);
                args.iter().for_each(|e| e.walk(f));
            }
            Expr::Unary { expr, .. } => expr.walk(f),
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
        }
    }
}

impl Node {
    /// Visit every expression in this node, recursively
    pub fn walk_exprs(&self, f: &mut impl FnMut(&Expr)) {
        match self {
            Node::Text(_) | Node::Yield(_) | Node::Connect(_) | Node::Comment(_) => {}
            Node::Emit(expr) => expr.walk(f),
            Node::If(node) => {
                for branch in &node.branches {
                    branch.condition.walk(f);
                    branch.body.iter().for_each(|n| n.walk_exprs(f));
                }
                if let Some(otherwise) = &node.otherwise {
                    otherwise.iter().for_each(|n| n.walk_exprs(f));
                }
            }
            Node::Foreach(node) => {
                node.iterable.walk(f);
                node.body.iter().for_each(|n| n.walk_exprs(f));
            }
            Node::Section(node) => node.body.iter().for_each(|n| n.walk_exprs(f)),
        }
    }
}
