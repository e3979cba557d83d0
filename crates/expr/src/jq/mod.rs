//! A jq subset: paths, iteration, pipes, alternatives, comparisons and the
//! common filter builtins. No variables, `reduce` or user definitions.

mod eval;
mod parser;

use crate::{Dialect, ExprError, Program, Scope, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Builtin {
    Select,
    Not,
    Length,
    Keys,
    Has,
    Map,
    First,
    FirstOf,
    Last,
    LastOf,
    Empty,
    Type,
    ToString,
    ToNumber,
    AsciiDowncase,
    AsciiUpcase,
    StartsWith,
    EndsWith,
    Contains,
    Any,
    AnyOf,
    All,
    AllOf,
    Add,
    Test,
    Now,
    Join,
    Split,
    ToEntries,
}

impl Builtin {
    pub(crate) fn lookup(name: &str, arity: usize) -> Option<Self> {
        use Builtin::*;
        let b = match (name, arity) {
            ("select", 1) => Select,
            ("not", 0) => Not,
            ("length", 0) => Length,
            ("keys", 0) => Keys,
            ("has", 1) => Has,
            ("map", 1) => Map,
            ("first", 0) => First,
            ("first", 1) => FirstOf,
            ("last", 0) => Last,
            ("last", 1) => LastOf,
            ("empty", 0) => Empty,
            ("type", 0) => Type,
            ("tostring", 0) => ToString,
            ("tonumber", 0) => ToNumber,
            ("ascii_downcase", 0) => AsciiDowncase,
            ("ascii_upcase", 0) => AsciiUpcase,
            ("startswith", 1) => StartsWith,
            ("endswith", 1) => EndsWith,
            ("contains", 1) => Contains,
            ("any", 0) => Any,
            ("any", 1) => AnyOf,
            ("all", 0) => All,
            ("all", 1) => AllOf,
            ("add", 0) => Add,
            ("test", 1) => Test,
            ("now", 0) => Now,
            ("join", 1) => Join,
            ("split", 1) => Split,
            ("to_entries", 0) => ToEntries,
            _ => return None,
        };
        Some(b)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ObjKey {
    Static(String),
    Dynamic(Ast),
}

#[derive(Debug, Clone)]
pub(crate) enum Ast {
    Identity,
    Recurse,
    Literal(Value),
    Field(Box<Ast>, String),
    Index(Box<Ast>, Box<Ast>),
    Slice(Box<Ast>, Option<Box<Ast>>, Option<Box<Ast>>),
    Iterate(Box<Ast>),
    Try(Box<Ast>),
    Pipe(Box<Ast>, Box<Ast>),
    Comma(Box<Ast>, Box<Ast>),
    Alt(Box<Ast>, Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Binary(BinOp, Box<Ast>, Box<Ast>),
    Neg(Box<Ast>),
    If(Box<Ast>, Box<Ast>, Option<Box<Ast>>),
    Array(Option<Box<Ast>>),
    Object(Vec<(ObjKey, Ast)>),
    Call(Builtin, Vec<Ast>),
}

/// Compiled jq filter.
#[derive(Debug, Clone)]
pub struct JqProgram {
    source: String,
    ast: Ast,
}

impl JqProgram {
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let ast = parser::parse(source)?;
        Ok(Self { source: source.to_string(), ast })
    }
}

impl Program for JqProgram {
    fn dialect(&self) -> Dialect { Dialect::Jq }

    fn source(&self) -> &str { &self.source }

    fn evaluate(&self, scope: &Scope<'_>) -> Result<Vec<Value>, ExprError> {
        let mut out = Vec::new();
        eval::eval(&self.ast, scope.document, scope, &mut out)?;
        Ok(out)
    }
}
