//! Stagehand expressions: two query dialects over one normalized value model.
//!
//! - `jq`: path/filter queries producing zero or more results per input
//! - `cel`: typed, side-effect free expressions producing exactly one result
//!
//! Both compile once into a [`Program`] and are evaluated many times against a
//! [`Scope`]. [`ProgramCache`] dedupes compilation by source text.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

mod cache;
pub mod cel;
pub mod duration;
mod error;
mod lexer;
pub mod jq;
pub mod quantity;
mod value;

pub use cache::ProgramCache;
pub use error::ExprError;
pub use quantity::Quantity;
pub use value::Value;

/// Query language of a compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Jq,
    Cel,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Jq => f.write_str("jq"),
            Dialect::Cel => f.write_str("cel"),
        }
    }
}

/// Evaluation input: the document plus ambient bindings.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub document: &'a Value,
    /// Lowercased resource kind; CEL binds the document under this name too.
    pub kind: Option<&'a str>,
    pub now: DateTime<Utc>,
    /// Source for CEL `Rand()`, uniform in `[0, 1)`.
    pub rand: Option<&'a dyn Fn() -> f64>,
}

impl fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("kind", &self.kind)
            .field("now", &self.now)
            .field("rand", &self.rand.map(|_| "injected"))
            .finish_non_exhaustive()
    }
}

impl<'a> Scope<'a> {
    pub fn new(document: &'a Value) -> Self {
        Self { document, kind: None, now: Utc::now(), rand: None }
    }

    pub fn with_rand(mut self, rand: &'a dyn Fn() -> f64) -> Self {
        self.rand = Some(rand);
        self
    }

    /// Next `Rand()` value; the thread RNG when nothing was injected.
    pub fn draw(&self) -> f64 {
        match self.rand {
            Some(f) => f(),
            None => rand::random::<f64>(),
        }
    }

    pub fn with_kind(mut self, kind: &'a str) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// A compiled query, shareable across threads.
pub trait Program: Send + Sync + fmt::Debug {
    fn dialect(&self) -> Dialect;
    fn source(&self) -> &str;
    /// Evaluate against the scope. jq may yield any number of values, CEL yields one.
    fn evaluate(&self, scope: &Scope<'_>) -> Result<Vec<Value>, ExprError>;
}

/// Compile `source` in the given dialect without caching.
pub fn compile(dialect: Dialect, source: &str) -> Result<Arc<dyn Program>, ExprError> {
    match dialect {
        Dialect::Jq => Ok(Arc::new(jq::JqProgram::compile(source)?)),
        Dialect::Cel => Ok(Arc::new(cel::CelProgram::compile(source)?)),
    }
}

pub mod prelude {
    pub use super::{compile, Dialect, ExprError, Program, ProgramCache, Quantity, Scope, Value};
}
