use std::cell::RefCell;
use std::sync::Arc;

use rand::Rng;

use stagehand_core::config::{ExprSource, ExpressionFrom};
use stagehand_expr::{Dialect, ExprError, Program, ProgramCache, Scope, Value};

use crate::error::SpecError;

/// A query compiled through the process-wide program cache.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    program: Arc<dyn Program>,
}

impl CompiledExpr {
    pub fn compile(field: &str, source: &ExprSource) -> Result<Self, SpecError> {
        let (dialect, text) = match source {
            ExprSource::Jq(q) => (Dialect::Jq, q.as_str()),
            ExprSource::Cel(c) => (Dialect::Cel, c.as_str()),
        };
        let program = ProgramCache::global()
            .get_or_compile(dialect, text)
            .map_err(|source| SpecError::Expression { field: field.to_string(), source })?;
        Ok(Self { program })
    }

    /// `None` when no block is configured or the block is empty.
    pub fn from_spec(field: &'static str, spec: Option<&ExpressionFrom>) -> Result<Option<Self>, SpecError> {
        let Some(spec) = spec else { return Ok(None) };
        match spec.source(field)? {
            Some(source) => Self::compile(field, &source).map(Some),
            None => Ok(None),
        }
    }

    pub fn dialect(&self) -> Dialect { self.program.dialect() }
    pub fn source(&self) -> &str { self.program.source() }

    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<Vec<Value>, ExprError> { self.program.evaluate(scope) }

    /// First result, if any.
    pub fn first(&self, scope: &Scope<'_>) -> Result<Option<Value>, ExprError> {
        Ok(self.evaluate(scope)?.into_iter().next())
    }
}

/// Run `f` with a `Rand()` source that draws from `rng`.
pub(crate) fn with_draw<R: Rng + ?Sized, T>(rng: &mut R, f: impl FnOnce(&dyn Fn() -> f64) -> T) -> T {
    let cell = RefCell::new(rng);
    let draw = || cell.borrow_mut().gen::<f64>();
    f(&draw)
}
