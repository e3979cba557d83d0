//! Wait-time resolution: literal, computed, or jittered.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use stagehand_core::config::{DelaySpec, ExpressionFrom};
use stagehand_expr::duration::parse_duration;
use stagehand_expr::Value;

use crate::error::{EvalErrorKind, SpecError};
use crate::expression::{with_draw, CompiledExpr};
use crate::resource::Resource;

#[derive(Debug, Clone, Default)]
struct DurationSource {
    literal: Option<Duration>,
    expr: Option<CompiledExpr>,
}

impl DurationSource {
    fn new(field: &'static str, literal: Option<i64>, from: Option<&ExpressionFrom>) -> Result<Self, SpecError> {
        let literal = match literal {
            Some(ms) if ms < 0 => return Err(SpecError::NegativeDuration { field, value: ms }),
            Some(ms) => Some(Duration::from_millis(ms as u64)),
            None => None,
        };
        Ok(Self { literal, expr: CompiledExpr::from_spec(field, from)? })
    }

    fn is_empty(&self) -> bool { self.literal.is_none() && self.expr.is_none() }

    fn resolve(&self, resource: &Resource, now: DateTime<Utc>, draw: &dyn Fn() -> f64) -> Result<Option<Duration>, EvalErrorKind> {
        if let Some(expr) = &self.expr {
            if let Some(v) = expr.first(&resource.scope_at(now).with_rand(draw))? {
                if let Some(d) = duration_from_value(&v, now)? {
                    return Ok(Some(d));
                }
            }
        }
        Ok(self.literal)
    }
}

/// Base and jitter sources of one stage, resolved independently.
#[derive(Debug, Clone, Default)]
pub struct DelayResolver {
    base: DurationSource,
    jitter: DurationSource,
}

impl DelayResolver {
    pub fn new(spec: Option<&DelaySpec>) -> Result<Self, SpecError> {
        let Some(spec) = spec else { return Ok(Self::default()) };
        Ok(Self {
            base: DurationSource::new("durationMilliseconds", spec.duration_milliseconds, spec.duration_from.as_ref())?,
            jitter: DurationSource::new(
                "jitterDurationMilliseconds",
                spec.jitter_duration_milliseconds,
                spec.jitter_duration_from.as_ref(),
            )?,
        })
    }

    pub fn is_empty(&self) -> bool { self.base.is_empty() && self.jitter.is_empty() }

    /// `None` when neither value resolves; callers treat it as zero.
    /// The error names the field that failed.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        resource: &Resource,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Option<Duration>, (&'static str, EvalErrorKind)> {
        let (base, jitter) = with_draw(&mut *rng, |draw| {
            let base = self.base.resolve(resource, now, draw).map_err(|e| ("durationFrom", e))?;
            let jitter = self.jitter.resolve(resource, now, draw).map_err(|e| ("jitterDurationFrom", e))?;
            Ok::<_, (&'static str, EvalErrorKind)>((base, jitter))
        })?;
        Ok(jittered(base, jitter, rng))
    }
}

/// Uniform draw in `[base, jitter)` when jitter exceeds base, otherwise base.
/// A missing base with a resolved jitter counts as zero.
pub fn jittered<R: Rng + ?Sized>(base: Option<Duration>, jitter: Option<Duration>, rng: &mut R) -> Option<Duration> {
    match (base, jitter) {
        (None, None) => None,
        (base, None) => base,
        (base, Some(jitter)) => {
            let base = base.unwrap_or_default();
            if jitter > base { Some(rng.gen_range(base..jitter)) } else { Some(base) }
        }
    }
}

/// Timestamps count down from `now` (clamped at zero); durations and Go
/// duration strings are used as is. Null and `""` do not resolve.
fn duration_from_value(v: &Value, now: DateTime<Utc>) -> Result<Option<Duration>, EvalErrorKind> {
    let until = |t: DateTime<Utc>| (t - now).to_std().unwrap_or_default();
    match v {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::Timestamp(t) => Ok(Some(until(*t))),
        Value::Duration(d) => Ok(Some(d.to_std().unwrap_or_default())),
        Value::String(s) => match v.as_timestamp() {
            Some(t) => Ok(Some(until(t))),
            None => parse_duration(s)
                .map(|d| Some(d.to_std().unwrap_or_default()))
                .ok_or_else(|| EvalErrorKind::Unexpected(format!("{:?} is neither a timestamp nor a duration", s))),
        },
        other => Err(EvalErrorKind::Unexpected(format!("expected a timestamp or duration, got {}", other.kind_name()))),
    }
}
