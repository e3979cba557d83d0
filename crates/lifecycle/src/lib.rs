//! Stagehand lifecycle engine.
//!
//! A [`Lifecycle`] is an ordered set of compiled [`Stage`]s. For one
//! [`Resource`] snapshot it finds the matching stages, picks one by weight,
//! resolves the stage's delay, and [`execute`]s its steps against a [`Sink`].
//! Nothing here spawns tasks or sleeps; the controller owns timing.

#![forbid(unsafe_code)]

pub mod delay;
mod error;
pub mod executor;
mod expression;
pub mod finalizer;
mod lifecycle;
pub mod patch;
mod resource;
pub mod selector;
mod stage;

pub use error::{EvalError, EvalErrorKind, ExecError, PatchError, RenderError, SinkError, SpecError, StageError, StepFailure};
pub use executor::{execute, Action, Event, Outcome, RecordingSink, Sink, SinkFactory};
pub use expression::CompiledExpr;
pub use lifecycle::Lifecycle;
pub use patch::{ResourcePatch, TemplateSet};
pub use resource::Resource;
pub use stage::{EventStep, NextStep, PatchStep, Stage};

pub mod prelude {
    pub use super::delay::DelayResolver;
    pub use super::finalizer::{FinalizerEdit, FinalizerPlan};
    pub use super::selector::{Requirement, Selector};
    pub use super::{
        execute, Action, Event, Lifecycle, Outcome, RecordingSink, Resource, ResourcePatch, Sink, SinkError, SinkFactory, Stage,
        StageError, StepFailure,
    };
}
