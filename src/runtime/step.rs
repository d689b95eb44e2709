//! The composable step abstraction
//!
//! A step is an immutable, reusable description of one unit of possibly
//! suspending computation: given an input value and a controller, it
//! eventually invokes the controller's continue operation at most once,
//! or never if cancelled first. Steps compose into larger steps without
//! mutating the steps they were composed from.

use std::fmt;
use std::rc::Rc;

use super::error::{SchedResult, StepResult};
use super::instance::{Controller, ProgressHandle};
use super::scheduler::Scheduler;
use super::value::Value;

/// Behavior of one step
///
/// Implementations must call [`Controller::proceed`] at most once per
/// activation. An activation that registers a canceller and returns
/// without proceeding suspends the run-instance until some external
/// callback proceeds it.
pub trait StepBody {
    /// Activate this step with the value in flight
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()>;

    /// Human-readable label for tracing and diagnostics
    fn label(&self) -> String {
        "anonymous".to_string()
    }
}

/// An immutable, cheaply clonable step template
#[derive(Clone)]
pub struct Step {
    body: Rc<dyn StepBody>,
}

impl Step {
    /// Wrap a step body
    pub fn new(body: impl StepBody + 'static) -> Self {
        Self {
            body: Rc::new(body),
        }
    }

    /// Lift a plain function into a step (the explicit adapter; there
    /// is no implicit auto-lifting)
    pub fn lift(f: impl Fn(Value) -> Value + 'static) -> Self {
        Self::new(FnStep {
            f: Rc::new(move |value| Ok(f(value))),
        })
    }

    /// Lift a fallible function into a step; an error aborts the
    /// scheduling pass
    pub fn lift_fallible(f: impl Fn(Value) -> StepResult<Value> + 'static) -> Self {
        Self::new(FnStep { f: Rc::new(f) })
    }

    /// The step that forwards its input unchanged
    pub fn identity() -> Self {
        Self::new(IdentityStep)
    }

    /// Run this step tree: create a run-instance on the scheduler and
    /// start a deliberately short initial pass
    pub fn run(&self, input: Value, scheduler: &Scheduler) -> SchedResult<ProgressHandle> {
        scheduler.spawn(self, input)
    }

    /// Activate the underlying body
    pub fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        self.body.activate(input, ctl)
    }

    /// Label of the underlying body
    pub fn label(&self) -> String {
        self.body.label()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Step {}]", self.label())
    }
}

struct FnStep {
    f: Rc<dyn Fn(Value) -> StepResult<Value>>,
}

impl StepBody for FnStep {
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        let output = (self.f)(input)?;
        ctl.proceed(output);
        Ok(())
    }

    fn label(&self) -> String {
        "fn".to_string()
    }
}

struct IdentityStep;

impl StepBody for IdentityStep {
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        ctl.proceed(input);
        Ok(())
    }

    fn label(&self) -> String {
        "identity".to_string()
    }
}
