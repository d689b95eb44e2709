//! The combinator algebra over steps
//!
//! Every combinator builds a new step from existing steps; nothing runs
//! until the composed step is handed to a scheduler. Branch-spawning
//! combinators (product, race) start nested run-instances on the same
//! scheduler and join them through the parent's controller.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::error::{StepError, StepResult};
use super::instance::{CancelToken, Controller, PROGRESS_EVENT, ProgressHandle};
use super::step::{Step, StepBody};
use super::value::{LoopYield, Value};

impl Step {
    /// Sequence: feed this step's output into `next`, which does not
    /// start until this step proceeds
    pub fn then(&self, next: Step) -> Step {
        Step::new(SequenceStep {
            first: self.clone(),
            second: next,
        })
    }

    /// Parallel join: the input must be a pair; this step runs on the
    /// first slot and `other` on the second, concurrently interleaved.
    /// Completes only after both finish, with `Pair(this result, other
    /// result)`; cancelling cancels both branches.
    pub fn product(&self, other: Step) -> Step {
        Step::new(ProductStep {
            left: self.clone(),
            right: other,
        })
    }

    /// Duplicate-and-join: the input is duplicated into a pair and fed
    /// to both steps in a parallel join
    pub fn fanout(&self, other: Step) -> Step {
        Step::lift(|input| Value::pair(input.clone(), input)).then(self.product(other))
    }

    /// Lift this step to operate on the first pair slot, passing the
    /// second through unchanged
    pub fn first(&self) -> Step {
        self.product(Step::identity())
    }

    /// Lift this step to operate on the second pair slot, passing the
    /// first through unchanged
    pub fn second(&self) -> Step {
        Step::identity().product(self.clone())
    }

    /// Sequence that keeps the input: `next` receives `Pair(input, this
    /// step's output)`
    pub fn bind(&self, next: Step) -> Step {
        Step::identity().fanout(self.clone()).then(next)
    }

    /// Sequence that keeps the intermediate: yields `Pair(this step's
    /// output, next's output)`
    pub fn join(&self, next: Step) -> Step {
        self.then(Step::identity().fanout(next))
    }

    /// Loop: run the body repeatedly. The body must yield a tagged
    /// `continue` or `done` value ([`Value::continue_with`] /
    /// [`Value::done_with`]); anything else is a step error. Cancelling
    /// mid-loop stops further iteration.
    pub fn repeat(&self) -> Step {
        Step::new(RepeatStep { body: self.clone() })
    }

    /// Rate-limited loop: like [`Step::repeat`], but with one timer hop
    /// of `interval_ms` before every iteration, so even a synchronous
    /// body cannot starve the host. Signals progress at each hop.
    pub fn animate(&self, interval_ms: u64) -> Step {
        Step::new(AnimateStep {
            body: self.clone(),
            interval_ms,
        })
    }

    /// Race on the default `"progress"` trigger
    pub fn race(&self, other: Step) -> Step {
        self.race_on(PROGRESS_EVENT, other)
    }

    /// Race: run both steps concurrently on the same input. The first
    /// branch to complete or to emit the trigger event wins; the
    /// loser's cancellers run before its continuation can fire, even
    /// when both become ready in the same scheduling pass.
    pub fn race_on(&self, trigger: &str, other: Step) -> Step {
        Step::new(RaceStep {
            left: self.clone(),
            right: other,
            trigger: trigger.to_string(),
        })
    }

    /// Ignore the input and yield a fixed value
    pub fn constant(value: Value) -> Step {
        Step::new(ConstantStep { value })
    }

    /// Forward the input unchanged after `delay_ms` time units;
    /// cancelling before expiry clears the timer and never proceeds
    pub fn delay(delay_ms: u64) -> Step {
        Step::new(DelayStep { delay_ms })
    }

    /// Emit a named progress event carrying the in-flight value as
    /// detail, then forward the value unchanged
    pub fn signal(name: impl Into<String>) -> Step {
        Step::new(SignalStep { name: name.into() })
    }
}

struct SequenceStep {
    first: Step,
    second: Step,
}

impl StepBody for SequenceStep {
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        ctl.push(self.second.clone());
        ctl.push(self.first.clone());
        ctl.proceed(input);
        Ok(())
    }

    fn label(&self) -> String {
        format!("({} >>> {})", self.first.label(), self.second.label())
    }
}

struct ConstantStep {
    value: Value,
}

impl StepBody for ConstantStep {
    fn activate(&self, _input: Value, ctl: &Controller) -> StepResult<()> {
        ctl.proceed(self.value.clone());
        Ok(())
    }

    fn label(&self) -> String {
        format!("const({})", self.value)
    }
}

struct SignalStep {
    name: String,
}

impl StepBody for SignalStep {
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        ctl.signal(&self.name, input.clone());
        ctl.proceed(input);
        Ok(())
    }

    fn label(&self) -> String {
        format!("signal({})", self.name)
    }
}

struct DelayStep {
    delay_ms: u64,
}

impl StepBody for DelayStep {
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        let timers = ctl.timers();
        let token_cell = Rc::new(Cell::new(None::<CancelToken>));
        let timer = {
            let ctl = ctl.clone();
            let token_cell = token_cell.clone();
            timers.schedule(
                self.delay_ms,
                Rc::new(move || {
                    if let Some(token) = token_cell.get() {
                        ctl.advance(token);
                    }
                    ctl.proceed(input.clone());
                }),
            )
        };
        let canceller = {
            let timers = timers.clone();
            Rc::new(move || timers.cancel(timer))
        };
        token_cell.set(Some(ctl.add_canceller(canceller)));
        Ok(())
    }

    fn label(&self) -> String {
        format!("delay({})", self.delay_ms)
    }
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

#[derive(Default)]
struct JoinSlots {
    left: Option<Value>,
    right: Option<Value>,
    handles: Option<(ProgressHandle, ProgressHandle)>,
}

struct JoinState {
    slots: RefCell<JoinSlots>,
}

/// Terminal step appended to each product branch; fills its slot and
/// completes the join when both are filled
struct JoinHook {
    state: Rc<JoinState>,
    side: Side,
    parent: Controller,
    token: CancelToken,
}

impl StepBody for JoinHook {
    fn activate(&self, output: Value, ctl: &Controller) -> StepResult<()> {
        let ready = {
            let mut slots = self.state.slots.borrow_mut();
            match self.side {
                Side::Left => slots.left = Some(output),
                Side::Right => slots.right = Some(output),
            }
            if slots.left.is_some() && slots.right.is_some() {
                slots.left.take().zip(slots.right.take())
            } else {
                None
            }
        };
        if let Some((left, right)) = ready {
            self.parent.advance(self.token);
            self.parent.proceed(Value::pair(left, right));
        }
        ctl.proceed(Value::Null);
        Ok(())
    }

    fn label(&self) -> String {
        "join-barrier".to_string()
    }
}

struct ProductStep {
    left: Step,
    right: Step,
}

impl StepBody for ProductStep {
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        let Value::Pair(pair) = input else {
            return Err(StepError::PairRequired {
                found: input.kind(),
            });
        };
        let scheduler = ctl.scheduler();
        let state = Rc::new(JoinState {
            slots: RefCell::new(JoinSlots::default()),
        });
        let token = {
            let state = state.clone();
            ctl.add_canceller(Rc::new(move || {
                let handles = state.slots.borrow().handles.clone();
                if let Some((left, right)) = handles {
                    left.cancel();
                    right.cancel();
                }
            }))
        };
        // both branches are enqueued before either one is driven; the
        // active pass drains them after this activation returns
        let left = self
            .left
            .then(Step::new(JoinHook {
                state: state.clone(),
                side: Side::Left,
                parent: ctl.clone(),
                token,
            }))
            .run(pair.fst(), &scheduler)
            .map_err(|e| StepError::Failed(e.to_string()))?;
        let right = self
            .right
            .then(Step::new(JoinHook {
                state: state.clone(),
                side: Side::Right,
                parent: ctl.clone(),
                token,
            }))
            .run(pair.snd(), &scheduler)
            .map_err(|e| StepError::Failed(e.to_string()))?;
        state.slots.borrow_mut().handles = Some((left, right));
        Ok(())
    }

    fn label(&self) -> String {
        format!("({} *** {})", self.left.label(), self.right.label())
    }
}

struct RaceState {
    handles: RefCell<Option<(ProgressHandle, ProgressHandle)>>,
}

impl RaceState {
    fn peer_of(&self, side: Side) -> Option<ProgressHandle> {
        self.handles.borrow().as_ref().map(|(left, right)| match side {
            Side::Left => right.clone(),
            Side::Right => left.clone(),
        })
    }
}

/// Terminal step appended to each race branch; cancels the peer before
/// its own output escapes to the race's caller
struct WinHook {
    state: Rc<RaceState>,
    side: Side,
    parent: Controller,
    token: CancelToken,
}

impl StepBody for WinHook {
    fn activate(&self, output: Value, ctl: &Controller) -> StepResult<()> {
        if let Some(peer) = self.state.peer_of(self.side) {
            peer.cancel();
        }
        self.parent.advance(self.token);
        self.parent.proceed(output);
        ctl.proceed(Value::Null);
        Ok(())
    }

    fn label(&self) -> String {
        "race-arm".to_string()
    }
}

struct RaceStep {
    left: Step,
    right: Step,
    trigger: String,
}

impl StepBody for RaceStep {
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        let scheduler = ctl.scheduler();
        let state = Rc::new(RaceState {
            handles: RefCell::new(None),
        });
        let token = {
            let state = state.clone();
            ctl.add_canceller(Rc::new(move || {
                let handles = state.handles.borrow().clone();
                if let Some((left, right)) = handles {
                    left.cancel();
                    right.cancel();
                }
            }))
        };
        let left = self
            .left
            .then(Step::new(WinHook {
                state: state.clone(),
                side: Side::Left,
                parent: ctl.clone(),
                token,
            }))
            .run(input.clone(), &scheduler)
            .map_err(|e| StepError::Failed(e.to_string()))?;
        {
            // the first branch to signal the trigger also decides the
            // race, before it has completed
            let state = state.clone();
            left.on(&self.trigger, move |_event| {
                if let Some(peer) = state.peer_of(Side::Left) {
                    peer.cancel();
                }
            });
        }
        let right = self
            .right
            .then(Step::new(WinHook {
                state: state.clone(),
                side: Side::Right,
                parent: ctl.clone(),
                token,
            }))
            .run(input, &scheduler)
            .map_err(|e| StepError::Failed(e.to_string()))?;
        {
            let state = state.clone();
            right.on(&self.trigger, move |_event| {
                if let Some(peer) = state.peer_of(Side::Right) {
                    peer.cancel();
                }
            });
        }
        *state.handles.borrow_mut() = Some((left, right));
        Ok(())
    }

    fn label(&self) -> String {
        format!(
            "({} or'{}' {})",
            self.left.label(),
            self.trigger,
            self.right.label()
        )
    }
}

struct RepeatState {
    cancelled: Cell<bool>,
    token: Cell<Option<CancelToken>>,
}

struct RepeatStep {
    body: Step,
}

impl StepBody for RepeatStep {
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        let state = Rc::new(RepeatState {
            cancelled: Cell::new(false),
            token: Cell::new(None),
        });
        let token = {
            let state = state.clone();
            ctl.add_canceller(Rc::new(move || state.cancelled.set(true)))
        };
        state.token.set(Some(token));
        ctl.push(Step::new(RepeatTurn {
            body: self.body.clone(),
            state,
        }));
        ctl.push(self.body.clone());
        ctl.proceed(input);
        Ok(())
    }

    fn label(&self) -> String {
        format!("repeat {}", self.body.label())
    }
}

/// Inspects one loop-body yield and either re-arms the loop or leaves it
struct RepeatTurn {
    body: Step,
    state: Rc<RepeatState>,
}

impl StepBody for RepeatTurn {
    fn activate(&self, yielded: Value, ctl: &Controller) -> StepResult<()> {
        if self.state.cancelled.get() {
            return Ok(());
        }
        match yielded {
            Value::Loop(LoopYield::Continue(value)) => {
                ctl.push(Step::new(RepeatTurn {
                    body: self.body.clone(),
                    state: self.state.clone(),
                }));
                ctl.push(self.body.clone());
                ctl.proceed((*value).clone());
                Ok(())
            }
            Value::Loop(LoopYield::Done(value)) => {
                if let Some(token) = self.state.token.get() {
                    ctl.advance(token);
                }
                ctl.proceed((*value).clone());
                Ok(())
            }
            other => Err(StepError::LoopYieldRequired {
                found: other.kind(),
            }),
        }
    }

    fn label(&self) -> String {
        format!("repeat-turn {}", self.body.label())
    }
}

struct AnimateState {
    last_token: Cell<Option<CancelToken>>,
}

struct AnimateStep {
    body: Step,
    interval_ms: u64,
}

impl StepBody for AnimateStep {
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        ctl.push(Step::new(AnimateTurn {
            body: self.body.clone(),
            interval_ms: self.interval_ms,
            state: Rc::new(AnimateState {
                last_token: Cell::new(None),
            }),
        }));
        // the first iteration also goes through a timer hop
        ctl.proceed(Value::continue_with(input));
        Ok(())
    }

    fn label(&self) -> String {
        format!("animate {}", self.body.label())
    }
}

/// Inspects one loop-body yield; a `continue` re-arms the loop behind a
/// timer hop so iteration frequency stays capped
struct AnimateTurn {
    body: Step,
    interval_ms: u64,
    state: Rc<AnimateState>,
}

impl StepBody for AnimateTurn {
    fn activate(&self, yielded: Value, ctl: &Controller) -> StepResult<()> {
        match yielded {
            Value::Loop(LoopYield::Continue(value)) => {
                let timers = ctl.timers();
                let token_cell = Rc::new(Cell::new(None::<CancelToken>));
                let timer = {
                    let ctl = ctl.clone();
                    let token_cell = token_cell.clone();
                    let next = Step::new(AnimateTurn {
                        body: self.body.clone(),
                        interval_ms: self.interval_ms,
                        state: self.state.clone(),
                    });
                    let body = self.body.clone();
                    let value = (*value).clone();
                    timers.schedule(
                        self.interval_ms,
                        Rc::new(move || {
                            if let Some(token) = token_cell.get() {
                                ctl.advance(token);
                            }
                            ctl.push(next.clone());
                            ctl.push(body.clone());
                            ctl.proceed(value.clone());
                        }),
                    )
                };
                let canceller = {
                    let timers = timers.clone();
                    Rc::new(move || timers.cancel(timer))
                };
                let token = ctl.add_canceller(canceller);
                token_cell.set(Some(token));
                self.state.last_token.set(Some(token));
                Ok(())
            }
            Value::Loop(LoopYield::Done(value)) => {
                match self.state.last_token.take() {
                    Some(token) => ctl.advance(token),
                    None => ctl.signal(PROGRESS_EVENT, Value::Null),
                }
                ctl.proceed((*value).clone());
                Ok(())
            }
            other => Err(StepError::LoopYieldRequired {
                found: other.kind(),
            }),
        }
    }

    fn label(&self) -> String {
        format!("animate-turn {}", self.body.label())
    }
}
