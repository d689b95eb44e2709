//! Run-instances, controllers, and progress handles
//!
//! A run-instance is the live, mutable execution state for one run of a
//! step tree: an explicit continuation stack, the value in flight, the
//! outstanding cancellers, and a per-slice depth counter. The controller
//! is the per-activation face a step body sees; the progress handle is
//! the caller-visible face.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use uuid::Uuid;

use super::capability::{Env, EventSource, TickSource, TimerSource};
use super::error::StepResult;
use super::scheduler::Scheduler;
use super::step::Step;
use super::value::{Event, Value};

/// Name of the progress event signalled by [`Controller::advance`]
pub const PROGRESS_EVENT: &str = "progress";

/// Unique identifier for a run-instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a run-instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Has a pending continuation to execute
    Runnable,
    /// Awaiting an external callback (timer or event)
    Suspended,
    /// The continuation stack emptied; the final value is stored
    Completed,
    /// cancel() drained the canceller list
    Cancelled,
}

/// A no-argument callback that undoes one leaf step's outstanding
/// registration
pub type Canceller = Rc<dyn Fn()>;

/// A callback observing progress events of a run-instance
pub type ProgressListener = Rc<dyn Fn(&Event)>;

/// Token identifying a registered canceller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelToken(u64);

/// Token identifying a registered progress listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerToken(u64);

/// Outcome of driving an instance for one depth slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DriveOutcome {
    /// Suspended, completed, or cancelled; nothing left to do right now
    Idle,
    /// The depth budget ran out with work still pending
    MoreWork,
}

struct InstanceState {
    stack: Vec<Step>,
    pending: Option<Value>,
    cancellers: Vec<(CancelToken, Canceller)>,
    listeners: HashMap<String, Vec<(ListenerToken, ProgressListener)>>,
    status: Status,
    depth: u32,
    next_token: u64,
    driving: bool,
    queued: bool,
    result: Option<Value>,
}

/// Live execution state for one run of a step tree
pub(crate) struct Instance {
    id: InstanceId,
    scheduler: Scheduler,
    env: Env,
    state: RefCell<InstanceState>,
}

impl Instance {
    pub(crate) fn new(scheduler: Scheduler, env: Env, step: Step, input: Value) -> Self {
        Self {
            id: InstanceId::new(),
            scheduler,
            env,
            state: RefCell::new(InstanceState {
                stack: vec![step],
                pending: Some(input),
                cancellers: Vec::new(),
                listeners: HashMap::new(),
                status: Status::Runnable,
                depth: 0,
                next_token: 0,
                driving: false,
                queued: false,
                result: None,
            }),
        }
    }

    pub(crate) fn id(&self) -> InstanceId {
        self.id
    }

    pub(crate) fn status(&self) -> Status {
        self.state.borrow().status
    }

    pub(crate) fn result(&self) -> Option<Value> {
        self.state.borrow().result.clone()
    }

    /// Mark this instance as sitting on the run queue; returns whether
    /// it already was
    pub(crate) fn mark_queued(&self) -> bool {
        let mut st = self.state.borrow_mut();
        let was = st.queued;
        st.queued = true;
        was
    }

    /// Hand the next value to this instance. Ignored once the instance
    /// is completed or cancelled, so no continuation fires after
    /// cancel(). Outside an active drive the instance re-enters the run
    /// queue.
    pub(crate) fn proceed(this: &Rc<Instance>, value: Value) {
        {
            let mut st = this.state.borrow_mut();
            match st.status {
                Status::Completed | Status::Cancelled => return,
                Status::Runnable | Status::Suspended => {}
            }
            if st.pending.is_some() {
                tracing::trace!(instance = %this.id, "duplicate continuation ignored");
                return;
            }
            st.pending = Some(value);
            st.status = Status::Runnable;
            if st.driving {
                return;
            }
        }
        this.scheduler.enqueue(this.clone());
        this.scheduler.kick_background();
    }

    /// Advance this instance by at most `depth_limit` continuations
    pub(crate) fn drive(this: &Rc<Instance>, depth_limit: u32) -> StepResult<DriveOutcome> {
        {
            let mut st = this.state.borrow_mut();
            st.queued = false;
            st.driving = true;
            st.depth = depth_limit;
        }
        loop {
            let (step, input) = {
                let mut st = this.state.borrow_mut();
                if st.status == Status::Cancelled {
                    st.driving = false;
                    return Ok(DriveOutcome::Idle);
                }
                let Some(input) = st.pending.take() else {
                    // awaiting a timer or event callback
                    st.status = Status::Suspended;
                    st.driving = false;
                    return Ok(DriveOutcome::Idle);
                };
                let Some(step) = st.stack.pop() else {
                    st.status = Status::Completed;
                    st.result = Some(input);
                    st.driving = false;
                    tracing::trace!(instance = %this.id, "completed");
                    return Ok(DriveOutcome::Idle);
                };
                if st.depth == 0 {
                    // depth budget spent: put the work back and yield
                    // to the trampoline
                    st.stack.push(step);
                    st.pending = Some(input);
                    st.driving = false;
                    return Ok(DriveOutcome::MoreWork);
                }
                st.depth -= 1;
                (step, input)
            };
            let ctl = Controller {
                instance: this.clone(),
            };
            if let Err(error) = step.activate(input, &ctl) {
                this.state.borrow_mut().driving = false;
                return Err(error);
            }
        }
    }

    /// Cancel this instance: drain the canceller list and invoke each
    /// canceller exactly once, newest first. Idempotent.
    pub(crate) fn cancel(&self) {
        let cancellers = {
            let mut st = self.state.borrow_mut();
            match st.status {
                Status::Completed | Status::Cancelled => return,
                Status::Runnable | Status::Suspended => {}
            }
            st.status = Status::Cancelled;
            st.pending = None;
            st.stack.clear();
            std::mem::take(&mut st.cancellers)
        };
        tracing::debug!(instance = %self.id, cancellers = cancellers.len(), "cancelled");
        for (_, canceller) in cancellers.into_iter().rev() {
            canceller();
        }
    }

    pub(crate) fn add_canceller(&self, canceller: Canceller) -> CancelToken {
        let mut st = self.state.borrow_mut();
        let token = CancelToken(st.next_token);
        st.next_token += 1;
        st.cancellers.push((token, canceller));
        token
    }

    pub(crate) fn remove_canceller(&self, token: CancelToken) {
        self.state
            .borrow_mut()
            .cancellers
            .retain(|(t, _)| *t != token);
    }

    /// Emit a progress event to this instance's listeners
    pub(crate) fn signal(&self, event: Event) {
        let listeners: Vec<ProgressListener> = {
            let st = self.state.borrow();
            match st.listeners.get(event.name()) {
                Some(registered) => registered.iter().map(|(_, l)| l.clone()).collect(),
                None => return,
            }
        };
        for listener in listeners {
            listener(&event);
        }
    }

    pub(crate) fn add_listener(&self, name: &str, listener: ProgressListener) -> ListenerToken {
        let mut st = self.state.borrow_mut();
        let token = ListenerToken(st.next_token);
        st.next_token += 1;
        st.listeners
            .entry(name.to_string())
            .or_default()
            .push((token, listener));
        token
    }

    pub(crate) fn remove_listener(&self, name: &str, token: ListenerToken) {
        let mut st = self.state.borrow_mut();
        if let Some(registered) = st.listeners.get_mut(name) {
            registered.retain(|(t, _)| *t != token);
        }
    }
}

/// Per-activation face of a run-instance
///
/// A controller belongs to exactly one run-instance. It may be cloned
/// into callbacks that later proceed the instance from a timer or event
/// handler.
#[derive(Clone)]
pub struct Controller {
    instance: Rc<Instance>,
}

impl Controller {
    /// Continue with the next value; at most one call per activation
    /// takes effect, and none after completion or cancellation
    pub fn proceed(&self, value: Value) {
        Instance::proceed(&self.instance, value);
    }

    /// Push a step onto the continuation stack; it runs after the value
    /// handed to the next [`Controller::proceed`] has flowed through
    /// whatever is pushed above it
    pub fn push(&self, step: Step) {
        self.instance.state.borrow_mut().stack.push(step);
    }

    /// Register a canceller undoing one outstanding registration
    pub fn add_canceller(&self, canceller: Canceller) -> CancelToken {
        self.instance.add_canceller(canceller)
    }

    /// Remove a registered canceller without invoking it
    pub fn remove_canceller(&self, token: CancelToken) {
        self.instance.remove_canceller(token);
    }

    /// Remove a canceller and signal a `"progress"` event
    pub fn advance(&self, token: CancelToken) {
        self.instance.remove_canceller(token);
        self.instance
            .signal(Event::new(PROGRESS_EVENT, Value::Null));
    }

    /// Emit a named progress event with a detail value
    pub fn signal(&self, name: &str, detail: Value) {
        self.instance.signal(Event::new(name, detail));
    }

    /// The event-source capability of the run environment
    pub fn events(&self) -> Rc<dyn EventSource> {
        self.instance.env.events()
    }

    /// The timer capability of the run environment
    pub fn timers(&self) -> Rc<dyn TimerSource> {
        self.instance.env.timers()
    }

    /// The tick-counter capability of the run environment
    pub fn ticks(&self) -> Rc<dyn TickSource> {
        self.instance.env.ticks()
    }

    /// The scheduler this instance runs on, for starting nested
    /// instances
    pub fn scheduler(&self) -> Scheduler {
        self.instance.scheduler.clone()
    }

    /// Identifier of the owning run-instance
    pub fn instance_id(&self) -> InstanceId {
        self.instance.id()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Controller {}]", self.instance.id())
    }
}

/// Caller-visible handle for a run-instance
#[derive(Clone)]
pub struct ProgressHandle {
    instance: Rc<Instance>,
}

impl ProgressHandle {
    pub(crate) fn new(instance: Rc<Instance>) -> Self {
        Self { instance }
    }

    /// Identifier of the run-instance
    pub fn id(&self) -> InstanceId {
        self.instance.id()
    }

    /// Current lifecycle state
    pub fn status(&self) -> Status {
        self.instance.status()
    }

    /// Final value, once the instance has completed
    pub fn result(&self) -> Option<Value> {
        self.instance.result()
    }

    /// Cancel the run: every currently registered canceller is invoked
    /// exactly once and no further continuation fires. Safe to call
    /// repeatedly.
    pub fn cancel(&self) {
        self.instance.cancel();
    }

    /// Subscribe to a named progress event (`"progress"` or any
    /// application-signalled name)
    pub fn on<F: Fn(&Event) + 'static>(&self, name: &str, listener: F) -> ListenerToken {
        self.instance.add_listener(name, Rc::new(listener))
    }

    /// Remove a progress listener
    pub fn off(&self, name: &str, token: ListenerToken) {
        self.instance.remove_listener(name, token);
    }
}

impl fmt::Debug for ProgressHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[ProgressHandle {} {:?}]",
            self.instance.id(),
            self.instance.status()
        )
    }
}
