//! The shared trampoline scheduler
//!
//! An explicit work-list executor: instances queue on a scheduler
//! object (no process-wide globals), each scheduling pass drives the
//! head of the queue in depth-limited slices, and a pass that exceeds
//! its wall-clock budget requeues the in-progress instance and arms a
//! resume timer before returning control to the host.
//!
//! There is no error isolation between instances sharing a scheduler: a
//! step error escaping any activation aborts every queued instance.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

use super::SchedulerConfig;
use super::capability::{Env, TimerToken};
use super::error::{SchedResult, SchedulerError, StepError};
use super::instance::{DriveOutcome, Instance, InstanceId, ProgressHandle};
use super::step::Step;
use super::value::Value;

struct SchedulerInner {
    config: SchedulerConfig,
    env: Env,
    queue: VecDeque<Rc<Instance>>,
    running: bool,
    resume_timer: Option<TimerToken>,
    fatal: Option<SchedulerError>,
    shut_down: bool,
}

/// A shared trampoline executing run-instances cooperatively
///
/// Cheap to clone; clones share the same run queue. Independent
/// schedulers are fully isolated from one another.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<RefCell<SchedulerInner>>,
}

impl Scheduler {
    /// Create a scheduler over the given capabilities
    pub fn new(config: SchedulerConfig, env: Env) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SchedulerInner {
                config,
                env,
                queue: VecDeque::new(),
                running: false,
                resume_timer: None,
                fatal: None,
                shut_down: false,
            })),
        }
    }

    /// The configuration this scheduler runs with
    pub fn config(&self) -> SchedulerConfig {
        self.inner.borrow().config.clone()
    }

    /// Number of instances currently waiting on the run queue
    pub fn pending_instances(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// A fatal abort recorded by a pass that was started from a timer
    /// or event callback, if one occurred since the last call
    pub fn take_fatal(&self) -> Option<SchedulerError> {
        self.inner.borrow_mut().fatal.take()
    }

    /// Create a run-instance for a step tree and start a deliberately
    /// short initial pass
    pub fn spawn(&self, step: &Step, input: Value) -> SchedResult<ProgressHandle> {
        let (env, initial_budget) = {
            let inner = self.inner.borrow();
            if inner.shut_down {
                return Err(SchedulerError::ShutDown);
            }
            (inner.env.clone(), inner.config.initial_pass_budget_ms)
        };
        let instance = Rc::new(Instance::new(self.clone(), env, step.clone(), input));
        let handle = ProgressHandle::new(instance.clone());
        tracing::debug!(instance = %handle.id(), step = %step.label(), "spawn");
        self.enqueue(instance);
        self.run_pass(initial_budget)?;
        Ok(handle)
    }

    /// Put an instance at the back of the run queue
    pub(crate) fn enqueue(&self, instance: Rc<Instance>) {
        if instance.mark_queued() {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        if inner.shut_down {
            return;
        }
        inner.queue.push_back(instance);
    }

    fn enqueue_front(&self, instance: Rc<Instance>) {
        instance.mark_queued();
        self.inner.borrow_mut().queue.push_front(instance);
    }

    fn enqueue_back(&self, instance: Rc<Instance>) {
        instance.mark_queued();
        self.inner.borrow_mut().queue.push_back(instance);
    }

    /// Run a pass on behalf of a timer or event callback; a fatal abort
    /// is parked for [`Scheduler::take_fatal`] rather than propagated
    pub(crate) fn kick_background(&self) {
        let budget = { self.inner.borrow().config.pass_budget_ms };
        if let Err(fatal) = self.run_pass(budget) {
            let mut inner = self.inner.borrow_mut();
            inner.fatal.get_or_insert(fatal);
        }
    }

    /// Execute one scheduling pass within the given wall-clock budget.
    /// No-op when a pass is already active on this scheduler (nested
    /// spawns only enqueue; the active pass drains them).
    fn run_pass(&self, budget_ms: u64) -> SchedResult<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.running || inner.shut_down {
                return Ok(());
            }
            inner.running = true;
        }
        let started_at = Instant::now();
        let (depth_limit, starter) = {
            let inner = self.inner.borrow();
            (
                inner.config.depth_limit,
                inner.queue.front().map(|instance| instance.id()),
            )
        };
        let outcome = self.pass_loop(started_at, budget_ms, depth_limit, starter);
        self.inner.borrow_mut().running = false;
        match outcome {
            Ok(()) => Ok(()),
            Err(source) => Err(self.abort_all(source)),
        }
    }

    fn pass_loop(
        &self,
        started_at: Instant,
        budget_ms: u64,
        depth_limit: u32,
        starter: Option<InstanceId>,
    ) -> Result<(), StepError> {
        loop {
            let instance = { self.inner.borrow_mut().queue.pop_front() };
            let Some(instance) = instance else {
                return Ok(());
            };
            loop {
                let outcome = match Instance::drive(&instance, depth_limit) {
                    Ok(outcome) => outcome,
                    Err(error) => {
                        instance.cancel();
                        return Err(error);
                    }
                };
                match outcome {
                    DriveOutcome::Idle => break,
                    DriveOutcome::MoreWork => {
                        if elapsed_ms(started_at) > budget_ms {
                            // yield to the host: the pass starter goes
                            // to the back of the line, an interrupted
                            // joiner keeps its place at the front
                            if Some(instance.id()) == starter {
                                self.enqueue_back(instance);
                            } else {
                                self.enqueue_front(instance);
                            }
                            tracing::trace!("pass budget spent, yielding");
                            self.arm_resume_timer();
                            return Ok(());
                        }
                    }
                }
            }
            if elapsed_ms(started_at) > budget_ms {
                if !self.inner.borrow().queue.is_empty() {
                    self.arm_resume_timer();
                }
                return Ok(());
            }
        }
    }

    fn arm_resume_timer(&self) {
        let (timers, interval) = {
            let inner = self.inner.borrow();
            if inner.resume_timer.is_some() || inner.shut_down {
                return;
            }
            (inner.env.timers(), inner.config.resume_interval_ms)
        };
        let scheduler = self.clone();
        let token = timers.schedule(interval, Rc::new(move || scheduler.resume()));
        self.inner.borrow_mut().resume_timer = Some(token);
    }

    fn resume(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.resume_timer = None;
            if inner.shut_down || inner.queue.is_empty() {
                return;
            }
        }
        self.kick_background();
    }

    /// Cancel every queued instance and wrap the escaping step error
    fn abort_all(&self, source: StepError) -> SchedulerError {
        let (drained, timer, timers) = {
            let mut inner = self.inner.borrow_mut();
            (
                inner.queue.drain(..).collect::<Vec<_>>(),
                inner.resume_timer.take(),
                inner.env.timers(),
            )
        };
        if let Some(token) = timer {
            timers.cancel(token);
        }
        let aborted = drained.len() + 1;
        for instance in drained {
            instance.cancel();
        }
        tracing::error!(%source, aborted, "step error escaped the scheduling pass, aborting");
        SchedulerError::Fatal { aborted, source }
    }

    /// Shut the scheduler down: cancel every queued instance, clear the
    /// resume timer, and refuse further spawns
    pub fn shutdown(&self) {
        let (drained, timer, timers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.shut_down {
                return;
            }
            inner.shut_down = true;
            (
                inner.queue.drain(..).collect::<Vec<_>>(),
                inner.resume_timer.take(),
                inner.env.timers(),
            )
        };
        if let Some(token) = timer {
            timers.cancel(token);
        }
        for instance in drained {
            instance.cancel();
        }
        tracing::debug!("scheduler shut down");
    }
}

fn elapsed_ms(started_at: Instant) -> u64 {
    // budgets are whole milliseconds; sub-millisecond elapsed time
    // never exhausts a budget
    started_at.elapsed().as_millis() as u64
}
