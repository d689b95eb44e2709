//! Integration tests for the trampoline scheduler
//!
//! Covers depth-limited driving, wall-clock budget yields, fairness
//! across instances, cancellation, and the shared fatal-abort path.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use strand::runtime::error::StepError;
use strand::runtime::{
    Controller, Env, EventHub, ProgressHandle, Scheduler, SchedulerConfig, Status, Step, StepBody,
    Value, VirtualClock,
};

fn scheduler() -> (Scheduler, Rc<EventHub>, Rc<VirtualClock>) {
    let (env, hub, clock) = Env::with_hub_and_clock();
    (Scheduler::new(SchedulerConfig::default(), env), hub, clock)
}

fn pump(clock: &VirtualClock, handle: &ProgressHandle, max_rounds: usize) {
    for _ in 0..max_rounds {
        match handle.status() {
            Status::Completed | Status::Cancelled => return,
            Status::Runnable | Status::Suspended => clock.advance(10),
        }
    }
}

#[test]
fn test_loop_survives_ten_thousand_synchronous_iterations() {
    let (scheduler, _hub, clock) = scheduler();
    let count = Rc::new(Cell::new(0u32));

    let body = {
        let count = count.clone();
        Step::lift(move |value| {
            count.set(count.get() + 1);
            if count.get() < 10_000 {
                Value::continue_with(value)
            } else {
                Value::done_with(value)
            }
        })
    };

    let handle = body.repeat().run(Value::Int(1), &scheduler).unwrap();
    pump(&clock, &handle, 1_000);

    assert_eq!(handle.status(), Status::Completed);
    assert_eq!(count.get(), 10_000);
    assert_eq!(handle.result(), Some(Value::Int(1)));
}

#[test]
fn test_tiny_depth_limit_still_completes_long_chains() {
    let (env, _hub, clock) = Env::with_hub_and_clock();
    let config = SchedulerConfig {
        depth_limit: 2,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(config, env);

    let mut step = Step::constant(Value::Int(0));
    for _ in 0..40 {
        step = step.then(Step::lift(|value| match value.as_int() {
            Some(n) => Value::Int(n + 1),
            None => value,
        }));
    }

    let handle = step.run(Value::Null, &scheduler).unwrap();
    pump(&clock, &handle, 100);

    assert_eq!(handle.status(), Status::Completed);
    assert_eq!(handle.result(), Some(Value::Int(40)));
}

#[test]
fn test_budget_exhaustion_yields_and_resumes() {
    let (env, _hub, clock) = Env::with_hub_and_clock();
    let scheduler = Scheduler::new(SchedulerConfig::default(), env);
    let count = Rc::new(Cell::new(0u32));

    // each iteration burns real time so the millisecond budget is
    // observably spent
    let body = {
        let count = count.clone();
        Step::lift(move |value| {
            std::thread::sleep(Duration::from_millis(1));
            count.set(count.get() + 1);
            if count.get() < 100 {
                Value::continue_with(value)
            } else {
                Value::done_with(value)
            }
        })
    };

    let handle = body.repeat().run(Value::Null, &scheduler).unwrap();

    // the initial pass has a zero budget: the loop must have yielded
    // with a resume timer armed rather than run to completion
    assert_eq!(handle.status(), Status::Runnable);
    assert!(clock.pending() > 0, "expected an armed resume timer");

    pump(&clock, &handle, 1_000);
    assert_eq!(handle.status(), Status::Completed);
    assert_eq!(count.get(), 100);
}

#[test]
fn test_interleaving_between_instances() {
    let (env, _hub, clock) = Env::with_hub_and_clock();
    let scheduler = Scheduler::new(SchedulerConfig::default(), env);

    let make_worker = |count: Rc<Cell<u32>>| {
        Step::lift(move |value| {
            std::thread::sleep(Duration::from_millis(1));
            count.set(count.get() + 1);
            Value::continue_with(value)
        })
        .repeat()
    };

    let a = Rc::new(Cell::new(0u32));
    let b = Rc::new(Cell::new(0u32));
    let first = make_worker(a.clone()).run(Value::Null, &scheduler).unwrap();
    let second = make_worker(b.clone()).run(Value::Null, &scheduler).unwrap();

    for _ in 0..10 {
        clock.advance(10);
    }

    assert!(a.get() > 0, "first worker starved");
    assert!(b.get() > 0, "second worker starved");

    first.cancel();
    second.cancel();
}

/// Leaf step that registers a counting canceller and never proceeds
struct HoldStep {
    cancelled: Rc<Cell<u32>>,
}

impl StepBody for HoldStep {
    fn activate(&self, _input: Value, ctl: &Controller) -> Result<(), StepError> {
        let cancelled = self.cancelled.clone();
        ctl.add_canceller(Rc::new(move || cancelled.set(cancelled.get() + 1)));
        Ok(())
    }

    fn label(&self) -> String {
        "hold".to_string()
    }
}

#[test]
fn test_cancel_runs_cancellers_exactly_once() {
    let (scheduler, _hub, _clock) = scheduler();
    let cancelled = Rc::new(Cell::new(0u32));

    let handle = Step::new(HoldStep {
        cancelled: cancelled.clone(),
    })
    .run(Value::Null, &scheduler)
    .unwrap();
    assert_eq!(handle.status(), Status::Suspended);

    handle.cancel();
    assert_eq!(handle.status(), Status::Cancelled);
    assert_eq!(cancelled.get(), 1);

    // a second cancel is a no-op
    handle.cancel();
    assert_eq!(cancelled.get(), 1);
}

#[test]
fn test_cancel_prevents_later_continuations() {
    let (scheduler, _hub, clock) = scheduler();
    let reached = Rc::new(Cell::new(false));

    let tail = {
        let reached = reached.clone();
        Step::lift(move |value| {
            reached.set(true);
            value
        })
    };
    let handle = Step::delay(100)
        .then(tail)
        .run(Value::Int(1), &scheduler)
        .unwrap();

    clock.advance(50);
    handle.cancel();
    assert_eq!(clock.pending(), 0, "cancel must clear the pending timer");

    clock.advance(200);
    assert_eq!(handle.status(), Status::Cancelled);
    assert!(!reached.get());
    assert_eq!(handle.result(), None);
}

#[test]
fn test_fatal_surfaces_from_run() {
    let (scheduler, _hub, _clock) = scheduler();
    let failing = Step::lift_fallible(|_| Err(StepError::Failed("boom".to_string())));

    let error = failing.run(Value::Null, &scheduler).unwrap_err();
    let message = error.to_string();
    assert!(message.contains("1 instance(s) aborted"), "{message}");
    assert!(message.contains("boom"), "{message}");
}

#[test]
fn test_fatal_aborts_queued_siblings() {
    let (scheduler, _hub, clock) = scheduler();

    let sibling = Step::lift(move |value| {
        std::thread::sleep(Duration::from_millis(1));
        Value::continue_with(value)
    })
    .repeat()
    .run(Value::Null, &scheduler)
    .unwrap();
    assert_eq!(sibling.status(), Status::Runnable);

    let failing = Step::delay(10)
        .then(Step::lift_fallible(|_| {
            Err(StepError::Failed("boom".to_string()))
        }))
        .run(Value::Null, &scheduler)
        .unwrap();

    // the failing instance errors inside a timer-started pass; the
    // fatal is parked on the scheduler and the sibling dies with it
    clock.advance(50);

    assert_eq!(failing.status(), Status::Cancelled);
    assert_eq!(sibling.status(), Status::Cancelled);
    let fatal = scheduler.take_fatal().expect("expected a parked fatal");
    assert!(fatal.to_string().contains("boom"));
    assert!(scheduler.take_fatal().is_none());
}

#[test]
fn test_unconditioned_loop_never_completes() {
    let (scheduler, _hub, clock) = scheduler();
    let body = Step::lift(|value| Value::continue_with(value));

    let handle = body.repeat().run(Value::Null, &scheduler).unwrap();
    for _ in 0..5 {
        clock.advance(10);
    }

    assert_ne!(handle.status(), Status::Completed);
    handle.cancel();
    assert_eq!(handle.status(), Status::Cancelled);
}

#[test]
fn test_shutdown_cancels_queue_and_refuses_spawns() {
    let (scheduler, _hub, _clock) = scheduler();
    let handle = Step::lift(|value| Value::continue_with(value))
        .repeat()
        .run(Value::Null, &scheduler)
        .unwrap();

    scheduler.shutdown();
    assert_eq!(handle.status(), Status::Cancelled);

    let refused = Step::identity().run(Value::Null, &scheduler);
    assert!(refused.is_err());
}

#[test]
fn test_progress_events_per_advance() {
    let (scheduler, _hub, clock) = scheduler();

    let handle = Step::delay(10)
        .then(Step::delay(20))
        .run(Value::Int(1), &scheduler)
        .unwrap();
    let progressed = Rc::new(Cell::new(0u32));
    {
        let progressed = progressed.clone();
        handle.on("progress", move |_| progressed.set(progressed.get() + 1));
    }

    clock.advance(100);
    assert_eq!(handle.status(), Status::Completed);
    assert_eq!(progressed.get(), 2);
}
