//! Integration tests for the event-source adapters
//!
//! Exercises listen, filtered listen, and tick-counted delays against
//! an in-process event hub, including the game-style countdown
//! scenario.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use strand::runtime::{
    Env, Event, EventHub, Scheduler, SchedulerConfig, Status, Step, Value, VirtualClock,
};

fn scheduler() -> (Scheduler, Rc<EventHub>, Rc<VirtualClock>) {
    let (env, hub, clock) = Env::with_hub_and_clock();
    (Scheduler::new(SchedulerConfig::default(), env), hub, clock)
}

#[test]
fn test_listen_forwards_input_with_event_detail() {
    let (scheduler, hub, _clock) = scheduler();

    let handle = Step::listen("ping").run(Value::Int(9), &scheduler).unwrap();
    assert_eq!(handle.status(), Status::Suspended);
    assert_eq!(hub.handler_count("ping"), 1);

    hub.emit(Event::new("ping", Value::record([("n", Value::Int(1))])));

    assert_eq!(handle.status(), Status::Completed);
    let Some(Value::Pair(pair)) = handle.result() else {
        panic!("expected the forwarding pair");
    };
    assert_eq!(pair.fst(), Value::Int(9));
    assert_eq!(pair.snd().field("n").cloned(), Some(Value::Int(1)));
    assert_eq!(hub.handler_count("ping"), 0);
}

#[test]
fn test_listen_is_single_shot() {
    let (scheduler, hub, _clock) = scheduler();
    let fired = Rc::new(Cell::new(0u32));

    let tail = {
        let fired = fired.clone();
        Step::lift(move |value| {
            fired.set(fired.get() + 1);
            value
        })
    };
    Step::listen("ping")
        .then(tail)
        .run(Value::Null, &scheduler)
        .unwrap();

    hub.emit(Event::new("ping", Value::Null));
    hub.emit(Event::new("ping", Value::Null));

    assert_eq!(fired.get(), 1);
    assert_eq!(hub.handler_count("ping"), 0);
}

#[test]
fn test_listen_cancel_removes_subscription() {
    let (scheduler, hub, _clock) = scheduler();

    let handle = Step::listen("ping").run(Value::Null, &scheduler).unwrap();
    assert_eq!(hub.handler_count("ping"), 1);

    handle.cancel();
    assert_eq!(hub.handler_count("ping"), 0);

    hub.emit(Event::new("ping", Value::Null));
    assert_eq!(handle.status(), Status::Cancelled);
}

#[test]
fn test_listen_for_keeps_listening_until_match() {
    let (scheduler, hub, _clock) = scheduler();

    let handle = Step::listen_for("take-prize", "name", Value::text("key"))
        .run(Value::Int(1), &scheduler)
        .unwrap();

    hub.emit(Event::new(
        "take-prize",
        Value::record([("name", "chest".into())]),
    ));
    assert_eq!(handle.status(), Status::Suspended);
    assert_eq!(hub.handler_count("take-prize"), 1);

    hub.emit(Event::new(
        "take-prize",
        Value::record([("name", "key".into())]),
    ));
    assert_eq!(handle.status(), Status::Completed);
    assert_eq!(hub.handler_count("take-prize"), 0);
}

#[test]
fn test_tick_delay_waits_for_the_counter_to_exceed() {
    let (scheduler, hub, _clock) = scheduler();

    let handle = Step::delay_ticks(3).run(Value::Int(5), &scheduler).unwrap();

    for _ in 0..3 {
        hub.emit_tick();
        assert_eq!(handle.status(), Status::Suspended);
    }

    // the fourth tick pushes the counter past captured + 3
    hub.emit_tick();
    assert_eq!(handle.status(), Status::Completed);
    assert_eq!(handle.result(), Some(Value::Int(5)));
    assert_eq!(hub.handler_count("tick"), 0);
}

#[test]
fn test_tick_delay_captures_at_activation() {
    let (scheduler, hub, _clock) = scheduler();

    // three ticks happen before the step is installed
    for _ in 0..3 {
        hub.emit_tick();
    }
    let handle = Step::delay_ticks(2).run(Value::Null, &scheduler).unwrap();

    hub.emit_tick();
    hub.emit_tick();
    assert_eq!(handle.status(), Status::Suspended);

    hub.emit_tick();
    assert_eq!(handle.status(), Status::Completed);
}

#[test]
fn test_countdown_reports_once_per_tick() {
    let (scheduler, hub, _clock) = scheduler();
    let total: i64 = 90;
    let reports = Rc::new(RefCell::new(Vec::new()));

    // each iteration waits for one tick, reports the remaining count,
    // and feeds the original input back into the loop
    let report = {
        let reports = reports.clone();
        Step::lift(move |value| {
            let Value::Pair(pair) = &value else {
                return Value::done_with(value);
            };
            let tick = pair
                .snd()
                .field("tick")
                .and_then(Value::as_int)
                .unwrap_or(0);
            reports.borrow_mut().push(total - tick);
            Value::continue_with(pair.fst())
        })
    };
    let countdown = Step::listen("tick").then(report).repeat();
    let handle = countdown.run(Value::Null, &scheduler).unwrap();

    // a watchdog waits out the 90th tick, then tears the countdown down
    let watchdog = {
        let countdown = handle.clone();
        Step::delay_ticks(total as u64 - 1).then(Step::lift(move |value| {
            countdown.cancel();
            value
        }))
    };
    let watchdog_handle = watchdog.run(Value::Null, &scheduler).unwrap();

    for _ in 0..total {
        hub.emit_tick();
    }

    let reports = reports.borrow();
    let expected: Vec<i64> = (0..total).map(|n| total - 1 - n).collect();
    assert_eq!(*reports, expected, "one report per tick, counting down");
    assert_eq!(reports.last(), Some(&0));

    assert_eq!(handle.status(), Status::Cancelled);
    assert_eq!(watchdog_handle.status(), Status::Completed);
    assert_eq!(hub.handler_count("tick"), 0);
}

#[test]
fn test_animate_hops_through_the_timer_each_iteration() {
    let (scheduler, _hub, clock) = scheduler();
    let count = Rc::new(Cell::new(0u32));

    let body = {
        let count = count.clone();
        Step::lift(move |value| {
            count.set(count.get() + 1);
            if count.get() < 3 {
                Value::continue_with(value)
            } else {
                Value::done_with(value)
            }
        })
    };
    let handle = body.animate(20).run(Value::Int(8), &scheduler).unwrap();

    // a synchronous body still may not run before the first hop
    assert_eq!(count.get(), 0);
    assert_eq!(handle.status(), Status::Suspended);

    clock.advance(20);
    assert_eq!(count.get(), 1);
    clock.advance(20);
    assert_eq!(count.get(), 2);
    clock.advance(20);
    assert_eq!(count.get(), 3);
    assert_eq!(handle.status(), Status::Completed);
    assert_eq!(handle.result(), Some(Value::Int(8)));
}

#[test]
fn test_animate_cancel_clears_the_pending_hop() {
    let (scheduler, _hub, clock) = scheduler();

    let body = Step::lift(Value::continue_with);
    let handle = body.animate(20).run(Value::Null, &scheduler).unwrap();
    clock.advance(20);
    assert_eq!(clock.pending(), 1);

    handle.cancel();
    assert_eq!(clock.pending(), 0);

    clock.advance(100);
    assert_eq!(handle.status(), Status::Cancelled);
}
