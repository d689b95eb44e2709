//! Event-source adapters
//!
//! Leaf steps built on the event-source and tick-counter capabilities.
//! Listening adapters forward the original input augmented with the
//! captured event data, as `Pair(input, event detail)`; the tick delay
//! forwards its input unchanged.

use std::cell::Cell;
use std::rc::Rc;

use super::capability::{EventHandler, SubscriptionToken};
use super::error::StepResult;
use super::instance::{CancelToken, Controller};
use super::step::{Step, StepBody};
use super::value::Value;

impl Step {
    /// Subscribe once to a named event; on the first firing,
    /// unsubscribe and forward `Pair(input, event detail)`
    pub fn listen(event: impl Into<String>) -> Step {
        Step::new(ListenStep {
            event: event.into(),
        })
    }

    /// Subscribe once to a named event; on each firing, inspect the
    /// named detail field and only unsubscribe and forward
    /// `Pair(input, event detail)` when it equals `expected` —
    /// otherwise keep listening
    pub fn listen_for(
        event: impl Into<String>,
        field: impl Into<String>,
        expected: Value,
    ) -> Step {
        Step::new(ListenForStep {
            event: event.into(),
            field: field.into(),
            expected,
        })
    }

    /// Capture the tick counter at activation; once the counter has
    /// exceeded the captured value plus `ticks`, forward the input
    /// unchanged
    pub fn delay_ticks(ticks: u64) -> Step {
        Step::new(TickDelayStep { ticks })
    }
}

struct ListenStep {
    event: String,
}

impl StepBody for ListenStep {
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        let events = ctl.events();
        let fired = Rc::new(Cell::new(false));
        let sub_cell = Rc::new(Cell::new(None::<SubscriptionToken>));
        let token_cell = Rc::new(Cell::new(None::<CancelToken>));
        let handler: EventHandler = {
            let ctl = ctl.clone();
            let events = events.clone();
            let name = self.event.clone();
            let fired = fired.clone();
            let sub_cell = sub_cell.clone();
            let token_cell = token_cell.clone();
            Rc::new(move |event| {
                // dispatch snapshots can deliver one extra firing
                if fired.replace(true) {
                    return;
                }
                if let Some(sub) = sub_cell.get() {
                    events.unsubscribe(&name, sub);
                }
                if let Some(token) = token_cell.get() {
                    ctl.advance(token);
                }
                ctl.proceed(Value::pair(input.clone(), event.detail().clone()));
            })
        };
        let sub = events.subscribe(&self.event, handler);
        sub_cell.set(Some(sub));
        let canceller = {
            let events = events.clone();
            let name = self.event.clone();
            Rc::new(move || events.unsubscribe(&name, sub))
        };
        token_cell.set(Some(ctl.add_canceller(canceller)));
        Ok(())
    }

    fn label(&self) -> String {
        format!("listen(\"{}\")", self.event)
    }
}

struct ListenForStep {
    event: String,
    field: String,
    expected: Value,
}

impl StepBody for ListenForStep {
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        let events = ctl.events();
        let fired = Rc::new(Cell::new(false));
        let sub_cell = Rc::new(Cell::new(None::<SubscriptionToken>));
        let token_cell = Rc::new(Cell::new(None::<CancelToken>));
        let handler: EventHandler = {
            let ctl = ctl.clone();
            let events = events.clone();
            let name = self.event.clone();
            let field = self.field.clone();
            let expected = self.expected.clone();
            let fired = fired.clone();
            let sub_cell = sub_cell.clone();
            let token_cell = token_cell.clone();
            Rc::new(move |event| {
                if event.field(&field) != Some(&expected) {
                    return;
                }
                if fired.replace(true) {
                    return;
                }
                if let Some(sub) = sub_cell.get() {
                    events.unsubscribe(&name, sub);
                }
                if let Some(token) = token_cell.get() {
                    ctl.advance(token);
                }
                ctl.proceed(Value::pair(input.clone(), event.detail().clone()));
            })
        };
        let sub = events.subscribe(&self.event, handler);
        sub_cell.set(Some(sub));
        let canceller = {
            let events = events.clone();
            let name = self.event.clone();
            Rc::new(move || events.unsubscribe(&name, sub))
        };
        token_cell.set(Some(ctl.add_canceller(canceller)));
        Ok(())
    }

    fn label(&self) -> String {
        format!(
            "listen-for(\"{}\", {} = {})",
            self.event, self.field, self.expected
        )
    }
}

struct TickDelayStep {
    ticks: u64,
}

impl StepBody for TickDelayStep {
    fn activate(&self, input: Value, ctl: &Controller) -> StepResult<()> {
        let events = ctl.events();
        let counter = ctl.ticks();
        let began_at = counter.current();
        let wait = self.ticks;
        let fired = Rc::new(Cell::new(false));
        let sub_cell = Rc::new(Cell::new(None::<SubscriptionToken>));
        let token_cell = Rc::new(Cell::new(None::<CancelToken>));
        let handler: EventHandler = {
            let ctl = ctl.clone();
            let events = events.clone();
            let fired = fired.clone();
            let sub_cell = sub_cell.clone();
            let token_cell = token_cell.clone();
            Rc::new(move |_event| {
                if counter.current() <= began_at + wait {
                    return;
                }
                if fired.replace(true) {
                    return;
                }
                if let Some(sub) = sub_cell.get() {
                    events.unsubscribe("tick", sub);
                }
                if let Some(token) = token_cell.get() {
                    ctl.advance(token);
                }
                ctl.proceed(input.clone());
            })
        };
        let sub = events.subscribe("tick", handler);
        sub_cell.set(Some(sub));
        let canceller = {
            let events = events.clone();
            Rc::new(move || events.unsubscribe("tick", sub))
        };
        token_cell.set(Some(ctl.add_canceller(canceller)));
        Ok(())
    }

    fn label(&self) -> String {
        format!("delay-ticks({})", self.ticks)
    }
}
