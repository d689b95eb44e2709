//! Capabilities supplied by the host environment
//!
//! The runtime core consumes three capabilities: an event source, a
//! timer, and a monotonically increasing tick counter. `EventHub` and
//! `VirtualClock` are in-process implementations suitable for games
//! driven off a simulated clock and for deterministic tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::value::{Event, Value};

/// Token identifying one event subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Token identifying one scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// An event callback registered with an event source
pub type EventHandler = Rc<dyn Fn(&Event)>;

/// A timer callback
pub type TimerCallback = Rc<dyn Fn()>;

/// Source of named events
///
/// Each `subscribe` call registers exactly one handler. No ordering is
/// guaranteed across multiple handlers on the same event name.
pub trait EventSource {
    /// Register a handler for a named event
    fn subscribe(&self, name: &str, handler: EventHandler) -> SubscriptionToken;

    /// Remove a previously registered handler
    fn unsubscribe(&self, name: &str, token: SubscriptionToken);
}

/// Source of cancellable one-shot timers
pub trait TimerSource {
    /// Schedule a callback after `delay_ms` time units
    fn schedule(&self, delay_ms: u64, callback: TimerCallback) -> TimerToken;

    /// Cancel a timer before it fires
    fn cancel(&self, token: TimerToken);
}

/// An externally maintained, monotonically increasing tick counter
pub trait TickSource {
    /// The current tick value
    fn current(&self) -> u64;
}

/// The capability bundle a scheduler hands to its run-instances
#[derive(Clone)]
pub struct Env {
    events: Rc<dyn EventSource>,
    timers: Rc<dyn TimerSource>,
    ticks: Rc<dyn TickSource>,
}

impl Env {
    /// Bundle three capabilities
    pub fn new(
        events: Rc<dyn EventSource>,
        timers: Rc<dyn TimerSource>,
        ticks: Rc<dyn TickSource>,
    ) -> Self {
        Self {
            events,
            timers,
            ticks,
        }
    }

    /// Wire up an [`EventHub`] and a [`VirtualClock`] and return the
    /// bundle together with both, for driving from the outside
    pub fn with_hub_and_clock() -> (Self, Rc<EventHub>, Rc<VirtualClock>) {
        let hub = Rc::new(EventHub::new());
        let clock = Rc::new(VirtualClock::new());
        let env = Env::new(hub.clone(), clock.clone(), hub.clone());
        (env, hub, clock)
    }

    /// The event-source capability
    pub fn events(&self) -> Rc<dyn EventSource> {
        self.events.clone()
    }

    /// The timer capability
    pub fn timers(&self) -> Rc<dyn TimerSource> {
        self.timers.clone()
    }

    /// The tick-counter capability
    pub fn ticks(&self) -> Rc<dyn TickSource> {
        self.ticks.clone()
    }
}

struct HubInner {
    next_token: u64,
    handlers: HashMap<String, Vec<(SubscriptionToken, EventHandler)>>,
    tick: u64,
}

/// In-process event source doubling as the game clock's tick counter
///
/// Dispatch snapshots the handler list first, so handlers registered
/// during an emit do not see the current event and handlers removed
/// during an emit may still be invoked once.
pub struct EventHub {
    inner: RefCell<HubInner>,
}

impl EventHub {
    /// Create an empty hub with the tick counter at zero
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(HubInner {
                next_token: 0,
                handlers: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Dispatch an event to every handler subscribed to its name
    pub fn emit(&self, event: Event) {
        let snapshot: Vec<EventHandler> = {
            let inner = self.inner.borrow();
            match inner.handlers.get(event.name()) {
                Some(registered) => registered.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };
        for handler in snapshot {
            handler(&event);
        }
    }

    /// Advance the tick counter and emit a `"tick"` event whose detail
    /// records the new value; returns the new tick
    pub fn emit_tick(&self) -> u64 {
        let tick = {
            let mut inner = self.inner.borrow_mut();
            inner.tick += 1;
            inner.tick
        };
        self.emit(Event::new(
            "tick",
            Value::record([("tick", Value::Int(tick as i64))]),
        ));
        tick
    }

    /// Number of handlers currently subscribed to an event name
    pub fn handler_count(&self, name: &str) -> usize {
        self.inner
            .borrow()
            .handlers
            .get(name)
            .map(|registered| registered.len())
            .unwrap_or(0)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for EventHub {
    fn subscribe(&self, name: &str, handler: EventHandler) -> SubscriptionToken {
        let mut inner = self.inner.borrow_mut();
        let token = SubscriptionToken(inner.next_token);
        inner.next_token += 1;
        inner
            .handlers
            .entry(name.to_string())
            .or_default()
            .push((token, handler));
        token
    }

    fn unsubscribe(&self, name: &str, token: SubscriptionToken) {
        let mut inner = self.inner.borrow_mut();
        if let Some(registered) = inner.handlers.get_mut(name) {
            registered.retain(|(t, _)| *t != token);
        }
    }
}

impl TickSource for EventHub {
    fn current(&self) -> u64 {
        self.inner.borrow().tick
    }
}

struct ClockEntry {
    token: TimerToken,
    deadline: u64,
    callback: TimerCallback,
}

struct ClockInner {
    now_ms: u64,
    next_token: u64,
    timers: Vec<ClockEntry>,
}

/// Deterministic manual timer
///
/// Time only moves when `advance` is called; due callbacks fire in
/// deadline order (ties in scheduling order) and may schedule further
/// timers within the same advance.
pub struct VirtualClock {
    inner: RefCell<ClockInner>,
}

impl VirtualClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(ClockInner {
                now_ms: 0,
                next_token: 0,
                timers: Vec::new(),
            }),
        }
    }

    /// Current virtual time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.inner.borrow().now_ms
    }

    /// Number of timers scheduled and not yet fired or cancelled
    pub fn pending(&self) -> usize {
        self.inner.borrow().timers.len()
    }

    /// Move time forward by `ms`, firing every callback whose deadline
    /// is reached
    pub fn advance(&self, ms: u64) {
        let target = self.inner.borrow().now_ms + ms;
        loop {
            let due = {
                let mut inner = self.inner.borrow_mut();
                let next = inner
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.deadline <= target)
                    .min_by_key(|(_, e)| (e.deadline, e.token.0))
                    .map(|(i, _)| i);
                match next {
                    Some(index) => {
                        let entry = inner.timers.remove(index);
                        inner.now_ms = inner.now_ms.max(entry.deadline);
                        Some(entry.callback)
                    }
                    None => {
                        inner.now_ms = target;
                        None
                    }
                }
            };
            match due {
                Some(callback) => callback(),
                None => break,
            }
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerSource for VirtualClock {
    fn schedule(&self, delay_ms: u64, callback: TimerCallback) -> TimerToken {
        let mut inner = self.inner.borrow_mut();
        let token = TimerToken(inner.next_token);
        inner.next_token += 1;
        let deadline = inner.now_ms + delay_ms;
        inner.timers.push(ClockEntry {
            token,
            deadline,
            callback,
        });
        token
    }

    fn cancel(&self, token: TimerToken) {
        self.inner.borrow_mut().timers.retain(|e| e.token != token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_hub_subscribe_and_emit() {
        let hub = EventHub::new();
        let seen = Rc::new(Cell::new(0));
        let seen2 = seen.clone();
        let token = hub.subscribe(
            "ping",
            Rc::new(move |event| {
                assert_eq!(event.name(), "ping");
                seen2.set(seen2.get() + 1);
            }),
        );

        hub.emit(Event::new("ping", Value::Null));
        hub.emit(Event::new("other", Value::Null));
        assert_eq!(seen.get(), 1);

        hub.unsubscribe("ping", token);
        hub.emit(Event::new("ping", Value::Null));
        assert_eq!(seen.get(), 1);
        assert_eq!(hub.handler_count("ping"), 0);
    }

    #[test]
    fn test_tick_counter_advances_before_dispatch() {
        let hub = Rc::new(EventHub::new());
        let observed = Rc::new(Cell::new(0u64));
        let hub2 = hub.clone();
        let observed2 = observed.clone();
        hub.subscribe(
            "tick",
            Rc::new(move |event| {
                assert_eq!(event.field("tick").and_then(Value::as_int), Some(1));
                observed2.set(hub2.current());
            }),
        );

        assert_eq!(hub.emit_tick(), 1);
        assert_eq!(observed.get(), 1);
    }

    #[test]
    fn test_clock_fires_in_deadline_order() {
        let clock = VirtualClock::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (name, delay) in [("late", 30u64), ("early", 10), ("mid", 20)] {
            let order = order.clone();
            clock.schedule(delay, Rc::new(move || order.borrow_mut().push(name)));
        }

        clock.advance(15);
        assert_eq!(*order.borrow(), vec!["early"]);
        assert_eq!(clock.pending(), 2);

        clock.advance(100);
        assert_eq!(*order.borrow(), vec!["early", "mid", "late"]);
        assert_eq!(clock.pending(), 0);
        assert_eq!(clock.now_ms(), 115);
    }

    #[test]
    fn test_clock_cancel_prevents_fire() {
        let clock = VirtualClock::new();
        let fired = Rc::new(Cell::new(false));
        let fired2 = fired.clone();
        let token = clock.schedule(10, Rc::new(move || fired2.set(true)));
        clock.cancel(token);
        clock.advance(100);
        assert!(!fired.get());
    }

    #[test]
    fn test_clock_rearm_within_advance() {
        let clock = Rc::new(VirtualClock::new());
        let fired = Rc::new(Cell::new(0));
        let clock2 = clock.clone();
        let fired2 = fired.clone();
        clock.schedule(
            10,
            Rc::new(move || {
                fired2.set(fired2.get() + 1);
                let fired3 = fired2.clone();
                clock2.schedule(10, Rc::new(move || fired3.set(fired3.get() + 1)));
            }),
        );

        clock.advance(25);
        assert_eq!(fired.get(), 2);
    }
}
