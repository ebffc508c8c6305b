//! Lookahead event scheduler.
//!
//! The [`Clock`] keeps future events sorted by deadline. It does not know how
//! to run them: the owner pops due events with [`Clock::pop_due`], fires them
//! however it likes, then hands them back through [`Clock::finish`] so
//! repeating events re-enter the queue. [`Clock::tick`] wraps that loop for
//! simple callers.
//!
//! Once per audio block the runtime ticks the clock; every event whose
//! deadline falls before the end of the upcoming block (`now + look_ahead`)
//! fires during that tick, and its deadline travels on as the `time_tag` of
//! the messages it produces, so DSP units can place the effect on the exact
//! sample inside the block.

use std::collections::VecDeque;

/// Smallest accepted repeat period in milliseconds.
pub const MIN_PERIOD: f64 = 0.01;

/// Handle returned by [`Clock::schedule`], used to cancel the event.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EventHandle(u64);

#[derive(Debug)]
struct Event<E> {
    handle: EventHandle,
    payload: E,
    deadline: f64,
    period: Option<f64>,
}

/// An event that was removed from the queue because it is due.
#[derive(Debug)]
pub struct DueEvent<E> {
    pub handle: EventHandle,
    pub payload: E,
    pub deadline: f64,
    period: Option<f64>,
}

/// Sorted future-event queue.
#[derive(Debug)]
pub struct Clock<E> {
    queue: VecDeque<Event<E>>,
    now: f64,
    look_ahead: f64,
    next_handle: u64,
    /// The event currently being fired, and whether it was cancelled meanwhile.
    firing: Option<(EventHandle, bool)>,
}

impl<E> Clock<E> {
    /// Create a clock at time 0 with the given lookahead window (ms).
    pub fn new(look_ahead: f64) -> Self {
        Self {
            queue: VecDeque::new(),
            now: 0.0,
            look_ahead,
            next_handle: 0,
            firing: None,
        }
    }

    #[inline]
    pub fn now(&self) -> f64 {
        self.now
    }

    #[inline]
    pub fn look_ahead(&self) -> f64 {
        self.look_ahead
    }

    /// Move virtual time forward by `ms`.
    pub fn advance(&mut self, ms: f64) {
        self.now += ms;
    }

    /// Jump to an absolute time.
    pub fn set_now(&mut self, now: f64) {
        self.now = now;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Deadline of the earliest pending event.
    pub fn next_deadline(&self) -> Option<f64> {
        self.queue.front().map(|e| e.deadline)
    }

    /// Insert an event. Events with equal deadlines fire in scheduling order.
    pub fn schedule(&mut self, payload: E, deadline: f64, repeat: Option<f64>) -> EventHandle {
        let handle = EventHandle(self.next_handle);
        self.next_handle += 1;

        let period = repeat.map(|p| p.max(MIN_PERIOD));
        self.insert(Event { handle, payload, deadline, period });
        handle
    }

    /// Remove a pending event.
    ///
    /// Returns whether anything was cancelled. Unscheduling an event that
    /// already fired or was already cancelled is a no-op; unscheduling the
    /// event that is firing right now stops it from repeating.
    pub fn unschedule(&mut self, handle: EventHandle) -> bool {
        if let Some(pos) = self.queue.iter().position(|e| e.handle == handle) {
            self.queue.remove(pos);
            return true;
        }
        match &mut self.firing {
            Some((firing, cancelled)) if *firing == handle && !*cancelled => {
                *cancelled = true;
                true
            }
            _ => false,
        }
    }

    /// Drop every pending event whose payload matches.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&E) -> bool) {
        self.queue.retain(|e| !pred(&e.payload));
    }

    /// Pop the earliest event if it is due within the lookahead window.
    pub fn pop_due(&mut self) -> Option<DueEvent<E>> {
        let window = self.now + self.look_ahead;
        if self.queue.front()?.deadline > window {
            return None;
        }

        let Event { handle, payload, deadline, period } = self.queue.pop_front()?;
        self.firing = Some((handle, false));
        Some(DueEvent { handle, payload, deadline, period })
    }

    /// Hand back a fired event; repeating events are re-armed one period
    /// after their previous deadline (not after `now`), so they never drift.
    pub fn finish(&mut self, due: DueEvent<E>) {
        let cancelled = matches!(self.firing, Some((h, true)) if h == due.handle);
        self.firing = None;

        if let (Some(period), false) = (due.period, cancelled) {
            self.insert(Event {
                handle: due.handle,
                payload: due.payload,
                deadline: due.deadline + period,
                period: Some(period),
            });
        }
    }

    /// Fire every due event in deadline order.
    pub fn tick(&mut self, mut fire: impl FnMut(&E, f64)) {
        while let Some(due) = self.pop_due() {
            fire(&due.payload, due.deadline);
            self.finish(due);
        }
    }

    fn insert(&mut self, event: Event<E>) {
        let pos = self.queue.partition_point(|e| e.deadline <= event.deadline);
        self.queue.insert(pos, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut clock = Clock::new(0.0);
        clock.schedule("c", 500.0, None);
        clock.schedule("a", 100.0, None);
        clock.schedule("b", 300.0, None);
        clock.set_now(1000.0);

        let mut fired = Vec::new();
        clock.tick(|name, deadline| fired.push((*name, deadline)));
        assert_eq!(fired, vec![("a", 100.0), ("b", 300.0), ("c", 500.0)]);
        assert!(clock.is_empty());
    }

    #[test]
    fn fires_within_lookahead_only() {
        let mut clock = Clock::new(10.0);
        clock.schedule(1, 5.0, None);
        clock.schedule(2, 10.0, None);
        clock.schedule(3, 10.5, None);

        let mut fired = Vec::new();
        clock.tick(|id, _| fired.push(*id));
        assert_eq!(fired, vec![1, 2]);
        assert_eq!(clock.next_deadline(), Some(10.5));
    }

    #[test]
    fn equal_deadlines_keep_scheduling_order() {
        let mut clock = Clock::new(0.0);
        for id in 0..4 {
            clock.schedule(id, 50.0, None);
        }
        clock.set_now(50.0);

        let mut fired = Vec::new();
        clock.tick(|id, _| fired.push(*id));
        assert_eq!(fired, vec![0, 1, 2, 3]);
    }

    #[test]
    fn repeating_event_does_not_drift() {
        let mut clock = Clock::new(0.0);
        clock.schedule((), 0.0, Some(30.0));

        let mut deadlines = Vec::new();
        // late, irregular ticks
        for now in [0.0, 45.0, 100.0, 101.0, 250.0] {
            clock.set_now(now);
            clock.tick(|_, deadline| deadlines.push(deadline));
        }
        assert_eq!(deadlines, vec![0.0, 30.0, 60.0, 90.0, 120.0, 150.0, 180.0, 210.0, 240.0]);
        assert_eq!(clock.next_deadline(), Some(270.0));
    }

    #[test]
    fn unschedule_is_idempotent() {
        let mut clock = Clock::new(0.0);
        let fired_once = clock.schedule("once", 1.0, None);
        let cancelled = clock.schedule("cancelled", 2.0, None);

        assert!(clock.unschedule(cancelled));
        assert!(!clock.unschedule(cancelled));

        clock.set_now(5.0);
        let mut fired = Vec::new();
        clock.tick(|name, _| fired.push(*name));
        assert_eq!(fired, vec!["once"]);

        assert!(!clock.unschedule(fired_once));
        assert!(!clock.unschedule(fired_once));
    }

    #[test]
    fn unschedule_while_firing_stops_repeat() {
        let mut clock = Clock::new(0.0);
        let handle = clock.schedule((), 0.0, Some(10.0));

        let due = clock.pop_due().unwrap();
        assert!(clock.unschedule(handle));
        clock.finish(due);
        assert!(clock.is_empty());
    }

    #[test]
    fn clamps_tiny_periods() {
        let mut clock = Clock::new(0.0);
        clock.schedule((), 0.0, Some(0.0));
        clock.set_now(0.055);

        let mut count = 0;
        clock.tick(|_, _| count += 1);
        assert_eq!(count, 6);
    }
}
