//! Deferred callback queue for the controller's single execution context.
//!
//! Every one-shot delay (speech safety timers, bored-behavior stops, the
//! ambient blink loop, scripted lines) is a [`TimerQueue`] entry. The actor
//! sleeps until [`TimerQueue::next_deadline`] and then pops due entries one
//! at a time, so a handler that cancels a sibling due at the same instant
//! prevents it from firing.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use tokio::time::Instant;

/// Handle to a scheduled entry, usable to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Slot {
    deadline: Instant,
    id: TimerId,
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ids are allocated monotonically, so they double as the scheduling order.
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of deadlines with lazy cancellation.
pub struct TimerQueue<A> {
    heap: BinaryHeap<Reverse<Slot>>,
    actions: HashMap<TimerId, A>,
    next_id: u64,
}

impl<A> Default for TimerQueue<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> TimerQueue<A> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            actions: HashMap::new(),
            next_id: 0,
        }
    }

    /// Schedule `action` to fire at `deadline`.
    pub fn schedule(&mut self, deadline: Instant, action: A) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.actions.insert(id, action);
        self.heap.push(Reverse(Slot { deadline, id }));
        id
    }

    /// Cancel a pending entry. Returns `false` if it already fired or was canceled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.actions.remove(&id).is_some()
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.actions.contains_key(&id)
    }

    /// Number of entries that will still fire.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Earliest deadline among live entries.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_canceled_head();
        self.heap.peek().map(|Reverse(slot)| slot.deadline)
    }

    /// Pop the earliest live entry whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, A)> {
        self.discard_canceled_head();
        let due = matches!(self.heap.peek(), Some(Reverse(slot)) if slot.deadline <= now);
        if !due {
            return None;
        }
        let Reverse(slot) = self.heap.pop()?;
        let action = self.actions.remove(&slot.id)?;
        Some((slot.id, action))
    }

    /// Drop every pending entry.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.actions.clear();
    }

    fn discard_canceled_head(&mut self) {
        while let Some(Reverse(slot)) = self.heap.peek() {
            if self.actions.contains_key(&slot.id) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::time::Duration;

    fn drain(queue: &mut TimerQueue<&'static str>, now: Instant) -> Vec<&'static str> {
        let mut fired = Vec::new();
        while let Some((_, action)) = queue.pop_due(now) {
            fired.push(action);
        }
        fired
    }

    #[test]
    fn fires_in_deadline_order() {
        let t0 = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(t0 + Duration::from_secs(3), "c");
        queue.schedule(t0 + Duration::from_secs(1), "a");
        queue.schedule(t0 + Duration::from_secs(2), "b");

        assert_eq!(queue.next_deadline(), Some(t0 + Duration::from_secs(1)));
        assert_eq!(drain(&mut queue, t0 + Duration::from_secs(5)), vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn ties_fire_in_scheduling_order() {
        let t0 = Instant::now();
        let deadline = t0 + Duration::from_secs(1);
        let mut queue = TimerQueue::new();
        queue.schedule(deadline, "first");
        queue.schedule(deadline, "second");
        queue.schedule(deadline, "third");

        assert_eq!(drain(&mut queue, deadline), vec!["first", "second", "third"]);
    }

    #[test]
    fn nothing_fires_before_deadline() {
        let t0 = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(t0 + Duration::from_secs(1), "later");
        assert!(queue.pop_due(t0).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn canceled_entries_never_fire() {
        let t0 = Instant::now();
        let mut queue = TimerQueue::new();
        let a = queue.schedule(t0, "a");
        queue.schedule(t0 + Duration::from_millis(10), "b");

        assert!(queue.cancel(a));
        assert!(!queue.is_pending(a));
        assert_eq!(queue.next_deadline(), Some(t0 + Duration::from_millis(10)));
        assert_eq!(drain(&mut queue, t0 + Duration::from_secs(1)), vec!["b"]);
    }

    #[test]
    fn cancel_after_fire_or_twice_is_a_no_op() {
        let t0 = Instant::now();
        let mut queue = TimerQueue::new();
        let id = queue.schedule(t0, "once");

        let (fired_id, _) = queue.pop_due(t0).unwrap();
        assert_eq!(fired_id, id);
        assert!(!queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(queue.next_deadline().is_none());
    }

    #[test]
    fn entries_scheduled_while_draining_are_seen() {
        let t0 = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(t0, "outer");
        let (_, first) = queue.pop_due(t0).unwrap();
        assert_eq!(first, "outer");
        queue.schedule(t0, "inner");
        assert_eq!(drain(&mut queue, t0), vec!["inner"]);
    }
}
