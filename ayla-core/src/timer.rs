//! Deadline timers on an externally supplied clock.
//!
//! Every deferred action in the engine (scheduling passes, underrun polls,
//! per-frame advances, transition sub-steps, gain re-arm) is a deadline in a
//! `TimerSet`. Nothing fires on its own: the owner pops due timers with
//! [`TimerSet::pop_due`] from its `tick(now)`, so tests drive time with a
//! virtual clock and cancellation is just removal from the set.
//!
//! Timers are handed out one at a time. A handler that cancels a later timer
//! which is also already due stops it from firing in the same tick.

use std::time::Duration;

/// Handle returned by [`TimerSet::schedule`], used for targeted cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Entry<K> {
    id: TimerId,
    deadline: Duration,
    kind: K,
}

/// Position in the arming order, taken with [`TimerSet::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerMark(u64);

/// A small set of pending deadlines tagged with a payload `K`.
#[derive(Debug)]
pub struct TimerSet<K> {
    entries: Vec<Entry<K>>,
    next_id: u64,
}

impl<K> Default for TimerSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TimerSet<K> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Arm a timer that becomes due at `deadline`.
    pub fn schedule(&mut self, deadline: Duration, kind: K) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry { id, deadline, kind });
        id
    }

    /// Cancel one timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Cancel every timer whose payload matches `pred`.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&K) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !pred(&e.kind));
        before - self.entries.len()
    }

    /// Cancel everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn any(&self, mut pred: impl FnMut(&K) -> bool) -> bool {
        self.entries.iter().any(|e| pred(&e.kind))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// Everything armed from here on compares at or after this mark.
    pub fn mark(&self) -> TimerMark {
        TimerMark(self.next_id)
    }

    /// Remove and return the earliest timer due at `now` that was armed before
    /// `armed_before`.
    ///
    /// Ties keep scheduling order. Callers loop until `None` with a mark taken
    /// at the start of the tick, so timers armed by handlers wait for the next
    /// tick even when already due.
    pub fn pop_due(&mut self, now: Duration, armed_before: TimerMark) -> Option<(TimerId, K)> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.deadline <= now && e.id.0 < armed_before.0)
            .min_by_key(|(_, e)| (e.deadline, e.id.0))
            .map(|(idx, _)| idx)?;
        let entry = self.entries.remove(idx);
        Some((entry.id, entry.kind))
    }
}
