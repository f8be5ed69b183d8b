/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Virtual-time event queue used by the discrete-event platform.
//!
//! Events are ordered by fire time; events with equal fire times fire in the
//! order they were scheduled, tracked by a monotonically increasing sequence
//! number.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

/// A deferred callback.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A timed callback waiting in virtual time.
pub(crate) struct DiscreteEvent {
    pub(crate) scheduled_at: u64,
    pub(crate) fire_at: u64,
    pub(crate) seq: u64,
    /// Created internally by a `sleep`/`delay`, as opposed to a user schedule.
    pub(crate) auto_generated: bool,
    pub(crate) callback: Callback,
}

impl fmt::Debug for DiscreteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscreteEvent")
            .field("scheduled_at", &self.scheduled_at)
            .field("fire_at", &self.fire_at)
            .field("seq", &self.seq)
            .field("auto_generated", &self.auto_generated)
            .finish_non_exhaustive()
    }
}

impl PartialEq for DiscreteEvent {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for DiscreteEvent {}

impl PartialOrd for DiscreteEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap is a max-heap; invert so the earliest (fire_at, seq) is on top.
impl Ord for DiscreteEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    heap: BinaryHeap<DiscreteEvent>,
    next_seq: u64,
}

impl EventQueue {
    pub(crate) fn push(&mut self, scheduled_at: u64, fire_at: u64, auto_generated: bool, callback: Callback) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(DiscreteEvent {
            scheduled_at,
            fire_at,
            seq,
            auto_generated,
            callback,
        });
    }

    /// Removes the earliest event if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: u64) -> Option<DiscreteEvent> {
        if self.heap.peek().is_some_and(|e| e.fire_at <= now) {
            self.heap.pop()
        } else {
            None
        }
    }

    pub(crate) fn next_fire_time(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.fire_at)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drops every pending event. Callbacks are never run.
    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Callback {
        let log = log.clone();
        Box::new(move || log.lock().expect("log").push(tag))
    }

    #[test]
    fn test_events_pop_in_time_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = EventQueue::default();
        queue.push(0, 30, false, recorder(&log, "c"));
        queue.push(0, 10, false, recorder(&log, "a"));
        queue.push(0, 20, false, recorder(&log, "b"));

        assert!(queue.pop_due(5).is_none());
        while let Some(event) = queue.pop_due(100) {
            (event.callback)();
        }
        assert_eq!(*log.lock().expect("log"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ties_fire_in_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = EventQueue::default();
        for tag in ["first", "second", "third"] {
            queue.push(0, 50, true, recorder(&log, tag));
        }
        assert_eq!(queue.next_fire_time(), Some(50));
        while let Some(event) = queue.pop_due(50) {
            (event.callback)();
        }
        assert_eq!(*log.lock().expect("log"), vec!["first", "second", "third"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_discards_callbacks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = EventQueue::default();
        queue.push(0, 1, false, recorder(&log, "never"));
        queue.clear();
        assert_eq!(queue.len(), 0);
        assert!(log.lock().expect("log").is_empty());
    }
}
