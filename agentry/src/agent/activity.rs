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

//! Per-agent busy/idle accounting.
//!
//! The discrete-event platform may only advance virtual time while every
//! agent is idle. An agent counts as busy from the moment something wakes it
//! until its scheduler finds nothing runnable, and is not counted while a
//! behavior is suspended in `delay`, `receive` or `request`.
//!
//! Wakers flip the agent to busy synchronously, before the agent task gets
//! to run, so the platform can never observe a woken-but-not-yet-running
//! agent as idle.

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::common::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Running,
    Idle,
    Suspended,
    Finished,
}

#[derive(Debug)]
struct State {
    mode: Mode,
    pending_wake: bool,
}

#[derive(Debug)]
pub(crate) struct Activity {
    platform: Platform,
    state: Mutex<State>,
    notify: Notify,
}

impl Activity {
    /// New activity, counted busy until its scheduler first goes idle.
    pub(crate) fn new(platform: Platform) -> Self {
        platform.busy_inc();
        Self {
            platform,
            state: Mutex::new(State {
                mode: Mode::Running,
                pending_wake: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Signals that the agent has new work.
    pub(crate) fn wake(&self) {
        {
            let mut state = self.state.lock();
            if state.mode == Mode::Finished {
                return;
            }
            state.pending_wake = true;
            if state.mode == Mode::Idle {
                state.mode = Mode::Running;
                self.platform.busy_inc();
            }
        }
        self.notify.notify_one();
    }

    /// Called by the scheduler when nothing is runnable. Returns `false` if a
    /// wake arrived since the last check, in which case the scheduler should
    /// look again instead of parking.
    pub(crate) fn try_idle(&self) -> bool {
        let mut state = self.state.lock();
        if state.pending_wake {
            state.pending_wake = false;
            return false;
        }
        if state.mode == Mode::Running {
            state.mode = Mode::Idle;
            self.platform.busy_dec();
        }
        true
    }

    /// Parks until woken.
    pub(crate) async fn parked(&self) {
        self.notify.notified().await;
        let mut state = self.state.lock();
        state.pending_wake = false;
        if state.mode == Mode::Idle {
            state.mode = Mode::Running;
            self.platform.busy_inc();
        }
    }

    /// A behavior step is waiting on a timer or reply.
    pub(crate) fn suspend(&self) {
        let mut state = self.state.lock();
        if state.mode == Mode::Running {
            state.mode = Mode::Suspended;
            self.platform.busy_dec();
        }
    }

    /// The awaited timer or reply has arrived.
    pub(crate) fn resume(&self) {
        let mut state = self.state.lock();
        if state.mode == Mode::Suspended {
            state.mode = Mode::Running;
            self.platform.busy_inc();
        }
    }

    /// The agent has terminated; it no longer counts toward busy.
    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        if matches!(state.mode, Mode::Running) {
            self.platform.busy_dec();
        }
        state.mode = Mode::Finished;
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(self.state.lock().mode, Mode::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_activity_counts_as_busy() {
        let platform = Platform::discrete_event();
        let activity = Activity::new(platform.clone());
        assert!(!platform.is_idle());
        assert!(activity.try_idle());
        assert!(platform.is_idle());
    }

    #[tokio::test]
    async fn test_wake_marks_busy_before_agent_runs() {
        let platform = Platform::discrete_event();
        let activity = Activity::new(platform.clone());
        assert!(activity.try_idle());
        activity.wake();
        assert!(!platform.is_idle());
        activity.parked().await;
        assert!(!platform.is_idle());
        activity.wake();
        assert!(!activity.try_idle(), "a wake during the pass forces another pass");
        assert!(activity.try_idle());
        assert!(platform.is_idle());
    }

    #[tokio::test]
    async fn test_wake_while_suspended_does_not_count_busy() {
        let platform = Platform::discrete_event();
        let activity = Activity::new(platform.clone());
        activity.suspend();
        assert!(platform.is_idle());
        activity.wake();
        assert!(platform.is_idle());
        activity.resume();
        assert!(!platform.is_idle());
        activity.finish();
        assert!(platform.is_idle());
    }
}
