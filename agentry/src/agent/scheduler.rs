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

//! The per-agent cooperative scheduling loop.

use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::FutureExt;
use tracing::{debug, error, instrument, trace};

use crate::agent::behavior::{BehaviorKind, Progress};
use crate::agent::managed_agent::Hook;
use crate::agent::{Agent, AgentHandle, AgentState, BehaviorContext, BehaviorId, BehaviorState};
use crate::common::platform::panic_message;

struct Scheduled {
    id: BehaviorId,
    name: Option<String>,
    state: BehaviorState,
    /// Bumped on every block and restart; stale timer wakes carry an old value.
    generation: u64,
    /// Event named by the current block, if any.
    awaiting: Option<String>,
    kind: BehaviorKind,
}

impl Scheduled {
    fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}#{}", self.kind.label(), self.id))
    }
}

/// Owns an agent's behaviors and runs them on the agent's task.
pub(crate) struct AgentTask {
    handle: AgentHandle,
    behaviors: Vec<Scheduled>,
    after_start: Option<Hook>,
    before_stop: Option<Hook>,
}

fn run_hook(hook: Hook, handle: &AgentHandle, which: &str) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(handle))) {
        error!(
            "{} hook of agent {} panicked: {}",
            which,
            handle.id(),
            panic_message(&*payload)
        );
    }
}

impl AgentTask {
    pub(crate) fn new(handle: AgentHandle, agent: Agent) -> Self {
        let behaviors = agent
            .behaviors
            .into_iter()
            .map(|behavior| Scheduled {
                id: handle.next_behavior_id(),
                name: behavior.name,
                state: BehaviorState::New,
                generation: 0,
                awaiting: None,
                kind: behavior.kind,
            })
            .collect();
        Self {
            handle,
            behaviors,
            after_start: agent.after_start,
            before_stop: agent.before_stop,
        }
    }

    pub(crate) fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    /// Discards an agent whose task was never spawned.
    pub(crate) fn abandon(self) {
        let handle = self.handle;
        handle.container().agent_terminated(&handle);
        handle.mailbox().close();
        handle.activity().finish();
        handle.set_state(AgentState::Finished);
    }

    #[instrument(skip(self), fields(agent = %self.handle.id()))]
    pub(crate) async fn run(mut self) {
        let handle = self.handle.clone();
        let cancel = handle.cancellation();
        let activity = handle.activity();

        handle.set_state(AgentState::Running);
        debug!("Agent {} started", handle.id());
        if let Some(hook) = self.after_start.take() {
            run_hook(hook, &handle, "after_start");
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.absorb_control();
            let ran = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                ran = self.pass() => ran,
            };
            if ran {
                tokio::task::yield_now().await;
                continue;
            }
            if !activity.try_idle() {
                continue;
            }
            trace!("Agent {} idle", handle.id());
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = activity.parked() => {}
            }
        }

        handle.set_state(AgentState::Finishing);
        if let Some(hook) = self.before_stop.take() {
            run_hook(hook, &handle, "before_stop");
        }
        self.behaviors.clear();
        handle.container().agent_terminated(&handle);
        handle.mailbox().close();
        activity.finish();
        handle.set_state(AgentState::Finished);
        debug!("Agent {} stopped", handle.id());
    }

    /// Applies behavior additions, removals and wake-ups queued by other tasks.
    fn absorb_control(&mut self) {
        let pending = self.handle.take_control();
        for (id, behavior) in pending.added {
            self.behaviors.push(Scheduled {
                id,
                name: behavior.name,
                state: BehaviorState::New,
                generation: 0,
                awaiting: None,
                kind: behavior.kind,
            });
        }
        if !pending.removed.is_empty() {
            self.behaviors.retain(|b| !pending.removed.contains(&b.id));
        }
        if pending.message_arrived {
            for behavior in &mut self.behaviors {
                if behavior.state == BehaviorState::Blocked {
                    behavior.state = BehaviorState::Running;
                    behavior.generation += 1;
                    behavior.awaiting = None;
                }
            }
        }
        for event in pending.events {
            for behavior in &mut self.behaviors {
                if behavior.state == BehaviorState::Blocked && behavior.awaiting.as_ref() == Some(&event) {
                    trace!("Behavior {} woken by event {}", behavior.label(), event);
                    behavior.state = BehaviorState::Running;
                    behavior.generation += 1;
                    behavior.awaiting = None;
                }
            }
        }
        for (id, generation) in pending.timer_wakes {
            if let Some(behavior) = self.behaviors.iter_mut().find(|b| b.id == id) {
                if behavior.state == BehaviorState::Blocked && behavior.generation == generation {
                    behavior.state = BehaviorState::Running;
                }
            }
        }
    }

    /// Steps every runnable behavior once, in the order they were added.
    async fn pass(&mut self) -> bool {
        let mut ran = false;
        for index in 0..self.behaviors.len() {
            if matches!(
                self.behaviors[index].state,
                BehaviorState::New | BehaviorState::Running
            ) {
                ran = true;
                self.step(index).await;
            }
        }
        self.behaviors.retain(|b| b.state != BehaviorState::Done);
        ran
    }

    async fn step(&mut self, index: usize) {
        let handle = self.handle.clone();
        let behavior = &mut self.behaviors[index];
        let mut ctx = BehaviorContext::new(handle.clone(), behavior.id, behavior.kind.tick_count());

        if behavior.state == BehaviorState::New {
            behavior.kind.on_start(&mut ctx);
            behavior.state = BehaviorState::Running;
        }

        let outcome = AssertUnwindSafe(behavior.kind.step(&mut ctx))
            .catch_unwind()
            .await;
        let progress = match outcome {
            Ok(progress) => progress,
            Err(payload) => {
                error!(
                    "Behavior {} of agent {} panicked: {}",
                    behavior.label(),
                    handle.id(),
                    panic_message(&*payload)
                );
                return;
            }
        };

        match progress {
            Progress::Continue => {}
            Progress::Done => {
                behavior.state = BehaviorState::Done;
                behavior.kind.on_end(&mut ctx);
                trace!("Behavior {} done", behavior.label());
            }
            Progress::Block(timeout) => {
                behavior.state = BehaviorState::Blocked;
                behavior.generation += 1;
                behavior.awaiting = ctx.take_event();
                if let Some(ms) = timeout {
                    let (id, generation) = (behavior.id, behavior.generation);
                    let waker = handle.clone();
                    handle
                        .platform()
                        .schedule_after(ms, move || waker.wake_behavior(id, generation));
                }
            }
        }
    }
}
