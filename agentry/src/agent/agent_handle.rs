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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace};

use crate::agent::activity::Activity;
use crate::agent::mailbox::{Delivery, Mailbox};
use crate::agent::{Behavior, BehaviorId};
use crate::common::{Container, Platform};
use crate::message::{AgentId, Message, MessageFilter};

/// Lifecycle of an agent as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Added to a container that has not started yet.
    Init,
    /// Has runnable behaviors.
    Running,
    /// Every behavior is blocked or suspended.
    Idle,
    /// Running its stop hook.
    Finishing,
    /// Terminated and removed from its container.
    Finished,
}

#[derive(Default)]
pub(crate) struct PendingControl {
    pub(crate) added: Vec<(BehaviorId, Behavior)>,
    pub(crate) removed: Vec<BehaviorId>,
    pub(crate) timer_wakes: Vec<(BehaviorId, u64)>,
    pub(crate) events: Vec<String>,
    pub(crate) message_arrived: bool,
}

pub(crate) struct AgentCore {
    id: AgentId,
    container: Container,
    mailbox: Arc<Mailbox>,
    activity: Arc<Activity>,
    control: Mutex<PendingControl>,
    state: Mutex<AgentState>,
    cancel: CancellationToken,
    next_behavior: AtomicU64,
}

/// Handle to an agent living in a container.
///
/// Clones share the agent. The handle is how behaviors (through
/// [`BehaviorContext::agent`](crate::agent::BehaviorContext::agent)) and
/// outside code send messages, use the directory and manage behaviors.
#[derive(Clone)]
pub struct AgentHandle {
    inner: Arc<AgentCore>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AgentHandle {
    pub(crate) fn new(id: AgentId, container: Container) -> Self {
        let activity = Arc::new(Activity::new(container.platform().clone()));
        Self {
            inner: Arc::new(AgentCore {
                id,
                container,
                mailbox: Arc::new(Mailbox::default()),
                activity,
                control: Mutex::new(PendingControl::default()),
                state: Mutex::new(AgentState::Init),
                cancel: CancellationToken::new(),
                next_behavior: AtomicU64::new(1),
            }),
        }
    }

    /// Federation-wide identifier of the agent.
    pub fn id(&self) -> &AgentId {
        &self.inner.id
    }

    /// Local name of the agent.
    pub fn name(&self) -> &str {
        self.inner.id.name()
    }

    /// Container hosting the agent.
    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    /// Platform the agent's container runs on.
    pub fn platform(&self) -> &Platform {
        self.inner.container.platform()
    }

    /// Platform time in milliseconds.
    pub fn now(&self) -> u64 {
        self.platform().now()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AgentState {
        let state = *self.inner.state.lock();
        if state == AgentState::Running && self.inner.activity.is_idle() {
            AgentState::Idle
        } else {
            state
        }
    }

    /// Sends `message` through the container, stamping this agent as sender
    /// if none is set. Returns whether delivery was attempted.
    pub fn send(&self, mut message: Message) -> bool {
        if message.sender().is_none() {
            message.set_sender(self.inner.id.clone());
        }
        self.inner.container.send(message)
    }

    /// Takes the oldest queued message matching `filter`, without waiting.
    pub fn try_receive(&self, filter: &MessageFilter) -> Option<Message> {
        self.inner.mailbox.take_matching(filter)
    }

    /// Number of queued messages.
    pub fn mailbox_len(&self) -> usize {
        self.inner.mailbox.len()
    }

    /// Advertises `service` for this agent in the container directory.
    pub fn register(&self, service: &str) -> bool {
        self.inner.container.register(&self.inner.id, service)
    }

    /// Withdraws this agent from `service`.
    pub fn deregister(&self, service: &str) -> bool {
        self.inner.container.deregister(&self.inner.id, service)
    }

    /// Subscribes this agent to `topic`.
    pub fn subscribe(&self, topic: &AgentId) -> bool {
        self.inner.container.subscribe(&self.inner.id, topic)
    }

    /// Unsubscribes this agent from `topic`.
    pub fn unsubscribe(&self, topic: &AgentId) -> bool {
        self.inner.container.unsubscribe(&self.inner.id, topic)
    }

    /// First agent advertising `service`, here or on a linked container.
    pub async fn agent_for_service(&self, service: &str) -> Option<AgentId> {
        self.inner.container.agent_for_service(service).await
    }

    /// Every agent advertising `service`, here or on a linked container.
    pub async fn agents_for_service(&self, service: &str) -> Vec<AgentId> {
        self.inner.container.agents_for_service(service).await
    }

    /// Adds a behavior; it becomes runnable on the agent's next scheduling pass.
    pub fn add(&self, behavior: Behavior) -> BehaviorId {
        let id = self.next_behavior_id();
        self.inner.control.lock().added.push((id, behavior));
        self.inner.activity.wake();
        id
    }

    /// Removes a behavior. Pending wake-ups for it become no-ops.
    pub fn remove(&self, behavior: BehaviorId) {
        self.inner.control.lock().removed.push(behavior);
        self.inner.activity.wake();
    }

    /// Asks the agent to terminate.
    #[instrument(skip(self), fields(agent = %self.inner.id))]
    pub fn stop(&self) {
        trace!("Stop requested");
        self.inner.cancel.cancel();
    }

    pub(crate) fn deliver(&self, message: Message) {
        match self.inner.mailbox.deliver(message) {
            Delivery::Handed => self.inner.activity.resume(),
            Delivery::Queued => {
                self.inner.control.lock().message_arrived = true;
                self.inner.activity.wake();
            }
        }
    }

    /// Wakes the behaviors of this agent blocked on `event`.
    ///
    /// A signal with no behavior waiting for it is dropped.
    pub fn signal(&self, event: impl Into<String>) {
        self.inner.control.lock().events.push(event.into());
        self.inner.activity.wake();
    }

    pub(crate) fn wake_behavior(&self, behavior: BehaviorId, generation: u64) {
        self.inner
            .control
            .lock()
            .timer_wakes
            .push((behavior, generation));
        self.inner.activity.wake();
    }

    pub(crate) fn same_agent(&self, other: &AgentHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn next_behavior_id(&self) -> BehaviorId {
        self.inner.next_behavior.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn take_control(&self) -> PendingControl {
        std::mem::take(&mut *self.inner.control.lock())
    }

    pub(crate) fn set_state(&self, state: AgentState) {
        *self.inner.state.lock() = state;
    }

    pub(crate) fn mailbox(&self) -> Arc<Mailbox> {
        self.inner.mailbox.clone()
    }

    pub(crate) fn activity(&self) -> Arc<Activity> {
        self.inner.activity.clone()
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }
}
