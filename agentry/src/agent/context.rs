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

use tokio::sync::oneshot;
use tracing::trace;

use crate::agent::AgentHandle;
use crate::common::config::CONFIG;
use crate::message::{Message, MessageFilter};

/// Identifies a behavior within its agent.
pub type BehaviorId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Block {
    /// Until a message arrives.
    Indefinite,
    /// Until the timeout elapses or a message arrives.
    For(u64),
}

#[derive(Debug, Default)]
pub(crate) struct Control {
    pub(crate) block: Option<Block>,
    pub(crate) stop: bool,
    pub(crate) next_state: Option<String>,
    /// Named event that also wakes the block.
    pub(crate) event: Option<String>,
    pub(crate) terminate: bool,
}

/// What a behavior step sees of its agent and how it steers its own scheduling.
///
/// A fresh context is handed to every step. Requests made through it
/// ([`block`](Self::block), [`stop`](Self::stop), [`set_next_state`](Self::set_next_state)
/// and friends) take effect once the step returns.
pub struct BehaviorContext {
    agent: AgentHandle,
    behavior: BehaviorId,
    tick: u64,
    pub(crate) control: Control,
}

impl BehaviorContext {
    pub(crate) fn new(agent: AgentHandle, behavior: BehaviorId, tick: u64) -> Self {
        Self {
            agent,
            behavior,
            tick,
            control: Control::default(),
        }
    }

    /// The agent running this behavior.
    pub fn agent(&self) -> &AgentHandle {
        &self.agent
    }

    /// Identifier of the running behavior within its agent.
    pub fn behavior_id(&self) -> BehaviorId {
        self.behavior
    }

    /// Number of ticks fired so far by a ticker behavior, including the current one.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Platform time in milliseconds.
    pub fn now(&self) -> u64 {
        self.agent.now()
    }

    /// Block this behavior until a message arrives for the agent.
    pub fn block(&mut self) {
        self.control.block = Some(Block::Indefinite);
        self.control.event = None;
    }

    /// Block this behavior for `ms` milliseconds, or until a message arrives.
    pub fn block_for(&mut self, ms: u64) {
        self.control.block = Some(Block::For(ms));
        self.control.event = None;
    }

    /// Block this behavior until `event` is signalled on the agent, or a
    /// message arrives. See [`AgentHandle::signal`].
    pub fn block_on(&mut self, event: impl Into<String>) {
        self.control.block = Some(Block::Indefinite);
        self.control.event = Some(event.into());
    }

    /// Mark this behavior done after the current step. Cyclic behaviors
    /// ignore this; remove them through the agent instead.
    pub fn stop(&mut self) {
        self.control.stop = true;
    }

    /// FSM only: move to state `name` once the current action returns.
    pub fn set_next_state(&mut self, name: impl Into<String>) {
        self.control.next_state = Some(name.into());
    }

    /// FSM only: finish the machine once the current action returns.
    pub fn terminate(&mut self) {
        self.control.terminate = true;
    }

    pub(crate) fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    pub(crate) fn take_event(&mut self) -> Option<String> {
        self.control.event.take()
    }

    pub(crate) fn is_blocking(&self) -> bool {
        self.control.block.is_some()
    }

    /// Sends through the agent's container. See [`AgentHandle::send`].
    pub fn send(&self, message: Message) -> bool {
        self.agent.send(message)
    }

    /// Suspends this step for `ms` milliseconds of platform time.
    ///
    /// The agent counts as idle while suspended, so under discrete-event time
    /// the clock may advance to the wake-up.
    pub async fn delay(&self, ms: u64) {
        let activity = self.agent.activity();
        let (tx, rx) = oneshot::channel::<()>();
        let on_fire = activity.clone();
        let scheduled = self.agent.platform().schedule_after(ms, move || {
            on_fire.resume();
            let _ = tx.send(());
        });
        if !scheduled {
            return;
        }
        activity.suspend();
        let _ = rx.await;
        activity.resume();
    }

    /// Waits up to `timeout_ms` for a message matching `filter`.
    ///
    /// Queued messages are checked first. Returns `None` on timeout.
    pub async fn receive(&self, filter: MessageFilter, timeout_ms: u64) -> Option<Message> {
        let mailbox = self.agent.mailbox();
        let (waiter, rx) = match mailbox.take_or_wait(filter) {
            Ok(message) => return Some(message),
            Err(pending) => pending,
        };
        let activity = self.agent.activity();
        let expire_mailbox = mailbox.clone();
        let expire_activity = activity.clone();
        let scheduled = self.agent.platform().schedule_after(timeout_ms, move || {
            if expire_mailbox.cancel_waiter(waiter) {
                expire_activity.resume();
            }
        });
        if !scheduled {
            mailbox.cancel_waiter(waiter);
            return None;
        }
        mailbox.with_waiter(waiter, |waiting| {
            if waiting {
                activity.suspend();
            }
        });
        let received = rx.await.ok();
        activity.resume();
        if received.is_none() {
            trace!("receive on {} timed out after {} ms", self.agent.id(), timeout_ms);
        }
        received
    }

    /// Sends `message` and waits up to `timeout_ms` for a reply to it.
    ///
    /// Returns `None` if the message could not be sent or no reply came.
    pub async fn request(&self, mut message: Message, timeout_ms: u64) -> Option<Message> {
        if message.sender().is_none() {
            message.set_sender(self.agent.id().clone());
        }
        let id = message.id().to_string();
        if !self.agent.send(message) {
            return None;
        }
        self.receive(MessageFilter::reply_to(id), timeout_ms).await
    }

    /// [`request`](Self::request) bounded by `timeouts.request_ms`.
    pub async fn ask(&self, message: Message) -> Option<Message> {
        self.request(message, CONFIG.timeouts.request_ms).await
    }
}
