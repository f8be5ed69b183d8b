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

use async_trait::async_trait;

use crate::agent::BehaviorContext;
use crate::message::Message;

/// User logic run by one-shot, cyclic, ticker, waker and generic behaviors.
///
/// `action` is one cooperative step. It may suspend (for example in
/// [`BehaviorContext::delay`]) but should return promptly; the owning agent
/// runs no other behavior until it does.
#[async_trait]
pub trait Action: Send + 'static {
    /// One step of work.
    async fn action(&mut self, ctx: &mut BehaviorContext);

    /// Called once before the first step.
    fn on_start(&mut self, _ctx: &mut BehaviorContext) {}

    /// Called once after the behavior is done.
    fn on_end(&mut self, _ctx: &mut BehaviorContext) {}

    /// Completion test for generic behaviors. Ignored by the other kinds.
    fn done(&self) -> bool {
        false
    }
}

/// Handles messages selected by a message behavior's filter.
#[async_trait]
pub trait MessageHandler: Send + 'static {
    async fn on_receive(&mut self, ctx: &mut BehaviorContext, message: Message);

    /// Called once after a one-shot handler has run.
    fn on_end(&mut self, _ctx: &mut BehaviorContext) {}
}

/// A named state of a finite-state-machine behavior.
#[async_trait]
pub trait FsmState: Send + 'static {
    /// Called when the machine enters this state.
    async fn on_enter(&mut self, _ctx: &mut BehaviorContext) {}

    /// One step of work while in this state.
    async fn action(&mut self, ctx: &mut BehaviorContext);

    /// Called when the machine leaves this state, including on termination.
    async fn on_leave(&mut self, _ctx: &mut BehaviorContext) {}
}

/// [`Action`] backed by a closure. See [`action_fn`].
pub struct FnAction<F>(F);

/// Wraps a synchronous closure as an [`Action`].
pub fn action_fn<F>(f: F) -> FnAction<F>
where
    F: FnMut(&mut BehaviorContext) + Send + 'static,
{
    FnAction(f)
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: FnMut(&mut BehaviorContext) + Send + 'static,
{
    async fn action(&mut self, ctx: &mut BehaviorContext) {
        (self.0)(ctx);
    }
}

/// [`MessageHandler`] backed by a closure. See [`handler_fn`].
pub struct FnHandler<F>(F);

/// Wraps a synchronous closure as a [`MessageHandler`].
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: FnMut(&mut BehaviorContext, Message) + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: FnMut(&mut BehaviorContext, Message) + Send + 'static,
{
    async fn on_receive(&mut self, ctx: &mut BehaviorContext, message: Message) {
        (self.0)(ctx, message);
    }
}

/// [`FsmState`] backed by a closure. See [`state_fn`].
pub struct FnState<F>(F);

/// Wraps a synchronous closure as the action of an [`FsmState`].
pub fn state_fn<F>(f: F) -> FnState<F>
where
    F: FnMut(&mut BehaviorContext) + Send + 'static,
{
    FnState(f)
}

#[async_trait]
impl<F> FsmState for FnState<F>
where
    F: FnMut(&mut BehaviorContext) + Send + 'static,
{
    async fn action(&mut self, ctx: &mut BehaviorContext) {
        (self.0)(ctx);
    }
}
