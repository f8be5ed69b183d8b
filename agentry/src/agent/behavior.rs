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

use std::fmt;

use tracing::{debug, error};

use crate::agent::context::Block;
use crate::agent::{BehaviorContext, Fsm};
use crate::message::MessageFilter;
use crate::traits::{Action, MessageHandler};

/// Lifecycle of a behavior. `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorState {
    /// Added, not yet started.
    New,
    /// Stepped on every scheduling pass.
    Running,
    /// Waiting for a timer, a message or a named event.
    Blocked,
    /// Finished; removed after the current pass.
    Done,
}

/// A resumable unit of work owned by one agent.
///
/// Behaviors are built with one of the constructors below and handed to an
/// [`Agent`](crate::agent::Agent) or to a running agent's handle.
pub struct Behavior {
    pub(crate) name: Option<String>,
    pub(crate) kind: BehaviorKind,
}

pub(crate) enum BehaviorKind {
    OneShot(Box<dyn Action>),
    Cyclic(Box<dyn Action>),
    Ticker {
        period: u64,
        ticks: u64,
        next_due: Option<u64>,
        action: Box<dyn Action>,
    },
    Waker {
        delay: u64,
        due: Option<u64>,
        action: Box<dyn Action>,
    },
    Fsm(Fsm),
    Message {
        filter: MessageFilter,
        one_shot: bool,
        handler: Box<dyn MessageHandler>,
    },
    Generic(Box<dyn Action>),
}

/// Result of one step, before the context's own requests are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Continue,
    Done,
    /// Block indefinitely (`None`) or for the given number of milliseconds.
    Block(Option<u64>),
}

impl Behavior {
    fn from_kind(kind: BehaviorKind) -> Self {
        Self { name: None, kind }
    }

    /// Runs `action` once.
    pub fn one_shot(action: impl Action) -> Self {
        Self::from_kind(BehaviorKind::OneShot(Box::new(action)))
    }

    /// Runs `action` over and over until the behavior is removed.
    pub fn cyclic(action: impl Action) -> Self {
        Self::from_kind(BehaviorKind::Cyclic(Box::new(action)))
    }

    /// Runs `action` every `period_ms`; tick k fires k periods after the first step.
    pub fn ticker(period_ms: u64, action: impl Action) -> Self {
        Self::from_kind(BehaviorKind::Ticker {
            period: period_ms,
            ticks: 0,
            next_due: None,
            action: Box::new(action),
        })
    }

    /// Runs `action` once, `delay_ms` after the first step.
    pub fn waker(delay_ms: u64, action: impl Action) -> Self {
        Self::from_kind(BehaviorKind::Waker {
            delay: delay_ms,
            due: None,
            action: Box::new(action),
        })
    }

    /// Runs a finite state machine of actions.
    pub fn fsm(fsm: Fsm) -> Self {
        Self::from_kind(BehaviorKind::Fsm(fsm))
    }

    /// Dispatches every message matching `filter` to `handler`.
    pub fn message(filter: MessageFilter, handler: impl MessageHandler) -> Self {
        Self::from_kind(BehaviorKind::Message {
            filter,
            one_shot: false,
            handler: Box::new(handler),
        })
    }

    /// Dispatches the first message matching `filter`, then finishes.
    pub fn message_once(filter: MessageFilter, handler: impl MessageHandler) -> Self {
        Self::from_kind(BehaviorKind::Message {
            filter,
            one_shot: true,
            handler: Box::new(handler),
        })
    }

    /// Runs `action` repeatedly until its [`Action::done`] returns true.
    pub fn generic(action: impl Action) -> Self {
        Self::from_kind(BehaviorKind::Generic(Box::new(action)))
    }

    /// Gives the behavior a name used in logs.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name given with [`named`](Self::named).
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .finish()
    }
}

/// Progress after a plain action step: honour block/stop requests.
fn after_action(ctx: &BehaviorContext, stoppable: bool) -> Progress {
    if stoppable && ctx.control.stop {
        return Progress::Done;
    }
    match ctx.control.block {
        Some(Block::Indefinite) => Progress::Block(None),
        Some(Block::For(ms)) => Progress::Block(Some(ms)),
        None => Progress::Continue,
    }
}

impl BehaviorKind {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::OneShot(_) => "one-shot",
            Self::Cyclic(_) => "cyclic",
            Self::Ticker { .. } => "ticker",
            Self::Waker { .. } => "waker",
            Self::Fsm(_) => "fsm",
            Self::Message { .. } => "message",
            Self::Generic(_) => "generic",
        }
    }

    pub(crate) fn tick_count(&self) -> u64 {
        match self {
            Self::Ticker { ticks, .. } => *ticks,
            _ => 0,
        }
    }

    pub(crate) fn on_start(&mut self, ctx: &mut BehaviorContext) {
        match self {
            Self::OneShot(action)
            | Self::Cyclic(action)
            | Self::Generic(action)
            | Self::Ticker { action, .. }
            | Self::Waker { action, .. } => action.on_start(ctx),
            Self::Fsm(_) | Self::Message { .. } => {}
        }
    }

    pub(crate) fn on_end(&mut self, ctx: &mut BehaviorContext) {
        match self {
            Self::OneShot(action)
            | Self::Cyclic(action)
            | Self::Generic(action)
            | Self::Ticker { action, .. }
            | Self::Waker { action, .. } => action.on_end(ctx),
            Self::Message { handler, .. } => handler.on_end(ctx),
            Self::Fsm(_) => {}
        }
    }

    /// Runs one step of the behavior.
    pub(crate) async fn step(&mut self, ctx: &mut BehaviorContext) -> Progress {
        match self {
            Self::OneShot(action) => {
                action.action(ctx).await;
                Progress::Done
            }
            Self::Cyclic(action) => {
                action.action(ctx).await;
                if ctx.control.stop {
                    debug!("stop() ignored by cyclic behavior; remove it instead");
                }
                after_action(ctx, false)
            }
            Self::Generic(action) => {
                action.action(ctx).await;
                if action.done() {
                    Progress::Done
                } else {
                    after_action(ctx, true)
                }
            }
            Self::Ticker {
                period,
                ticks,
                next_due,
                action,
            } => {
                let now = ctx.now();
                let due = *next_due.get_or_insert_with(|| now.saturating_add(*period));
                if now < due {
                    return Progress::Block(Some(due - now));
                }
                *ticks += 1;
                ctx.set_tick(*ticks);
                action.action(ctx).await;
                if ctx.control.stop {
                    return Progress::Done;
                }
                let next = due.saturating_add(*period);
                *next_due = Some(next);
                Progress::Block(Some(next.saturating_sub(ctx.now())))
            }
            Self::Waker { delay, due, action } => {
                let now = ctx.now();
                let due = *due.get_or_insert_with(|| now.saturating_add(*delay));
                if now < due {
                    return Progress::Block(Some(due - now));
                }
                action.action(ctx).await;
                Progress::Done
            }
            Self::Fsm(fsm) => {
                if let Err(e) = fsm.step(ctx).await {
                    error!("FSM step failed: {}", e);
                }
                if fsm.is_done() {
                    Progress::Done
                } else {
                    after_action(ctx, true)
                }
            }
            Self::Message {
                filter,
                one_shot,
                handler,
            } => {
                let Some(message) = ctx.agent().mailbox().take_matching(filter) else {
                    return Progress::Block(None);
                };
                handler.on_receive(ctx, message).await;
                if *one_shot {
                    Progress::Done
                } else {
                    after_action(ctx, true)
                }
            }
        }
    }
}
