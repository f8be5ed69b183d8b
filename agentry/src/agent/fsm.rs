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

use tracing::{trace, warn};

use crate::agent::BehaviorContext;
use crate::common::{AgentryError, Result};
use crate::traits::FsmState;

/// A finite-state machine driven as a single behavior.
///
/// States are named; the first one added is the initial state. Each step
/// runs `on_enter` when a state is first entered, then the state's action.
/// A transition requested with [`BehaviorContext::set_next_state`] happens
/// after the action returns: the old state's `on_leave` runs and the new
/// state is entered on the next step. [`BehaviorContext::terminate`] runs
/// `on_leave` and finishes the machine.
///
/// ```rust,ignore
/// let fsm = Fsm::new()
///     .state("tick", state_fn(|ctx| ctx.set_next_state("tock")))
///     .state("tock", state_fn(|ctx| ctx.set_next_state("tick")));
/// agent.add(Behavior::fsm(fsm));
/// ```
#[derive(Default)]
pub struct Fsm {
    states: Vec<(String, Box<dyn FsmState>)>,
    current: Option<usize>,
    entered: bool,
    done: bool,
}

impl Fsm {
    /// Empty state machine; add states before running it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named state. Re-using a name replaces that state.
    #[must_use]
    pub fn state(mut self, name: impl Into<String>, state: impl FsmState) -> Self {
        let name = name.into();
        if let Some(slot) = self.states.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = Box::new(state);
        } else {
            self.states.push((name, Box::new(state)));
        }
        self
    }

    /// Name of the state the machine is in, once started.
    pub fn current_state(&self) -> Option<&str> {
        self.current.map(|i| self.states[i].0.as_str())
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|(n, _)| n == name)
    }

    pub(crate) async fn step(&mut self, ctx: &mut BehaviorContext) -> Result<()> {
        if self.states.is_empty() {
            self.done = true;
            return Ok(());
        }
        let index = *self.current.get_or_insert(0);

        if !self.entered {
            self.entered = true;
            trace!("FSM entering state {}", self.states[index].0);
            self.states[index].1.on_enter(ctx).await;
            if ctx.control.terminate {
                return self.finish(index, ctx).await;
            }
            if ctx.is_blocking() {
                return Ok(());
            }
        }

        self.states[index].1.action(ctx).await;

        if ctx.control.terminate {
            return self.finish(index, ctx).await;
        }
        if let Some(next) = ctx.control.next_state.take() {
            let Some(next_index) = self.index_of(&next) else {
                warn!("FSM transition to unknown state {} ignored", next);
                return Err(AgentryError::UnknownState(next));
            };
            self.states[index].1.on_leave(ctx).await;
            self.current = Some(next_index);
            self.entered = false;
        }
        Ok(())
    }

    async fn finish(&mut self, index: usize, ctx: &mut BehaviorContext) -> Result<()> {
        self.states[index].1.on_leave(ctx).await;
        self.done = true;
        trace!("FSM terminated in state {}", self.states[index].0);
        Ok(())
    }
}
