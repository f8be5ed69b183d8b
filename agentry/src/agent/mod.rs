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

pub use agent_handle::{AgentHandle, AgentState};
pub use behavior::{Behavior, BehaviorState};
pub use context::{BehaviorContext, BehaviorId};
pub use fsm::Fsm;
pub use managed_agent::Agent;

pub(crate) use mailbox::Mailbox;
pub(crate) use scheduler::AgentTask;

/// Busy/idle accounting feeding the platform's idle signal.
mod activity;
/// The public agent handle.
mod agent_handle;
/// Behavior kinds and their step logic.
mod behavior;
/// Per-step view of the agent handed to behavior code.
pub(crate) mod context;
/// Finite-state-machine behavior.
mod fsm;
/// Agent mailbox with filtered waiters.
pub(crate) mod mailbox;
/// Agent definition and lifecycle hooks.
mod managed_agent;
/// The agent's cooperative scheduling loop.
mod scheduler;
