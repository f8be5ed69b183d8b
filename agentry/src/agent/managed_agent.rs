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

use crate::agent::{AgentHandle, Behavior};

pub(crate) type Hook = Box<dyn FnOnce(&AgentHandle) + Send + 'static>;

/// Definition of an agent before it joins a container.
///
/// Collects the initial behaviors and lifecycle hooks. The agent comes to
/// life when it is added to a [`Container`](crate::common::Container) and
/// that container runs.
///
/// ```rust,ignore
/// let server = Agent::new()
///     .after_start(|agent| {
///         agent.register("server");
///     })
///     .behavior(Behavior::message(MessageFilter::content::<RequestMsg>(), handler));
/// container.add_agent("s", server).await?;
/// ```
#[derive(Default)]
pub struct Agent {
    pub(crate) behaviors: Vec<Behavior>,
    pub(crate) after_start: Option<Hook>,
    pub(crate) before_stop: Option<Hook>,
}

impl Agent {
    /// Agent with no behaviors or hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an initial behavior.
    #[must_use]
    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behaviors.push(behavior);
        self
    }

    /// Runs once on the agent's task before any behavior. The usual place to
    /// register services and subscribe to topics.
    #[must_use]
    pub fn after_start<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&AgentHandle) + Send + 'static,
    {
        self.after_start = Some(Box::new(hook));
        self
    }

    /// Runs once when the agent terminates.
    #[must_use]
    pub fn before_stop<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&AgentHandle) + Send + 'static,
    {
        self.before_stop = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("behaviors", &self.behaviors)
            .field("after_start", &self.after_start.is_some())
            .field("before_stop", &self.before_stop.is_some())
            .finish()
    }
}
