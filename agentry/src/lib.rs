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

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Agentry
//!
//! A multi-agent runtime on Tokio. Agents run cooperative behaviors, exchange
//! messages point-to-point or through topics, find each other through a
//! service directory and can be spread over several processes by linking
//! containers.
//!
//! ## Key Concepts
//!
//! - **Platform**: the clock and lifecycle owner. Real-time platforms use the
//!   wall clock; discrete-event platforms keep a virtual clock that jumps to
//!   the next scheduled event once every agent is idle.
//! - **Container**: registry and message bus for one process, with topics and
//!   a service directory.
//! - **Agents and behaviors**: an agent owns a mailbox and a set of behaviors
//!   (one-shot, cyclic, ticker, waker, FSM, message-triggered, generic) that it
//!   steps one at a time on its own task.
//! - **Messages**: performative, sender, recipient, reply link and typed
//!   content declared with `#[agentry_message]`.
//! - **Remote containers**: a master and its slaves share agents, services and
//!   messages over line-delimited JSON links. A gateway joins without hosting
//!   agents.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agentry::prelude::*;
//!
//! #[agentry_message]
//! struct Ping {
//!     n: u32,
//! }
//!
//! #[agentry_main]
//! async fn main() -> anyhow::Result<()> {
//!     let platform = Platform::real_time();
//!     let container = Container::new(&platform, "main");
//!     container
//!         .add_agent(
//!             "pong",
//!             Agent::new().behavior(Behavior::message(
//!                 MessageFilter::content::<Ping>(),
//!                 handler_fn(|ctx, msg| {
//!                     ctx.send(Message::reply_to(&msg, Performative::Inform));
//!                 }),
//!             )),
//!         )
//!         .await?;
//!     platform.start();
//!     platform.terminated().await;
//!     Ok(())
//! }
//! ```

extern crate self as agentry;

/// Agent handles, behaviors and the per-agent scheduler.
pub(crate) mod agent;

/// Platform, containers, configuration, errors and remote links.
pub(crate) mod common;

/// Agent ids, messages, performatives and filters.
pub(crate) mod message;

/// Behavior logic seams and typed message content.
pub(crate) mod traits;

/// Script engine boundary and the shell agent.
pub mod shell;

/// Containers linked across processes.
///
/// Re-exports the master and slave containers, the gateway client and the
/// types of the line-delimited JSON protocol they speak.
pub mod remote {
    pub use crate::common::remote::{
        ConnectionHandler, Gateway, LinkId, MasterContainer, SlaveContainer,
    };

    /// Frame types of the container link protocol.
    pub mod protocol {
        pub use crate::common::remote::protocol::{Action, Frame};
    }
}

/// Configuration types and the process-wide configuration.
pub mod config {
    pub use crate::common::config::{
        AgentryConfig, DefaultsConfig, LimitsConfig, NetworkConfig, TimeoutConfig, CONFIG,
    };
}

/// A prelude module for conveniently importing the most commonly used items.
///
/// # Re-exports
///
/// ## Macros (from `agentry-macro`)
/// *   `agentry_message`: declares typed message content.
/// *   `agentry_main`: Tokio entry point for applications.
///
/// ## External Crates
/// *   [`async_trait::async_trait`]: for implementing [`Action`], [`MessageHandler`] and [`FsmState`].
/// *   `tokio`: the runtime the macros expand to.
///
/// ## Core Types
/// *   [`Platform`], [`TimeMode`], [`Container`]: time and hosting.
/// *   [`Agent`], [`AgentHandle`], [`Behavior`], [`BehaviorContext`], [`Fsm`]: agents and behaviors.
/// *   [`AgentId`], [`Message`], [`MessageFilter`], [`Performative`]: messaging.
/// *   [`MasterContainer`], [`SlaveContainer`], [`Gateway`]: remote containers.
/// *   [`AgentryError`], [`AgentryConfig`]: errors and configuration.
pub mod prelude {
    // Macros from agentry-macro
    pub use agentry_macro::*;

    // External crate re-exports
    pub use async_trait::async_trait;
    pub use tokio;

    // Core types
    pub use crate::agent::{
        Agent, AgentHandle, AgentState, Behavior, BehaviorContext, BehaviorId, BehaviorState, Fsm,
    };
    pub use crate::common::remote::{Gateway, MasterContainer, SlaveContainer};
    pub use crate::common::{AgentryConfig, AgentryError, Container, Platform, TimeMode, CONFIG};
    pub use crate::message::{AgentId, Message, MessageFilter, Performative, GENERIC_CLASS};
    pub use crate::shell::{shell_agent, EchoScriptEngine, ScriptEngine, ShellExecReq};
    pub use crate::traits::{
        action_fn, handler_fn, state_fn, Action, FsmState, MessageContent, MessageHandler,
    };
}
