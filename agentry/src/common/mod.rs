//! Containers, the platform clock and the pieces they share.
//!
//! This module provides:
//! * [`Platform`]: lifecycle owner and time source, real-time or discrete-event.
//! * [`Container`]: agent registry, message bus and service directory.
//! * [`remote`]: master and slave containers linked over TCP, plus the [`Gateway`](remote::Gateway) client.
//! * [`AgentryConfig`] and [`AgentryError`].

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

// --- Public Re-exports ---
pub use config::{AgentryConfig, CONFIG};
pub use container::Container;
pub use error::{AgentryError, Result};
pub use platform::{Platform, TimeMode};

// --- Submodules ---

/// Configuration loaded from XDG locations.
pub mod config;
/// Agent registry, routing and the local service directory.
mod container;
/// Service name to provider map.
mod directory;
/// Time-ordered queue of scheduled callbacks.
mod discrete_event;
/// Error type shared across the crate.
mod error;
/// The platform clock and lifecycle.
pub(crate) mod platform;
/// Master/slave container links and the gateway client.
pub mod remote;
