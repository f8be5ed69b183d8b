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

//! Containers linked across processes.
//!
//! A [`MasterContainer`] accepts links; each [`SlaveContainer`] keeps one link
//! to its master. Through the links, duplicate-name checks, message routing
//! and directory queries reach every container of the federation. A
//! [`Gateway`] is a client that joins the federation without hosting agents.
//!
//! Links carry the line-delimited JSON protocol described in [`protocol`].
//! Remote queries are bounded by `timeouts.remote_query_ms`; a peer that does
//! not answer in time is treated as having nothing to report.

pub use connection::{ConnectionHandler, LinkId};
pub use gateway::Gateway;
pub use master::MasterContainer;
pub use slave::SlaveContainer;

pub(crate) use federation::Federation;

/// Tolerant newline framing.
mod codec;
/// A single link and its request correlation.
mod connection;
/// Link set and protocol handling shared by master and slave.
mod federation;
/// Message-only federation client.
mod gateway;
/// Listening side of the federation.
mod master;
/// Frame types of the wire protocol.
pub mod protocol;
/// Connecting side of the federation.
mod slave;
