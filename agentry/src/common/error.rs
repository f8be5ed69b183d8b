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

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Errors surfaced by containers, agents and container links.
///
/// Local registry failures are reported synchronously. Failures of remote
/// queries are usually absorbed by the caller and degrade to "not found";
/// the variants here describe what went wrong on the way.
#[derive(Debug, Error)]
pub enum AgentryError {
    /// An agent with this name already exists locally or on a linked container.
    #[error("agent name already in use: {0}")]
    DuplicateName(String),

    /// No live link to a peer container exists.
    #[error("no live link available")]
    LinkUnavailable,

    /// A correlated request was not answered in time.
    #[error("request {0} timed out")]
    Timeout(String),

    /// A frame could not be parsed or was too large.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The link closed while a request was outstanding.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The container or platform is not running.
    #[error("{0} is not running")]
    NotRunning(String),

    /// An FSM transition named a state that was never added.
    #[error("unknown FSM state: {0}")]
    UnknownState(String),

    /// Message content could not be converted to or from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LinesCodecError> for AgentryError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                Self::MalformedFrame("line exceeds maximum frame size".to_string())
            }
            LinesCodecError::Io(e) => Self::Io(e),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AgentryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_overflow_maps_to_malformed_frame() {
        let err: AgentryError = LinesCodecError::MaxLineLengthExceeded.into();
        assert!(matches!(err, AgentryError::MalformedFrame(_)));
    }

    #[test]
    fn test_display_names_the_agent() {
        let err = AgentryError::DuplicateName("server".to_string());
        assert_eq!(err.to_string(), "agent name already in use: server");
    }
}
