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

use serde::{Deserialize, Serialize};

/// Speech-act tag carried by every message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Performative {
    /// Request an action to be performed.
    Request,
    /// Agree to perform the requested action.
    Agree,
    /// Refuse to perform the requested action.
    Refuse,
    /// Failure to perform the requested action.
    Failure,
    /// Notification of some information.
    #[default]
    Inform,
    /// Confirm that the answer to a query is true.
    Confirm,
    /// Confirm that the answer to a query is false.
    Disconfirm,
    /// Query whether something is true.
    QueryIf,
    /// The message was not understood.
    NotUnderstood,
    /// Call for proposal.
    Cfp,
    /// Response to a call for proposal.
    Propose,
    /// Cancel a pending request.
    Cancel,
}

impl fmt::Display for Performative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "REQUEST",
            Self::Agree => "AGREE",
            Self::Refuse => "REFUSE",
            Self::Failure => "FAILURE",
            Self::Inform => "INFORM",
            Self::Confirm => "CONFIRM",
            Self::Disconfirm => "DISCONFIRM",
            Self::QueryIf => "QUERY_IF",
            Self::NotUnderstood => "NOT_UNDERSTOOD",
            Self::Cfp => "CFP",
            Self::Propose => "PROPOSE",
            Self::Cancel => "CANCEL",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_are_screaming_snake() {
        let json = serde_json::to_string(&Performative::QueryIf).expect("serialize");
        assert_eq!(json, "\"QUERY_IF\"");
        assert_eq!(Performative::NotUnderstood.to_string(), "NOT_UNDERSTOOD");
    }
}
