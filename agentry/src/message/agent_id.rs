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
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const TOPIC_PREFIX: char = '#';

/// Identifies an agent, or a topic agents can subscribe to.
///
/// Equality is by name and topic flag, so an agent and a topic may share a
/// name without colliding. On the wire an id is a plain string; topics carry
/// a leading `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId {
    name: String,
    topic: bool,
}

impl AgentId {
    /// Id of a named agent.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: false,
        }
    }

    /// Id of a named topic.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: true,
        }
    }

    /// The notification topic owned by this agent, e.g. `server__ntf`.
    pub fn notification_topic(&self) -> Self {
        Self::topic(format!("{}__ntf", self.name))
    }

    /// Name without the topic marker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this id addresses a topic rather than a mailbox.
    pub const fn is_topic(&self) -> bool {
        self.topic
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.topic {
            write!(f, "{TOPIC_PREFIX}{}", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

impl FromStr for AgentId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        value
            .strip_prefix(TOPIC_PREFIX)
            .map_or_else(|| Self::new(value), Self::topic)
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<&AgentId> for AgentId {
    fn from(value: &AgentId) -> Self {
        value.clone()
    }
}

impl Serialize for AgentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_and_agent_with_same_name_differ() {
        assert_ne!(AgentId::new("noise"), AgentId::topic("noise"));
        assert_eq!(AgentId::topic("noise").to_string(), "#noise");
    }

    #[test]
    fn test_wire_form_keeps_topic_marker() {
        let json = serde_json::to_string(&AgentId::topic("noise")).expect("serialize");
        assert_eq!(json, "\"#noise\"");
        let back: AgentId = serde_json::from_str(&json).expect("deserialize");
        assert!(back.is_topic());
        assert_eq!(back.name(), "noise");
    }

    #[test]
    fn test_notification_topic_name() {
        let ntf = AgentId::new("server").notification_topic();
        assert!(ntf.is_topic());
        assert_eq!(ntf.name(), "server__ntf");
    }
}
