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

//! Line-oriented JSON protocol spoken between linked containers.
//!
//! Every frame is one JSON object on its own line:
//!
//! ```text
//! {"action":"AGENT_FOR_SERVICE","id":"req_01j...","service":"echo"}
//! {"id":"req_01j...","inResponseTo":"AGENT_FOR_SERVICE","agentID":"echo-1"}
//! {"action":"SEND","message":{"clazz":"Message","data":{...}},"relay":true}
//! ```
//!
//! Requests carry an `action` and, when a reply is expected, an `id`.
//! Replies echo the `id`, name the request in `inResponseTo` and carry one of
//! `answer`, `agentID`, `agentIDs` or `services`. Unknown fields are ignored;
//! unknown actions parse as [`Action::Unknown`].

use serde::{Deserialize, Serialize};

use crate::common::{AgentryError, Result};
use crate::message::{AgentId, Message};

/// Protocol actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Is an agent with this name hosted by the peer?
    ContainsAgent,
    /// Deliver a message.
    Send,
    /// Advertise a service.
    Register,
    /// Withdraw a service, or every service of an agent when `service` is absent.
    Deregister,
    /// List hosted agents.
    Agents,
    /// List advertised services.
    Services,
    /// First provider of a service.
    AgentForService,
    /// Every provider of a service.
    AgentsForService,
    /// The master is going away; do not reconnect.
    Shutdown,
    /// Any action this implementation does not know.
    #[serde(other)]
    Unknown,
}

impl Action {
    /// Whether a request with this action expects a correlated reply.
    pub const fn expects_reply(self) -> bool {
        matches!(
            self,
            Self::ContainsAgent
                | Self::Agents
                | Self::Services
                | Self::AgentForService
                | Self::AgentsForService
        )
    }
}

/// A single protocol frame, request or reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<Action>,
    #[serde(rename = "agentID", default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(rename = "agentIDs", default, skip_serializing_if = "Option::is_none")]
    pub agent_ids: Option<Vec<AgentId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<bool>,
}

fn new_request_id() -> String {
    use mti::prelude::*;
    "req".create_type_id::<V7>().to_string()
}

impl Frame {
    /// A request frame; actions that expect a reply get a fresh correlation id.
    pub fn request(action: Action) -> Self {
        Self {
            id: action.expects_reply().then(new_request_id),
            action: Some(action),
            ..Self::default()
        }
    }

    /// CONTAINS_AGENT query for `agent`.
    pub fn contains_agent(agent: &AgentId) -> Self {
        Self {
            agent_id: Some(agent.clone()),
            ..Self::request(Action::ContainsAgent)
        }
    }

    /// SEND carrying `message`; `relay` asks the receiver to forward it on.
    pub fn send(message: &Message, relay: bool) -> Self {
        Self {
            message: Some(message.clone()),
            relay: Some(relay),
            ..Self::request(Action::Send)
        }
    }

    /// REGISTER of `agent` as a provider of `service`.
    pub fn register(agent: &AgentId, service: &str) -> Self {
        Self {
            agent_id: Some(agent.clone()),
            service: Some(service.to_string()),
            ..Self::request(Action::Register)
        }
    }

    /// DEREGISTER of `agent` from `service`, or from every service.
    pub fn deregister(agent: &AgentId, service: Option<&str>) -> Self {
        Self {
            agent_id: Some(agent.clone()),
            service: service.map(str::to_string),
            ..Self::request(Action::Deregister)
        }
    }

    /// AGENT_FOR_SERVICE query.
    pub fn agent_for_service(service: &str) -> Self {
        Self {
            service: Some(service.to_string()),
            ..Self::request(Action::AgentForService)
        }
    }

    /// AGENTS_FOR_SERVICE query.
    pub fn agents_for_service(service: &str) -> Self {
        Self {
            service: Some(service.to_string()),
            ..Self::request(Action::AgentsForService)
        }
    }

    /// An empty reply to `request`, echoing its id and action.
    pub fn reply_to(request: &Self) -> Self {
        Self {
            id: request.id.clone(),
            in_response_to: request.action,
            ..Self::default()
        }
    }

    /// Sets the boolean answer.
    #[must_use]
    pub fn with_answer(mut self, answer: bool) -> Self {
        self.answer = Some(answer);
        self
    }

    /// Sets the single agent answer.
    #[must_use]
    pub fn with_agent_id(mut self, agent: Option<AgentId>) -> Self {
        self.agent_id = agent;
        self
    }

    /// Sets the agent list answer.
    #[must_use]
    pub fn with_agent_ids(mut self, agents: Vec<AgentId>) -> Self {
        self.agent_ids = Some(agents);
        self
    }

    /// Sets the service list answer.
    #[must_use]
    pub fn with_services(mut self, services: Vec<String>) -> Self {
        self.services = Some(services);
        self
    }

    /// Replies have an `inResponseTo` and no `action`.
    pub const fn is_response(&self) -> bool {
        self.action.is_none() && self.in_response_to.is_some()
    }

    /// Parses a single line.
    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| AgentryError::MalformedFrame(e.to_string()))
    }

    /// Serializes to a single line, without the trailing newline.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Performative;

    #[test]
    fn test_query_request_gets_correlation_id() {
        let frame = Frame::agent_for_service("echo");
        assert!(frame.id.is_some());
        let line = frame.to_line().unwrap();
        assert!(line.contains(r#""action":"AGENT_FOR_SERVICE""#));
        assert!(line.contains(r#""service":"echo""#));
        assert!(!line.contains("agentIDs"));
    }

    #[test]
    fn test_send_has_no_id() {
        let message = Message::new("echo", Performative::Request);
        let frame = Frame::send(&message, true);
        assert!(frame.id.is_none());
        let parsed = Frame::from_line(&frame.to_line().unwrap()).unwrap();
        assert_eq!(parsed.action, Some(Action::Send));
        assert_eq!(parsed.relay, Some(true));
        assert_eq!(parsed.message.unwrap().id(), message.id());
    }

    #[test]
    fn test_reply_echoes_request() {
        let request = Frame::contains_agent(&AgentId::new("a"));
        let reply = Frame::reply_to(&request).with_answer(true);
        assert!(reply.is_response());
        assert_eq!(reply.id, request.id);
        let line = reply.to_line().unwrap();
        assert!(line.contains(r#""inResponseTo":"CONTAINS_AGENT""#));
        assert!(line.contains(r#""answer":true"#));
    }

    #[test]
    fn test_parses_peer_frames() {
        let frame = Frame::from_line(
            r#"{"id":"42","inResponseTo":"AGENTS_FOR_SERVICE","agentIDs":["a","b"],"extra":1}"#,
        )
        .unwrap();
        assert!(frame.is_response());
        assert_eq!(
            frame.agent_ids,
            Some(vec![AgentId::new("a"), AgentId::new("b")])
        );

        let unknown = Frame::from_line(r#"{"action":"WANTS_COFFEE","id":"7"}"#).unwrap();
        assert_eq!(unknown.action, Some(Action::Unknown));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            Frame::from_line("not json"),
            Err(AgentryError::MalformedFrame(_))
        ));
    }
}
