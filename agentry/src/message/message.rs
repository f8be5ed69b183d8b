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

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::Result;
use crate::message::{AgentId, Performative};
use crate::traits::MessageContent;

/// Class name of messages that carry no typed content.
pub const GENERIC_CLASS: &str = "Message";

const KEY_ID: &str = "msgID";
const KEY_PERF: &str = "perf";
const KEY_RECIPIENT: &str = "recipient";
const KEY_SENDER: &str = "sender";
const KEY_IN_REPLY_TO: &str = "inReplyTo";

/// A message exchanged between agents.
///
/// Every message has a unique id, a performative and a recipient, which may
/// be an agent or a topic. Application data lives in a JSON field map tagged
/// with a class name; typed content goes in and out through
/// [`with_content`](Self::with_content) and [`content`](Self::content).
///
/// Messages are plain values. Fan-out to several local subscribers hands
/// every subscriber its own clone.
///
/// On the wire a message is `{"clazz": <class>, "data": {"msgID", "perf",
/// "recipient", "sender", "inReplyTo", <fields>...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireMessage", try_from = "WireMessage")]
pub struct Message {
    id: String,
    performative: Performative,
    sender: Option<AgentId>,
    recipient: Option<AgentId>,
    in_reply_to: Option<String>,
    class: String,
    fields: Map<String, Value>,
}

fn new_message_id() -> String {
    use mti::prelude::*;
    "msg".create_type_id::<V7>().to_string()
}

impl Message {
    /// New generic message addressed to `recipient`.
    pub fn new(recipient: impl Into<AgentId>, performative: Performative) -> Self {
        Self {
            id: new_message_id(),
            performative,
            sender: None,
            recipient: Some(recipient.into()),
            in_reply_to: None,
            class: GENERIC_CLASS.to_string(),
            fields: Map::new(),
        }
    }

    /// New message with no recipient yet.
    pub fn unaddressed(performative: Performative) -> Self {
        Self {
            recipient: None,
            ..Self::new(AgentId::new(""), performative)
        }
    }

    /// Reply to `request`: addressed to its sender, linked through `inReplyTo`.
    pub fn reply_to(request: &Self, performative: Performative) -> Self {
        Self {
            recipient: request.sender.clone(),
            in_reply_to: Some(request.id.clone()),
            ..Self::unaddressed(performative)
        }
    }

    /// Attach typed content, replacing the class and all fields.
    pub fn with_content<T: MessageContent>(mut self, content: &T) -> Result<Self> {
        self.fields = match serde_json::to_value(content)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self.class = T::CLASS.to_string();
        Ok(self)
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Typed content, if this message carries class `T::CLASS` and the fields decode.
    pub fn content<T: MessageContent>(&self) -> Option<T> {
        if !self.is::<T>() {
            return None;
        }
        let decoded = serde_json::from_value::<T>(Value::Object(self.fields.clone()));
        match decoded {
            Ok(content) => Some(content),
            Err(_) if self.fields.is_empty() => serde_json::from_value(Value::Null).ok(),
            Err(_) => self
                .fields
                .get("value")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
        }
    }

    /// Whether this message carries content of type `T`.
    pub fn is<T: MessageContent>(&self) -> bool {
        self.class == T::CLASS
    }

    /// Unique identifier of this message.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Communicative act of the message.
    pub const fn performative(&self) -> Performative {
        self.performative
    }

    /// Sending agent, once set.
    pub const fn sender(&self) -> Option<&AgentId> {
        self.sender.as_ref()
    }

    /// Addressee, an agent or a topic.
    pub const fn recipient(&self) -> Option<&AgentId> {
        self.recipient.as_ref()
    }

    /// Identifier of the message this one answers.
    pub fn in_reply_to(&self) -> Option<&str> {
        self.in_reply_to.as_deref()
    }

    /// Content class, or [`GENERIC_CLASS`] for untyped content.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Application fields.
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Content field `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Sets content field `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Sets the sending agent.
    pub fn set_sender(&mut self, sender: AgentId) {
        self.sender = Some(sender);
    }

    /// Sets the addressee.
    pub fn set_recipient(&mut self, recipient: AgentId) {
        self.recipient = Some(recipient);
    }

    /// Sets the communicative act.
    pub fn set_performative(&mut self, performative: Performative) {
        self.performative = performative;
    }

    /// Marks this message as the reply to message `id`.
    pub fn set_in_reply_to(&mut self, id: impl Into<String>) {
        self.in_reply_to = Some(id.into());
    }
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    clazz: String,
    #[serde(default)]
    data: Map<String, Value>,
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        let mut data = message.fields;
        data.insert(KEY_ID.to_string(), Value::String(message.id));
        data.insert(
            KEY_PERF.to_string(),
            Value::String(message.performative.to_string()),
        );
        if let Some(recipient) = message.recipient {
            data.insert(KEY_RECIPIENT.to_string(), Value::String(recipient.to_string()));
        }
        if let Some(sender) = message.sender {
            data.insert(KEY_SENDER.to_string(), Value::String(sender.to_string()));
        }
        if let Some(id) = message.in_reply_to {
            data.insert(KEY_IN_REPLY_TO.to_string(), Value::String(id));
        }
        Self {
            clazz: message.class,
            data,
        }
    }
}

fn take_string(data: &mut Map<String, Value>, key: &str) -> Option<String> {
    match data.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = String;

    fn try_from(wire: WireMessage) -> std::result::Result<Self, Self::Error> {
        let mut data = wire.data;
        let performative = match data.remove(KEY_PERF) {
            None | Some(Value::Null) => Performative::default(),
            Some(value) => {
                serde_json::from_value(value).map_err(|e| format!("bad performative: {e}"))?
            }
        };
        Ok(Self {
            id: take_string(&mut data, KEY_ID).unwrap_or_else(new_message_id),
            performative,
            recipient: take_string(&mut data, KEY_RECIPIENT).map(|s| AgentId::from(s.as_str())),
            sender: take_string(&mut data, KEY_SENDER).map(|s| AgentId::from(s.as_str())),
            in_reply_to: take_string(&mut data, KEY_IN_REPLY_TO),
            class: wire.clazz,
            fields: data,
        })
    }
}
