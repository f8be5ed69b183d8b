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

use crate::message::{Message, Performative};
use crate::traits::MessageContent;

/// Selects messages by class, performative and reply linkage.
///
/// Every criterion left unset matches anything, so `MessageFilter::any()`
/// accepts all messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    class: Option<String>,
    performative: Option<Performative>,
    in_reply_to: Option<String>,
}

impl MessageFilter {
    /// Matches every message.
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches messages carrying content of type `T`.
    pub fn content<T: MessageContent>() -> Self {
        Self::class(T::CLASS)
    }

    /// Matches messages of the given class name.
    pub fn class(class: impl Into<String>) -> Self {
        Self {
            class: Some(class.into()),
            ..Self::default()
        }
    }

    /// Matches messages with the given performative.
    pub fn performative(performative: Performative) -> Self {
        Self {
            performative: Some(performative),
            ..Self::default()
        }
    }

    /// Matches replies to the message with id `id`.
    pub fn reply_to(id: impl Into<String>) -> Self {
        Self {
            in_reply_to: Some(id.into()),
            ..Self::default()
        }
    }

    /// Additionally require the given performative.
    #[must_use]
    pub fn and_performative(mut self, performative: Performative) -> Self {
        self.performative = Some(performative);
        self
    }

    /// Whether `message` passes this filter.
    pub fn matches(&self, message: &Message) -> bool {
        self.class.as_deref().map_or(true, |c| c == message.class())
            && self
                .performative
                .map_or(true, |p| p == message.performative())
            && self
                .in_reply_to
                .as_deref()
                .map_or(true, |id| message.in_reply_to() == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_matches_everything() {
        let msg = Message::new("a", Performative::Cfp);
        assert!(MessageFilter::any().matches(&msg));
    }

    #[test]
    fn test_criteria_combine() {
        let mut msg = Message::new("a", Performative::Agree);
        msg.set_in_reply_to("m1");
        assert!(MessageFilter::reply_to("m1").matches(&msg));
        assert!(!MessageFilter::reply_to("m2").matches(&msg));
        assert!(MessageFilter::class("Message")
            .and_performative(Performative::Agree)
            .matches(&msg));
        assert!(!MessageFilter::performative(Performative::Refuse).matches(&msg));
    }
}
