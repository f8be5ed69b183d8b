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

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::warn;

use crate::common::config::CONFIG;
use crate::message::{Message, MessageFilter};

/// Outcome of delivering a message to a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Appended to the queue.
    Queued,
    /// Handed directly to a suspended receiver.
    Handed,
}

struct Waiter {
    id: u64,
    filter: MessageFilter,
    tx: oneshot::Sender<Message>,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<Message>,
    waiters: Vec<Waiter>,
    next_waiter: u64,
}

/// Incoming messages of one agent or gateway.
///
/// Messages are kept in arrival order. A receiver waiting with a filter gets
/// the first matching message directly; everything else is queued.
#[derive(Default)]
pub(crate) struct Mailbox {
    inner: Mutex<Inner>,
}

impl Mailbox {
    pub(crate) fn deliver(&self, message: Message) -> Delivery {
        let mut inner = self.inner.lock();
        let mut message = message;
        while let Some(pos) = inner.waiters.iter().position(|w| w.filter.matches(&message)) {
            let waiter = inner.waiters.remove(pos);
            match waiter.tx.send(message) {
                Ok(()) => return Delivery::Handed,
                Err(returned) => message = returned,
            }
        }
        inner.queue.push_back(message);
        let depth = inner.queue.len();
        if depth == CONFIG.limits.mailbox_warn_depth {
            warn!("Mailbox depth reached {}", depth);
        }
        Delivery::Queued
    }

    /// Removes the oldest queued message matching `filter`.
    pub(crate) fn take_matching(&self, filter: &MessageFilter) -> Option<Message> {
        let mut inner = self.inner.lock();
        let pos = inner.queue.iter().position(|m| filter.matches(m))?;
        inner.queue.remove(pos)
    }

    /// Takes a matching queued message, or registers a waiter for the next one.
    pub(crate) fn take_or_wait(
        &self,
        filter: MessageFilter,
    ) -> Result<Message, (u64, oneshot::Receiver<Message>)> {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.queue.iter().position(|m| filter.matches(m)) {
            if let Some(message) = inner.queue.remove(pos) {
                return Ok(message);
            }
        }
        let (tx, rx) = oneshot::channel();
        let id = inner.next_waiter;
        inner.next_waiter += 1;
        inner.waiters.push(Waiter { id, filter, tx });
        Err((id, rx))
    }

    /// Drops a waiter. Returns `true` if it was still waiting.
    pub(crate) fn cancel_waiter(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.waiters.len();
        inner.waiters.retain(|w| w.id != id);
        inner.waiters.len() != before
    }

    /// Runs `f` while the mailbox is locked, passing whether waiter `id` is
    /// still registered. Used to suspend without racing a delivery.
    pub(crate) fn with_waiter<R>(&self, id: u64, f: impl FnOnce(bool) -> R) -> R {
        let inner = self.inner.lock();
        f(inner.waiters.iter().any(|w| w.id == id))
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Drops queued messages and waiters.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.waiters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Performative;

    #[test]
    fn test_queue_keeps_arrival_order() {
        let mailbox = Mailbox::default();
        let first = Message::new("a", Performative::Inform);
        let second = Message::new("a", Performative::Inform);
        mailbox.deliver(first.clone());
        mailbox.deliver(second.clone());
        let any = MessageFilter::any();
        assert_eq!(mailbox.take_matching(&any).map(|m| m.id().to_string()), Some(first.id().to_string()));
        assert_eq!(mailbox.take_matching(&any).map(|m| m.id().to_string()), Some(second.id().to_string()));
        assert!(mailbox.take_matching(&any).is_none());
    }

    #[tokio::test]
    async fn test_waiter_gets_matching_message_directly() {
        let mailbox = Mailbox::default();
        let Err((id, rx)) = mailbox.take_or_wait(MessageFilter::performative(Performative::Agree)) else {
            panic!("mailbox should be empty");
        };
        assert_eq!(mailbox.deliver(Message::new("a", Performative::Inform)), Delivery::Queued);
        assert_eq!(mailbox.deliver(Message::new("a", Performative::Agree)), Delivery::Handed);
        let got = rx.await.expect("handed message");
        assert_eq!(got.performative(), Performative::Agree);
        assert!(!mailbox.cancel_waiter(id));
        assert_eq!(mailbox.len(), 1);
    }

    #[test]
    fn test_cancelled_waiter_no_longer_intercepts() {
        let mailbox = Mailbox::default();
        let Err((id, _rx)) = mailbox.take_or_wait(MessageFilter::any()) else {
            panic!("mailbox should be empty");
        };
        assert!(mailbox.cancel_waiter(id));
        assert_eq!(mailbox.deliver(Message::new("a", Performative::Inform)), Delivery::Queued);
    }
}
