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

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, trace, warn};

use crate::agent::Mailbox;
use crate::common::config::CONFIG;
use crate::common::remote::connection::{ConnectionHandler, LinkListener};
use crate::common::remote::protocol::{Action, Frame};
use crate::common::Result;
use crate::message::{AgentId, Message, MessageFilter};

struct GatewayShared {
    agent_id: AgentId,
    mailbox: Mailbox,
    subscriptions: DashSet<AgentId>,
}

impl GatewayShared {
    fn wants(&self, recipient: &AgentId) -> bool {
        if recipient.is_topic() {
            self.subscriptions.contains(recipient)
        } else {
            *recipient == self.agent_id
        }
    }
}

impl LinkListener for GatewayShared {
    fn on_frame(&self, link: &Arc<ConnectionHandler>, frame: Frame) {
        let reply = Frame::reply_to(&frame);
        match frame.action {
            Some(Action::Send) => {
                if let Some(message) = frame.message {
                    match message.recipient() {
                        Some(recipient) if self.wants(recipient) => {
                            self.mailbox.deliver(message);
                        }
                        _ => trace!("Gateway {} ignoring message {}", self.agent_id, message.id()),
                    }
                }
            }
            Some(Action::ContainsAgent) => {
                link.post(&reply.with_answer(frame.agent_id.as_ref() == Some(&self.agent_id)));
            }
            Some(Action::Agents) => {
                link.post(&reply.with_agent_ids(vec![self.agent_id.clone()]));
            }
            Some(Action::Services) => {
                link.post(&reply.with_services(Vec::new()));
            }
            Some(Action::AgentForService) => {
                link.post(&reply.with_agent_id(None));
            }
            Some(Action::AgentsForService) => {
                link.post(&reply.with_agent_ids(Vec::new()));
            }
            Some(Action::Shutdown) => {
                info!("Master shut down, closing gateway {}", self.agent_id);
                link.close();
            }
            Some(Action::Register | Action::Deregister) => {}
            Some(Action::Unknown) | None => {
                warn!("Gateway {}: unsupported frame", self.agent_id);
                if frame.id.is_some() {
                    link.post(&reply.with_answer(false));
                }
            }
        }
    }

    fn on_closed(&self, _link: &Arc<ConnectionHandler>) {
        debug!("Gateway {} disconnected", self.agent_id);
        self.mailbox.close();
    }
}

/// A message-only client of a master container.
///
/// A gateway hosts no agents. It has its own agent id, so agents can reply
/// to it, and it can send messages, subscribe to topics, advertise services
/// and query the directory of the whole federation.
///
/// ```rust,ignore
/// let gateway = Gateway::connect("localhost", port).await?;
/// let echo = gateway.agent_for_service("echo").await.expect("no echo service");
/// let reply = gateway
///     .request(Message::new(echo, Performative::Request), Duration::from_secs(1))
///     .await;
/// ```
pub struct Gateway {
    shared: Arc<GatewayShared>,
    link: Arc<ConnectionHandler>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("agent_id", &self.shared.agent_id)
            .field("closed", &self.link.is_closed())
            .finish()
    }
}

fn new_gateway_id() -> AgentId {
    use mti::prelude::*;
    AgentId::new(
        CONFIG
            .defaults
            .gateway_prefix
            .as_str()
            .create_type_id::<V7>()
            .to_string(),
    )
}

impl Gateway {
    /// Connects to a master container over TCP.
    #[instrument]
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        let _ = stream.set_nodelay(true);
        Ok(Self::attach(stream, format!("{host}:{port}")))
    }

    /// Uses an already-open byte stream to a master.
    pub fn attach<IO>(io: IO, name: impl Into<String>) -> Self
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = Arc::new(GatewayShared {
            agent_id: new_gateway_id(),
            mailbox: Mailbox::default(),
            subscriptions: DashSet::new(),
        });
        let link = ConnectionHandler::spawn(0, name, io, shared.clone());
        info!("Gateway {} attached to {}", shared.agent_id, link.name());
        Self { shared, link }
    }

    /// Identifier the gateway is addressed by.
    pub fn agent_id(&self) -> &AgentId {
        &self.shared.agent_id
    }

    /// Whether the link to the master has closed.
    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    /// Sends a message into the federation, stamped with this gateway as sender.
    pub fn send(&self, mut message: Message) -> bool {
        message.set_sender(self.shared.agent_id.clone());
        self.link.post(&Frame::send(&message, true))
    }

    /// Takes the first message matching `filter`, waiting up to `timeout`.
    pub async fn receive(&self, filter: MessageFilter, timeout: Duration) -> Option<Message> {
        let (waiter, mut incoming) = match self.shared.mailbox.take_or_wait(filter) {
            Ok(message) => return Some(message),
            Err(waiting) => waiting,
        };
        match tokio::time::timeout(timeout, &mut incoming).await {
            Ok(Ok(message)) => Some(message),
            Ok(Err(_)) => None,
            Err(_) => {
                if self.shared.mailbox.cancel_waiter(waiter) {
                    None
                } else {
                    incoming.try_recv().ok()
                }
            }
        }
    }

    /// Sends `message` and waits for the reply to it.
    pub async fn request(&self, message: Message, timeout: Duration) -> Option<Message> {
        let filter = MessageFilter::reply_to(message.id());
        if !self.send(message) {
            return None;
        }
        self.receive(filter, timeout).await
    }

    /// [`request`](Self::request) bounded by `timeouts.request_ms`.
    pub async fn ask(&self, message: Message) -> Option<Message> {
        self.request(message, CONFIG.request_timeout()).await
    }

    /// A provider of `service` anywhere in the federation.
    pub async fn agent_for_service(&self, service: &str) -> Option<AgentId> {
        self.query(Frame::agent_for_service(service))
            .await
            .and_then(|reply| reply.agent_id)
    }

    /// Every provider of `service` in the federation.
    pub async fn agents_for_service(&self, service: &str) -> Vec<AgentId> {
        self.query(Frame::agents_for_service(service))
            .await
            .and_then(|reply| reply.agent_ids)
            .unwrap_or_default()
    }

    /// Every agent in the federation.
    pub async fn agents(&self) -> Vec<AgentId> {
        self.query(Frame::request(Action::Agents))
            .await
            .and_then(|reply| reply.agent_ids)
            .unwrap_or_default()
    }

    /// Every service offered in the federation.
    pub async fn services(&self) -> Vec<String> {
        self.query(Frame::request(Action::Services))
            .await
            .and_then(|reply| reply.services)
            .unwrap_or_default()
    }

    async fn query(&self, frame: Frame) -> Option<Frame> {
        match self.link.request(frame, CONFIG.remote_query_timeout()).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                debug!("Gateway query failed: {}", e);
                None
            }
        }
    }

    /// Advertises `service` with this gateway as provider.
    pub fn register(&self, service: &str) -> bool {
        self.link
            .post(&Frame::register(&self.shared.agent_id, service))
    }

    /// Withdraws the gateway from `service`.
    pub fn deregister(&self, service: &str) -> bool {
        self.link
            .post(&Frame::deregister(&self.shared.agent_id, Some(service)))
    }

    /// Starts accepting messages sent to `topic`.
    pub fn subscribe(&self, topic: &AgentId) -> bool {
        topic.is_topic() && self.shared.subscriptions.insert(topic.clone())
    }

    /// Stops receiving messages sent to `topic`.
    pub fn unsubscribe(&self, topic: &AgentId) -> bool {
        self.shared.subscriptions.remove(topic).is_some()
    }

    /// Whether the gateway receives messages sent to `topic`.
    pub fn is_subscribed(&self, topic: &AgentId) -> bool {
        self.shared.subscriptions.contains(topic)
    }

    /// Closes the link and waits for it to go down.
    pub async fn close(&self) {
        self.link.close();
        self.link.closed().await;
    }
}
