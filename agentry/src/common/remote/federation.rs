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

//! Link bookkeeping and protocol handling shared by master and slave containers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::common::config::CONFIG;
use crate::common::container::WeakContainer;
use crate::common::remote::connection::{ConnectionHandler, LinkId, LinkListener};
use crate::common::remote::protocol::{Action, Frame};
use crate::common::Container;
use crate::message::{AgentId, Message};

/// Which end of the links this container is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Master,
    Slave,
}

pub(crate) struct Federation {
    role: Role,
    this: Weak<Federation>,
    container: WeakContainer,
    links: Mutex<Vec<Arc<ConnectionHandler>>>,
    needs_cleanup: AtomicBool,
    next_link: AtomicU64,
    /// Directory entries peers added with REGISTER, withdrawn when their link drops.
    remote_registrations: Mutex<HashMap<LinkId, Vec<AgentId>>>,
    shutdown_requested: AtomicBool,
    stopping: CancellationToken,
    live: watch::Sender<usize>,
    endpoint: Mutex<Option<String>>,
    timeout: Duration,
    /// Deadline for queries asked on behalf of a peer, which waits on us with `timeout`.
    nested_timeout: Duration,
}

impl Federation {
    pub(crate) fn new(role: Role, container: WeakContainer) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            role,
            this: this.clone(),
            container,
            links: Mutex::new(Vec::new()),
            needs_cleanup: AtomicBool::new(false),
            next_link: AtomicU64::new(1),
            remote_registrations: Mutex::new(HashMap::new()),
            shutdown_requested: AtomicBool::new(false),
            stopping: CancellationToken::new(),
            live: watch::Sender::new(0),
            endpoint: Mutex::new(None),
            timeout: CONFIG.remote_query_timeout(),
            nested_timeout: CONFIG.remote_query_timeout() / 2,
        })
    }

    pub(crate) fn set_endpoint(&self, endpoint: impl Into<String>) {
        *self.endpoint.lock() = Some(endpoint.into());
    }

    /// Cancelled when the owning container shuts down.
    pub(crate) fn stopping(&self) -> CancellationToken {
        self.stopping.clone()
    }

    /// Whether the master told this slave to go away.
    pub(crate) fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn live_count(&self) -> usize {
        *self.live.borrow()
    }

    /// Resolves once at least `count` links are up. Returns `false` on shutdown.
    pub(crate) async fn until_links(&self, count: usize) -> bool {
        let mut live = self.live.subscribe();
        tokio::select! {
            () = self.stopping.cancelled() => false,
            linked = live.wait_for(|n| *n >= count) => linked.is_ok(),
        }
    }

    /// Starts serving a new link over `io`.
    pub(crate) fn attach<IO>(&self, io: IO, name: impl Into<String>) -> Option<Arc<ConnectionHandler>>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let listener: Arc<dyn LinkListener> = self.this.upgrade()?;
        let id = self.next_link.fetch_add(1, Ordering::Relaxed);
        let link = ConnectionHandler::spawn(id, name, io, listener);
        if self.stopping.is_cancelled() {
            link.close();
            return None;
        }
        self.links.lock().push(link.clone());
        self.refresh_live();
        info!("Link {} attached", link.name());
        Some(link)
    }

    fn refresh_live(&self) {
        let count = self.links.lock().iter().filter(|l| !l.is_closed()).count();
        self.live.send_replace(count);
    }

    /// Live links except `exclude`, sweeping closed ones first if any closed.
    fn live_links(&self, exclude: Option<LinkId>) -> Vec<Arc<ConnectionHandler>> {
        let mut links = self.links.lock();
        if self.needs_cleanup.swap(false, Ordering::SeqCst) {
            links.retain(|link| !link.is_closed());
        }
        links
            .iter()
            .filter(|link| Some(link.id()) != exclude && !link.is_closed())
            .cloned()
            .collect()
    }

    /// Sends a message over every live link but `exclude`.
    ///
    /// Slaves ask the master to relay further; the master never asks slaves to.
    pub(crate) fn forward(&self, message: &Message, exclude: Option<LinkId>) -> bool {
        let links = self.live_links(exclude);
        if links.is_empty() {
            trace!("No live link to forward message {}", message.id());
            return false;
        }
        let frame = Frame::send(message, self.role == Role::Slave);
        links
            .iter()
            .fold(false, |posted, link| link.post(&frame) || posted)
    }

    /// Posts a frame expecting no reply to every live link.
    pub(crate) fn broadcast(&self, frame: &Frame) {
        for link in self.live_links(None) {
            link.post(frame);
        }
    }

    /// Asks every live link but `exclude` and keeps the replies that arrive in time.
    ///
    /// A query that excludes a link is answering that peer, so it gets the
    /// shorter nested deadline and the peer still hears back before its own
    /// request expires.
    async fn query(&self, frame: Frame, exclude: Option<LinkId>) -> Vec<Frame> {
        let timeout = if exclude.is_some() {
            self.nested_timeout
        } else {
            self.timeout
        };
        let links = self.live_links(exclude);
        let replies = join_all(links.iter().map(|link| link.request(frame.clone(), timeout))).await;
        replies
            .into_iter()
            .zip(&links)
            .filter_map(|(reply, link)| match reply {
                Ok(reply) => Some(reply),
                Err(e) => {
                    debug!("Query over link {} failed: {}", link.name(), e);
                    None
                }
            })
            .collect()
    }

    pub(crate) async fn contains_agent(&self, agent: &AgentId, exclude: Option<LinkId>) -> bool {
        self.query(Frame::contains_agent(agent), exclude)
            .await
            .iter()
            .any(|reply| reply.answer == Some(true))
    }

    pub(crate) async fn agent_for_service(&self, service: &str, exclude: Option<LinkId>) -> Option<AgentId> {
        self.query(Frame::agent_for_service(service), exclude)
            .await
            .into_iter()
            .find_map(|reply| reply.agent_id)
    }

    pub(crate) async fn agents_for_service(&self, service: &str, exclude: Option<LinkId>) -> Vec<AgentId> {
        self.query(Frame::agents_for_service(service), exclude)
            .await
            .into_iter()
            .filter_map(|reply| reply.agent_ids)
            .flatten()
            .collect()
    }

    pub(crate) async fn agents(&self, exclude: Option<LinkId>) -> Vec<AgentId> {
        self.query(Frame::request(Action::Agents), exclude)
            .await
            .into_iter()
            .filter_map(|reply| reply.agent_ids)
            .flatten()
            .collect()
    }

    pub(crate) async fn services(&self, exclude: Option<LinkId>) -> Vec<String> {
        self.query(Frame::request(Action::Services), exclude)
            .await
            .into_iter()
            .filter_map(|reply| reply.services)
            .flatten()
            .collect()
    }

    /// Closes the current links. A slave reconnects afterwards unless stopped.
    pub(crate) fn drop_links(&self) {
        for link in self.live_links(None) {
            link.close();
        }
    }

    /// Tears down every link. The master first tells each slave to stay away.
    #[instrument(skip(self))]
    pub(crate) async fn shutdown(&self) {
        if self.stopping.is_cancelled() {
            return;
        }
        self.stopping.cancel();
        let links = std::mem::take(&mut *self.links.lock());
        if self.role == Role::Master {
            let frame = Frame::request(Action::Shutdown);
            for link in &links {
                link.post(&frame);
            }
        }
        for link in &links {
            link.close();
        }
        for link in &links {
            if tokio::time::timeout(self.timeout, link.closed()).await.is_err() {
                warn!("Link {} did not close in time", link.name());
            }
        }
        self.live.send_replace(0);
    }

    pub(crate) fn describe(&self) -> String {
        let endpoint = self.endpoint.lock().clone();
        let live = self.live_count();
        match (self.role, endpoint) {
            (Role::Master, Some(endpoint)) => format!("Running, listening on {endpoint}, {live} link(s)"),
            (Role::Master, None) => format!("Running, {live} link(s)"),
            (Role::Slave, Some(endpoint)) if live > 0 => format!("Running, connected to {endpoint}"),
            (Role::Slave, Some(endpoint)) if self.is_shutdown_requested() => {
                format!("Running, disconnected from {endpoint}")
            }
            (Role::Slave, Some(endpoint)) => format!("Running, connecting to {endpoint}..."),
            (Role::Slave, None) => format!("Running, {live} link(s)"),
        }
    }

    fn track_registration(&self, link: LinkId, agent: AgentId) {
        let mut registrations = self.remote_registrations.lock();
        let agents = registrations.entry(link).or_default();
        if !agents.contains(&agent) {
            agents.push(agent);
        }
    }

    async fn answer(self: Arc<Self>, container: Container, link: Arc<ConnectionHandler>, request: Frame) {
        // The master speaks for its other slaves too; a slave only for itself.
        let fan_out = self.role == Role::Master;
        let exclude = Some(link.id());
        let reply = Frame::reply_to(&request);
        let reply = match request.action {
            Some(Action::ContainsAgent) => {
                let found = match &request.agent_id {
                    Some(agent) => {
                        container.contains_agent(agent)
                            || (fan_out && self.contains_agent(agent, exclude).await)
                    }
                    None => false,
                };
                reply.with_answer(found)
            }
            Some(Action::Agents) => {
                let mut agents = container.local_agents();
                if fan_out {
                    extend_unique(&mut agents, self.agents(exclude).await);
                }
                reply.with_agent_ids(agents)
            }
            Some(Action::Services) => {
                let mut services = container.local_services();
                if fan_out {
                    extend_unique(&mut services, self.services(exclude).await);
                }
                services.sort();
                reply.with_services(services)
            }
            Some(Action::AgentForService) => {
                let service = request.service.as_deref().unwrap_or_default();
                let mut agent = container.local_agent_for_service(service);
                if agent.is_none() && fan_out {
                    agent = self.agent_for_service(service, exclude).await;
                }
                reply.with_agent_id(agent)
            }
            Some(Action::AgentsForService) => {
                let service = request.service.as_deref().unwrap_or_default();
                let mut agents = container.local_agents_for_service(service);
                if fan_out {
                    extend_unique(&mut agents, self.agents_for_service(service, exclude).await);
                }
                reply.with_agent_ids(agents)
            }
            _ => reply.with_answer(false),
        };
        if !link.post(&reply) {
            debug!("Link {} closed before reply could be sent", link.name());
        }
    }
}

impl LinkListener for Federation {
    fn on_frame(&self, link: &Arc<ConnectionHandler>, frame: Frame) {
        let Some(container) = self.container.upgrade() else {
            return;
        };
        match frame.action {
            Some(Action::Send) => match frame.message {
                Some(message) => container.route_inbound(message, frame.relay.unwrap_or(false), link.id()),
                None => warn!("Link {}: SEND without message", link.name()),
            },
            Some(Action::Register) => {
                if let (Some(agent), Some(service)) = (frame.agent_id, frame.service.as_deref()) {
                    container.register(&agent, service);
                    self.track_registration(link.id(), agent);
                }
            }
            Some(Action::Deregister) => match (frame.agent_id, frame.service.as_deref()) {
                (Some(agent), Some(service)) => {
                    container.deregister(&agent, service);
                }
                (Some(agent), None) => {
                    container.deregister_all(&agent);
                }
                _ => {}
            },
            Some(Action::Shutdown) => match self.role {
                Role::Slave => {
                    info!("Master requested shutdown, closing link {}", link.name());
                    self.shutdown_requested.store(true, Ordering::SeqCst);
                    link.close();
                }
                Role::Master => warn!("Ignoring SHUTDOWN from slave {}", link.name()),
            },
            Some(action) if action.expects_reply() => {
                let Some(this) = self.this.upgrade() else {
                    return;
                };
                tokio::spawn(this.answer(container, link.clone(), frame));
            }
            _ => {
                warn!("Link {}: unsupported frame {:?}", link.name(), frame.action);
                if frame.id.is_some() {
                    link.post(&Frame::reply_to(&frame).with_answer(false));
                }
            }
        }
    }

    fn on_closed(&self, link: &Arc<ConnectionHandler>) {
        info!("Connection {} closed", link.name());
        self.needs_cleanup.store(true, Ordering::SeqCst);
        let registered = self.remote_registrations.lock().remove(&link.id());
        if let (Some(agents), Some(container)) = (registered, self.container.upgrade()) {
            for agent in &agents {
                container.deregister_all(agent);
            }
        }
        self.refresh_live();
    }
}

fn extend_unique<T: PartialEq>(into: &mut Vec<T>, more: Vec<T>) {
    for item in more {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}
