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

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, trace, warn};

use crate::agent::{Agent, AgentHandle, AgentTask};
use crate::common::config::CONFIG;
use crate::common::directory::ServiceDirectory;
use crate::common::remote::{Federation, LinkId};
use crate::common::{AgentryError, Platform, Result};
use crate::message::{AgentId, Message};

#[derive(Default)]
struct Registry {
    agents: BTreeMap<String, AgentHandle>,
    topics: HashMap<AgentId, BTreeSet<String>>,
    directory: ServiceDirectory,
}

pub(crate) struct ContainerInner {
    name: String,
    platform: Platform,
    registry: RwLock<Registry>,
    running: AtomicBool,
    stopped: AtomicBool,
    pending: Mutex<Vec<AgentTask>>,
    tracker: TaskTracker,
    federation: OnceLock<Arc<Federation>>,
}

/// Agent registry and message bus for one process.
///
/// A container holds named agents, routes unicast messages to their
/// mailboxes, fans topic messages out to subscribers and keeps a service
/// directory. Registry, topic and directory updates happen under a single
/// lock, so readers never see a half-applied change.
///
/// Master and slave containers ([`MasterContainer`](crate::common::remote::MasterContainer),
/// [`SlaveContainer`](crate::common::remote::SlaveContainer)) wrap a
/// container and extend duplicate checks, routing and directory queries
/// across their links.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

/// Non-owning reference to a [`Container`].
#[derive(Clone)]
pub(crate) struct WeakContainer(Weak<ContainerInner>);

impl WeakContainer {
    pub(crate) fn upgrade(&self) -> Option<Container> {
        self.0.upgrade().map(|inner| Container { inner })
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.inner.name)
            .field("running", &self.is_running())
            .field("agents", &self.inner.registry.read().agents.len())
            .finish_non_exhaustive()
    }
}

impl Container {
    /// Creates a container on `platform`. It starts with the platform, or
    /// immediately if the platform is already running.
    pub fn new(platform: &Platform, name: impl Into<String>) -> Self {
        let container = Self::detached(platform, name);
        platform.attach(container.clone());
        container
    }

    /// Creates a container named after `defaults.container_name`.
    pub fn with_default_name(platform: &Platform) -> Self {
        Self::new(platform, CONFIG.defaults.container_name.clone())
    }

    pub(crate) fn detached(platform: &Platform, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                name: name.into(),
                platform: platform.clone(),
                registry: RwLock::new(Registry::default()),
                running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                pending: Mutex::new(Vec::new()),
                tracker: TaskTracker::new(),
                federation: OnceLock::new(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakContainer {
        WeakContainer(Arc::downgrade(&self.inner))
    }

    pub(crate) fn set_federation(&self, federation: Arc<Federation>) {
        if self.inner.federation.set(federation).is_err() {
            warn!("Container {} already has a federation", self.inner.name);
        }
    }

    fn federation(&self) -> Option<&Arc<Federation>> {
        self.inner.federation.get()
    }

    /// Name of the container.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Platform the container runs on.
    pub fn platform(&self) -> &Platform {
        &self.inner.platform
    }

    /// Whether the container has started and not shut down.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Human-readable state, including link status for master and slave containers.
    pub fn state(&self) -> String {
        if !self.is_running() {
            return "Not running".to_string();
        }
        match self.federation() {
            Some(federation) => federation.describe(),
            None => "Running".to_string(),
        }
    }

    /// Adds an agent under `name`.
    ///
    /// Fails with [`AgentryError::DuplicateName`] if the name is taken here or,
    /// for master and slave containers, on any linked container.
    #[instrument(skip(self, agent), fields(container = %self.inner.name))]
    pub async fn add_agent(&self, name: impl Into<String> + fmt::Debug, agent: Agent) -> Result<AgentHandle> {
        let name = name.into();
        let id = AgentId::new(name.as_str());
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(AgentryError::NotRunning(self.inner.name.clone()));
        }
        if self.is_duplicate(&id).await {
            warn!("Duplicate agent name: {}", name);
            return Err(AgentryError::DuplicateName(name));
        }

        let handle = AgentHandle::new(id, self.clone());
        let task = AgentTask::new(handle.clone(), agent);
        {
            let mut registry = self.inner.registry.write();
            if registry.agents.contains_key(&name) {
                drop(registry);
                task.abandon();
                return Err(AgentryError::DuplicateName(name));
            }
            registry.agents.insert(name.clone(), handle.clone());
        }

        let mut pending = self.inner.pending.lock();
        if self.is_running() {
            self.spawn(task);
        } else {
            pending.push(task);
        }
        debug!("Agent {} added", name);
        Ok(handle)
    }

    async fn is_duplicate(&self, id: &AgentId) -> bool {
        if self.contains_agent(id) {
            return true;
        }
        match self.federation() {
            Some(federation) => federation.contains_agent(id, None).await,
            None => false,
        }
    }

    fn spawn(&self, task: AgentTask) {
        self.inner.tracker.spawn(task.run());
    }

    /// Handle of a local agent.
    pub fn agent(&self, name: &str) -> Option<AgentHandle> {
        self.inner.registry.read().agents.get(name).cloned()
    }

    /// Whether the agent lives in this container.
    pub fn contains_agent(&self, id: &AgentId) -> bool {
        !id.is_topic() && self.inner.registry.read().agents.contains_key(id.name())
    }

    /// Whether the agent lives here or on any linked container.
    pub async fn can_locate_agent(&self, id: &AgentId) -> bool {
        self.is_duplicate(id).await
    }

    /// Stops a local agent. Returns `false` if no such agent exists.
    pub fn kill(&self, name: &str) -> bool {
        match self.agent(name) {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Routes a message, relaying it over container links where needed.
    pub fn send(&self, message: Message) -> bool {
        self.send_with_relay(message, true)
    }

    /// Routes a message.
    ///
    /// Topic messages go to every local subscriber and, with `relay`, to all
    /// linked containers. Unicast messages go to the local agent if present;
    /// otherwise, with `relay`, to linked containers. Returns whether
    /// delivery was attempted.
    pub fn send_with_relay(&self, message: Message, relay: bool) -> bool {
        if !self.is_running() {
            trace!("Container {} not running, dropping message", self.inner.name);
            return false;
        }
        let Some(recipient) = message.recipient().cloned() else {
            warn!("Message {} has no recipient", message.id());
            return false;
        };
        let Some(federation) = self.federation() else {
            return self.deliver_local(&recipient, message);
        };
        if recipient.is_topic() {
            if relay {
                federation.forward(&message, None);
            }
            self.deliver_local(&recipient, message);
            return true;
        }
        if self.deliver_local(&recipient, message.clone()) {
            return true;
        }
        relay && federation.forward(&message, None)
    }

    /// Handles a message that arrived over link `origin`.
    pub(crate) fn route_inbound(&self, message: Message, relay: bool, origin: LinkId) {
        if !self.is_running() {
            return;
        }
        let Some(recipient) = message.recipient().cloned() else {
            return;
        };
        let federation = self.federation();
        if recipient.is_topic() {
            if let (true, Some(federation)) = (relay, federation) {
                federation.forward(&message, Some(origin));
            }
            self.deliver_local(&recipient, message);
        } else if !self.deliver_local(&recipient, message.clone()) {
            if let (true, Some(federation)) = (relay, federation) {
                federation.forward(&message, Some(origin));
            }
        }
    }

    fn deliver_local(&self, recipient: &AgentId, message: Message) -> bool {
        let registry = self.inner.registry.read();
        if recipient.is_topic() {
            if let Some(subscribers) = registry.topics.get(recipient) {
                for name in subscribers {
                    if let Some(handle) = registry.agents.get(name) {
                        handle.deliver(message.clone());
                    }
                }
            }
            true
        } else if let Some(handle) = registry.agents.get(recipient.name()) {
            handle.deliver(message);
            true
        } else {
            false
        }
    }

    /// Subscribes a local agent to a topic.
    pub fn subscribe(&self, agent: &AgentId, topic: &AgentId) -> bool {
        if !topic.is_topic() {
            warn!("{} is not a topic", topic);
            return false;
        }
        self.inner
            .registry
            .write()
            .topics
            .entry(topic.clone())
            .or_default()
            .insert(agent.name().to_string())
    }

    /// Removes `agent` from `topic`.
    pub fn unsubscribe(&self, agent: &AgentId, topic: &AgentId) -> bool {
        let mut registry = self.inner.registry.write();
        let Some(subscribers) = registry.topics.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(agent.name());
        if subscribers.is_empty() {
            registry.topics.remove(topic);
        }
        removed
    }

    /// Advertises `service` for `agent` in the local directory.
    pub fn register(&self, agent: &AgentId, service: &str) -> bool {
        self.inner.registry.write().directory.register(agent, service)
    }

    /// Withdraws `agent` from `service` in the local directory.
    pub fn deregister(&self, agent: &AgentId, service: &str) -> bool {
        self.inner
            .registry
            .write()
            .directory
            .deregister(agent, service)
    }

    /// Withdraws every service advertised by `agent`.
    pub fn deregister_all(&self, agent: &AgentId) -> usize {
        self.inner.registry.write().directory.deregister_all(agent)
    }

    /// First local provider of `service`.
    pub fn local_agent_for_service(&self, service: &str) -> Option<AgentId> {
        self.inner.registry.read().directory.first(service)
    }

    /// Local providers of `service`.
    pub fn local_agents_for_service(&self, service: &str) -> Vec<AgentId> {
        self.inner.registry.read().directory.all(service)
    }

    /// Agents hosted here.
    pub fn local_agents(&self) -> Vec<AgentId> {
        self.inner
            .registry
            .read()
            .agents
            .keys()
            .map(|name| AgentId::new(name.as_str()))
            .collect()
    }

    /// Services offered by local agents.
    pub fn local_services(&self) -> Vec<String> {
        self.inner.registry.read().directory.services()
    }

    /// First agent advertising `service`; local providers win over remote ones.
    pub async fn agent_for_service(&self, service: &str) -> Option<AgentId> {
        if let Some(agent) = self.local_agent_for_service(service) {
            return Some(agent);
        }
        match self.federation() {
            Some(federation) => federation.agent_for_service(service, None).await,
            None => None,
        }
    }

    /// Every agent advertising `service`, local ones first, without duplicates.
    pub async fn agents_for_service(&self, service: &str) -> Vec<AgentId> {
        let mut agents = self.local_agents_for_service(service);
        if let Some(federation) = self.federation() {
            merge_unique(&mut agents, federation.agents_for_service(service, None).await);
        }
        agents
    }

    /// Snapshot of agents here and on linked containers.
    pub async fn agents(&self) -> Vec<AgentId> {
        let mut agents = self.local_agents();
        if let Some(federation) = self.federation() {
            merge_unique(&mut agents, federation.agents(None).await);
        }
        agents
    }

    /// Snapshot of services advertised here and on linked containers, sorted.
    pub async fn services(&self) -> Vec<String> {
        let mut services: BTreeSet<String> = self.local_services().into_iter().collect();
        if let Some(federation) = self.federation() {
            services.extend(federation.services(None).await);
        }
        services.into_iter().collect()
    }

    /// Starts the container: agents added so far begin running.
    #[instrument(skip(self), fields(container = %self.inner.name))]
    pub fn start(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut pending = self.inner.pending.lock();
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in pending.drain(..) {
            self.spawn(task);
        }
        info!("Container {} started", self.inner.name);
    }

    /// Stops every agent and, for linked containers, tears down the links.
    #[instrument(skip(self), fields(container = %self.inner.name))]
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Container {} shutting down", self.inner.name);
        if let Some(federation) = self.federation() {
            federation.shutdown().await;
        }
        self.inner.running.store(false, Ordering::SeqCst);

        let unstarted: Vec<AgentTask> = self.inner.pending.lock().drain(..).collect();
        for task in unstarted {
            task.abandon();
        }
        let handles: Vec<AgentHandle> = self.inner.registry.read().agents.values().cloned().collect();
        for handle in &handles {
            handle.stop();
        }

        self.inner.tracker.close();
        if tokio::time::timeout(CONFIG.shutdown_timeout(), self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "Container {}: agents still running after {} ms",
                self.inner.name, CONFIG.timeouts.shutdown_ms
            );
        }
        let mut registry = self.inner.registry.write();
        registry.agents.clear();
        registry.topics.clear();
    }

    /// Removes a terminated agent from the registry, topics and directory.
    pub(crate) fn agent_terminated(&self, handle: &AgentHandle) {
        let id = handle.id();
        let mut registry = self.inner.registry.write();
        let is_current = registry
            .agents
            .get(id.name())
            .is_some_and(|h| h.same_agent(handle));
        if !is_current {
            return;
        }
        registry.agents.remove(id.name());
        registry.topics.retain(|_, subscribers| {
            subscribers.remove(id.name());
            !subscribers.is_empty()
        });
        registry.directory.deregister_all(id);
        trace!("Agent {} removed from container {}", id, self.inner.name);
    }
}

fn merge_unique<T: PartialEq>(into: &mut Vec<T>, more: Vec<T>) {
    for item in more {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}
