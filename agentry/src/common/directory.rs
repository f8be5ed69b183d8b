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

use std::collections::BTreeMap;

use crate::message::AgentId;

/// Service name → advertising agents, in registration order.
///
/// The first registrant of a service is the one returned by
/// [`first`](Self::first), which is what `agent_for_service` answers with.
#[derive(Debug, Default, Clone)]
pub(crate) struct ServiceDirectory {
    services: BTreeMap<String, Vec<AgentId>>,
}

impl ServiceDirectory {
    /// Returns `false` if the agent already advertised the service.
    pub(crate) fn register(&mut self, agent: &AgentId, service: &str) -> bool {
        let providers = self.services.entry(service.to_string()).or_default();
        if providers.contains(agent) {
            return false;
        }
        providers.push(agent.clone());
        true
    }

    pub(crate) fn deregister(&mut self, agent: &AgentId, service: &str) -> bool {
        let Some(providers) = self.services.get_mut(service) else {
            return false;
        };
        let before = providers.len();
        providers.retain(|a| a != agent);
        let removed = providers.len() != before;
        if providers.is_empty() {
            self.services.remove(service);
        }
        removed
    }

    /// Removes the agent from every service; returns how many it had.
    pub(crate) fn deregister_all(&mut self, agent: &AgentId) -> usize {
        let mut removed = 0;
        self.services.retain(|_, providers| {
            let before = providers.len();
            providers.retain(|a| a != agent);
            removed += before - providers.len();
            !providers.is_empty()
        });
        removed
    }

    pub(crate) fn first(&self, service: &str) -> Option<AgentId> {
        self.services.get(service).and_then(|p| p.first().cloned())
    }

    pub(crate) fn all(&self, service: &str) -> Vec<AgentId> {
        self.services.get(service).cloned().unwrap_or_default()
    }

    pub(crate) fn services(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_registrant_wins() {
        let mut dir = ServiceDirectory::default();
        let (a, b) = (AgentId::new("a"), AgentId::new("b"));
        assert!(dir.register(&a, "server"));
        assert!(dir.register(&b, "server"));
        assert!(!dir.register(&a, "server"));
        assert_eq!(dir.first("server"), Some(a.clone()));
        assert_eq!(dir.all("server"), vec![a.clone(), b.clone()]);
        assert!(dir.deregister(&a, "server"));
        assert_eq!(dir.first("server"), Some(b));
    }

    #[test]
    fn test_deregister_all_drops_empty_services() {
        let mut dir = ServiceDirectory::default();
        let a = AgentId::new("a");
        dir.register(&a, "x");
        dir.register(&a, "y");
        dir.register(&AgentId::new("b"), "y");
        assert_eq!(dir.deregister_all(&a), 2);
        assert_eq!(dir.services(), vec!["y".to_string()]);
        assert!(dir.first("x").is_none());
    }
}
