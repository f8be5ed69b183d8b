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

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::config::CONFIG;
use crate::common::remote::federation::{Federation, Role};
use crate::common::{Container, Platform};

/// A container linked to a master over TCP.
///
/// The slave keeps exactly one link. When the link drops it reconnects after
/// the configured delay, indefinitely, until the container shuts down or the
/// master announces its own shutdown.
#[derive(Clone)]
pub struct SlaveContainer {
    container: Container,
    federation: Arc<Federation>,
    endpoint: String,
}

impl std::fmt::Debug for SlaveContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlaveContainer")
            .field("container", &self.container)
            .field("master", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Deref for SlaveContainer {
    type Target = Container;

    fn deref(&self) -> &Self::Target {
        &self.container
    }
}

impl SlaveContainer {
    /// Creates a slave and starts connecting to the master at `host:port`.
    ///
    /// Returns immediately; use [`wait_until_connected`](Self::wait_until_connected)
    /// to wait for the first link.
    pub fn connect(platform: &Platform, name: impl Into<String>, host: &str, port: u16) -> Self {
        let endpoint = format!("{host}:{port}");
        let container = Container::detached(platform, name);
        let federation = Federation::new(Role::Slave, container.downgrade());
        federation.set_endpoint(endpoint.clone());
        container.set_federation(federation.clone());
        platform.attach(container.clone());
        tokio::spawn(reconnect_loop(
            federation.clone(),
            endpoint.clone(),
            federation.stopping(),
        ));
        Self {
            container,
            federation,
            endpoint,
        }
    }

    /// Whether the link to the master is up.
    pub fn is_connected(&self) -> bool {
        self.federation.live_count() > 0
    }

    /// Waits up to `timeout` for the link to the master to come up.
    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.federation.until_links(1))
            .await
            .unwrap_or(false)
    }

    /// Whether the master announced its shutdown. The slave will not reconnect.
    pub fn is_master_shutdown(&self) -> bool {
        self.federation.is_shutdown_requested()
    }

    /// Drops the current link; the slave reconnects after the configured delay.
    pub fn close_link(&self) {
        self.federation.drop_links();
    }

    /// `host:port` of the master.
    pub fn master(&self) -> &str {
        &self.endpoint
    }

    /// The underlying container.
    pub const fn container(&self) -> &Container {
        &self.container
    }
}

async fn reconnect_loop(federation: Arc<Federation>, endpoint: String, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() || federation.is_shutdown_requested() {
            break;
        }
        debug!("Connecting to {}", endpoint);
        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            connected = TcpStream::connect(endpoint.as_str()) => connected,
        };
        match connected {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                let Some(link) = federation.attach(stream, endpoint.clone()) else {
                    break;
                };
                info!("Connected to master at {}", endpoint);
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = link.closed() => {}
                }
                if federation.is_shutdown_requested() {
                    info!("Master at {} shut down, not reconnecting", endpoint);
                    break;
                }
                warn!("Connection to {} lost, reconnecting", endpoint);
            }
            Err(e) => debug!("Connection to {} failed: {}", endpoint, e),
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(CONFIG.reconnect_delay()) => {}
        }
    }
    debug!("Reconnect loop for {} stopped", endpoint);
}
