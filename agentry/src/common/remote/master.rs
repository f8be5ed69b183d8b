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

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, trace};

use crate::common::config::CONFIG;
use crate::common::remote::federation::{Federation, Role};
use crate::common::{Container, Platform, Result};

/// A container that slaves and gateways connect to.
///
/// Agent names, services and messages of every linked slave become visible
/// through the master, and the master answers a slave's queries on behalf of
/// the other slaves. Links come from the TCP listener started by
/// [`bind`](Self::bind) and from [`attach_link`](Self::attach_link) for any
/// other byte stream, such as a serial line.
///
/// Dereferences to [`Container`] for everything else.
#[derive(Clone)]
pub struct MasterContainer {
    container: Container,
    federation: Arc<Federation>,
    local_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for MasterContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterContainer")
            .field("container", &self.container)
            .field("local_addr", &self.local_addr)
            .field("links", &self.federation.live_count())
            .finish()
    }
}

impl Deref for MasterContainer {
    type Target = Container;

    fn deref(&self) -> &Self::Target {
        &self.container
    }
}

impl MasterContainer {
    /// Creates a master without a listener; links are added with [`attach_link`](Self::attach_link).
    pub fn new(platform: &Platform, name: impl Into<String>) -> Self {
        Self::build(platform, name.into(), None)
    }

    fn build(platform: &Platform, name: String, local_addr: Option<SocketAddr>) -> Self {
        let container = Container::detached(platform, name);
        let federation = Federation::new(Role::Master, container.downgrade());
        if let Some(addr) = local_addr {
            federation.set_endpoint(addr.to_string());
        }
        container.set_federation(federation.clone());
        platform.attach(container.clone());
        Self {
            container,
            federation,
            local_addr,
        }
    }

    /// Creates a master listening for TCP links on `addr`. Port 0 picks a free port.
    #[instrument(skip(platform, name, addr))]
    pub async fn bind(platform: &Platform, name: impl Into<String>, addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let master = Self::build(platform, name.into(), Some(local_addr));
        info!("Listening on {}", local_addr);
        tokio::spawn(accept_loop(
            listener,
            master.federation.clone(),
            master.federation.stopping(),
        ));
        Ok(master)
    }

    /// Creates a master listening on the configured bind address and port.
    pub async fn listen(platform: &Platform, name: impl Into<String>) -> Result<Self> {
        let addr = (CONFIG.network.bind_address.as_str(), CONFIG.network.master_port);
        Self::bind(platform, name, addr).await
    }

    /// Serves an already-open byte stream as a slave link.
    pub fn attach_link<IO>(&self, io: IO, name: impl Into<String>) -> bool
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.federation.attach(io, name).is_some()
    }

    /// Address of the TCP listener, if any.
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Port of the TCP listener, if any.
    pub fn port(&self) -> Option<u16> {
        self.local_addr.map(|addr| addr.port())
    }

    /// Number of links currently up.
    pub fn link_count(&self) -> usize {
        self.federation.live_count()
    }

    /// Waits up to `timeout` until at least `count` links are up.
    ///
    /// Returns `false` on timeout or once the master shuts down.
    pub async fn wait_for_links(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.federation.until_links(count))
            .await
            .unwrap_or(false)
    }

    /// The underlying container.
    pub const fn container(&self) -> &Container {
        &self.container
    }
}

async fn accept_loop(listener: TcpListener, federation: Arc<Federation>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                info!("Master listener received shutdown signal");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            trace!("Could not set TCP_NODELAY for {}: {}", peer, e);
                        }
                        info!("Incoming connection from {}", peer);
                        federation.attach(stream, peer.to_string());
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }
    info!("Master listener shut down");
}
