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

//! One container link: framing, request correlation and loss detection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::common::config::CONFIG;
use crate::common::remote::codec::{FrameCodec, Inbound};
use crate::common::remote::protocol::Frame;
use crate::common::{AgentryError, Result};

/// Identifies a link within its container.
pub type LinkId = u64;

/// Receives the requests and closure of a link.
///
/// Called on the link's reader task, so frames arrive in the order they were
/// read. Implementations must not block.
pub(crate) trait LinkListener: Send + Sync + 'static {
    fn on_frame(&self, link: &Arc<ConnectionHandler>, frame: Frame);
    fn on_closed(&self, link: &Arc<ConnectionHandler>);
}

/// Correlation updates for the reader task.
enum Pending {
    Expect {
        id: String,
        reply: oneshot::Sender<Frame>,
    },
    Forget(String),
}

/// Work for the writer task.
enum Outgoing {
    Line(String),
    Close,
}

/// Handle to a live link.
///
/// Each link runs a reader task, which owns the table of outstanding
/// requests, and a writer task, which owns the transport's write half. A
/// peer that stops reading therefore never keeps frames from being read.
/// When the link closes every outstanding [`request`](Self::request)
/// resolves with [`AgentryError::ConnectionLost`].
pub struct ConnectionHandler {
    id: LinkId,
    name: String,
    pending: mpsc::UnboundedSender<Pending>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    finished: CancellationToken,
}

impl fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionHandler {
    /// Starts serving `io` on a reader and a writer task.
    pub(crate) fn spawn<IO>(
        id: LinkId,
        name: impl Into<String>,
        io: IO,
        listener: Arc<dyn LinkListener>,
    ) -> Arc<Self>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (pending, pending_rx) = mpsc::unbounded_channel();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(Self {
            id,
            name: name.into(),
            pending,
            outgoing,
            finished: CancellationToken::new(),
        });
        let (reader, writer) = tokio::io::split(io);
        let drained = CancellationToken::new();
        tokio::spawn(write_link(handler.clone(), writer, outgoing_rx, drained.clone()));
        tokio::spawn(read_link(handler.clone(), reader, pending_rx, drained, listener));
        handler
    }

    /// Identifier of this link within its container.
    pub const fn id(&self) -> LinkId {
        self.id
    }

    /// Name used for this link in log output.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the link has stopped.
    pub fn is_closed(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Resolves once the link has stopped.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }

    /// Queues a frame that expects no reply. Returns `false` if the link is closed.
    pub fn post(&self, frame: &Frame) -> bool {
        match frame.to_line() {
            Ok(line) => !self.is_closed() && self.outgoing.send(Outgoing::Line(line)).is_ok(),
            Err(e) => {
                warn!("Link {}: cannot encode frame: {}", self.name, e);
                false
            }
        }
    }

    /// Sends a request frame and waits up to `timeout` for the correlated reply.
    ///
    /// Fails with [`AgentryError::LinkUnavailable`] if the link is already
    /// closed. On timeout the correlation entry is dropped, so a late reply
    /// is ignored.
    #[instrument(skip(self, frame), fields(link = %self.name))]
    pub async fn request(&self, frame: Frame, timeout: Duration) -> Result<Frame> {
        let id = frame
            .id
            .clone()
            .ok_or_else(|| AgentryError::MalformedFrame("request without id".to_string()))?;
        let line = frame.to_line()?;
        let (reply, response) = oneshot::channel();
        // The reader sees the correlation entry before the request is written.
        if self.is_closed()
            || self
                .pending
                .send(Pending::Expect {
                    id: id.clone(),
                    reply,
                })
                .is_err()
            || self.outgoing.send(Outgoing::Line(line)).is_err()
        {
            return Err(AgentryError::LinkUnavailable);
        }
        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(AgentryError::ConnectionLost(self.name.clone())),
            Err(_) => {
                let _ = self.pending.send(Pending::Forget(id.clone()));
                debug!("Request {} timed out", id);
                Err(AgentryError::Timeout(id))
            }
        }
    }

    /// Closes the link after frames already queued are written.
    pub fn close(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

async fn write_link<W>(
    handler: Arc<ConnectionHandler>,
    writer: W,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    drained: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut sink = FramedWrite::new(writer, FrameCodec::new(CONFIG.limits.max_frame_size));
    loop {
        let next = tokio::select! {
            biased;
            () = handler.finished.cancelled() => break,
            next = outgoing.recv() => next,
        };
        let Some(Outgoing::Line(line)) = next else {
            trace!("Link {} closing", handler.name);
            break;
        };
        tokio::select! {
            biased;
            () = handler.finished.cancelled() => break,
            sent = sink.send(line) => {
                if let Err(e) = sent {
                    debug!("Link {} write failed: {}", handler.name, AgentryError::from(e));
                    break;
                }
            }
        }
    }

    match tokio::time::timeout(CONFIG.shutdown_timeout(), SinkExt::<String>::close(&mut sink)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Link {}: shutdown failed: {}", handler.name, AgentryError::from(e)),
        Err(_) => debug!("Link {}: shutdown timed out", handler.name),
    }
    drained.cancel();
}

async fn read_link<R>(
    handler: Arc<ConnectionHandler>,
    reader: R,
    mut pending_rx: mpsc::UnboundedReceiver<Pending>,
    drained: CancellationToken,
    listener: Arc<dyn LinkListener>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut inbound = FramedRead::new(reader, FrameCodec::new(CONFIG.limits.max_frame_size));
    let mut pending: HashMap<String, oneshot::Sender<Frame>> = HashMap::new();
    debug!("Link {} up", handler.name);

    loop {
        tokio::select! {
            biased;
            update = pending_rx.recv() => match update {
                Some(Pending::Expect { id, reply }) => {
                    pending.insert(id, reply);
                }
                Some(Pending::Forget(id)) => {
                    pending.remove(&id);
                }
                None => break,
            },
            () = drained.cancelled() => {
                trace!("Link {} writer stopped", handler.name);
                break;
            }
            item = inbound.next() => match item {
                Some(Ok(Inbound::Line(line))) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Frame::from_line(&line) {
                        Ok(frame) if frame.is_response() => {
                            match frame.id.as_ref().and_then(|id| pending.remove(id)) {
                                Some(reply) => {
                                    let _ = reply.send(frame);
                                }
                                None => trace!("Link {}: reply to unknown or expired request", handler.name),
                            }
                        }
                        Ok(frame) => listener.on_frame(&handler, frame),
                        Err(e) => warn!("Link {}: skipping frame: {}", handler.name, e),
                    }
                }
                Some(Ok(Inbound::Oversize)) => {
                    warn!("Link {}: skipping frame over {} bytes", handler.name, CONFIG.limits.max_frame_size);
                }
                Some(Ok(Inbound::NotUtf8)) => {
                    warn!("Link {}: skipping frame that is not UTF-8", handler.name);
                }
                Some(Err(e)) => {
                    debug!("Link {} read failed: {}", handler.name, AgentryError::from(e));
                    break;
                }
                None => {
                    debug!("Link {} closed by peer", handler.name);
                    break;
                }
            },
        }
    }

    pending.clear();
    handler.finished.cancel();
    listener.on_closed(&handler);
    debug!("Link {} down", handler.name);
}
