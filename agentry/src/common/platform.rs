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

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

use crate::common::discrete_event::{Callback, EventQueue};
use crate::common::Container;

/// How a platform measures time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeMode {
    /// Wall-clock time; delays really wait.
    RealTime,
    /// Virtual time that jumps to the next pending event once every agent is idle.
    DiscreteEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Shutdown,
}

/// The time source and lifecycle owner shared by containers and agents.
///
/// A `Platform` is a cheap handle; clones refer to the same clock, event
/// queue and container set. Lifecycle is `start` → running → `shutdown`, and
/// shutdown is terminal: pending timed callbacks are discarded without running.
///
/// Under [`TimeMode::DiscreteEvent`] a driver task fires due events, waits
/// until no agent has work left, then moves the virtual clock to the next
/// event. When nothing is busy and nothing is queued the platform shuts
/// itself down.
#[derive(Clone)]
pub struct Platform {
    inner: Arc<PlatformInner>,
}

struct PlatformInner {
    mode: TimeMode,
    virtual_now: AtomicU64,
    events: Mutex<EventQueue>,
    busy: watch::Sender<usize>,
    lifecycle: Mutex<Lifecycle>,
    cancel: CancellationToken,
    containers: Mutex<Vec<Container>>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("mode", &self.inner.mode)
            .field("now", &self.now())
            .field("busy", &*self.inner.busy.borrow())
            .finish_non_exhaustive()
    }
}

impl Platform {
    fn with_mode(mode: TimeMode) -> Self {
        let (busy, _) = watch::channel(0);
        Self {
            inner: Arc::new(PlatformInner {
                mode,
                virtual_now: AtomicU64::new(0),
                events: Mutex::new(EventQueue::default()),
                busy,
                lifecycle: Mutex::new(Lifecycle::Created),
                cancel: CancellationToken::new(),
                containers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A platform running on wall-clock time.
    pub fn real_time() -> Self {
        Self::with_mode(TimeMode::RealTime)
    }

    /// A platform running on virtual time, starting at 0.
    pub fn discrete_event() -> Self {
        Self::with_mode(TimeMode::DiscreteEvent)
    }

    /// Whether time is real or virtual.
    pub fn mode(&self) -> TimeMode {
        self.inner.mode
    }

    /// Current time in milliseconds.
    ///
    /// Wall-clock milliseconds since the Unix epoch in real time, virtual
    /// milliseconds since start under discrete-event time.
    pub fn now(&self) -> u64 {
        match self.inner.mode {
            TimeMode::RealTime => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            TimeMode::DiscreteEvent => self.inner.virtual_now.load(Ordering::SeqCst),
        }
    }

    /// Whether the platform has started and not shut down.
    pub fn is_running(&self) -> bool {
        *self.inner.lifecycle.lock() == Lifecycle::Running
    }

    /// Whether the platform has been shut down.
    pub fn is_shutdown(&self) -> bool {
        *self.inner.lifecycle.lock() == Lifecycle::Shutdown
    }

    /// True when no agent has work to do.
    pub fn is_idle(&self) -> bool {
        *self.inner.busy.borrow() == 0
    }

    /// Number of timed callbacks waiting in virtual time.
    pub fn pending_events(&self) -> usize {
        self.inner.events.lock().len()
    }

    /// Runs `callback` once `delay_ms` milliseconds have elapsed.
    ///
    /// Returns `false` if the platform is already shut down; the callback is
    /// dropped without running. Callbacks must not block.
    pub fn schedule_after<F>(&self, delay_ms: u64, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(delay_ms, false, Box::new(callback))
    }

    fn schedule(&self, delay_ms: u64, auto_generated: bool, callback: Callback) -> bool {
        if self.is_shutdown() {
            trace!("Dropping callback scheduled after shutdown");
            return false;
        }
        match self.inner.mode {
            TimeMode::RealTime => {
                let cancel = self.inner.cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {}
                        () = tokio::time::sleep(Duration::from_millis(delay_ms)) => run_callback(callback),
                    }
                });
            }
            TimeMode::DiscreteEvent => {
                let now = self.now();
                self.inner
                    .events
                    .lock()
                    .push(now, now.saturating_add(delay_ms), auto_generated, callback);
            }
        }
        true
    }

    /// Suspends the caller for `ms` milliseconds of platform time.
    ///
    /// Under discrete-event time this queues an internal event and waits for
    /// it to fire. Returns early if the platform shuts down.
    pub async fn delay(&self, ms: u64) {
        match self.inner.mode {
            TimeMode::RealTime => {
                tokio::select! {
                    () = self.inner.cancel.cancelled() => {}
                    () = tokio::time::sleep(Duration::from_millis(ms)) => {}
                }
            }
            TimeMode::DiscreteEvent => {
                let (tx, rx) = oneshot::channel::<()>();
                if self.schedule(ms, true, Box::new(move || {
                    let _ = tx.send(());
                })) {
                    let _ = rx.await;
                }
            }
        }
    }

    /// Alias of [`delay`](Self::delay).
    pub async fn sleep(&self, ms: u64) {
        self.delay(ms).await;
    }

    /// Starts every attached container and, for discrete-event time, the
    /// event driver. Calling `start` twice has no further effect.
    #[instrument(skip(self))]
    pub fn start(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if *lifecycle != Lifecycle::Created {
                debug!("Platform already started");
                return;
            }
            *lifecycle = Lifecycle::Running;
        }
        info!("Platform starting in {:?} mode", self.inner.mode);
        let containers = self.inner.containers.lock().clone();
        for container in containers {
            container.start();
        }
        if self.inner.mode == TimeMode::DiscreteEvent {
            tokio::spawn(drive_events(self.clone()));
        }
    }

    /// Shuts down every container and discards all pending callbacks.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if *lifecycle == Lifecycle::Shutdown {
                return;
            }
            *lifecycle = Lifecycle::Shutdown;
        }
        info!("Platform shutting down");
        self.inner.cancel.cancel();
        self.inner.events.lock().clear();
        let containers = std::mem::take(&mut *self.inner.containers.lock());
        for container in containers {
            container.shutdown().await;
        }
    }

    /// Resolves once the platform has shut down.
    pub async fn terminated(&self) {
        self.inner.cancel.cancelled().await;
    }

    pub(crate) fn attach(&self, container: Container) {
        let start_now = self.is_running();
        self.inner.containers.lock().push(container.clone());
        if start_now {
            container.start();
        }
    }

    pub(crate) fn busy_inc(&self) {
        self.inner.busy.send_modify(|busy| *busy += 1);
    }

    pub(crate) fn busy_dec(&self) {
        self.inner
            .busy
            .send_modify(|busy| *busy = busy.saturating_sub(1));
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    fn pop_due(&self) -> Option<Callback> {
        let now = self.now();
        self.inner.events.lock().pop_due(now).map(|event| {
            trace!(
                fire_at = event.fire_at,
                scheduled_at = event.scheduled_at,
                auto = event.auto_generated,
                "Firing event"
            );
            event.callback
        })
    }

    fn has_due(&self) -> bool {
        let now = self.now();
        self.inner
            .events
            .lock()
            .next_fire_time()
            .is_some_and(|t| t <= now)
    }
}

fn run_callback(callback: Callback) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
        error!("Scheduled callback panicked: {}", panic_message(&*payload));
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn wait_until_idle(busy: &mut watch::Receiver<usize>) -> bool {
    busy.wait_for(|n| *n == 0).await.is_ok()
}

/// Discrete-event driver: fire due events, wait for idle, jump the clock.
async fn drive_events(platform: Platform) {
    let cancel = platform.inner.cancel.clone();
    let mut busy = platform.inner.busy.subscribe();
    loop {
        if cancel.is_cancelled() {
            break;
        }
        while let Some(callback) = platform.pop_due() {
            run_callback(callback);
        }
        tokio::task::yield_now().await;

        let idle = tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            idle = wait_until_idle(&mut busy) => idle,
        };
        if !idle {
            break;
        }
        if platform.has_due() {
            continue;
        }

        let next = platform.inner.events.lock().next_fire_time();
        match next {
            Some(fire_at) => {
                let now = platform.inner.virtual_now.load(Ordering::SeqCst);
                if fire_at > now {
                    trace!(from = now, to = fire_at, "Advancing virtual time");
                    platform.inner.virtual_now.store(fire_at, Ordering::SeqCst);
                }
            }
            None => {
                info!("No more events pending, initiating shutdown");
                platform.shutdown().await;
                break;
            }
        }
    }
    debug!("Discrete-event driver stopped at t={}", platform.now());
}
