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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentry::prelude::*;
use parking_lot::Mutex;

use crate::setup::*;

mod setup;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callbacks_fire_in_time_then_insertion_order() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::discrete_event();
    let fired = Arc::new(Mutex::new(Vec::new()));

    let record = |label: &'static str| {
        let fired = fired.clone();
        let clock = platform.clone();
        move || fired.lock().push((clock.now(), label))
    };
    assert!(platform.schedule_after(300, record("c")));
    let nested = record("d");
    let clock = platform.clone();
    let first = record("a1");
    assert!(platform.schedule_after(100, move || {
        first();
        clock.schedule_after(50, nested);
    }));
    assert!(platform.schedule_after(100, record("a2")));
    assert!(platform.schedule_after(200, record("b")));
    assert_eq!(platform.pending_events(), 4);

    platform.start();
    tokio::time::timeout(Duration::from_secs(5), platform.terminated()).await?;

    assert_eq!(
        *fired.lock(),
        vec![(100, "a1"), (100, "a2"), (150, "d"), (200, "b"), (300, "c")]
    );
    assert!(platform.is_shutdown());
    assert!(!platform.schedule_after(10, || {}));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ticker_fires_at_multiples_of_period() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::discrete_event();
    let container = Container::new(&platform, "sim");
    let ticks = Arc::new(Mutex::new(Vec::new()));

    let log = ticks.clone();
    container
        .add_agent(
            "clock",
            Agent::new().behavior(Behavior::ticker(
                100,
                action_fn(move |ctx| {
                    log.lock().push((ctx.tick_count(), ctx.now()));
                    if ctx.tick_count() == 5 {
                        ctx.stop();
                    }
                }),
            )),
        )
        .await?;

    platform.start();
    tokio::time::timeout(Duration::from_secs(5), platform.terminated()).await?;

    assert_eq!(
        *ticks.lock(),
        vec![(1, 100), (2, 200), (3, 300), (4, 400), (5, 500)]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fsm_terminates_after_five_tock_visits() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::discrete_event();
    let container = Container::new(&platform, "sim");
    let tocks = Arc::new(AtomicUsize::new(0));
    let finished_at = Arc::new(Mutex::new(None));

    let (count, done) = (tocks.clone(), finished_at.clone());
    let fsm = Fsm::new()
        .state(
            "tick",
            state_fn(|ctx| {
                ctx.set_next_state("tock");
                ctx.block_for(10);
            }),
        )
        .state(
            "tock",
            state_fn(move |ctx| {
                if count.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
                    *done.lock() = Some(ctx.now());
                    ctx.terminate();
                } else {
                    ctx.set_next_state("tick");
                }
            }),
        );
    container
        .add_agent("machine", Agent::new().behavior(Behavior::fsm(fsm)))
        .await?;

    platform.start();
    tokio::time::timeout(Duration::from_secs(5), platform.terminated()).await?;

    assert_eq!(tocks.load(Ordering::SeqCst), 5);
    assert_eq!(*finished_at.lock(), Some(50));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_virtual_delay_does_not_wait_for_the_wall_clock() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::discrete_event();
    let container = Container::new(&platform, "sim");
    let woke_at = Arc::new(Mutex::new(None));

    struct Sleeper(Arc<Mutex<Option<u64>>>);

    #[async_trait]
    impl Action for Sleeper {
        async fn action(&mut self, ctx: &mut BehaviorContext) {
            ctx.delay(3_600_000).await;
            *self.0.lock() = Some(ctx.now());
        }
    }

    container
        .add_agent("sleeper", Agent::new().behavior(Behavior::one_shot(Sleeper(woke_at.clone()))))
        .await?;

    let started = Instant::now();
    platform.start();
    tokio::time::timeout(Duration::from_secs(5), platform.terminated()).await?;

    assert_eq!(*woke_at.lock(), Some(3_600_000));
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_platform_with_no_events_shuts_down() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::discrete_event();
    let container = Container::new(&platform, "sim");
    container.add_agent("idle", Agent::new()).await?;

    platform.start();
    tokio::time::timeout(Duration::from_secs(5), platform.terminated()).await?;

    assert!(platform.is_shutdown());
    assert_eq!(platform.now(), 0);
    assert!(eventually(Duration::from_secs(2), || !container.is_running()).await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_virtual_time_never_goes_backwards() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::discrete_event();
    let container = Container::new(&platform, "sim");
    let seen = Arc::new(Mutex::new(Vec::new()));

    for (name, period) in [("fast", 7), ("slow", 13)] {
        let log = seen.clone();
        container
            .add_agent(
                name,
                Agent::new().behavior(Behavior::ticker(
                    period,
                    action_fn(move |ctx| {
                        log.lock().push(ctx.now());
                        if ctx.tick_count() == 10 {
                            ctx.stop();
                        }
                    }),
                )),
            )
            .await?;
    }

    platform.start();
    tokio::time::timeout(Duration::from_secs(5), platform.terminated()).await?;

    let seen = seen.lock();
    assert_eq!(seen.len(), 20);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last().copied(), Some(130));
    Ok(())
}
