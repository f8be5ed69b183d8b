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

use crate::setup::messages::{NuisanceMsg, RequestMsg, ResponseMsg};
use crate::setup::*;

mod setup;

#[derive(Default)]
struct Tally {
    requests: AtomicUsize,
    nuisance: AtomicUsize,
    good: AtomicUsize,
    bad: AtomicUsize,
}

const ROUNDS: u64 = 40;

fn server() -> Agent {
    Agent::new()
        .after_start(|agent| {
            agent.register("server");
            agent.subscribe(&AgentId::topic("noise"));
        })
        .behavior(Behavior::message(
            MessageFilter::content::<RequestMsg>(),
            handler_fn(|ctx, msg| {
                if let Some(req) = msg.content::<RequestMsg>() {
                    let rsp = Message::reply_to(&msg, Performative::Inform)
                        .with_content(&ResponseMsg { x: req.x, y: 2 * req.x + 1 })
                        .expect("serializable");
                    ctx.send(rsp);
                }
            }),
        ))
        // nuisance traffic is swallowed
        .behavior(Behavior::message(MessageFilter::content::<NuisanceMsg>(), handler_fn(|_, _| {})))
}

struct Client {
    tally: Arc<Tally>,
    server: Option<AgentId>,
}

#[async_trait]
impl Action for Client {
    async fn action(&mut self, ctx: &mut BehaviorContext) {
        if self.server.is_none() {
            self.server = ctx.agent().agent_for_service("server").await;
        }
        let Some(server) = self.server.clone() else {
            return;
        };
        let sent = self.tally.requests.load(Ordering::SeqCst) + self.tally.nuisance.load(Ordering::SeqCst);
        if sent as u64 >= ROUNDS {
            ctx.stop();
            return;
        }
        if rand::random::<bool>() {
            let x = self.tally.requests.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            let req = Message::new(server, Performative::Request)
                .with_content(&RequestMsg { x })
                .expect("serializable");
            ctx.send(req);
        } else {
            self.tally.nuisance.fetch_add(1, Ordering::SeqCst);
            let noise = Message::new(AgentId::topic("noise"), Performative::Inform)
                .with_content(&NuisanceMsg { level: rand::random::<u8>() })
                .expect("serializable");
            ctx.send(noise);
        }
    }
}

fn client(tally: Arc<Tally>) -> Agent {
    let check = tally.clone();
    Agent::new()
        .behavior(Behavior::ticker(5, Client { tally, server: None }))
        .behavior(Behavior::message(
            MessageFilter::any(),
            handler_fn(move |_ctx, msg| match msg.content::<ResponseMsg>() {
                Some(rsp) if 2 * rsp.x + 1 == rsp.y => {
                    check.good.fetch_add(1, Ordering::SeqCst);
                }
                _ => {
                    check.bad.fetch_add(1, Ordering::SeqCst);
                }
            }),
        ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_randomized_client_server_traffic() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let container = Container::new(&platform, "main");
    container.add_agent("server", server()).await?;
    let tally = Arc::new(Tally::default());
    container.add_agent("client", client(tally.clone())).await?;
    platform.start();

    let sent = |t: &Tally| t.requests.load(Ordering::SeqCst) + t.nuisance.load(Ordering::SeqCst);
    assert!(eventually(Duration::from_secs(10), || sent(&tally) as u64 == ROUNDS).await);
    assert!(
        eventually(Duration::from_secs(5), || {
            tally.good.load(Ordering::SeqCst) == tally.requests.load(Ordering::SeqCst)
        })
        .await
    );
    assert_eq!(tally.bad.load(Ordering::SeqCst), 0);

    platform.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_real_time_delay_waits_on_the_wall_clock() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let container = Container::new(&platform, "main");
    let elapsed = Arc::new(Mutex::new(None));

    struct Napper(Arc<Mutex<Option<Duration>>>);

    #[async_trait]
    impl Action for Napper {
        async fn action(&mut self, ctx: &mut BehaviorContext) {
            let start = Instant::now();
            ctx.delay(100).await;
            *self.0.lock() = Some(start.elapsed());
        }
    }

    container
        .add_agent("napper", Agent::new().behavior(Behavior::one_shot(Napper(elapsed.clone()))))
        .await?;
    let before = platform.now();
    platform.start();

    assert!(eventually(Duration::from_secs(2), || elapsed.lock().is_some()).await);
    let took = elapsed.lock().unwrap_or_default();
    assert!(took >= Duration::from_millis(100));
    assert!(platform.now() >= before + 100);

    platform.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_stops_all_agents() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let container = Container::new(&platform, "main");
    let mut handles = Vec::new();
    for i in 0..5 {
        handles.push(container.add_agent(format!("agent-{i}"), Agent::new()).await?);
    }
    platform.start();
    assert!(platform.is_running());

    platform.shutdown().await;
    assert!(platform.is_shutdown());
    assert!(handles.iter().all(|h| h.state() == AgentState::Finished));
    assert!(container.local_agents().is_empty());
    Ok(())
}
