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
use tokio::net::TcpListener;

use crate::setup::*;

mod setup;

const LINK_TIMEOUT: Duration = Duration::from_secs(5);

/// A master on an ephemeral port and one slave linked to it, both on `platform`.
async fn federation(platform: &Platform) -> anyhow::Result<(MasterContainer, SlaveContainer)> {
    let master = MasterContainer::bind(platform, "master", "127.0.0.1:0").await?;
    let port = master.port().expect("bound master has a port");
    let slave = SlaveContainer::connect(platform, "slave", "127.0.0.1", port);
    Ok((master, slave))
}

/// Both ends of the master/slave link are up.
async fn linked(master: &MasterContainer, slave: &SlaveContainer) -> bool {
    slave.wait_until_connected(LINK_TIMEOUT).await && master.wait_for_links(1, LINK_TIMEOUT).await
}

fn counting_sink(count: Arc<AtomicUsize>) -> Agent {
    Agent::new().behavior(Behavior::message(
        MessageFilter::any(),
        handler_fn(move |_ctx, _msg| {
            count.fetch_add(1, Ordering::SeqCst);
        }),
    ))
}

fn echo() -> Agent {
    Agent::new()
        .after_start(|agent| {
            agent.register("echo");
        })
        .behavior(Behavior::message(
            MessageFilter::performative(Performative::Request),
            handler_fn(|ctx, msg| {
                let mut reply = Message::reply_to(&msg, Performative::Inform);
                if let Some(text) = msg.get("text") {
                    reply.set("text", text.clone());
                }
                ctx.send(reply);
            }),
        ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_directory_spans_master_and_slave() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let (master, slave) = federation(&platform).await?;
    let alpha = master.add_agent("alpha", Agent::new()).await?;
    let beta = slave.add_agent("beta", Agent::new()).await?;
    master.register(alpha.id(), "alpha-svc");
    slave.register(beta.id(), "beta-svc");
    platform.start();
    assert!(linked(&master, &slave).await);

    assert_eq!(master.agent_for_service("beta-svc").await, Some(AgentId::new("beta")));
    assert_eq!(slave.agent_for_service("alpha-svc").await, Some(AgentId::new("alpha")));
    assert!(master.agent_for_service("missing").await.is_none());

    let agents = slave.agents().await;
    assert!(agents.contains(&AgentId::new("alpha")));
    assert!(agents.contains(&AgentId::new("beta")));
    assert_eq!(master.services().await, vec!["alpha-svc".to_string(), "beta-svc".to_string()]);

    assert!(master.can_locate_agent(&AgentId::new("beta")).await);
    assert!(!master.contains_agent(&AgentId::new("beta")));
    assert!(master.state().starts_with("Running, listening on 127.0.0.1:"));
    assert_eq!(slave.state(), format!("Running, connected to {}", slave.master()));

    platform.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unicast_is_relayed_exactly_once() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let (master, slave) = federation(&platform).await?;
    let count = Arc::new(AtomicUsize::new(0));
    master.add_agent("sink", counting_sink(count.clone())).await?;
    platform.start();
    assert!(linked(&master, &slave).await);

    assert!(slave.send(Message::new("sink", Performative::Inform)));
    assert!(eventually(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // without relaying, a slave only reaches its own agents
    assert!(!slave.send_with_relay(Message::new("sink", Performative::Inform), false));

    platform.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_topic_reaches_subscribers_on_both_sides() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let (master, slave) = federation(&platform).await?;
    let here = Arc::new(AtomicUsize::new(0));
    let there = Arc::new(AtomicUsize::new(0));
    let news = AgentId::topic("news");
    let local = master.add_agent("local-reader", counting_sink(here.clone())).await?;
    let remote = slave.add_agent("remote-reader", counting_sink(there.clone())).await?;
    assert!(master.subscribe(local.id(), &news));
    assert!(slave.subscribe(remote.id(), &news));
    platform.start();
    assert!(linked(&master, &slave).await);

    assert!(master.send(Message::new(news.clone(), Performative::Inform)));
    assert!(slave.send(Message::new(news, Performative::Inform)));
    assert!(
        eventually(Duration::from_secs(2), || {
            here.load(Ordering::SeqCst) == 2 && there.load(Ordering::SeqCst) == 2
        })
        .await
    );

    platform.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silent_link_fails_open() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let master = MasterContainer::new(&platform, "master");
    // nobody reads the other end, so every query times out
    let (link, _silent) = tokio::io::duplex(64 * 1024);
    assert!(master.attach_link(link, "silent"));
    platform.start();
    assert_eq!(master.link_count(), 1);

    let started = Instant::now();
    assert!(master.agent_for_service("anything").await.is_none());
    assert!(master.agents().await.is_empty());
    master.add_agent("fresh", Agent::new()).await?;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(master.contains_agent(&AgentId::new("fresh")));

    platform.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_silent_slave_does_not_hide_the_master_directory() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let (master, slave) = federation(&platform).await?;
    let alpha = master.add_agent("alpha", Agent::new()).await?;
    master.register(alpha.id(), "shared-svc");
    // a second slave that never answers
    let (link, _silent) = tokio::io::duplex(64 * 1024);
    assert!(master.attach_link(link, "silent"));
    platform.start();
    assert!(slave.wait_until_connected(LINK_TIMEOUT).await);
    assert!(master.wait_for_links(2, LINK_TIMEOUT).await);

    let agents = slave.agents().await;
    assert!(agents.contains(&AgentId::new("alpha")));
    let providers = slave.agents_for_service("shared-svc").await;
    assert_eq!(providers, vec![AgentId::new("alpha")]);
    assert!(slave.services().await.contains(&"shared-svc".to_string()));

    platform.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_names_are_unique_across_the_federation() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let (master, slave) = federation(&platform).await?;
    master.add_agent("alpha", Agent::new()).await?;
    platform.start();
    assert!(linked(&master, &slave).await);

    let result = slave.add_agent("alpha", Agent::new()).await;
    assert!(matches!(result, Err(AgentryError::DuplicateName(name)) if name == "alpha"));
    slave.add_agent("beta", Agent::new()).await?;
    let result = master.add_agent("beta", Agent::new()).await;
    assert!(matches!(result, Err(AgentryError::DuplicateName(_))));

    platform.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slave_reconnects_after_link_loss() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let (master, slave) = federation(&platform).await?;
    let count = Arc::new(AtomicUsize::new(0));
    master.add_agent("sink", counting_sink(count.clone())).await?;
    platform.start();
    assert!(linked(&master, &slave).await);

    slave.close_link();
    assert!(eventually(Duration::from_secs(2), || !slave.is_connected()).await);
    assert!(slave.state().starts_with("Running, connecting to"));
    assert!(slave.wait_until_connected(LINK_TIMEOUT).await);

    assert!(slave.send(Message::new("sink", Performative::Inform)));
    assert!(eventually(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1).await);
    assert!(eventually(Duration::from_secs(2), || master.link_count() == 1).await);

    platform.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slave_stays_away_after_master_shutdown() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let (master, slave) = federation(&platform).await?;
    let port = master.port().expect("bound master has a port");
    platform.start();
    assert!(linked(&master, &slave).await);

    master.shutdown().await;
    assert!(eventually(Duration::from_secs(2), || slave.is_master_shutdown()).await);
    assert!(eventually(Duration::from_secs(2), || !slave.is_connected()).await);
    assert_eq!(slave.state(), format!("Running, disconnected from 127.0.0.1:{port}"));
    assert_eq!(master.state(), "Not running");

    // the old listener goes away with the master; take over its port
    let mut listener = None;
    for _ in 0..50 {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(bound) => {
                listener = Some(bound);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let listener = listener.expect("port released by the master");
    let accepted = tokio::time::timeout(Duration::from_millis(2_500), listener.accept()).await;
    assert!(accepted.is_err(), "slave reconnected after master shutdown");

    platform.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gateway_talks_to_slave_agents() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let (master, slave) = federation(&platform).await?;
    slave.add_agent("echo", echo()).await?;
    let heard = Arc::new(AtomicUsize::new(0));
    let listener = master.add_agent("listener", counting_sink(heard.clone())).await?;
    platform.start();
    assert!(linked(&master, &slave).await);

    let port = master.port().expect("bound master has a port");
    let gateway = Gateway::connect("127.0.0.1", port).await?;
    assert!(eventually(Duration::from_secs(2), || master.link_count() == 2).await);

    let mut echo_id = None;
    for _ in 0..50 {
        echo_id = gateway.agent_for_service("echo").await;
        if echo_id.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let echo_id = echo_id.expect("echo service visible to the gateway");
    assert_eq!(echo_id, AgentId::new("echo"));

    let request = Message::new(echo_id, Performative::Request).with_field("text", "hello");
    let reply = gateway
        .request(request, Duration::from_secs(2))
        .await
        .expect("echo replied");
    assert_eq!(reply.performative(), Performative::Inform);
    assert_eq!(reply.get("text").and_then(|v| v.as_str()), Some("hello"));

    // the gateway is an ordinary addressee for container agents
    assert!(gateway.send(Message::new(listener.id().clone(), Performative::Inform)));
    assert!(eventually(Duration::from_secs(2), || heard.load(Ordering::SeqCst) == 1).await);

    let alerts = AgentId::topic("alerts");
    assert!(gateway.subscribe(&alerts));
    assert!(!gateway.subscribe(&AgentId::new("not-a-topic")));
    assert!(slave.send(Message::new(alerts.clone(), Performative::Inform).with_field("level", 3)));
    let alert = gateway
        .receive(MessageFilter::any(), Duration::from_secs(2))
        .await
        .expect("topic message crossed two links");
    assert_eq!(alert.recipient(), Some(&alerts));

    assert!(gateway.register("console"));
    let mut provider = None;
    for _ in 0..50 {
        provider = slave.agent_for_service("console").await;
        if provider.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(provider.as_ref(), Some(gateway.agent_id()));

    gateway.close().await;
    assert!(gateway.is_closed());
    // registrations of a closed link are dropped
    assert!(eventually(Duration::from_secs(2), || master.local_agent_for_service("console").is_none()).await);

    platform.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gateway_over_an_in_memory_link() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let master = MasterContainer::new(&platform, "master");
    master.add_agent("alpha", Agent::new()).await?;
    master.add_agent("echo", echo()).await?;
    platform.start();

    let (near, far) = tokio::io::duplex(64 * 1024);
    assert!(master.attach_link(near, "serial"));
    let gateway = Gateway::attach(far, "serial");

    let agents = gateway.agents().await;
    assert!(agents.contains(&AgentId::new("alpha")));

    assert!(master.send(Message::new(gateway.agent_id().clone(), Performative::Inform).with_field("n", 1)));
    let received = gateway
        .receive(MessageFilter::performative(Performative::Inform), Duration::from_secs(2))
        .await
        .expect("message delivered over the duplex link");
    assert_eq!(received.get("n").and_then(|v| v.as_i64()), Some(1));

    let reply = gateway
        .ask(Message::new("echo", Performative::Request).with_field("text", "over serial"))
        .await
        .expect("echo replied within the request timeout");
    assert_eq!(reply.get("text").and_then(|v| v.as_str()), Some("over serial"));

    platform.shutdown().await;
    assert!(eventually(Duration::from_secs(2), || gateway.is_closed()).await);
    Ok(())
}
