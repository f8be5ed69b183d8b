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

//! Federation Example
//!
//! A master and a slave container run in one process and are linked over
//! loopback TCP, the same way they would be across machines.
//!
//! # Key Concepts Demonstrated
//!
//! - **Master/Slave**: `MasterContainer::bind` and `SlaveContainer::connect`
//! - **Service Discovery**: an agent on the slave advertises `greeter`; an
//!   agent on the master finds it through the master's directory
//! - **Request/Reply**: `BehaviorContext::request` across the link
//! - **Gateway**: an external client asks the same service directly
//!
//! # Running This Example
//!
//! ```bash
//! cargo run --example federation
//! ```

use std::time::Duration;

use agentry::prelude::*;

/// Asks the greeter for a greeting.
#[agentry_message(class = "demo.Greet")]
struct Greet {
    name: String,
}

/// The greeter's answer.
#[agentry_message(class = "demo.Greeting")]
struct Greeting {
    text: String,
}

fn greeter() -> Agent {
    Agent::new()
        .after_start(|agent| {
            agent.register("greeter");
        })
        .behavior(Behavior::message(
            MessageFilter::content::<Greet>().and_performative(Performative::Request),
            handler_fn(|ctx, msg| {
                let Some(greet) = msg.content::<Greet>() else {
                    return;
                };
                let text = format!("Hello, {}! (from {})", greet.name, ctx.agent().container().name());
                match Message::reply_to(&msg, Performative::Inform).with_content(&Greeting { text }) {
                    Ok(reply) => {
                        ctx.send(reply);
                    }
                    Err(e) => eprintln!("could not build reply: {e}"),
                }
            }),
        ))
}

struct Visitor;

#[async_trait]
impl Action for Visitor {
    async fn action(&mut self, ctx: &mut BehaviorContext) {
        let Some(greeter) = ctx.agent().agent_for_service("greeter").await else {
            println!("[visitor] no greeter found");
            return;
        };
        let Ok(request) = Message::new(greeter, Performative::Request).with_content(&Greet {
            name: "visitor".to_string(),
        }) else {
            return;
        };
        match ctx.request(request, 1_000).await.and_then(|r| r.content::<Greeting>()) {
            Some(greeting) => println!("[visitor] {}", greeting.text),
            None => println!("[visitor] no answer"),
        }
    }
}

#[agentry_main]
async fn main() -> anyhow::Result<()> {
    let platform = Platform::real_time();

    let master = MasterContainer::bind(&platform, "master", "127.0.0.1:0").await?;
    let port = master.port().unwrap_or_default();
    let slave = SlaveContainer::connect(&platform, "slave", "127.0.0.1", port);

    slave.add_agent("greeter", greeter()).await?;
    platform.start();

    if !slave.wait_until_connected(Duration::from_secs(5)).await {
        anyhow::bail!("slave could not reach the master on port {port}");
    }
    println!("master: {}", master.state());
    println!("slave:  {}", slave.state());

    master
        .add_agent("visitor", Agent::new().behavior(Behavior::one_shot(Visitor)))
        .await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let gateway = Gateway::connect("127.0.0.1", port).await?;
    if let Some(greeter) = gateway.agent_for_service("greeter").await {
        let request = Message::new(greeter, Performative::Request).with_content(&Greet {
            name: "gateway".to_string(),
        })?;
        if let Some(greeting) = gateway
            .request(request, Duration::from_secs(1))
            .await
            .and_then(|r| r.content::<Greeting>())
        {
            println!("[gateway] {}", greeting.text);
        }
    }
    println!("services: {:?}", master.services().await);

    gateway.close().await;
    platform.shutdown().await;
    Ok(())
}
