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

use std::sync::Arc;
use std::time::Duration;

use agentry::prelude::*;
use parking_lot::Mutex;

use crate::setup::*;

mod setup;

/// Sends each command to the shell and records (performative, output or reason).
struct Operator {
    commands: Vec<&'static str>,
    replies: Arc<Mutex<Vec<(Performative, String)>>>,
}

#[async_trait]
impl Action for Operator {
    async fn action(&mut self, ctx: &mut BehaviorContext) {
        for cmd in &self.commands {
            let request = Message::new("shell", Performative::Request)
                .with_content(&ShellExecReq::new(*cmd))
                .expect("serializable");
            let Some(reply) = ctx.request(request, 1_000).await else {
                continue;
            };
            let text = reply
                .get("output")
                .or_else(|| reply.get("reason"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            self.replies.lock().push((reply.performative(), text));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shell_agent_answers_each_request() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let container = Container::new(&platform, "main");
    container.add_agent("shell", shell_agent(EchoScriptEngine::new())).await?;
    let replies = Arc::new(Mutex::new(Vec::new()));
    let operator = Operator {
        commands: vec!["echo $agent", "", "echo $nope", "set x 42", "x is $x"],
        replies: replies.clone(),
    };
    container
        .add_agent("operator", Agent::new().behavior(Behavior::one_shot(operator)))
        .await?;
    platform.start();

    assert!(eventually(Duration::from_secs(5), || replies.lock().len() == 5).await);
    let replies = replies.lock().clone();
    assert_eq!(replies[0], (Performative::Agree, "echo shell".to_string()));
    assert_eq!(replies[1], (Performative::Refuse, "empty command".to_string()));
    assert_eq!(replies[2], (Performative::Failure, "unknown variable: nope".to_string()));
    assert_eq!(replies[3], (Performative::Agree, String::new()));
    assert_eq!(replies[4], (Performative::Agree, "x is 42".to_string()));

    platform.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shell_ignores_non_request_messages() -> anyhow::Result<()> {
    initialize_tracing();
    let platform = Platform::real_time();
    let container = Container::new(&platform, "main");
    let shell = container.add_agent("shell", shell_agent(EchoScriptEngine::new())).await?;
    platform.start();

    let inform = Message::new("shell", Performative::Inform)
        .with_content(&ShellExecReq::new("echo hi"))?;
    assert!(container.send(inform));
    // an INFORM does not match the shell behavior and stays queued
    assert!(eventually(Duration::from_secs(1), || shell.mailbox_len() == 1).await);

    platform.shutdown().await;
    Ok(())
}
