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

//! Boundary to a scripting front end.
//!
//! A [`ScriptEngine`] executes command text on behalf of a person or a
//! script. [`shell_agent`] puts an engine behind an agent that serves
//! [`ShellExecReq`] requests: the reply is `AGREE` with an `output` field,
//! `FAILURE` with a `reason` when the engine reports an error, or `REFUSE`
//! for an empty command.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::{Agent, Behavior, BehaviorContext};
use crate::message::{Message, MessageFilter, Performative};
use crate::prelude::agentry_message;
use crate::traits::MessageHandler;

/// Executes commands for a shell agent.
pub trait ScriptEngine: Send + 'static {
    /// Runs `command`, returning its output or an error description.
    fn exec(&mut self, command: &str) -> Result<String, String>;

    /// Makes `value` available to later commands under `name`.
    fn bind(&mut self, name: &str, value: Value);
}

/// Request to execute a command on a shell agent.
#[agentry_message(class = "ShellExecReq")]
pub struct ShellExecReq {
    /// Command text handed to the engine.
    pub cmd: String,
}

impl ShellExecReq {
    /// Request to run `cmd`.
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

/// Minimal engine: `set <name> <value>` binds a variable, anything else is
/// echoed back with `$name` references replaced by their values.
#[derive(Debug, Default)]
pub struct EchoScriptEngine {
    variables: HashMap<String, Value>,
}

impl EchoScriptEngine {
    /// Engine with no variables bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of variable `name`.
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.variables.get(name).cloned()
    }

    fn render(&self, word: &str) -> Result<String, String> {
        let Some(name) = word.strip_prefix('$') else {
            return Ok(word.to_string());
        };
        match self.variables.get(name) {
            Some(value) => Ok(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            None => Err(format!("unknown variable: {name}")),
        }
    }
}

impl ScriptEngine for EchoScriptEngine {
    fn exec(&mut self, command: &str) -> Result<String, String> {
        let mut words = command.split_whitespace();
        if command.trim_start().starts_with("set ") {
            words.next();
            let name = words.next().ok_or("set: missing name")?;
            let value = words.collect::<Vec<_>>().join(" ");
            self.variables.insert(name.to_string(), Value::String(value));
            return Ok(String::new());
        }
        let rendered = words
            .map(|word| self.render(word))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rendered.join(" "))
    }

    fn bind(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }
}

struct ShellHandler<E> {
    engine: Arc<Mutex<E>>,
}

#[async_trait]
impl<E: ScriptEngine> MessageHandler for ShellHandler<E> {
    async fn on_receive(&mut self, ctx: &mut BehaviorContext, message: Message) {
        let reply = match message.content::<ShellExecReq>() {
            Some(req) if !req.cmd.trim().is_empty() => {
                debug!("Executing: {}", req.cmd);
                let result = self.engine.lock().exec(&req.cmd);
                match result {
                    Ok(output) => Message::reply_to(&message, Performative::Agree).with_field("output", output),
                    Err(reason) => {
                        warn!("Command failed: {}", reason);
                        Message::reply_to(&message, Performative::Failure).with_field("reason", reason)
                    }
                }
            }
            _ => Message::reply_to(&message, Performative::Refuse).with_field("reason", "empty command"),
        };
        ctx.send(reply);
    }
}

/// An agent serving [`ShellExecReq`] requests with `engine`.
///
/// On start the engine gets the agent's own id bound as `agent`.
pub fn shell_agent<E: ScriptEngine>(engine: E) -> Agent {
    let engine = Arc::new(Mutex::new(engine));
    let on_start = engine.clone();
    Agent::new()
        .after_start(move |agent| {
            on_start
                .lock()
                .bind("agent", Value::String(agent.id().to_string()));
        })
        .behavior(
            Behavior::message(
                MessageFilter::content::<ShellExecReq>().and_performative(Performative::Request),
                ShellHandler { engine },
            )
            .named("shell"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_engine_substitutes_variables() {
        let mut engine = EchoScriptEngine::new();
        assert_eq!(engine.exec("set greeting hello world").unwrap(), "");
        engine.bind("n", Value::from(3));
        assert_eq!(engine.exec("say $greeting $n").unwrap(), "say hello world 3");
        assert_eq!(engine.variable("n"), Some(Value::from(3)));
    }

    #[test]
    fn test_echo_engine_reports_unknown_variable() {
        let mut engine = EchoScriptEngine::new();
        assert_eq!(engine.exec("echo $missing"), Err("unknown variable: missing".to_string()));
        assert!(engine.exec("set ").is_err());
    }
}
