//! Runtime assembly and the line-delimited stdio transport

use crate::config::Config;
use crate::Result;
use grid_ensemble_agents::attach_enabled;
use grid_ensemble_core::dispatch::{BroadcastReport, Dispatcher};
use grid_ensemble_core::envelope::{McpMessage, McpRequest, McpResponse};
use grid_ensemble_core::registry::AgentRegistry;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// A dispatcher with every enabled agent attached
#[derive(Debug, Clone)]
pub struct Runtime {
    dispatcher: Dispatcher,
    agent_ids: Vec<String>,
}

impl Runtime {
    pub async fn bootstrap(config: Config) -> Result<Self> {
        config.validate()?;

        let dispatcher = Dispatcher::with_registry(AgentRegistry::new(), config.dispatch);
        let agent_ids = attach_enabled(&config.agents, &dispatcher).await?;
        info!("Runtime ready with {} agents", agent_ids.len());

        Ok(Self {
            dispatcher,
            agent_ids,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Ids of the agents attached at bootstrap
    pub fn agent_ids(&self) -> &[String] {
        &self.agent_ids
    }

    /// Registered agents with the methods each one answers
    pub async fn describe_agents(&self) -> Result<Value> {
        let registry = self.dispatcher.registry();
        let mut agents = Vec::new();
        for descriptor in registry.list_agents().await {
            let methods = registry.methods(&descriptor.id).await;
            let mut entry = serde_json::to_value(&descriptor)?;
            entry["methods"] = json!(methods);
            agents.push(entry);
        }
        Ok(Value::Array(agents))
    }

    /// Call one method; `None` uses the configured default deadline
    pub async fn call(
        &self,
        agent_id: &str,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> McpResponse {
        match timeout {
            Some(timeout) => {
                self.dispatcher
                    .send_request_with_timeout(agent_id, method, params, timeout)
                    .await
            }
            None => self.dispatcher.send_request(agent_id, method, params).await,
        }
    }

    pub async fn broadcast(&self, method: &str, params: Value) -> BroadcastReport {
        self.dispatcher.broadcast(method, params).await
    }

    /// Turn one line of input into the message written back
    pub async fn handle_line(&self, line: &str) -> McpMessage {
        let request: McpRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejected malformed request: {}", e);
                return McpMessage::error(format!("Invalid request: {}", e));
            }
        };

        let response = self.dispatcher.handle(request).await;
        McpMessage::response(&response)
            .unwrap_or_else(|e| McpMessage::error(format!("Failed to encode response: {}", e)))
    }

    /// Serve requests from `reader` until end of input
    ///
    /// Each non-blank line must hold one request; exactly one message is
    /// written per such line, so malformed input (including bytes that are
    /// not UTF-8) never ends the loop.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        let mut handled = 0u64;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }

            let message = match std::str::from_utf8(&buf) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    handled += 1;
                    debug!("Received request line {} ({} bytes)", handled, line.len());
                    self.handle_line(line).await
                }
                Err(e) => {
                    handled += 1;
                    warn!("Rejected request line {} that is not UTF-8: {}", handled, e);
                    McpMessage::error(format!("Invalid request: {}", e))
                }
            };

            let mut encoded = serde_json::to_string(&message)?;
            encoded.push('\n');
            writer.write_all(encoded.as_bytes()).await?;
            writer.flush().await?;
        }

        info!("Input closed after {} requests", handled);
        Ok(())
    }

    /// Serve requests from stdin, writing messages to stdout
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("Serving requests over stdio");
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.serve(stdin, tokio::io::stdout()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_ensemble_agents::settings::AgentSettings;
    use grid_ensemble_core::envelope::{ErrorCode, MessageType};

    async fn runtime() -> Runtime {
        Runtime::bootstrap(Config::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_attaches_enabled_agents() {
        let runtime = runtime().await;
        assert_eq!(
            runtime.agent_ids(),
            ["data-quality-agent", "demand-sector-agent", "supply-sector-agent"]
        );

        let agents = runtime.describe_agents().await.unwrap();
        assert_eq!(agents[0]["id"], "data-quality-agent");
        assert!(agents[1]["methods"]
            .as_array()
            .unwrap()
            .contains(&json!("visualize_data")));
        assert!(agents[2]["methods"]
            .as_array()
            .unwrap()
            .contains(&json!("predict_battery_state")));
    }

    #[tokio::test]
    async fn test_bootstrap_honors_agent_flags() {
        let config = Config {
            agents: AgentSettings {
                enable_demand_sector: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let runtime = Runtime::bootstrap(config).await.unwrap();
        assert_eq!(runtime.agent_ids(), ["data-quality-agent", "supply-sector-agent"]);
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_invalid_config() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(Runtime::bootstrap(config).await.is_err());
    }

    #[tokio::test]
    async fn test_call_with_explicit_timeout() {
        let runtime = runtime().await;
        let response = runtime
            .call(
                "data-quality-agent",
                "assess_data_quality",
                json!({ "data_points": [] }),
                Some(Duration::from_secs(1)),
            )
            .await;
        assert_eq!(response.result().unwrap()["status"], "insufficient_data");

        let response = runtime.call("nobody", "analyze", json!({}), None).await;
        assert_eq!(response.error_code(), Some(ErrorCode::AgentNotFound));
    }

    #[tokio::test]
    async fn test_handle_line() {
        let runtime = runtime().await;

        let message = runtime.handle_line("{not json").await;
        assert_eq!(message.message_type, MessageType::Error);
        assert!(message.payload["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request"));

        let message = runtime
            .handle_line(r#"{"id":"req-1","agent_id":"data-quality-agent","method":"get_status"}"#)
            .await;
        assert_eq!(message.message_type, MessageType::Response);
        assert_eq!(message.payload["id"], "req-1");
        assert_eq!(message.payload["result"]["status"], "active");
    }

    #[tokio::test]
    async fn test_serve_keeps_going_after_bad_lines() {
        let runtime = runtime().await;
        let input = concat!(
            r#"{"agent_id":"data-quality-agent","method":"validate_data","params":{"data":{"timestamp":"2025-01-01T00:00:00Z","value":3}}}"#,
            "\n",
            "garbage\n",
            "\n",
            r#"{"agent_id":"demand-sector-agent","method":"train"}"#,
            "\n",
        );
        let mut output = Vec::new();
        runtime.serve(input.as_bytes(), &mut output).await.unwrap();

        let messages: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["type"], "response");
        assert_eq!(messages[0]["payload"]["result"]["is_valid"], true);
        assert_eq!(messages[1]["type"], "error");
        assert_eq!(messages[2]["payload"]["error"]["code"], "METHOD_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_serve_survives_non_utf8_line() {
        let runtime = runtime().await;
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(
            br#"{"id":"req-2","agent_id":"data-quality-agent","method":"get_status"}"#,
        );
        let mut output = Vec::new();
        runtime.serve(input.as_slice(), &mut output).await.unwrap();

        let messages: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["type"], "error");
        assert!(messages[0]["payload"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request"));
        assert_eq!(messages[1]["type"], "response");
        assert_eq!(messages[1]["payload"]["id"], "req-2");
    }
}
