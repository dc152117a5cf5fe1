//! Request and response envelopes exchanged between agents
//!
//! Every dispatch produces an [`McpResponse`] carrying exactly one of a
//! `result` or an `error`. The exclusivity is held by [`Outcome`], which is
//! flattened into the envelope so the wire form is either
//! `{"result": ...}` or `{"error": {"code": ..., "message": ...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Request addressed to one method of one agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpRequest {
    #[serde(default = "new_request_id")]
    pub id: String,
    pub agent_id: String,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

impl McpRequest {
    /// Create a request with a fresh id. `Null` params become `{}`.
    pub fn new<A, M>(agent_id: A, method: M, params: Value) -> Self
    where
        A: Into<String>,
        M: Into<String>,
    {
        Self {
            id: new_request_id(),
            agent_id: agent_id.into(),
            method: method.into(),
            params: normalize_params(params),
            timestamp: Utc::now(),
        }
    }
}

/// Absent params are delivered to handlers as an empty object
pub fn normalize_params(params: Value) -> Value {
    match params {
        Value::Null => empty_params(),
        other => other,
    }
}

/// Machine-readable failure reason
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AgentNotFound,
    MethodNotFound,
    ExecutionError,
    Timeout,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AgentNotFound => "AGENT_NOT_FOUND",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload of a failed response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
}

impl ResponseError {
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn agent_not_found(agent_id: &str) -> Self {
        Self::new(
            ErrorCode::AgentNotFound,
            format!("Agent {} not found", agent_id),
        )
    }

    pub fn method_not_found(agent_id: &str, method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method {} not found for agent {}", method, agent_id),
        )
    }

    pub fn execution<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::ExecutionError, message)
    }

    pub fn timeout(agent_id: &str, method: &str, timeout_ms: u64) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!(
                "Method {} on agent {} exceeded {}ms",
                method, agent_id, timeout_ms
            ),
        )
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Result or error, never both
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(ResponseError),
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Result(_))
    }

    pub fn into_result(self) -> std::result::Result<Value, ResponseError> {
        match self {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(error) => Err(error),
        }
    }
}

/// Response to an [`McpRequest`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpResponse {
    pub id: String,
    pub agent_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl McpResponse {
    pub fn success(request: &McpRequest, result: Value) -> Self {
        Self::with_outcome(request, Outcome::Result(result))
    }

    pub fn failure(request: &McpRequest, error: ResponseError) -> Self {
        Self::with_outcome(request, Outcome::Error(error))
    }

    fn with_outcome(request: &McpRequest, outcome: Outcome) -> Self {
        Self {
            id: request.id.clone(),
            agent_id: request.agent_id.clone(),
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ResponseError> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(error) => Some(error),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error().map(|e| e.code)
    }

    pub fn into_result(self) -> std::result::Result<Value, ResponseError> {
        self.outcome.into_result()
    }
}

/// Kind of a framed [`McpMessage`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Error,
}

/// Typed wrapper used when envelopes travel over a line-oriented transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl McpMessage {
    pub fn new(message_type: MessageType, payload: Value) -> Self {
        Self {
            message_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn request(request: &McpRequest) -> serde_json::Result<Self> {
        Ok(Self::new(MessageType::Request, serde_json::to_value(request)?))
    }

    pub fn response(response: &McpResponse) -> serde_json::Result<Self> {
        Ok(Self::new(
            MessageType::Response,
            serde_json::to_value(response)?,
        ))
    }

    /// Notification carrying the per-agent results of a broadcast
    pub fn notification<S: Into<String>>(method: S, results: Value) -> Self {
        Self::new(
            MessageType::Notification,
            serde_json::json!({ "method": method.into(), "results": results }),
        )
    }

    /// Transport-level error not tied to a dispatched request
    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::new(
            MessageType::Error,
            serde_json::json!({ "message": message.into() }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let request: McpRequest = serde_json::from_value(json!({
            "agent_id": "data-quality-agent",
            "method": "validate_data"
        }))
        .unwrap();

        assert!(Uuid::parse_str(&request.id).is_ok());
        assert_eq!(request.params, json!({}));

        let request = McpRequest::new("a", "m", Value::Null);
        assert_eq!(request.params, json!({}));
        assert_ne!(request.id, McpRequest::new("a", "m", Value::Null).id);
    }

    #[test]
    fn test_success_response_wire_form() {
        let request = McpRequest::new("data-quality-agent", "assess_data_quality", json!({}));
        let response = McpResponse::success(&request, json!({ "quality_score": 95.0 }));

        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["id"], request.id.as_str());
        assert_eq!(wire["result"]["quality_score"], 95.0);
        assert!(wire.get("error").is_none());

        let back: McpResponse = serde_json::from_value(wire).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn test_error_response_wire_form() {
        let request = McpRequest::new("ghost", "ping", json!({}));
        let response = McpResponse::failure(&request, ResponseError::agent_not_found("ghost"));

        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["error"]["code"], "AGENT_NOT_FOUND");
        assert_eq!(wire["error"]["message"], "Agent ghost not found");
        assert!(wire.get("result").is_none());
        assert_eq!(response.error_code(), Some(ErrorCode::AgentNotFound));
        assert!(response.result().is_none());
    }

    #[test]
    fn test_error_messages() {
        let err = ResponseError::method_not_found("agent1", "forecast");
        assert_eq!(err.message, "Method forecast not found for agent agent1");
        assert_eq!(err.to_string(), "METHOD_NOT_FOUND: Method forecast not found for agent agent1");

        let err = ResponseError::timeout("agent1", "forecast", 20);
        assert_eq!(err.code, ErrorCode::Timeout);
        assert!(err.message.contains("20ms"));
    }

    #[test]
    fn test_message_framing() {
        let request = McpRequest::new("agent1", "notify", json!({ "message": "hi" }));
        let message = McpMessage::request(&request).unwrap();
        let wire = serde_json::to_value(&message).unwrap();
        assert_eq!(wire["type"], "request");
        assert_eq!(wire["payload"]["method"], "notify");

        let notification = McpMessage::notification("notify", json!({ "agent1": { "ok": true } }));
        assert_eq!(notification.message_type, MessageType::Notification);
        assert_eq!(notification.payload["method"], "notify");

        let error = McpMessage::error("malformed request");
        assert_eq!(serde_json::to_value(&error).unwrap()["type"], "error");
    }
}
