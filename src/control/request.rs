//! CnC request: one cloud command bound to its reply channel.
//!
//! A request is created when a command arrives from a cloud connector and
//! lives until `complete_ok` or `complete_error` is called. Every reply
//! (acknowledgements, correlation-scoped log records, completions) is an
//! envelope pushed through the issuing connector's `add_log_data` buffer.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::connector::Connector;
use crate::error::CommandError;
use crate::logging::{GatewayLogger, LogLevel};

fn qos_for(level: LogLevel) -> u8 {
    match level {
        LogLevel::Info => 0,
        _ => 1,
    }
}

/// A cloud command in flight, with its correlation id and reply channel.
pub struct CncRequest {
    command: Value,
    action: String,
    request_id: String,
    issuer: Arc<dyn Connector>,
    logger: Arc<dyn GatewayLogger>,
}

impl CncRequest {
    /// Wrap `command` (a mapping with a string `action`) issued by `issuer`.
    /// An absent `requestId` is substituted with `"na"`.
    pub fn new(command: Value, issuer: Arc<dyn Connector>, logger: Arc<dyn GatewayLogger>) -> Self {
        let action = command.get("action").and_then(Value::as_str).unwrap_or_default().to_string();
        let request_id =
            command.get("requestId").and_then(Value::as_str).unwrap_or("na").to_string();
        Self { command, action, request_id, issuer, logger }
    }

    /// The command's action name.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Correlation id of this request (`"na"` when the issuer sent none).
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Raw command argument by key.
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.command.get(key)
    }

    /// Required string argument.
    pub fn str_arg(&self, key: &'static str) -> Result<&str, CommandError> {
        self.arg(key).and_then(Value::as_str).ok_or(CommandError::MissingArg(key))
    }

    /// Required `category` argument, validated against the known categories.
    pub fn category(&self) -> Result<crate::connector::Category, CommandError> {
        let raw = self.arg("category").and_then(Value::as_str).unwrap_or_default();
        crate::connector::Category::parse(raw)
            .ok_or_else(|| CommandError::InvalidCategory(raw.to_string()))
    }

    /// Optional `category` argument; present values must still be valid.
    pub fn optional_category(&self) -> Result<Option<crate::connector::Category>, CommandError> {
        match self.arg("category") {
            None | Some(Value::Null) => Ok(None),
            Some(value) => {
                let raw = value.as_str().unwrap_or_default();
                crate::connector::Category::parse(raw)
                    .map(Some)
                    .ok_or_else(|| CommandError::InvalidCategory(raw.to_string()))
            }
        }
    }

    fn reply(&self, envelope: Value) {
        self.issuer.add_log_data(envelope);
    }

    /// Acknowledge receipt of the command.
    pub fn ack(&self) {
        self.reply(json!({
            "requestId": self.request_id,
            "qos": 1,
            "data": { "type": "ack", "action": self.action }
        }));
    }

    /// Log locally and echo the record to the issuer.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.logger.log(level, &format!("[{}] {message}", self.request_id));
        self.reply(json!({
            "requestId": self.request_id,
            "qos": qos_for(level),
            "data": {
                "type": "log",
                "message": format!("[{level}] [{}] {message}", self.request_id)
            }
        }));
    }

    /// Complete the request successfully with `response` (`null` becomes `{}`).
    pub fn complete_ok(&self, response: Value) {
        let response = if response.is_null() { json!({}) } else { response };
        self.reply(json!({
            "requestId": self.request_id,
            "qos": 1,
            "data": { "type": "complete", "hasErrors": false, "response": response }
        }));
    }

    /// Complete the request with a failure, echoing an error log record.
    pub fn complete_error(&self, message: impl std::fmt::Display) {
        let message = message.to_string();
        self.log(LogLevel::Error, &message);
        self.reply(json!({
            "requestId": self.request_id,
            "qos": 1,
            "data": { "type": "complete", "hasErrors": true, "message": message }
        }));
    }
}
