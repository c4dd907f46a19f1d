//! Logging capability manager.
//!
//! Holds the client-visible log level (RFC 5424 numbering, lower is more
//! severe) and publishes `notifications/message` and
//! `notifications/progress` on the event bus.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{Error, Result};
use crate::events::{EventBus, EVENT_MESSAGE, EVENT_PROGRESS};
use crate::mcp::{CapabilityManager, RequestContext};

/// RFC 5424 severity. Lower numeric value means higher severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum LogLevel {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    #[default]
    Info = 6,
    Debug = 7,
}

impl LogLevel {
    /// Parse an RFC 5424 level name. All eight names are accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "emergency" => Some(Self::Emergency),
            "alert" => Some(Self::Alert),
            "critical" => Some(Self::Critical),
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "notice" => Some(Self::Notice),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Alert => "alert",
            Self::Critical => "critical",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Notice => "notice",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// Claims `logging/setLevel`; also the in-process API other subsystems use
/// to emit client-facing log and progress notifications.
pub struct LoggingManager {
    bus: Arc<EventBus>,
    level: Mutex<LogLevel>,
}

impl LoggingManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            level: Mutex::new(LogLevel::default()),
        }
    }

    pub fn current_level(&self) -> LogLevel {
        *self.level.lock().expect("log level lock poisoned")
    }

    pub fn set_level(&self, level: LogLevel) {
        *self.level.lock().expect("log level lock poisoned") = level;
    }

    /// Publish a `notifications/message` event, filtered by the current
    /// level.
    pub fn log(&self, level: LogLevel, message: &str, logger: Option<&str>, data: Option<Value>) {
        if level > self.current_level() {
            return;
        }
        let mut params = json!({
            "level": level.as_str(),
            "message": message,
        });
        if let Some(logger) = logger {
            params["logger"] = json!(logger);
        }
        if let Some(data) = data {
            params["data"] = data;
        }
        self.bus.publish(EVENT_MESSAGE, params);
    }

    /// Publish a `notifications/progress` event. Suppressed only when the
    /// token is empty; the current level does not apply.
    pub fn emit_progress(&self, token: &str, progress: f64, total: Option<f64>) {
        if token.is_empty() {
            return;
        }
        let mut params = json!({
            "progressToken": token,
            "progress": progress,
        });
        if let Some(total) = total {
            params["total"] = json!(total);
        }
        self.bus.publish(EVENT_PROGRESS, params);
    }

    fn handle_set_level(&self, params: Option<Value>) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct SetLevelParams {
            #[serde(default)]
            level: Option<String>,
        }

        let params: SetLevelParams = params
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();

        let name = match params.level.as_deref() {
            None | Some("") => {
                return Err(Error::InvalidParams("level is required".to_string()))
            }
            Some(name) => name,
        };

        let level =
            LogLevel::from_name(name).ok_or_else(|| Error::InvalidLogLevel(name.to_string()))?;
        self.set_level(level);
        info!("Log level set to {}", level.as_str());
        Ok(json!({}))
    }
}

#[async_trait]
impl CapabilityManager for LoggingManager {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn claims(&self, method: &str) -> bool {
        method == "logging/setLevel"
    }

    async fn execute(
        &self,
        method: &str,
        params: Option<Value>,
        _ctx: &RequestContext,
    ) -> Result<Option<Value>> {
        match method {
            "logging/setLevel" => self.handle_set_level(params).map(Some),
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }
}
