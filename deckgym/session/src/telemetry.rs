use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

/// Telemetry builder for simulation sessions.
pub struct SessionTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
}

impl SessionTelemetryBuilder {
    /// Creates a new builder scoped to a module label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the log path when one is given.
    #[must_use]
    pub fn maybe_log_path(self, path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => self.log_path(path),
            None => self,
        }
    }

    /// Builds telemetry.
    pub fn build(self) -> Result<SessionTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::new(path)?),
            None => None,
        };
        Ok(SessionTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
            }),
        })
    }
}

/// Telemetry handle shared across session components.
#[derive(Clone)]
pub struct SessionTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for SessionTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTelemetry")
            .field("module", &self.inner.module)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
}

impl Default for SessionTelemetry {
    fn default() -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: "session".into(),
                logger: None,
            }),
        }
    }
}

impl SessionTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> SessionTelemetryBuilder {
        SessionTelemetryBuilder::new(module)
    }

    /// `true` when records are written somewhere.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.logger.is_some()
    }

    /// Logs metadata.
    pub fn log(&self, level: LogLevel, event: &str, metadata: Value) -> Result<()> {
        self.write(LogRecord::new(&self.inner.module, level, event).with_metadata(metadata))
    }

    /// Logs metadata tagged with a session id and step counter.
    pub fn log_step(
        &self,
        level: LogLevel,
        event: &str,
        session: &str,
        step: u64,
        metadata: Value,
    ) -> Result<()> {
        self.write(
            LogRecord::new(&self.inner.module, level, event)
                .with_session(session)
                .with_step(step)
                .with_metadata(metadata),
        )
    }

    fn write(&self, record: LogRecord) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            logger.log(&record)?;
        }
        Ok(())
    }
}
