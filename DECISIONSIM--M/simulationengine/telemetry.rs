use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use uuid::Uuid;

/// Telemetry builder for the decision simulator.
pub struct SimulationTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl SimulationTelemetryBuilder {
    /// Creates a new builder scoped to a module label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
            event_publisher: None,
        }
    }

    /// Sets the JSON log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops log records below `level`.
    #[must_use]
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds telemetry.
    pub fn build(self) -> Result<SimulationTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::with_min_level(path, self.min_level)?),
            None => None,
        };
        Ok(SimulationTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared across simulator components.
///
/// Both sinks are optional; a handle with neither is a no-op.
#[derive(Clone)]
pub struct SimulationTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for SimulationTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationTelemetry")
            .field("module", &self.inner.module)
            .field("logger", &self.inner.logger.as_ref().map(JsonLogger::path))
            .field("events", &self.inner.publisher.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl SimulationTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> SimulationTelemetryBuilder {
        SimulationTelemetryBuilder::new(module)
    }

    /// Module label attached to every record.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Logs a record with object metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        self.write(LogRecord::new(&self.inner.module, level, message).with_metadata(&metadata))
    }

    /// Logs a record tied to one simulation run.
    pub fn log_correlated(
        &self,
        correlation_id: &str,
        level: LogLevel,
        message: &str,
        metadata: Value,
    ) -> Result<()> {
        self.write(
            LogRecord::new(&self.inner.module, level, message)
                .with_correlation(correlation_id)
                .with_metadata(&metadata),
        )
    }

    fn write(&self, record: LogRecord) -> Result<()> {
        match &self.inner.logger {
            Some(logger) => logger.log(&record),
            None => Ok(()),
        }
    }

    /// Publishes an event and waits for the publisher to accept it.
    pub async fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(publisher) = &self.inner.publisher {
            publisher
                .publish(EventRecord {
                    id: format!("evt-{}", Uuid::new_v4()),
                    source: self.inner.module.clone(),
                    event_type: event_type.into(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    payload,
                })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_logs_and_events() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = SimulationTelemetry::builder("decisionsim.test")
            .log_path(dir.path().join("sim.log"))
            .event_publisher(bus.clone())
            .build()
            .unwrap();

        telemetry
            .log_correlated("run-1", LogLevel::Info, "simulation.started", json!({ "k": 1 }))
            .unwrap();
        telemetry
            .event("simulation.completed", json!({ "decision_id": "d1" }))
            .await
            .unwrap();

        let records = JsonLogger::new(dir.path().join("sim.log"))
            .unwrap()
            .read_records()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].module, "decisionsim.test");
        assert_eq!(records[0].correlation_id.as_deref(), Some("run-1"));
        assert_eq!(records[0].metadata["k"], 1);

        let events = bus.events_of_type("simulation.completed");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "decisionsim.test");
    }

    #[tokio::test]
    async fn min_level_filters_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sim.log");
        let telemetry = SimulationTelemetry::builder("decisionsim.test")
            .log_path(&path)
            .min_level(LogLevel::Warn)
            .build()
            .unwrap();
        telemetry.log(LogLevel::Info, "quiet", json!({})).unwrap();
        telemetry.log(LogLevel::Error, "loud", json!({})).unwrap();
        let records = JsonLogger::new(&path).unwrap().read_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "loud");
    }

    #[tokio::test]
    async fn sinkless_handle_is_noop() {
        let telemetry = SimulationTelemetry::builder("decisionsim.test").build().unwrap();
        telemetry.log(LogLevel::Error, "dropped", json!({})).unwrap();
        telemetry.event("ignored", json!({})).await.unwrap();
        assert_eq!(telemetry.module(), "decisionsim.test");
    }
}
