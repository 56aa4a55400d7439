//! Session configuration.
//!
//! ```
//! use labwidget_core::SyncConfig;
//!
//! let config = SyncConfig::from_toml_str(r#"
//! view_queue_capacity = 64
//! echo_to_origin = true
//! "#).unwrap();
//! assert_eq!(config.view_queue_capacity, 64);
//! assert_eq!(config.error_event, "write");
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::logging::targets;

/// Default capacity of each view's outbound queue.
pub const DEFAULT_VIEW_QUEUE_CAPACITY: usize = 1024;

/// Default capacity of the shared view-to-backend queue.
pub const DEFAULT_INBOUND_QUEUE_CAPACITY: usize = 4096;

/// Default trigger used to report callback failures to views.
pub const DEFAULT_ERROR_EVENT: &str = "write";

/// Tunables for a [`Session`](crate::Session).
///
/// Missing keys in a TOML document take their default value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Bound of each view's outbound queue. A full queue drops the diff and
    /// schedules a snapshot for that view.
    pub view_queue_capacity: usize,
    /// Bound of the view-to-backend queue. A full queue rejects the view's send.
    pub inbound_queue_capacity: usize,
    /// Trigger fired with the failure text when a callback fails. Objects
    /// that do not declare it only get the log entry.
    pub error_event: String,
    /// Also send the origin view a regular diff of its own write.
    pub echo_to_origin: bool,
    /// Maximum inbound messages applied per `process_pending` call; 0 means all.
    pub max_drain_batch: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            view_queue_capacity: DEFAULT_VIEW_QUEUE_CAPACITY,
            inbound_queue_capacity: DEFAULT_INBOUND_QUEUE_CAPACITY,
            error_event: DEFAULT_ERROR_EVENT.to_string(),
            echo_to_origin: false,
            max_drain_batch: 0,
        }
    }
}

impl SyncConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source =
            std::fs::read_to_string(path).map_err(|err| SyncError::config_io(path, err))?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(target: targets::SESSION, path = %path.display(), ?config, "loaded configuration");
        Ok(config)
    }

    /// Set the per-view outbound queue capacity.
    pub fn view_queue_capacity(mut self, capacity: usize) -> Self {
        self.view_queue_capacity = capacity;
        self
    }

    /// Set the inbound queue capacity.
    pub fn inbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.inbound_queue_capacity = capacity;
        self
    }

    /// Set the trigger used for failure reports.
    pub fn error_event(mut self, name: impl Into<String>) -> Self {
        self.error_event = name.into();
        self
    }

    /// Send the origin view an ordinary diff of its own writes.
    pub fn echo_to_origin(mut self, echo: bool) -> Self {
        self.echo_to_origin = echo;
        self
    }

    /// Limit the number of inbound messages applied per drain.
    pub fn max_drain_batch(mut self, batch: usize) -> Self {
        self.max_drain_batch = batch;
        self
    }

    // Bounded channels of capacity zero are rendezvous channels, on which
    // `try_send` never succeeds.
    pub(crate) fn view_capacity(&self) -> usize {
        self.view_queue_capacity.max(1)
    }

    pub(crate) fn inbound_capacity(&self) -> usize {
        self.inbound_queue_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.view_queue_capacity, 1024);
        assert_eq!(config.inbound_queue_capacity, 4096);
        assert_eq!(config.error_event, "write");
        assert!(!config.echo_to_origin);
        assert_eq!(config.max_drain_batch, 0);
    }

    #[test]
    fn test_builder_setters() {
        let config = SyncConfig::new()
            .view_queue_capacity(0)
            .error_event("log")
            .max_drain_batch(8);
        assert_eq!(config.view_capacity(), 1);
        assert_eq!(config.error_event, "log");
        assert_eq!(config.max_drain_batch, 8);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            SyncConfig::from_toml_str("queue = 3"),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "inbound_queue_capacity = 16").unwrap();
        writeln!(file, "error_event = \"status\"").unwrap();

        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.inbound_queue_capacity, 16);
        assert_eq!(config.error_event, "status");
        assert_eq!(config.view_queue_capacity, DEFAULT_VIEW_QUEUE_CAPACITY);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SyncConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, SyncError::ConfigIo { .. }));
    }
}
