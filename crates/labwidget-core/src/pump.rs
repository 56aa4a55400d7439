//! Tokio integration for draining view messages.
//!
//! # Feature Flag
//!
//! This module requires the `tokio` feature to be enabled:
//!
//! ```toml
//! [dependencies]
//! labwidget-core = { version = "0.1", features = ["tokio"] }
//! ```
//!
//! Without the pump, the application calls
//! [`Session::process_pending`](crate::Session::process_pending) itself,
//! typically once per turn of its own loop.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::logging::targets;
use crate::session::Session;

/// A running inbound pump. Dropping it stops the pump.
#[derive(Debug)]
pub struct InboundPump {
    handle: Option<JoinHandle<()>>,
}

impl InboundPump {
    /// Stop the pump. Messages still queued stay queued.
    pub fn stop(mut self) {
        self.abort();
    }

    /// Whether the pump task is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for InboundPump {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Drain `session`'s inbound queue every `period` on the current tokio runtime.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn spawn_inbound_pump(session: Session, period: Duration) -> InboundPump {
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            session.process_pending();
        }
    });
    tracing::debug!(target: targets::CHANNEL, ?period, "inbound pump started");
    InboundPump {
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectSpec;
    use crate::value::Value;

    #[tokio::test]
    async fn test_pump_applies_view_writes() {
        let session = Session::new();
        let obj = session
            .create_object(ObjectSpec::new("Box").property("value", 0))
            .unwrap();
        let mut view = session.attach(obj.id()).unwrap();
        let pump = spawn_inbound_pump(session.clone(), Duration::from_millis(5));
        assert!(pump.is_running());

        view.set("value", 42).unwrap();
        for _ in 0..200 {
            if obj.get("value").unwrap() == Some(Value::Int(42)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(obj.get("value").unwrap(), Some(Value::Int(42)));
        pump.stop();
    }
}
