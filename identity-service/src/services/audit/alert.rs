//! Out-of-band alert channel, independent of the audit store.

use std::sync::Mutex;

use crate::models::RiskLevel;

#[derive(Debug, Clone, PartialEq)]
pub struct OutOfBandAlert {
    pub alert_type: &'static str,
    pub risk: RiskLevel,
    pub message: String,
}

pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: OutOfBandAlert);
}

/// Emits alerts on the `security_alert` tracing target, which log shipping routes
/// separately from the audit store.
#[derive(Debug, Default, Clone)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: OutOfBandAlert) {
        tracing::error!(
            target: "security_alert",
            alert_type = alert.alert_type,
            risk = alert.risk.as_str(),
            "{}",
            alert.message
        );
    }
}

/// Keeps raised alerts in memory for inspection.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<OutOfBandAlert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<OutOfBandAlert> {
        self.alerts
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }
}

impl AlertSink for RecordingAlertSink {
    fn raise(&self, alert: OutOfBandAlert) {
        TracingAlertSink.raise(alert.clone());
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert);
        }
    }
}
