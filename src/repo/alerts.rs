use anyhow::Result;
use parking_lot::Mutex;
use tracing::warn;

use crate::domain::DriftAlert;

/// Delivery of drift alerts (mail relay, chat hook, log)
pub trait AlertChannel: Send + Sync {
    fn send(&self, alert: &DriftAlert) -> Result<()>;
}

/// Emits the alert as a structured warning
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertChannel;

impl AlertChannel for LogAlertChannel {
    fn send(&self, alert: &DriftAlert) -> Result<()> {
        let payload = serde_json::to_string(alert)?;
        warn!(
            recipient = %alert.recipient,
            subject = %alert.subject,
            farms = alert.farms.len(),
            payload = %payload,
            "drift alert"
        );
        Ok(())
    }
}

/// Keeps every alert it is handed
#[derive(Debug, Default)]
pub struct RecordingAlertChannel {
    sent: Mutex<Vec<DriftAlert>>,
}

impl RecordingAlertChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<DriftAlert> {
        self.sent.lock().clone()
    }
}

impl AlertChannel for RecordingAlertChannel {
    fn send(&self, alert: &DriftAlert) -> Result<()> {
        self.sent.lock().push(alert.clone());
        Ok(())
    }
}
