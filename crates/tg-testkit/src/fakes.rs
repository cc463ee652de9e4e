//! Recording stand-ins for the alert channel and process termination.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tg_execution::{Alert, Alerter};
use tg_watchdog::{ProcessTerminator, TerminateOutcome};

#[derive(Debug, Default)]
pub struct RecordingAlerter {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerter {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.alerts().into_iter().map(|a| a.kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.alerts().iter().filter(|a| a.kind == kind).count()
    }
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn send(&self, alert: &Alert) -> Result<()> {
        if let Ok(mut a) = self.alerts.lock() {
            a.push(alert.clone());
        }
        Ok(())
    }
}

/// Records pids instead of signalling them.
#[derive(Debug, Default)]
pub struct FakeTerminator {
    killed: Mutex<Vec<u32>>,
}

impl FakeTerminator {
    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().map(|k| k.clone()).unwrap_or_default()
    }
}

impl ProcessTerminator for FakeTerminator {
    fn terminate(&self, pid: u32, _start_ticks: Option<i64>) -> Result<TerminateOutcome> {
        if let Ok(mut k) = self.killed.lock() {
            k.push(pid);
        }
        Ok(TerminateOutcome::Killed)
    }
}
