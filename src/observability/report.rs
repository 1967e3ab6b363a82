//! Run report for ground-truth labelling
//!
//! Anomaly datasets are labelled from the injection window, so each run can
//! leave a small JSON record of when it started, when it stopped and why.

use crate::config::types::{FaultError, Intensity, Result};
use crate::core::types::{ShutdownCause, SupervisorStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub program: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: u32,
    pub intensity: Intensity,
    pub fault_state: String,
    #[serde(flatten)]
    pub stats: SupervisorStats,
    pub shutdown: Option<ShutdownCause>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Collects the report fields over one run
pub struct ReportBuilder {
    report: RunReport,
    started: Instant,
}

impl ReportBuilder {
    pub fn start(
        program: &str,
        duration_seconds: u32,
        intensity: Intensity,
        fault_state: &str,
    ) -> Self {
        Self {
            report: RunReport {
                run_id: Uuid::new_v4(),
                program: program.to_string(),
                started_at: Utc::now(),
                finished_at: None,
                duration_seconds,
                intensity,
                fault_state: fault_state.to_string(),
                stats: SupervisorStats::default(),
                shutdown: None,
                elapsed_ms: 0,
                error: None,
            },
            started: Instant::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.report.run_id
    }

    pub fn finish(
        mut self,
        stats: SupervisorStats,
        shutdown: Option<ShutdownCause>,
        error: Option<&FaultError>,
    ) -> RunReport {
        self.report.finished_at = Some(Utc::now());
        self.report.elapsed_ms = self.started.elapsed().as_millis() as u64;
        self.report.stats = stats;
        self.report.shutdown = shutdown;
        self.report.error = error.map(|e| e.to_string());
        self.report
    }
}

impl RunReport {
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let payload = serde_json::to_vec_pretty(self)
            .map_err(|e| FaultError::Report(format!("failed to encode run report: {e}")))?;
        fs::write(path, payload)?;
        log::info!("Run report {} written to {}", self.run_id, path.display());
        Ok(())
    }
}
