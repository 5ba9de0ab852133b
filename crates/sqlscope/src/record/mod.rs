use std::sync::Arc;

use anyhow::Result;
use tracing::error;

use crate::models::QueryOutcome;
use crate::utils::time::now_utc;

pub trait OutcomeSink: Send + Sync {
    fn append(&self, outcome: &QueryOutcome) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct OutcomeReport<'a> {
    pub identity: &'a str,
    pub request: &'a str,
    pub candidate: Option<&'a str>,
    pub row_count: usize,
    pub elapsed_seconds: f64,
    pub success: bool,
    pub error: Option<&'a str>,
}

pub struct OutcomeRecorder {
    sink: Arc<dyn OutcomeSink>,
}

impl OutcomeRecorder {
    #[must_use]
    pub fn new(sink: Arc<dyn OutcomeSink>) -> Self {
        Self { sink }
    }

    pub fn record(&self, report: OutcomeReport<'_>) {
        let outcome = QueryOutcome {
            identity: report.identity.to_string(),
            request: report.request.to_string(),
            candidate: report.candidate.map(str::to_string),
            row_count: report.row_count,
            elapsed_seconds: report.elapsed_seconds,
            success: report.success,
            error: report.error.map(str::to_string),
            recorded_at_utc: now_utc(),
        };

        if let Err(error) = self.sink.append(&outcome) {
            error!(
                identity = report.identity,
                success = report.success,
                error = %format!("{error:#}"),
                "failed to record query outcome"
            );
        }
    }
}
