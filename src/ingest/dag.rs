//! DAG runner for the ingestion pipeline.
//!
//! Executes stages in dependency order: every iteration selects all stages
//! whose dependencies have completed (success, non-critical failure, or
//! skip) and runs them concurrently. Stage outputs are merged into the
//! context between iterations, never during them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{IngestStage, StageOutput, StageStatus};
use crate::core::{IngestContext, StageLog};
use crate::error::IngestError;

/// Report for one executed (or skipped) stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    /// Stage name.
    pub name: &'static str,
    /// Final status.
    pub status: StageStatus,
    /// Outcome message.
    pub message: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Outcome of a full DAG run.
#[derive(Debug, Default)]
pub struct DagReport {
    /// Per-stage reports in completion order.
    pub reports: Vec<StageReport>,
    /// Set when a critical stage failed and short-circuited the run.
    pub critical_failure: Option<&'static str>,
}

impl DagReport {
    /// Whether the run completed without a critical failure.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.critical_failure.is_none()
    }
}

/// Executes a fixed set of stages as a DAG.
pub struct DagRunner {
    stages: Vec<Arc<dyn IngestStage>>,
}

impl DagRunner {
    /// Creates a runner over the given stages.
    #[must_use]
    pub fn new(stages: Vec<Arc<dyn IngestStage>>) -> Self {
        Self { stages }
    }

    /// Runs the DAG to completion.
    ///
    /// Non-critical failures mark the stage failed and the run proceeds;
    /// critical failures short-circuit. Cancellation is honored at every
    /// stage boundary.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::DagStuck`] when no stage is ready but
    /// unvisited stages remain, and [`IngestError::Cancelled`] when the
    /// token fires between stage batches.
    pub async fn run(
        &self,
        ctx: &mut IngestContext,
        cancel: &CancellationToken,
    ) -> Result<DagReport, IngestError> {
        let mut status: HashMap<&'static str, StageStatus> = self
            .stages
            .iter()
            .map(|s| (s.name(), StageStatus::Pending))
            .collect();
        let mut report = DagReport::default();

        loop {
            let pending: Vec<Arc<dyn IngestStage>> = self
                .stages
                .iter()
                .filter(|s| status[s.name()] == StageStatus::Pending)
                .cloned()
                .collect();

            if pending.is_empty() {
                break;
            }

            if cancel.is_cancelled() {
                warn!(document_id = ctx.document_id, "ingestion cancelled");
                return Err(IngestError::Cancelled);
            }

            let ready: Vec<Arc<dyn IngestStage>> = pending
                .iter()
                .filter(|s| {
                    s.dependencies()
                        .iter()
                        .all(|dep| status.get(dep).is_some_and(|st| st.is_complete()))
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                return Err(IngestError::DagStuck {
                    pending: pending.len(),
                });
            }

            // Precondition checks run against the merged context before the
            // batch launches.
            let mut runnable = Vec::new();
            for stage in ready {
                if stage.should_run(ctx) {
                    status.insert(stage.name(), StageStatus::Running);
                    runnable.push(stage);
                } else {
                    let name = stage.name();
                    info!(stage = name, "stage skipped");
                    status.insert(name, StageStatus::Skipped);
                    ctx.add_log(StageLog::now(name, "skipped", format!("{name} skipped")));
                    report.reports.push(StageReport {
                        name,
                        status: StageStatus::Skipped,
                        message: format!("{name} skipped"),
                        duration_ms: 0,
                    });
                }
            }

            let batch = {
                let ctx_ref: &IngestContext = ctx;
                join_all(runnable.iter().map(|stage| {
                    let stage = Arc::clone(stage);
                    async move {
                        let start = Instant::now();
                        let result = stage.process(ctx_ref).await;
                        (stage, result, start.elapsed())
                    }
                }))
                .await
            };

            for (stage, result, elapsed) in batch {
                let name = stage.name();
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;

                match result {
                    Ok(output) => {
                        apply_success(ctx, output, name, duration_ms);
                        status.insert(name, StageStatus::Success);
                        report.reports.push(StageReport {
                            name,
                            status: StageStatus::Success,
                            message: format!("{name} completed"),
                            duration_ms,
                        });
                    }
                    Err(err) => {
                        let message = format!("{name} failed: {err}");
                        warn!(stage = name, error = %err, "stage failed");
                        ctx.add_error(message.clone());
                        ctx.add_log(
                            StageLog::now(name, "failed", message.clone())
                                .with_duration(duration_ms)
                                .with_extra(serde_json::json!({ "error": err.to_string() })),
                        );
                        status.insert(name, StageStatus::Failed);
                        report.reports.push(StageReport {
                            name,
                            status: StageStatus::Failed,
                            message,
                            duration_ms,
                        });

                        if stage.is_critical() {
                            warn!(stage = name, "critical stage failed, stopping pipeline");
                            ctx.add_error(format!(
                                "critical failure in {name}, stopping pipeline"
                            ));
                            report.critical_failure = Some(name);
                            return Ok(report);
                        }
                    }
                }
            }
        }

        Ok(report)
    }

}

fn apply_success(
    ctx: &mut IngestContext,
    output: StageOutput,
    name: &'static str,
    duration_ms: u64,
) {
    info!(stage = name, duration_ms, "stage completed");
    output.merge_into(ctx);
    ctx.add_log(
        StageLog::now(name, "success", format!("{name} completed")).with_duration(duration_ms),
    );
}
