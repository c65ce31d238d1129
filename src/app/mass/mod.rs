//! Concurrent fan-out of one action over many targets.
//!
//! Every target gets its own thread; the scheduler's permits bound how many
//! external processes actually run at once. Outcomes are collected by joining
//! in input order, so the summary lines up with the targets that were passed in.

pub mod backup;
pub mod install;

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::app::error::AppError;
use crate::app::models::{DeviceTarget, InstanceRecord, OperationOutcome, OperationSummary};
use crate::app::scheduler::TaskScheduler;

/// Something a batch can be fanned out over.
pub trait BatchTarget: Clone + Send + Sync {
    /// Identity used for per-target locking and logging.
    fn key(&self) -> String;
}

impl BatchTarget for DeviceTarget {
    fn key(&self) -> String {
        self.serial.clone()
    }
}

impl BatchTarget for InstanceRecord {
    fn key(&self) -> String {
        format!("instance-{}", self.index)
    }
}

pub struct MassExecutor {
    scheduler: Arc<TaskScheduler>,
}

impl MassExecutor {
    pub fn new(max_parallel: usize) -> Self {
        Self::with_scheduler(Arc::new(TaskScheduler::new(max_parallel)))
    }

    pub fn with_scheduler(scheduler: Arc<TaskScheduler>) -> Self {
        Self { scheduler }
    }

    pub fn max_parallel(&self) -> usize {
        self.scheduler.limit()
    }

    /// Runs `action` once per target and waits for all of them. Errors and
    /// panics are captured per target; nothing propagates past the batch.
    pub fn run_batch<T, F>(&self, targets: Vec<T>, action: F, trace_id: &str) -> OperationSummary<T>
    where
        T: BatchTarget,
        F: Fn(&T) -> Result<(), AppError> + Sync,
    {
        let started = Instant::now();
        info!(
            trace_id = %trace_id,
            targets = targets.len(),
            max_parallel = self.max_parallel(),
            "batch started"
        );

        let scheduler = self.scheduler.as_ref();
        let action = &action;
        let outcomes = std::thread::scope(|scope| {
            let handles: Vec<_> = targets
                .iter()
                .map(|target| {
                    scope.spawn(move || scheduler.run_exclusive(&target.key(), || action(target)))
                })
                .collect();

            handles
                .into_iter()
                .zip(targets.iter())
                .map(|(handle, target)| match handle.join() {
                    Ok(Ok(())) => OperationOutcome::succeeded(target.clone()),
                    Ok(Err(err)) => {
                        warn!(trace_id = %trace_id, target = %target.key(), error = %err, "batch action failed");
                        OperationOutcome::failed(target.clone(), err.to_string())
                    }
                    Err(panic) => {
                        let detail = panic_detail(panic.as_ref());
                        warn!(trace_id = %trace_id, target = %target.key(), error = %detail, "batch action panicked");
                        OperationOutcome::failed(target.clone(), detail)
                    }
                })
                .collect::<Vec<_>>()
        });

        let summary = OperationSummary::from_outcomes(outcomes);
        info!(
            trace_id = %trace_id,
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        summary
    }
}

fn panic_detail(panic: &(dyn Any + Send)) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|value| value.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("action panicked: {message}")
}
