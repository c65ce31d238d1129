//! Instance lifecycle: single launch/stop and the staged fleet reboot.
//!
//! The reboot drains every running instance one at a time, settles, then
//! restarts them one at a time. The control tools misbehave under concurrent
//! stop/launch requests, so the sequential staggering is load-bearing.

use std::time::Duration;

use tracing::{info, warn};

use crate::app::backend::BackendDriver;
use crate::app::config::LifecycleSettings;
use crate::app::error::AppError;
use crate::app::models::{
    BackendHandle, InstanceFailure, InstanceRecord, RebootReport, RebootStatus, RunState,
};
use crate::app::registry;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebootDelays {
    /// Between consecutive stops.
    pub drain: Duration,
    /// After the last stop, before the first launch.
    pub global_settle: Duration,
    /// Between consecutive launches.
    pub launch: Duration,
    /// After the last launch, for guest boot.
    pub final_settle: Duration,
}

impl From<&LifecycleSettings> for RebootDelays {
    fn from(settings: &LifecycleSettings) -> Self {
        Self {
            drain: Duration::from_millis(settings.drain_delay_ms),
            global_settle: Duration::from_millis(settings.global_settle_ms),
            launch: Duration::from_millis(settings.launch_delay_ms),
            final_settle: Duration::from_millis(settings.final_settle_ms),
        }
    }
}

impl Default for RebootDelays {
    fn default() -> Self {
        Self::from(&LifecycleSettings::default())
    }
}

pub fn launch_instance(
    driver: &dyn BackendDriver,
    handle: &BackendHandle,
    index: u32,
    trace_id: &str,
) -> Result<(), AppError> {
    info!(trace_id = %trace_id, fleet = %driver.fleet_type(), index, "launching instance");
    driver.launch(handle, index, trace_id)
}

pub fn stop_instance(
    driver: &dyn BackendDriver,
    handle: &BackendHandle,
    index: u32,
    trace_id: &str,
) -> Result<(), AppError> {
    info!(trace_id = %trace_id, fleet = %driver.fleet_type(), index, "stopping instance");
    driver.stop(handle, index, trace_id)
}

/// Stops and restarts every running instance. Only handle resolution (and the
/// initial registry query) can fail the whole call; per-instance failures are
/// reported in the returned [`RebootReport`].
pub fn reboot_fleet(
    driver: &dyn BackendDriver,
    configured: Option<&str>,
    delays: &RebootDelays,
    trace_id: &str,
) -> Result<RebootReport, AppError> {
    reboot_fleet_inner(driver, configured, delays, trace_id, std::thread::sleep)
}

pub(crate) fn reboot_fleet_inner<S>(
    driver: &dyn BackendDriver,
    configured: Option<&str>,
    delays: &RebootDelays,
    trace_id: &str,
    mut settle: S,
) -> Result<RebootReport, AppError>
where
    S: FnMut(Duration),
{
    let handle = driver.resolve_handle(configured, trace_id)?;

    // Discover
    let running = registry::running(&registry::snapshot(driver, &handle, trace_id)?);
    if running.is_empty() {
        info!(trace_id = %trace_id, fleet = %driver.fleet_type(), "no running instances; nothing to reboot");
        return Ok(RebootReport::nothing_to_do());
    }
    info!(
        trace_id = %trace_id,
        fleet = %driver.fleet_type(),
        instances = running.len(),
        "reboot: draining"
    );

    // Drain
    let stop_failures = run_stage(driver, &handle, &running, Stage::Drain, delays.drain, trace_id, &mut settle);

    settle(delays.global_settle);

    // Restore: every instance that was running, whether or not its stop succeeded.
    info!(trace_id = %trace_id, instances = running.len(), "reboot: restoring");
    let launch_failures =
        run_stage(driver, &handle, &running, Stage::Restore, delays.launch, trace_id, &mut settle);

    settle(delays.final_settle);

    let status = if stop_failures.is_empty() && launch_failures.is_empty() {
        RebootStatus::Completed
    } else {
        RebootStatus::CompletedWithErrors
    };
    info!(
        trace_id = %trace_id,
        status = ?status,
        stop_failures = stop_failures.len(),
        launch_failures = launch_failures.len(),
        "reboot finished"
    );
    Ok(RebootReport {
        status,
        instances: running,
        stop_failures,
        launch_failures,
    })
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Drain,
    Restore,
}

impl Stage {
    fn action(self) -> &'static str {
        match self {
            Stage::Drain => "stop",
            Stage::Restore => "launch",
        }
    }
}

/// Runs one stage over `instances` in order, settling between calls.
fn run_stage<S>(
    driver: &dyn BackendDriver,
    handle: &BackendHandle,
    instances: &[InstanceRecord],
    stage: Stage,
    gap: Duration,
    trace_id: &str,
    settle: &mut S,
) -> Vec<InstanceFailure>
where
    S: FnMut(Duration),
{
    let mut failures = Vec::new();
    for (position, record) in instances.iter().enumerate() {
        if position > 0 {
            settle(gap);
        }
        let result = match stage {
            Stage::Drain => driver.stop(handle, record.index, trace_id),
            Stage::Restore => driver.launch(handle, record.index, trace_id),
        };
        if let Err(err) = result {
            warn!(
                trace_id = %trace_id,
                index = record.index,
                name = %record.name,
                action = stage.action(),
                error = %err,
                "reboot step failed; continuing"
            );
            failures.push(InstanceFailure {
                index: record.index,
                name: record.name.clone(),
                error: err.to_string(),
            });
        }
    }
    failures
}

/// Polls the registry until `index` reports a booted guest. Backends without a
/// boot signal count `Running` as ready.
pub fn wait_for_android_ready(
    driver: &dyn BackendDriver,
    handle: &BackendHandle,
    index: u32,
    poll: Duration,
    timeout: Duration,
    trace_id: &str,
) -> Result<InstanceRecord, AppError> {
    wait_for_android_ready_inner(driver, handle, index, poll, timeout, trace_id, std::thread::sleep)
}

pub(crate) fn wait_for_android_ready_inner<S>(
    driver: &dyn BackendDriver,
    handle: &BackendHandle,
    index: u32,
    poll: Duration,
    timeout: Duration,
    trace_id: &str,
    mut settle: S,
) -> Result<InstanceRecord, AppError>
where
    S: FnMut(Duration),
{
    let poll = poll.max(Duration::from_millis(1));
    let attempts = (timeout.as_millis() / poll.as_millis()).max(1);

    for attempt in 0..attempts {
        if attempt > 0 {
            settle(poll);
        }
        match registry::snapshot(driver, handle, trace_id) {
            Ok(records) => match registry::find(&records, index) {
                Some(record) if is_booted(record) => return Ok(record.clone()),
                Some(_) => {}
                None => {
                    return Err(AppError::validation(
                        format!("No instance with index {index}"),
                        trace_id,
                    ))
                }
            },
            Err(err) => {
                warn!(trace_id = %trace_id, index, error = %err, "boot poll query failed");
            }
        }
    }

    Err(AppError::timeout(
        format!(
            "Instance {index} did not finish booting within {}s",
            timeout.as_secs()
        ),
        trace_id,
    ))
}

fn is_booted(record: &InstanceRecord) -> bool {
    match record.android_ready {
        Some(ready) => ready,
        None => record.run_state == RunState::Running,
    }
}
