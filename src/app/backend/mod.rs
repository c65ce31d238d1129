//! Capability contract over the two emulator control tools.
//!
//! Every backend-specific encoding (argument spelling, output shape, unit
//! conversions) lives in exactly one driver; callers only see
//! [`BackendDriver`].

pub mod console;
pub mod manager;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app::adb::locator::locate_executable;
use crate::app::adb::runner::{CommandRunner, SystemRunner};
use crate::app::config::DriverTimeouts;
use crate::app::error::AppError;
use crate::app::models::{BackendHandle, FleetType, InstanceRecord, OptimizeConfiguration};

pub use console::ConsoleDriver;
pub use manager::ManagerDriver;

pub trait BackendDriver: Send + Sync {
    fn fleet_type(&self) -> FleetType;

    /// Validates `configured` (then the backend's env override) against the
    /// filesystem. Fails with `ERR_NOT_CONFIGURED` when nothing usable is found.
    fn resolve_handle(
        &self,
        configured: Option<&str>,
        trace_id: &str,
    ) -> Result<BackendHandle, AppError>;

    /// Queries the backend. Malformed entries are skipped; no usable data at
    /// all is `ERR_BACKEND_QUERY`.
    fn list_instances(
        &self,
        handle: &BackendHandle,
        trace_id: &str,
    ) -> Result<Vec<InstanceRecord>, AppError>;

    fn launch(&self, handle: &BackendHandle, index: u32, trace_id: &str) -> Result<(), AppError>;

    fn stop(&self, handle: &BackendHandle, index: u32, trace_id: &str) -> Result<(), AppError>;

    fn rename(
        &self,
        handle: &BackendHandle,
        index: u32,
        new_name: &str,
        trace_id: &str,
    ) -> Result<(), AppError>;

    /// Writes a snapshot of `index` into `destination_dir` using `file_stem`
    /// and returns the produced file.
    fn export_snapshot(
        &self,
        handle: &BackendHandle,
        index: u32,
        destination_dir: &Path,
        file_stem: &str,
        trace_id: &str,
    ) -> Result<PathBuf, AppError>;

    /// Creates `count` new instances from the snapshot at `source`.
    fn import_snapshot(
        &self,
        handle: &BackendHandle,
        source: &Path,
        count: u32,
        trace_id: &str,
    ) -> Result<(), AppError>;

    /// `config` has already been validated by the caller.
    fn apply_settings(
        &self,
        handle: &BackendHandle,
        index: u32,
        config: &OptimizeConfiguration,
        trace_id: &str,
    ) -> Result<(), AppError>;
}

/// Maps the configured fleet type onto its driver.
pub fn select(fleet_type: FleetType) -> Box<dyn BackendDriver> {
    select_with(fleet_type, Arc::new(SystemRunner), DriverTimeouts::default())
}

pub fn select_with(
    fleet_type: FleetType,
    runner: Arc<dyn CommandRunner>,
    timeouts: DriverTimeouts,
) -> Box<dyn BackendDriver> {
    match fleet_type {
        FleetType::Console => Box::new(ConsoleDriver::new(runner, timeouts)),
        FleetType::Manager => Box::new(ManagerDriver::new(runner, timeouts)),
    }
}

/// Shared handle resolution: configured path first, then the env override.
pub(crate) fn resolve_from_candidates(
    fleet: FleetType,
    configured: Option<&str>,
    env_key: &str,
    names: &[&str],
    subdirs: &[&str],
    trace_id: &str,
) -> Result<BackendHandle, AppError> {
    let from_env = std::env::var(env_key).ok();
    let candidates = configured
        .into_iter()
        .map(str::to_string)
        .chain(from_env)
        .filter(|candidate| !candidate.trim().is_empty());

    for candidate in candidates {
        if let Some(executable) = locate_executable(&candidate, names, subdirs) {
            return Ok(BackendHandle::new(fleet, executable));
        }
        tracing::warn!(
            trace_id = %trace_id,
            fleet = %fleet,
            candidate = %candidate,
            "backend path rejected"
        );
    }

    Err(AppError::not_configured(
        format!(
            "No valid {fleet} executable configured (looked for {}; set {env_key} or configure the path)",
            names.join(", ")
        ),
        trace_id,
    ))
}

pub(crate) fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_a_pure_mapping() {
        assert_eq!(select(FleetType::Console).fleet_type(), FleetType::Console);
        assert_eq!(select(FleetType::Manager).fleet_type(), FleetType::Manager);
    }

    #[test]
    fn unresolvable_handle_is_not_configured() {
        let err = resolve_from_candidates(
            FleetType::Console,
            Some("/this/path/should/not/exist"),
            "EMUFLEET_TEST_UNSET_VARIABLE",
            &["ldconsole"],
            &[],
            "trace-r",
        )
        .expect_err("nothing valid");
        assert_eq!(err.code, "ERR_NOT_CONFIGURED");
        assert_eq!(err.trace_id, "trace-r");
    }
}
