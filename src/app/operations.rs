//! Single-instance settings, rename and snapshot operations. Each one
//! validates its input fully before the driver sees it.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;
use uuid::Uuid;

use crate::app::adb::paths::{ensure_output_dir, snapshot_file_stem};
use crate::app::backend::BackendDriver;
use crate::app::error::AppError;
use crate::app::models::{BackendHandle, OptimizeConfiguration};
use crate::app::registry;

pub fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn ensure_non_empty(value: &str, field: &str, trace_id: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            format!("{field} is required"),
            trace_id,
        ));
    }
    Ok(())
}

pub fn apply_settings(
    driver: &dyn BackendDriver,
    handle: &BackendHandle,
    index: u32,
    config: &OptimizeConfiguration,
    trace_id: &str,
) -> Result<(), AppError> {
    let resolution = config.validate(trace_id)?;
    info!(
        trace_id = %trace_id,
        fleet = %driver.fleet_type(),
        index,
        cores = config.cores,
        ram_mb = config.ram_mb,
        width = resolution.width,
        height = resolution.height,
        dpi = resolution.dpi,
        "applying instance settings"
    );
    driver.apply_settings(handle, index, config, trace_id)
}

pub fn rename_instance(
    driver: &dyn BackendDriver,
    handle: &BackendHandle,
    index: u32,
    new_name: &str,
    trace_id: &str,
) -> Result<(), AppError> {
    ensure_non_empty(new_name, "name", trace_id)?;
    let new_name = new_name.trim();
    info!(trace_id = %trace_id, index, name = %new_name, "renaming instance");
    driver.rename(handle, index, new_name, trace_id)
}

/// Exports one instance to `<dir>/<name>_<timestamp>.<ext>`, naming it after
/// the instance's current name.
pub fn export_snapshot(
    driver: &dyn BackendDriver,
    handle: &BackendHandle,
    index: u32,
    destination_dir: &Path,
    trace_id: &str,
) -> Result<PathBuf, AppError> {
    let destination = ensure_output_dir(destination_dir, trace_id)?;
    let records = registry::snapshot(driver, handle, trace_id)?;
    let record = registry::find(&records, index).ok_or_else(|| {
        AppError::validation(format!("No instance with index {index}"), trace_id)
    })?;
    let stem = snapshot_file_stem(&record.name, Local::now());
    let path = driver.export_snapshot(handle, index, &destination, &stem, trace_id)?;
    info!(trace_id = %trace_id, index, path = %path.display(), "instance exported");
    Ok(path)
}

pub fn import_snapshot(
    driver: &dyn BackendDriver,
    handle: &BackendHandle,
    source: &Path,
    count: u32,
    trace_id: &str,
) -> Result<(), AppError> {
    if count == 0 {
        return Err(AppError::validation("count must be at least 1", trace_id));
    }
    if !source.is_file() {
        return Err(AppError::validation(
            format!("Snapshot file not found: {}", source.display()),
            trace_id,
        ));
    }
    info!(trace_id = %trace_id, source = %source.display(), count, "importing snapshot");
    driver.import_snapshot(handle, source, count, trace_id)
}
