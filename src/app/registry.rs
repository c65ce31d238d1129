//! Point-in-time view of a fleet. Deliberately uncached: lifecycle calls change
//! the very state being read, so every step re-queries.

use tracing::debug;

use crate::app::backend::BackendDriver;
use crate::app::error::AppError;
use crate::app::models::{BackendHandle, InstanceRecord};

pub fn snapshot(
    driver: &dyn BackendDriver,
    handle: &BackendHandle,
    trace_id: &str,
) -> Result<Vec<InstanceRecord>, AppError> {
    let records = driver.list_instances(handle, trace_id)?;
    debug!(
        trace_id = %trace_id,
        fleet = %driver.fleet_type(),
        instances = records.len(),
        running = records.iter().filter(|r| r.is_running()).count(),
        "fleet snapshot"
    );
    Ok(records)
}

pub fn running(records: &[InstanceRecord]) -> Vec<InstanceRecord> {
    records.iter().filter(|r| r.is_running()).cloned().collect()
}

pub fn find(records: &[InstanceRecord], index: u32) -> Option<&InstanceRecord> {
    records.iter().find(|r| r.index == index)
}
