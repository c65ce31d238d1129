//! Snapshot export of a whole fleet.

use std::collections::HashMap;
use std::path::Path;

use chrono::Local;
use tracing::info;

use crate::app::adb::paths::{ensure_output_dir, snapshot_file_stem};
use crate::app::backend::BackendDriver;
use crate::app::error::AppError;
use crate::app::mass::MassExecutor;
use crate::app::models::{BackendHandle, InstanceRecord, OperationSummary};
use crate::app::registry;

/// Exports every instance of a fresh snapshot into `destination_dir`.
///
/// Only the snapshot query and the destination check can fail the call;
/// individual exports land in the summary.
pub fn backup_all(
    executor: &MassExecutor,
    driver: &dyn BackendDriver,
    handle: &BackendHandle,
    destination_dir: &Path,
    trace_id: &str,
) -> Result<OperationSummary<InstanceRecord>, AppError> {
    let destination = ensure_output_dir(destination_dir, trace_id)?;
    let records = registry::snapshot(driver, handle, trace_id)?;
    let stems = file_stems(&records);

    Ok(executor.run_batch(
        records,
        |record| {
            let stem = stems
                .get(&record.index)
                .cloned()
                .unwrap_or_else(|| snapshot_file_stem(&record.name, Local::now()));
            let path = driver.export_snapshot(handle, record.index, &destination, &stem, trace_id)?;
            info!(
                trace_id = %trace_id,
                index = record.index,
                path = %path.display(),
                "instance exported"
            );
            Ok(())
        },
        trace_id,
    ))
}

/// One stem per instance; duplicate names get the index appended so a batch
/// never writes two exports to the same file.
fn file_stems(records: &[InstanceRecord]) -> HashMap<u32, String> {
    let now = Local::now();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for record in records {
        *seen.entry(record.name.as_str()).or_default() += 1;
    }
    records
        .iter()
        .map(|record| {
            let base = snapshot_file_stem(&record.name, now);
            let stem = if seen.get(record.name.as_str()).copied().unwrap_or(0) > 1 {
                format!("{base}_{}", record.index)
            } else {
                base
            };
            (record.index, stem)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::RunState::{Running, Stopped};
    use crate::app::testing::{instance, MockDriver};
    use tempfile::TempDir;

    #[test]
    fn exports_every_instance_regardless_of_state() {
        let dir = TempDir::new().expect("tmp");
        let destination = dir.path().join("nested").join("backups");
        let driver = MockDriver::new(vec![
            instance(0, "LDPlayer", Stopped),
            instance(1, "Farm-1", Running),
            instance(2, "Farm-2", Stopped),
        ]);
        let handle = driver.resolve_handle(None, "t").expect("handle");

        let summary = backup_all(&MassExecutor::new(2), &driver, &handle, &destination, "t")
            .expect("backup");

        assert_eq!((summary.total, summary.successful, summary.failed), (3, 3, 0));
        let indices: Vec<u32> = summary.outcomes.iter().map(|o| o.target.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let mut exports = driver.dispatched();
        exports.sort();
        assert_eq!(exports, vec!["export:0", "export:1", "export:2"]);
        assert!(destination.is_dir());
    }

    #[test]
    fn duplicate_names_get_distinct_stems() {
        let records = vec![
            instance(3, "Farm", Stopped),
            instance(4, "Farm", Stopped),
            instance(5, "Solo", Stopped),
        ];
        let stems = file_stems(&records);
        assert!(stems[&3].starts_with("Farm_") && stems[&3].ends_with("_3"));
        assert!(stems[&4].ends_with("_4"));
        assert_ne!(stems[&3], stems[&4]);
        assert!(!stems[&5].ends_with("_5"));
    }

    #[test]
    fn destination_that_is_a_file_is_rejected_before_querying() {
        let dir = TempDir::new().expect("tmp");
        let file = dir.path().join("taken");
        std::fs::write(&file, b"x").expect("write");
        let driver = MockDriver::new(vec![instance(0, "a", Running)]);
        let handle = driver.resolve_handle(None, "t").expect("handle");

        let err = backup_all(&MassExecutor::new(1), &driver, &handle, &file, "t")
            .expect_err("not a dir");
        assert_eq!(err.code, "ERR_VALIDATION");
        assert_eq!(driver.calls(), vec!["resolve"]);
    }
}
