use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::app::adb::runner::{CommandOutput, CommandRunner};
use crate::app::backend::{args, resolve_from_candidates, BackendDriver};
use crate::app::config::DriverTimeouts;
use crate::app::error::AppError;
use crate::app::models::{
    BackendHandle, FleetType, InstanceRecord, OptimizeConfiguration, RunState,
};

pub const MANAGER_PATH_ENV: &str = "EMUFLEET_MANAGER_PATH";
const EXECUTABLE_NAMES: [&str; 2] = ["MuMuManager", "MuMuManager.exe"];
const INSTALL_SUBDIRS: [&str; 2] = ["shell", "nx_main"];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexField {
    Number(u32),
    Text(String),
}

impl IndexField {
    fn value(&self) -> Option<u32> {
        match self {
            IndexField::Number(value) => Some(*value),
            IndexField::Text(text) => text.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ManagerEntry {
    index: IndexField,
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_process_started: bool,
    #[serde(default)]
    is_android_started: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ManagerListing {
    pub records: Vec<InstanceRecord>,
    pub skipped: usize,
}

/// Normalizes both response shapes: a bare instance object (single instance)
/// or a map of arbitrary keys to instance objects. Sorted by index.
pub fn parse_manager_list(raw: &str) -> Result<ManagerListing, String> {
    let document: Value =
        serde_json::from_str(raw.trim()).map_err(|err| format!("invalid JSON: {err}"))?;
    let entries: Vec<Value> = match document {
        Value::Object(map) if map.contains_key("index") => vec![Value::Object(map)],
        Value::Object(map) => map.into_iter().map(|(_, entry)| entry).collect(),
        Value::Array(items) => items,
        other => return Err(format!("unexpected JSON shape: {other}")),
    };

    let mut listing = entries
        .into_iter()
        .fold(ManagerListing::default(), |mut acc, entry| {
            match to_record(entry) {
                Some(record) => acc.records.push(record),
                None => acc.skipped += 1,
            }
            acc
        });
    listing.records.sort_by_key(|record| record.index);
    Ok(listing)
}

fn to_record(entry: Value) -> Option<InstanceRecord> {
    let parsed: ManagerEntry = match serde_json::from_value(entry) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(error = %err, "skipping malformed manager entry");
            return None;
        }
    };
    let index = parsed.index.value()?;
    Some(InstanceRecord {
        index,
        name: parsed.name.trim().to_string(),
        run_state: if parsed.is_process_started {
            RunState::Running
        } else {
            RunState::Stopped
        },
        android_ready: Some(parsed.is_android_started),
    })
}

/// Exit 0 is required; a JSON body with a non-zero `errcode` is also a failure.
pub fn check_manager_output(
    output: &CommandOutput,
    action: &str,
    trace_id: &str,
) -> Result<(), AppError> {
    if !output.exited_cleanly() {
        return Err(AppError::command_failed(
            format!("{action} failed: {}", output.failure_detail()),
            trace_id,
        ));
    }
    if let Ok(Value::Object(body)) = serde_json::from_str::<Value>(output.stdout.trim()) {
        if let Some(code) = body.get("errcode").and_then(Value::as_i64) {
            if code != 0 {
                let message = body
                    .get("errmsg")
                    .and_then(Value::as_str)
                    .unwrap_or("no message");
                return Err(AppError::command_failed(
                    format!("{action} failed: errcode {code}: {message}"),
                    trace_id,
                ));
            }
        }
    }
    Ok(())
}

/// GB with six decimals, the unit the manager's settings file stores.
pub fn memory_gb(ram_mb: u32) -> String {
    format!("{:.6}", f64::from(ram_mb) / 1024.0)
}

fn axis(value: u32) -> String {
    format!("{:.6}", f64::from(value))
}

pub struct ManagerDriver {
    runner: Arc<dyn CommandRunner>,
    timeouts: DriverTimeouts,
}

impl ManagerDriver {
    pub fn new(runner: Arc<dyn CommandRunner>, timeouts: DriverTimeouts) -> Self {
        Self { runner, timeouts }
    }

    fn control(
        &self,
        handle: &BackendHandle,
        action: &str,
        argv: Vec<String>,
        snapshot: bool,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        let timeout = if snapshot {
            self.timeouts.snapshot
        } else {
            self.timeouts.control
        };
        let output = self.runner.run(&handle.program(), &argv, timeout, trace_id)?;
        check_manager_output(&output, action, trace_id)?;
        Ok(output)
    }
}

impl BackendDriver for ManagerDriver {
    fn fleet_type(&self) -> FleetType {
        FleetType::Manager
    }

    fn resolve_handle(
        &self,
        configured: Option<&str>,
        trace_id: &str,
    ) -> Result<BackendHandle, AppError> {
        resolve_from_candidates(
            FleetType::Manager,
            configured,
            MANAGER_PATH_ENV,
            &EXECUTABLE_NAMES,
            &INSTALL_SUBDIRS,
            trace_id,
        )
    }

    fn list_instances(
        &self,
        handle: &BackendHandle,
        trace_id: &str,
    ) -> Result<Vec<InstanceRecord>, AppError> {
        let output = self.runner.run(
            &handle.program(),
            &args(["info", "-v", "all"]),
            self.timeouts.query,
            trace_id,
        )?;
        if !output.exited_cleanly() {
            return Err(AppError::backend_query(
                format!("manager info failed: {}", output.failure_detail()),
                trace_id,
            ));
        }
        if output.stdout.trim().is_empty() {
            return Err(AppError::backend_query("manager info returned no output", trace_id));
        }

        let listing = parse_manager_list(&output.stdout)
            .map_err(|message| AppError::backend_query(format!("manager info: {message}"), trace_id))?;
        if listing.skipped > 0 {
            warn!(
                trace_id = %trace_id,
                skipped = listing.skipped,
                parsed = listing.records.len(),
                "skipped malformed manager entries"
            );
        }
        if listing.records.is_empty() {
            return Err(AppError::backend_query(
                "manager info contained no valid instances",
                trace_id,
            ));
        }
        Ok(listing.records)
    }

    fn launch(&self, handle: &BackendHandle, index: u32, trace_id: &str) -> Result<(), AppError> {
        self.control(
            handle,
            "launch",
            args(["control".to_string(), "-v".to_string(), index.to_string(), "launch".to_string()]),
            false,
            trace_id,
        )
        .map(|_| ())
    }

    fn stop(&self, handle: &BackendHandle, index: u32, trace_id: &str) -> Result<(), AppError> {
        self.control(
            handle,
            "shutdown",
            args(["control".to_string(), "-v".to_string(), index.to_string(), "shutdown".to_string()]),
            false,
            trace_id,
        )
        .map(|_| ())
    }

    fn rename(
        &self,
        handle: &BackendHandle,
        index: u32,
        new_name: &str,
        trace_id: &str,
    ) -> Result<(), AppError> {
        self.control(
            handle,
            "rename",
            args([
                "rename".to_string(),
                "-v".to_string(),
                index.to_string(),
                "-n".to_string(),
                new_name.to_string(),
            ]),
            false,
            trace_id,
        )
        .map(|_| ())
    }

    fn export_snapshot(
        &self,
        handle: &BackendHandle,
        index: u32,
        destination_dir: &Path,
        file_stem: &str,
        trace_id: &str,
    ) -> Result<PathBuf, AppError> {
        self.control(
            handle,
            "export",
            args([
                "export".to_string(),
                "-v".to_string(),
                index.to_string(),
                "-d".to_string(),
                destination_dir.to_string_lossy().to_string(),
                "-n".to_string(),
                file_stem.to_string(),
            ]),
            true,
            trace_id,
        )?;
        Ok(destination_dir.join(format!("{file_stem}.mumudata")))
    }

    fn import_snapshot(
        &self,
        handle: &BackendHandle,
        source: &Path,
        count: u32,
        trace_id: &str,
    ) -> Result<(), AppError> {
        self.control(
            handle,
            "import",
            args([
                "import".to_string(),
                "-p".to_string(),
                source.to_string_lossy().to_string(),
                "-n".to_string(),
                count.to_string(),
            ]),
            true,
            trace_id,
        )
        .map(|_| ())
    }

    fn apply_settings(
        &self,
        handle: &BackendHandle,
        index: u32,
        config: &OptimizeConfiguration,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let resolution = OptimizeConfiguration::parse_resolution(&config.resolution, trace_id)?;
        let pairs = [
            ("performance_mode", "custom".to_string()),
            ("performance_cpu.custom", config.cores.to_string()),
            ("performance_mem.custom", memory_gb(config.ram_mb)),
            ("resolution_mode", "custom".to_string()),
            ("resolution_width.custom", axis(resolution.width)),
            ("resolution_height.custom", axis(resolution.height)),
            ("resolution_dpi.custom", axis(resolution.dpi)),
        ];
        let mut argv = args(["setting".to_string(), "-v".to_string(), index.to_string()]);
        for (key, value) in pairs {
            argv.extend(args(["-k".to_string(), key.to_string(), "-val".to_string(), value]));
        }
        self.control(handle, "setting", argv, false, trace_id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{ok, output, ScriptedRunner};
    use serde_json::json;

    fn handle() -> BackendHandle {
        BackendHandle::new(FleetType::Manager, "/opt/mumu/shell/MuMuManager.exe")
    }

    fn driver(runner: Arc<ScriptedRunner>) -> ManagerDriver {
        ManagerDriver::new(runner, DriverTimeouts::default())
    }

    #[test]
    fn single_object_shape_yields_one_record() {
        let raw = json!({
            "index": "0",
            "name": "MuMu-0",
            "is_process_started": true,
            "is_android_started": false
        })
        .to_string();
        let listing = parse_manager_list(&raw).expect("parse");
        assert_eq!(
            listing.records,
            vec![InstanceRecord {
                index: 0,
                name: "MuMu-0".to_string(),
                run_state: RunState::Running,
                android_ready: Some(false),
            }]
        );
    }

    #[test]
    fn keyed_map_shape_is_sorted_by_index() {
        let raw = json!({
            "7": {"index": 7, "name": "farm-7", "is_process_started": false},
            "10": {"index": "10", "name": "farm-10", "is_process_started": true, "is_android_started": true},
            "2": {"index": 2, "name": "farm-2", "is_process_started": true}
        })
        .to_string();
        let listing = parse_manager_list(&raw).expect("parse");
        let indices: Vec<u32> = listing.records.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![2, 7, 10]);
        assert_eq!(listing.records[2].android_ready, Some(true));
        assert_eq!(listing.records[0].android_ready, Some(false));
        assert_eq!(listing.records[1].run_state, RunState::Stopped);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let raw = json!({
            "0": {"index": 0, "name": "ok", "is_process_started": true},
            "1": {"name": "no index"},
            "2": {"index": "two"},
            "3": "not an object"
        })
        .to_string();
        let listing = parse_manager_list(&raw).expect("parse");
        assert_eq!(listing.records.len(), 1);
        assert_eq!(listing.skipped, 3);
    }

    #[test]
    fn unusable_output_is_query_error() {
        for body in ["", "not json", "[1,2]", "{}", "[]"] {
            let body = body.to_string();
            let runner = Arc::new(ScriptedRunner::new(move |_| ok(&body)));
            let err = driver(runner)
                .list_instances(&handle(), "t")
                .expect_err("unusable");
            assert_eq!(err.code, "ERR_BACKEND_QUERY");
        }
    }

    #[test]
    fn nonzero_exit_fails_even_without_stderr() {
        let runner = Arc::new(ScriptedRunner::new(|_| Ok(output(2, "", ""))));
        let err = driver(runner).stop(&handle(), 1, "t").expect_err("strict");
        assert_eq!(err.code, "ERR_COMMAND_FAILED");
    }

    #[test]
    fn errcode_in_body_fails() {
        let runner = Arc::new(ScriptedRunner::new(|_| {
            ok(r#"{"errcode": -1, "errmsg": "vm not exist"}"#)
        }));
        let err = driver(runner).launch(&handle(), 4, "t").expect_err("errcode");
        assert!(err.error.contains("vm not exist"));

        let runner = Arc::new(ScriptedRunner::new(|_| ok(r#"{"errcode": 0}"#)));
        driver(Arc::clone(&runner))
            .launch(&handle(), 4, "t")
            .expect("errcode 0");
        assert_eq!(runner.calls(), vec![args(["control", "-v", "4", "launch"])]);
    }

    #[test]
    fn settings_encode_gigabytes_and_float_axes() {
        assert_eq!(memory_gb(4096), "4.000000");
        assert_eq!(memory_gb(3500), "3.417969");

        let runner = Arc::new(ScriptedRunner::new(|_| ok("")));
        driver(Arc::clone(&runner))
            .apply_settings(&handle(), 3, &OptimizeConfiguration::new(2, 2048, "1920,1080,280"), "t")
            .expect("setting");
        let call = &runner.calls()[0];
        let joined = call.join(" ");
        assert!(joined.starts_with("setting -v 3"));
        assert!(joined.contains("-k performance_cpu.custom -val 2"));
        assert!(joined.contains("-k performance_mem.custom -val 2.000000"));
        assert!(joined.contains("-k resolution_width.custom -val 1920.000000"));
        assert!(joined.contains("-k resolution_height.custom -val 1080.000000"));
        assert!(joined.contains("-k resolution_dpi.custom -val 280.000000"));
    }

    #[test]
    fn export_and_import_arguments() {
        let runner = Arc::new(ScriptedRunner::new(|_| ok("")));
        let driver = driver(Arc::clone(&runner));
        let path = driver
            .export_snapshot(&handle(), 5, Path::new("/backups"), "farm-5_20240101_000000", "t")
            .expect("export");
        assert_eq!(path, PathBuf::from("/backups/farm-5_20240101_000000.mumudata"));
        driver
            .import_snapshot(&handle(), Path::new("/backups/golden.mumudata"), 3, "t")
            .expect("import");
        assert_eq!(
            runner.calls()[1],
            args(["import", "-p", "/backups/golden.mumudata", "-n", "3"])
        );
    }
}
