use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::adb::paths::sanitize_filename_component;
use crate::app::adb::runner::{CommandOutput, CommandRunner};
use crate::app::backend::{args, resolve_from_candidates, BackendDriver};
use crate::app::config::DriverTimeouts;
use crate::app::error::AppError;
use crate::app::models::{
    BackendHandle, FleetType, InstanceRecord, OptimizeConfiguration, RunState,
};

pub const CONSOLE_PATH_ENV: &str = "EMUFLEET_CONSOLE_PATH";
const EXECUTABLE_NAMES: [&str; 3] = ["ldconsole", "ldconsole.exe", "dnconsole.exe"];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConsoleListing {
    pub records: Vec<InstanceRecord>,
    pub skipped: usize,
}

/// Parses `list2` output: `index,name,pid,...` per line, `pid == "0"` meaning
/// stopped. Lines missing any of the first three fields are skipped.
pub fn parse_console_list(output: &str) -> ConsoleListing {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .fold(ConsoleListing::default(), |mut acc, line| {
            match parse_console_line(line) {
                Some(record) => acc.records.push(record),
                None => {
                    debug!(line = %line, "skipping malformed console line");
                    acc.skipped += 1;
                }
            }
            acc
        })
}

fn parse_console_line(line: &str) -> Option<InstanceRecord> {
    let mut fields = line.split(',');
    let index = fields.next()?.trim().parse::<u32>().ok()?;
    let name = fields.next()?.trim();
    let pid = fields.next()?.trim();
    if name.is_empty() || pid.is_empty() {
        return None;
    }
    let run_state = if pid == "0" {
        RunState::Stopped
    } else {
        RunState::Running
    };
    Some(InstanceRecord {
        index,
        name: name.to_string(),
        run_state,
        android_ready: None,
    })
}

/// The console tool reports exit codes inconsistently; only stderr text counts
/// as failure.
pub fn check_console_output(
    output: &CommandOutput,
    action: &str,
    trace_id: &str,
) -> Result<(), AppError> {
    if output.exited_cleanly() {
        return Ok(());
    }
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        debug!(
            trace_id = %trace_id,
            action = %action,
            exit_code = ?output.exit_code,
            "console exited non-zero without stderr; treating as success"
        );
        return Ok(());
    }
    Err(AppError::command_failed(
        format!("{action} failed: {stderr}"),
        trace_id,
    ))
}

/// The instance `add` just created: a new index carrying `name`, or the only
/// new index when the tool altered the name.
fn find_created(after: &[InstanceRecord], known: &[u32], name: &str) -> Option<InstanceRecord> {
    let fresh: Vec<&InstanceRecord> = after
        .iter()
        .filter(|record| !known.contains(&record.index))
        .collect();
    fresh
        .iter()
        .find(|record| record.name == name)
        .or_else(|| if fresh.len() == 1 { fresh.first() } else { None })
        .map(|record| (*record).clone())
}

pub struct ConsoleDriver {
    runner: Arc<dyn CommandRunner>,
    timeouts: DriverTimeouts,
}

impl ConsoleDriver {
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
    ) -> Result<(), AppError> {
        let timeout = if snapshot {
            self.timeouts.snapshot
        } else {
            self.timeouts.control
        };
        let output = self.runner.run(&handle.program(), &argv, timeout, trace_id)?;
        check_console_output(&output, action, trace_id)
    }
}

impl BackendDriver for ConsoleDriver {
    fn fleet_type(&self) -> FleetType {
        FleetType::Console
    }

    fn resolve_handle(
        &self,
        configured: Option<&str>,
        trace_id: &str,
    ) -> Result<BackendHandle, AppError> {
        resolve_from_candidates(
            FleetType::Console,
            configured,
            CONSOLE_PATH_ENV,
            &EXECUTABLE_NAMES,
            &[],
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
            &args(["list2"]),
            self.timeouts.query,
            trace_id,
        )?;
        check_console_output(&output, "list2", trace_id)
            .map_err(|err| AppError::backend_query(err.error, trace_id))?;
        if output.stdout.trim().is_empty() {
            return Err(AppError::backend_query("console list2 returned no output", trace_id));
        }

        let listing = parse_console_list(&output.stdout);
        if listing.skipped > 0 {
            warn!(
                trace_id = %trace_id,
                skipped = listing.skipped,
                parsed = listing.records.len(),
                "skipped malformed console lines"
            );
        }
        if listing.records.is_empty() {
            return Err(AppError::backend_query(
                "console list2 output contained no valid instances",
                trace_id,
            ));
        }
        Ok(listing.records)
    }

    fn launch(&self, handle: &BackendHandle, index: u32, trace_id: &str) -> Result<(), AppError> {
        self.control(
            handle,
            "launch",
            args(["launch".to_string(), "--index".to_string(), index.to_string()]),
            false,
            trace_id,
        )
    }

    fn stop(&self, handle: &BackendHandle, index: u32, trace_id: &str) -> Result<(), AppError> {
        self.control(
            handle,
            "quit",
            args(["quit".to_string(), "--index".to_string(), index.to_string()]),
            false,
            trace_id,
        )
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
                "--index".to_string(),
                index.to_string(),
                "--title".to_string(),
                new_name.to_string(),
            ]),
            false,
            trace_id,
        )
    }

    fn export_snapshot(
        &self,
        handle: &BackendHandle,
        index: u32,
        destination_dir: &Path,
        file_stem: &str,
        trace_id: &str,
    ) -> Result<PathBuf, AppError> {
        let target = destination_dir.join(format!("{file_stem}.ldbk"));
        self.control(
            handle,
            "backup",
            args([
                "backup".to_string(),
                "--index".to_string(),
                index.to_string(),
                "--file".to_string(),
                target.to_string_lossy().to_string(),
            ]),
            true,
            trace_id,
        )?;
        Ok(target)
    }

    fn import_snapshot(
        &self,
        handle: &BackendHandle,
        source: &Path,
        count: u32,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let stem = source
            .file_stem()
            .map(|stem| sanitize_filename_component(&stem.to_string_lossy()))
            .unwrap_or_else(|| "restored".to_string());
        let source_arg = source.to_string_lossy().to_string();

        let mut known: Vec<u32> = self
            .list_instances(handle, trace_id)?
            .iter()
            .map(|record| record.index)
            .collect();

        for copy in 1..=count {
            let name = format!("{stem}-{copy}");
            self.control(
                handle,
                "add",
                args(["add".to_string(), "--name".to_string(), name.clone()]),
                false,
                trace_id,
            )?;
            // `add` reports nothing and may fail silently; only an index absent
            // before the call may receive the restore.
            let after = self.list_instances(handle, trace_id)?;
            let created = find_created(&after, &known, &name).ok_or_else(|| {
                AppError::command_failed(
                    format!("add did not create instance {name:?}; snapshot not restored"),
                    trace_id,
                )
            })?;
            known = after.iter().map(|record| record.index).collect();
            info!(
                trace_id = %trace_id,
                index = created.index,
                name = %name,
                copy,
                count,
                "restoring snapshot into new console instance"
            );
            self.control(
                handle,
                "restore",
                args([
                    "restore".to_string(),
                    "--index".to_string(),
                    created.index.to_string(),
                    "--file".to_string(),
                    source_arg.clone(),
                ]),
                true,
                trace_id,
            )?;
        }
        Ok(())
    }

    fn apply_settings(
        &self,
        handle: &BackendHandle,
        index: u32,
        config: &OptimizeConfiguration,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let resolution = OptimizeConfiguration::parse_resolution(&config.resolution, trace_id)?;
        self.control(
            handle,
            "modify",
            args([
                "modify".to_string(),
                "--index".to_string(),
                index.to_string(),
                "--cpu".to_string(),
                config.cores.to_string(),
                "--memory".to_string(),
                config.ram_mb.to_string(),
                "--resolution".to_string(),
                format!("{},{},{}", resolution.width, resolution.height, resolution.dpi),
            ]),
            false,
            trace_id,
        )
    }
}
