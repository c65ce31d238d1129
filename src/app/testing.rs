//! Test doubles shared by the unit tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::app::adb::runner::{CommandOutput, CommandRunner};
use crate::app::backend::BackendDriver;
use crate::app::error::AppError;
use crate::app::models::{
    BackendHandle, FleetType, InstanceRecord, OptimizeConfiguration, RunState,
};

type Responder = dyn Fn(&[String]) -> Result<CommandOutput, AppError> + Send + Sync;

/// Records every invocation and answers from a closure keyed on the args.
pub struct ScriptedRunner {
    calls: Mutex<Vec<Vec<String>>>,
    respond: Box<Responder>,
}

impl ScriptedRunner {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&[String]) -> Result<CommandOutput, AppError> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        _program: &str,
        args: &[String],
        _timeout: Duration,
        _trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        self.calls.lock().expect("calls lock").push(args.to_vec());
        (self.respond)(args)
    }
}

pub fn output(exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code: Some(exit_code),
    }
}

pub fn ok(stdout: &str) -> Result<CommandOutput, AppError> {
    Ok(output(0, stdout, ""))
}

/// In-memory backend that records every call as `op:index`.
pub struct MockDriver {
    pub fleet: FleetType,
    pub resolvable: bool,
    snapshots: Mutex<Vec<Vec<InstanceRecord>>>,
    fail_stop: Vec<u32>,
    fail_launch: Vec<u32>,
    calls: Mutex<Vec<String>>,
}

impl MockDriver {
    pub fn new(instances: Vec<InstanceRecord>) -> Self {
        Self {
            fleet: FleetType::Console,
            resolvable: true,
            snapshots: Mutex::new(vec![instances]),
            fail_stop: Vec::new(),
            fail_launch: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Successive `list_instances` calls walk through `snapshots`; the last one repeats.
    pub fn with_snapshots(snapshots: Vec<Vec<InstanceRecord>>) -> Self {
        let driver = Self::new(Vec::new());
        *driver.snapshots.lock().expect("snapshots lock") = snapshots;
        driver
    }

    pub fn unresolvable(mut self) -> Self {
        self.resolvable = false;
        self
    }

    pub fn failing_stop(mut self, indices: &[u32]) -> Self {
        self.fail_stop = indices.to_vec();
        self
    }

    pub fn failing_launch(mut self, indices: &[u32]) -> Self {
        self.fail_launch = indices.to_vec();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Calls other than registry queries and handle resolution.
    pub fn dispatched(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call != "list" && call != "resolve")
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

pub fn instance(index: u32, name: &str, run_state: RunState) -> InstanceRecord {
    InstanceRecord {
        index,
        name: name.to_string(),
        run_state,
        android_ready: None,
    }
}

impl BackendDriver for MockDriver {
    fn fleet_type(&self) -> FleetType {
        self.fleet
    }

    fn resolve_handle(
        &self,
        _configured: Option<&str>,
        trace_id: &str,
    ) -> Result<BackendHandle, AppError> {
        self.record("resolve".to_string());
        if self.resolvable {
            Ok(BackendHandle::new(self.fleet, "/mock/console"))
        } else {
            Err(AppError::not_configured("mock backend not configured", trace_id))
        }
    }

    fn list_instances(
        &self,
        _handle: &BackendHandle,
        _trace_id: &str,
    ) -> Result<Vec<InstanceRecord>, AppError> {
        self.record("list".to_string());
        let mut snapshots = self.snapshots.lock().expect("snapshots lock");
        if snapshots.len() > 1 {
            Ok(snapshots.remove(0))
        } else {
            Ok(snapshots.first().cloned().unwrap_or_default())
        }
    }

    fn launch(&self, _handle: &BackendHandle, index: u32, trace_id: &str) -> Result<(), AppError> {
        self.record(format!("launch:{index}"));
        if self.fail_launch.contains(&index) {
            return Err(AppError::command_failed(format!("launch {index} refused"), trace_id));
        }
        Ok(())
    }

    fn stop(&self, _handle: &BackendHandle, index: u32, trace_id: &str) -> Result<(), AppError> {
        self.record(format!("stop:{index}"));
        if self.fail_stop.contains(&index) {
            return Err(AppError::command_failed(format!("quit {index} refused"), trace_id));
        }
        Ok(())
    }

    fn rename(
        &self,
        _handle: &BackendHandle,
        index: u32,
        new_name: &str,
        _trace_id: &str,
    ) -> Result<(), AppError> {
        self.record(format!("rename:{index}:{new_name}"));
        Ok(())
    }

    fn export_snapshot(
        &self,
        _handle: &BackendHandle,
        index: u32,
        destination_dir: &Path,
        file_stem: &str,
        _trace_id: &str,
    ) -> Result<PathBuf, AppError> {
        self.record(format!("export:{index}"));
        Ok(destination_dir.join(format!("{file_stem}.bak")))
    }

    fn import_snapshot(
        &self,
        _handle: &BackendHandle,
        _source: &Path,
        count: u32,
        _trace_id: &str,
    ) -> Result<(), AppError> {
        self.record(format!("import:{count}"));
        Ok(())
    }

    fn apply_settings(
        &self,
        _handle: &BackendHandle,
        index: u32,
        _config: &OptimizeConfiguration,
        _trace_id: &str,
    ) -> Result<(), AppError> {
        self.record(format!("settings:{index}"));
        Ok(())
    }
}
