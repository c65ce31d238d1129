//! Package installation across every ready device.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::app::adb::apk::{normalize_apk_path, prepare_package, InstallPackage};
use crate::app::adb::parse::parse_adb_devices;
use crate::app::adb::runner::CommandRunner;
use crate::app::config::MassSettings;
use crate::app::error::AppError;
use crate::app::mass::MassExecutor;
use crate::app::models::{DeviceTarget, InstallErrorCode, OperationOutcome, OperationSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub replace_existing: bool,
    pub allow_downgrade: bool,
    pub grant_permissions: bool,
    pub allow_test_packages: bool,
    pub extra_args: Vec<String>,
    pub timeout: Duration,
}

impl From<&MassSettings> for InstallOptions {
    fn from(settings: &MassSettings) -> Self {
        Self {
            replace_existing: settings.replace_existing,
            allow_downgrade: settings.allow_downgrade,
            grant_permissions: settings.grant_permissions,
            allow_test_packages: settings.allow_test_packages,
            extra_args: settings
                .extra_args
                .split_whitespace()
                .map(|item| item.to_string())
                .collect(),
            timeout: Duration::from_secs(settings.install_timeout_secs.max(1)),
        }
    }
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self::from(&MassSettings::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallBatchResult {
    pub package_path: String,
    pub summary: OperationSummary<DeviceTarget>,
    /// Devices left out of the batch because they were not `ready`.
    pub skipped: Vec<DeviceTarget>,
    pub duration_seconds: f64,
}

/// Queries `adb devices -l`.
pub fn list_device_targets(
    runner: &dyn CommandRunner,
    adb_program: &str,
    timeout: Duration,
    trace_id: &str,
) -> Result<Vec<DeviceTarget>, AppError> {
    let args = vec!["devices".to_string(), "-l".to_string()];
    let output = runner.run(adb_program, &args, timeout, trace_id)?;
    if !output.exited_cleanly() {
        return Err(AppError::command_failed(
            format!("adb devices failed: {}", output.failure_detail()),
            trace_id,
        ));
    }
    Ok(parse_adb_devices(&output.stdout))
}

/// Splits targets into the batch-eligible ones and the rest.
pub fn partition_ready(targets: Vec<DeviceTarget>) -> (Vec<DeviceTarget>, Vec<DeviceTarget>) {
    targets.into_iter().partition(DeviceTarget::is_ready)
}

pub fn install_args(serial: &str, package: &InstallPackage, options: &InstallOptions) -> Vec<String> {
    let mut args = vec!["-s".to_string(), serial.to_string()];
    args.push(if package.is_split() { "install-multiple" } else { "install" }.to_string());
    if options.replace_existing {
        args.push("-r".to_string());
    }
    if options.allow_downgrade {
        args.push("-d".to_string());
    }
    if options.grant_permissions {
        args.push("-g".to_string());
    }
    if options.allow_test_packages {
        args.push("-t".to_string());
    }
    args.extend(options.extra_args.iter().cloned());
    args.extend(
        package
            .apk_paths()
            .into_iter()
            .map(|path| path.to_string_lossy().to_string()),
    );
    args
}

/// Installs one package on every ready target. A package that cannot be
/// prepared fails every target without any adb invocation.
pub fn install_batch(
    executor: &MassExecutor,
    runner: &dyn CommandRunner,
    adb_program: &str,
    targets: Vec<DeviceTarget>,
    package_path: &str,
    options: &InstallOptions,
    trace_id: &str,
) -> InstallBatchResult {
    let started = Instant::now();
    let normalized = normalize_apk_path(package_path);
    let (ready, skipped) = partition_ready(targets);
    if !skipped.is_empty() {
        info!(
            trace_id = %trace_id,
            skipped = skipped.len(),
            "excluding devices that are not ready"
        );
    }

    let summary = match prepare_package(&normalized, trace_id) {
        Ok(package) => executor.run_batch(
            ready,
            |target| install_on(runner, adb_program, target, &package, options, trace_id),
            trace_id,
        ),
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "package rejected before install");
            let detail = format!("{}: {}", InstallErrorCode::InstallFailedInvalidApk.code(), err.error);
            OperationSummary::from_outcomes(
                ready
                    .into_iter()
                    .map(|target| OperationOutcome::failed(target, detail.clone()))
                    .collect(),
            )
        }
    };

    InstallBatchResult {
        package_path: normalized.to_string_lossy().to_string(),
        summary,
        skipped,
        duration_seconds: started.elapsed().as_secs_f64(),
    }
}

fn install_on(
    runner: &dyn CommandRunner,
    adb_program: &str,
    target: &DeviceTarget,
    package: &InstallPackage,
    options: &InstallOptions,
    trace_id: &str,
) -> Result<(), AppError> {
    let args = install_args(&target.serial, package, options);
    let output = runner.run(adb_program, &args, options.timeout, trace_id)?;
    let raw = if output.stdout.trim().is_empty() {
        output.stderr.trim()
    } else {
        output.stdout.trim()
    };
    let code = InstallErrorCode::from_output(&format!("{}\n{}", output.stdout, output.stderr));
    if output.exited_cleanly() && code == InstallErrorCode::Success {
        info!(trace_id = %trace_id, serial = %target.serial, "package installed");
        return Ok(());
    }
    let detail = if raw.is_empty() {
        output.failure_detail()
    } else {
        raw.to_string()
    };
    Err(AppError::command_failed(
        format!("{}: {detail}", code.code()),
        trace_id,
    ))
}
