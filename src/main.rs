use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use emufleet_lib::app::adb::locator::{resolve_adb_program, validate_adb_program};
use emufleet_lib::app::adb::runner::SystemRunner;
use emufleet_lib::app::backend::{select_with, BackendDriver};
use emufleet_lib::app::config::{load_config, remember_handle, save_config, FleetConfig};
use emufleet_lib::app::error::AppError;
use emufleet_lib::app::lifecycle::{self, RebootDelays};
use emufleet_lib::app::logging::init_logging;
use emufleet_lib::app::mass::backup::backup_all;
use emufleet_lib::app::mass::install::{install_batch, list_device_targets, InstallOptions};
use emufleet_lib::app::mass::MassExecutor;
use emufleet_lib::app::models::{BackendHandle, FleetType, OptimizeConfiguration};
use emufleet_lib::app::operations::{self, resolve_trace_id};
use emufleet_lib::app::registry;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

const USAGE: &str = "Usage: emufleet [--fleet console|manager] [--backend-path PATH] [--trace-id ID] <command>\n\
Commands:\n  \
list\n  \
launch INDEX | stop INDEX | wait-ready INDEX\n  \
reboot\n  \
rename INDEX NAME\n  \
export INDEX [DIR] | export-all [DIR]\n  \
import PATH [COUNT]\n  \
optimize INDEX CORES RAM_MB W,H,DPI\n  \
devices\n  \
install PATH\n";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    List,
    Launch(u32),
    Stop(u32),
    WaitReady(u32),
    Reboot,
    Rename { index: u32, name: String },
    Export { index: u32, dir: Option<PathBuf> },
    ExportAll { dir: Option<PathBuf> },
    Import { path: PathBuf, count: u32 },
    Optimize { index: u32, config: OptimizeConfiguration },
    Devices,
    Install { path: String },
}

#[derive(Debug, Clone)]
struct Args {
    fleet: Option<FleetType>,
    backend_path: Option<String>,
    trace_id: Option<String>,
    command: Command,
}

#[derive(Serialize)]
struct CommandResponse {
    trace_id: String,
    data: Value,
}

fn parse_args() -> Result<Args, String> {
    let mut fleet = None;
    let mut backend_path = None;
    let mut trace_id = None;
    let mut positional = Vec::new();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--fleet" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--fleet requires a value".to_string())?;
                fleet = Some(
                    FleetType::parse(&value).ok_or_else(|| format!("Unknown fleet type: {value}"))?,
                );
            }
            "--backend-path" => {
                backend_path = Some(
                    it.next()
                        .ok_or_else(|| "--backend-path requires a value".to_string())?,
                );
            }
            "--trace-id" => {
                trace_id = Some(
                    it.next()
                        .ok_or_else(|| "--trace-id requires a value".to_string())?,
                );
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            other if other.starts_with("--") => return Err(format!("Unknown arg: {other}")),
            _ => positional.push(arg),
        }
    }

    Ok(Args {
        fleet,
        backend_path,
        trace_id,
        command: parse_command(&positional)?,
    })
}

fn positional<'a>(rest: &'a [String], position: usize, command: &str, label: &str) -> Result<&'a str, String> {
    rest.get(position)
        .map(String::as_str)
        .ok_or_else(|| format!("{command} requires {label}"))
}

fn positional_number(rest: &[String], position: usize, command: &str, label: &str) -> Result<u32, String> {
    let raw = positional(rest, position, command, label)?;
    raw.trim()
        .parse::<u32>()
        .map_err(|_| format!("{label} must be a non-negative integer (got {raw:?})"))
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let Some((name, rest)) = args.split_first() else {
        return Err(USAGE.to_string());
    };
    let name = name.as_str();
    let arg = |position: usize, label: &str| positional(rest, position, name, label).map(str::to_string);
    let number = |position: usize, label: &str| positional_number(rest, position, name, label);

    let command = match name {
        "list" => Command::List,
        "launch" => Command::Launch(number(0, "INDEX")?),
        "stop" => Command::Stop(number(0, "INDEX")?),
        "wait-ready" => Command::WaitReady(number(0, "INDEX")?),
        "reboot" => Command::Reboot,
        "rename" => Command::Rename {
            index: number(0, "INDEX")?,
            name: arg(1, "NAME")?,
        },
        "export" => Command::Export {
            index: number(0, "INDEX")?,
            dir: rest.get(1).map(PathBuf::from),
        },
        "export-all" => Command::ExportAll {
            dir: rest.first().map(PathBuf::from),
        },
        "import" => Command::Import {
            path: PathBuf::from(arg(0, "PATH")?),
            count: if rest.len() > 1 { number(1, "COUNT")? } else { 1 },
        },
        "optimize" => Command::Optimize {
            index: number(0, "INDEX")?,
            config: OptimizeConfiguration::new(
                number(1, "CORES")?,
                number(2, "RAM_MB")?,
                arg(3, "W,H,DPI")?,
            ),
        },
        "devices" => Command::Devices,
        "install" => Command::Install {
            path: arg(0, "PATH")?,
        },
        other => return Err(format!("Unknown command: {other}\n{USAGE}")),
    };
    Ok(command)
}

fn to_value<T: Serialize>(data: T, trace_id: &str) -> Result<Value, AppError> {
    serde_json::to_value(data)
        .map_err(|err| AppError::system(format!("Failed to serialize result: {err}"), trace_id))
}

fn adb_program(config: &FleetConfig, trace_id: &str) -> Result<String, AppError> {
    let program = resolve_adb_program(&config.adb.command_path);
    validate_adb_program(&program).map_err(|err| AppError::not_configured(err, trace_id))?;
    Ok(program)
}

fn backup_dir(explicit: Option<PathBuf>, config: &FleetConfig) -> PathBuf {
    explicit.unwrap_or_else(|| PathBuf::from(config.backup_dir.trim()))
}

/// Resolves the backend handle and caches it in the config when it changed.
fn resolve_handle(
    driver: &dyn BackendDriver,
    backend_path: Option<&str>,
    config: &mut FleetConfig,
    trace_id: &str,
) -> Result<BackendHandle, AppError> {
    let configured = backend_path
        .map(str::to_string)
        .or_else(|| config.backend.configured_path(driver.fleet_type()).map(str::to_string));
    let handle = driver.resolve_handle(configured.as_deref(), trace_id)?;
    if remember_handle(config, &handle) {
        if let Err(err) = save_config(config, trace_id) {
            warn!(trace_id = %trace_id, error = %err, "failed to persist resolved backend path");
        }
    }
    Ok(handle)
}

fn run(args: Args, mut config: FleetConfig, trace_id: &str) -> Result<Value, AppError> {
    let timeouts = config.command.timeouts();

    match &args.command {
        Command::Devices => {
            let program = adb_program(&config, trace_id)?;
            let devices = list_device_targets(&SystemRunner, &program, timeouts.query, trace_id)?;
            return to_value(devices, trace_id);
        }
        Command::Install { path } => {
            let program = adb_program(&config, trace_id)?;
            let targets = list_device_targets(&SystemRunner, &program, timeouts.query, trace_id)?;
            let executor = MassExecutor::new(config.mass.max_parallel);
            let result = install_batch(
                &executor,
                &SystemRunner,
                &program,
                targets,
                path,
                &InstallOptions::from(&config.mass),
                trace_id,
            );
            return to_value(result, trace_id);
        }
        _ => {}
    }

    let fleet = args.fleet.unwrap_or(config.backend.fleet_type);
    let driver = select_with(fleet, Arc::new(SystemRunner), timeouts);
    let handle = resolve_handle(driver.as_ref(), args.backend_path.as_deref(), &mut config, trace_id)?;
    let driver = driver.as_ref();

    match args.command {
        Command::List => to_value(registry::snapshot(driver, &handle, trace_id)?, trace_id),
        Command::Launch(index) => {
            lifecycle::launch_instance(driver, &handle, index, trace_id)?;
            to_value(index, trace_id)
        }
        Command::Stop(index) => {
            lifecycle::stop_instance(driver, &handle, index, trace_id)?;
            to_value(index, trace_id)
        }
        Command::WaitReady(index) => {
            let record = lifecycle::wait_for_android_ready(
                driver,
                &handle,
                index,
                Duration::from_millis(config.lifecycle.boot_poll_interval_ms),
                Duration::from_secs(config.lifecycle.boot_timeout_secs),
                trace_id,
            )?;
            to_value(record, trace_id)
        }
        Command::Reboot => {
            let delays = RebootDelays::from(&config.lifecycle);
            let program = handle.program();
            let report = lifecycle::reboot_fleet(driver, Some(program.as_str()), &delays, trace_id)?;
            to_value(report, trace_id)
        }
        Command::Rename { index, name } => {
            operations::rename_instance(driver, &handle, index, &name, trace_id)?;
            to_value(name.trim(), trace_id)
        }
        Command::Export { index, dir } => {
            let path = operations::export_snapshot(
                driver,
                &handle,
                index,
                &backup_dir(dir, &config),
                trace_id,
            )?;
            to_value(path, trace_id)
        }
        Command::ExportAll { dir } => {
            let executor = MassExecutor::new(config.mass.max_parallel);
            let summary = backup_all(&executor, driver, &handle, &backup_dir(dir, &config), trace_id)?;
            to_value(summary, trace_id)
        }
        Command::Import { path, count } => {
            operations::import_snapshot(driver, &handle, &path, count, trace_id)?;
            to_value(count, trace_id)
        }
        Command::Optimize { index, config: settings } => {
            operations::apply_settings(driver, &handle, index, &settings, trace_id)?;
            to_value(settings, trace_id)
        }
        Command::Devices | Command::Install { .. } => Ok(Value::Null),
    }
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = resolve_trace_id(args.trace_id.clone());
    let loaded = load_config(&trace_id);
    let config = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => FleetConfig::default(),
    };
    init_logging(&config.logging.log_level);
    if let Err(err) = loaded {
        warn!(trace_id = %trace_id, error = %err, "config unreadable; using defaults");
    }
    info!(trace_id = %trace_id, command = ?args.command, "emufleet start");

    match run(args, config, &trace_id) {
        Ok(data) => {
            let response = CommandResponse {
                trace_id,
                data,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&response).unwrap_or_default()
            );
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err).unwrap_or_default());
            std::process::exit(1);
        }
    }
}
