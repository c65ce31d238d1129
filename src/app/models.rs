use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum FleetType {
    /// Line-oriented console tool (`list2` output).
    #[default]
    #[serde(alias = "ldplayer", alias = "ld")]
    Console,
    /// JSON-emitting manager tool (`info -v all` output).
    #[serde(alias = "mumu")]
    Manager,
}

impl FleetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FleetType::Console => "console",
            FleetType::Manager => "manager",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "console" | "ldplayer" | "ld" => Some(FleetType::Console),
            "manager" | "mumu" => Some(FleetType::Manager),
            _ => None,
        }
    }
}

impl fmt::Display for FleetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Stopped,
    Running,
}

/// One emulator instance as reported by a registry query. Never mutated;
/// re-query to observe changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceRecord {
    pub index: u32,
    pub name: String,
    pub run_state: RunState,
    /// Guest OS boot completion, when the backend reports it.
    pub android_ready: Option<bool>,
}

impl InstanceRecord {
    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Ready,
    Unauthorized,
    Offline,
}

impl DeviceStatus {
    pub fn from_adb_state(state: &str) -> Self {
        match state.trim() {
            "device" | "ready" => DeviceStatus::Ready,
            "unauthorized" => DeviceStatus::Unauthorized,
            _ => DeviceStatus::Offline,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceTarget {
    pub serial: String,
    pub model: Option<String>,
    pub status: DeviceStatus,
}

impl DeviceTarget {
    pub fn is_ready(&self) -> bool {
        self.status == DeviceStatus::Ready
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationOutcome<T> {
    pub target: T,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl<T> OperationOutcome<T> {
    pub fn succeeded(target: T) -> Self {
        Self {
            target,
            success: true,
            error_detail: None,
        }
    }

    pub fn failed(target: T, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let detail = if detail.trim().is_empty() {
            "unknown error".to_string()
        } else {
            detail
        };
        Self {
            target,
            success: false,
            error_detail: Some(detail),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationSummary<T> {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub outcomes: Vec<OperationOutcome<T>>,
}

impl<T> OperationSummary<T> {
    pub fn from_outcomes(outcomes: Vec<OperationOutcome<T>>) -> Self {
        let successful = outcomes.iter().filter(|item| item.success).count();
        Self {
            total: outcomes.len(),
            successful,
            failed: outcomes.len() - successful,
            outcomes,
        }
    }
}

/// Resolved location of a backend's control executable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendHandle {
    pub fleet: FleetType,
    pub executable: PathBuf,
}

impl BackendHandle {
    pub fn new(fleet: FleetType, executable: impl Into<PathBuf>) -> Self {
        Self {
            fleet,
            executable: executable.into(),
        }
    }

    pub fn program(&self) -> String {
        self.path().to_string_lossy().to_string()
    }

    pub fn path(&self) -> &Path {
        &self.executable
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

/// Hardware settings for one instance, validated before any dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptimizeConfiguration {
    pub cores: u32,
    pub ram_mb: u32,
    pub resolution: String,
}

impl OptimizeConfiguration {
    pub fn new(cores: u32, ram_mb: u32, resolution: impl Into<String>) -> Self {
        Self {
            cores,
            ram_mb,
            resolution: resolution.into(),
        }
    }

    pub fn validate(&self, trace_id: &str) -> Result<Resolution, AppError> {
        if self.cores == 0 {
            return Err(AppError::validation("cores must be greater than 0", trace_id));
        }
        if self.ram_mb == 0 {
            return Err(AppError::validation("ram_mb must be greater than 0", trace_id));
        }
        Self::parse_resolution(&self.resolution, trace_id)
    }

    pub fn parse_resolution(value: &str, trace_id: &str) -> Result<Resolution, AppError> {
        let parts: Vec<&str> = value.split(',').map(|part| part.trim()).collect();
        let invalid = || {
            AppError::validation(
                format!("resolution must look like width,height,dpi (got {value:?})"),
                trace_id,
            )
        };
        if parts.len() != 3 {
            return Err(invalid());
        }
        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(parts.iter()) {
            *slot = part.parse::<u32>().map_err(|_| invalid())?;
            if *slot == 0 {
                return Err(invalid());
            }
        }
        Ok(Resolution {
            width: numbers[0],
            height: numbers[1],
            dpi: numbers[2],
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceFailure {
    pub index: u32,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RebootStatus {
    NothingToDo,
    Completed,
    CompletedWithErrors,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebootReport {
    pub status: RebootStatus,
    pub instances: Vec<InstanceRecord>,
    pub stop_failures: Vec<InstanceFailure>,
    pub launch_failures: Vec<InstanceFailure>,
}

impl RebootReport {
    pub fn nothing_to_do() -> Self {
        Self {
            status: RebootStatus::NothingToDo,
            instances: Vec::new(),
            stop_failures: Vec::new(),
            launch_failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstallErrorCode {
    Success,
    InstallFailedAlreadyExists,
    InstallFailedUpdateIncompatible,
    InstallFailedOlderSdk,
    InstallFailedVersionDowngrade,
    InstallFailedInsufficientStorage,
    InstallFailedInvalidApk,
    InstallFailedNoMatchingAbis,
    InstallFailedTestOnly,
    InstallParseFailedNotApk,
    InstallParseFailedNoCertificates,
    UnknownError,
}

impl InstallErrorCode {
    const FAILURES: [InstallErrorCode; 10] = [
        InstallErrorCode::InstallFailedAlreadyExists,
        InstallErrorCode::InstallFailedUpdateIncompatible,
        InstallErrorCode::InstallFailedOlderSdk,
        InstallErrorCode::InstallFailedVersionDowngrade,
        InstallErrorCode::InstallFailedInsufficientStorage,
        InstallErrorCode::InstallFailedInvalidApk,
        InstallErrorCode::InstallFailedNoMatchingAbis,
        InstallErrorCode::InstallFailedTestOnly,
        InstallErrorCode::InstallParseFailedNotApk,
        InstallErrorCode::InstallParseFailedNoCertificates,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            InstallErrorCode::Success => "SUCCESS",
            InstallErrorCode::InstallFailedAlreadyExists => "INSTALL_FAILED_ALREADY_EXISTS",
            InstallErrorCode::InstallFailedUpdateIncompatible => {
                "INSTALL_FAILED_UPDATE_INCOMPATIBLE"
            }
            InstallErrorCode::InstallFailedOlderSdk => "INSTALL_FAILED_OLDER_SDK",
            InstallErrorCode::InstallFailedVersionDowngrade => "INSTALL_FAILED_VERSION_DOWNGRADE",
            InstallErrorCode::InstallFailedInsufficientStorage => {
                "INSTALL_FAILED_INSUFFICIENT_STORAGE"
            }
            InstallErrorCode::InstallFailedInvalidApk => "INSTALL_FAILED_INVALID_APK",
            InstallErrorCode::InstallFailedNoMatchingAbis => "INSTALL_FAILED_NO_MATCHING_ABIS",
            InstallErrorCode::InstallFailedTestOnly => "INSTALL_FAILED_TEST_ONLY",
            InstallErrorCode::InstallParseFailedNotApk => "INSTALL_PARSE_FAILED_NOT_APK",
            InstallErrorCode::InstallParseFailedNoCertificates => {
                "INSTALL_PARSE_FAILED_NO_CERTIFICATES"
            }
            InstallErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Failure codes win over a stray "Success" token elsewhere in the output.
    pub fn from_output(output: &str) -> Self {
        let upper = output.to_uppercase();
        for code in Self::FAILURES {
            if upper.contains(code.code()) {
                return code;
            }
        }
        if upper.contains("SUCCESS") {
            return InstallErrorCode::Success;
        }
        InstallErrorCode::UnknownError
    }
}
