use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::ZipArchive;

use crate::app::error::AppError;

/// A package ready to hand to `adb install` / `adb install-multiple`.
#[derive(Debug)]
pub enum InstallPackage {
    Single(PathBuf),
    Split {
        apk_paths: Vec<PathBuf>,
        // Keeps the extracted splits alive until the batch finishes.
        _temp_dir: TempDir,
    },
}

impl InstallPackage {
    pub fn apk_paths(&self) -> Vec<PathBuf> {
        match self {
            InstallPackage::Single(path) => vec![path.clone()],
            InstallPackage::Split { apk_paths, .. } => apk_paths.clone(),
        }
    }

    pub fn is_split(&self) -> bool {
        matches!(self, InstallPackage::Split { .. })
    }
}

pub fn is_split_bundle(path: &Path) -> bool {
    let lower = path.to_string_lossy().to_lowercase();
    lower.ends_with(".apks") || lower.ends_with(".xapk")
}

pub fn normalize_apk_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Validates the file and extracts split bundles. Runs once per batch, before
/// any device is touched.
pub fn prepare_package(path: &Path, trace_id: &str) -> Result<InstallPackage, AppError> {
    if !path.is_file() {
        return Err(AppError::validation(
            format!("Package not found: {}", path.display()),
            trace_id,
        ));
    }
    let file = File::open(path)
        .map_err(|err| AppError::system(format!("Failed to open package: {err}"), trace_id))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|err| AppError::validation(format!("Invalid package: {err}"), trace_id))?;

    if !is_split_bundle(path) {
        return Ok(InstallPackage::Single(path.to_path_buf()));
    }

    let temp_dir = TempDir::new()
        .map_err(|err| AppError::system(format!("Failed to create temp dir: {err}"), trace_id))?;
    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| AppError::validation(format!("Failed to read bundle: {err}"), trace_id))?;
        if !entry.name().to_lowercase().ends_with(".apk") {
            continue;
        }
        let Some(file_name) = Path::new(entry.name()).file_name().map(|n| n.to_os_string()) else {
            continue;
        };
        let target = temp_dir.path().join(file_name);
        let mut output = File::create(&target)
            .map_err(|err| AppError::system(format!("Failed to extract apk: {err}"), trace_id))?;
        io::copy(&mut entry, &mut output)
            .map_err(|err| AppError::system(format!("Failed to extract apk: {err}"), trace_id))?;
        extracted.push(target);
    }

    if extracted.is_empty() {
        return Err(AppError::validation(
            format!("Bundle {} contains no apk files", path.display()),
            trace_id,
        ));
    }

    // Base split first; adb rejects config splits without their base.
    extracted.sort_by_key(|path| {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        (!name.contains("base"), name)
    });

    Ok(InstallPackage::Split {
        apk_paths: extracted,
        _temp_dir: temp_dir,
    })
}
