use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Local};
use regex::Regex;

use crate::app::error::AppError;

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[\\/:*?"<>|\s]+"#).expect("static regex"))
}

/// Makes a display name safe to embed in a host file name.
pub fn sanitize_filename_component(value: &str) -> String {
    let replaced = unsafe_chars().replace_all(value.trim(), "_");
    let cleaned = replaced.trim_matches(|c| c == '_' || c == '.');
    if cleaned.is_empty() {
        "instance".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `<name>_<YYYYmmdd_HHMMSS>`; the timestamp keeps repeated backups apart.
pub fn snapshot_file_stem(instance_name: &str, at: DateTime<Local>) -> String {
    format!(
        "{}_{}",
        sanitize_filename_component(instance_name),
        at.format("%Y%m%d_%H%M%S")
    )
}

pub fn ensure_output_dir(dir: &Path, trace_id: &str) -> Result<PathBuf, AppError> {
    if dir.as_os_str().is_empty() {
        return Err(AppError::validation("destination directory is required", trace_id));
    }
    if dir.exists() && !dir.is_dir() {
        return Err(AppError::validation(
            format!("{} is not a directory", dir.display()),
            trace_id,
        ));
    }
    fs::create_dir_all(dir).map_err(|err| {
        AppError::system(format!("Failed to create output dir: {err}"), trace_id)
    })?;
    Ok(dir.to_path_buf())
}
