use std::path::{Path, PathBuf};

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

pub fn resolve_adb_program(config_command_path: &str) -> String {
    let normalized = normalize_command_path(config_command_path);
    if normalized.is_empty() {
        "adb".to_string()
    } else {
        normalized
    }
}

pub fn validate_adb_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    if program == "adb" {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err("ADB executable not found at the configured path".to_string());
    }
    Ok(())
}

/// Finds a backend executable from a user-supplied candidate.
///
/// The candidate may be the executable itself or an install directory; in
/// the latter case `names` are tried directly under it and then under each
/// of `subdirs`.
pub fn locate_executable(candidate: &str, names: &[&str], subdirs: &[&str]) -> Option<PathBuf> {
    let normalized = normalize_command_path(candidate);
    if normalized.is_empty() {
        return None;
    }
    let path = PathBuf::from(normalized);
    if path.is_file() {
        return Some(path);
    }
    if !path.is_dir() {
        return None;
    }
    let mut roots = vec![path.clone()];
    roots.extend(subdirs.iter().map(|sub| path.join(sub)));
    roots
        .into_iter()
        .flat_map(|root| names.iter().map(move |name| root.join(name)))
        .find(|candidate| candidate.is_file())
}
