use crate::app::models::{DeviceStatus, DeviceTarget};

/// Parses `adb devices -l` output into device targets.
pub fn parse_adb_devices(output: &str) -> Vec<DeviceTarget> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            let model = tokens
                .iter()
                .skip(2)
                .find_map(|token| token.strip_prefix("model:"))
                .map(|value| value.replace('_', " "));
            Some(DeviceTarget {
                serial: tokens[0].to_string(),
                model,
                status: DeviceStatus::from_adb_state(tokens[1]),
            })
        })
        .collect()
}
