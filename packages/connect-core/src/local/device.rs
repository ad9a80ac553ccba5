//! Audio output device enumeration and resolution for the local backend (§4.12).

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{RenderError, RenderResult};

/// Information about one audio output device, independent of the host API
/// backing it.
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub index: usize,
    pub name: String,
    pub channels: u16,
    pub default_sample_rate: u32,
    pub is_default: bool,
}

/// Lists available output devices in host enumeration order.
pub fn list_audio_devices() -> RenderResult<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|err| RenderError::LocalAudio(format!("failed to enumerate output devices: {err}")))?;

    let mut result = Vec::new();
    for (index, device) in devices.enumerate() {
        let Ok(config) = device.default_output_config() else {
            continue;
        };
        let Ok(name) = device.name() else { continue };
        let channels = config.channels();
        if channels == 0 {
            continue;
        }
        let is_default = default_name.as_deref() == Some(name.as_str());
        result.push(AudioDeviceInfo {
            index,
            name,
            channels,
            default_sample_rate: config.sample_rate().0,
            is_default,
        });
    }

    Ok(result)
}

/// Resolves a device config string (`"default"`, an integer index, an exact
/// name, or a case-insensitive substring) to a concrete device.
pub fn resolve_device(device_config: &str) -> RenderResult<AudioDeviceInfo> {
    let devices = list_audio_devices()?;
    select_device(&devices, device_config)
}

/// Pure selection logic over an already-enumerated device list, split out
/// from [`resolve_device`] so it can be exercised without real hardware.
fn select_device(devices: &[AudioDeviceInfo], device_config: &str) -> RenderResult<AudioDeviceInfo> {
    if devices.is_empty() {
        return Err(RenderError::LocalAudio("no audio output devices found on this system".into()));
    }

    if device_config.eq_ignore_ascii_case("default") {
        if let Some(dev) = devices.iter().find(|d| d.is_default) {
            log::info!("[LocalAudio] using default device {}", dev.name);
            return Ok(dev.clone());
        }
        log::warn!("[LocalAudio] no default device, falling back to first available");
        return Ok(devices[0].clone());
    }

    if let Ok(index) = device_config.parse::<usize>() {
        return devices
            .iter()
            .find(|d| d.index == index)
            .cloned()
            .ok_or_else(|| {
                RenderError::LocalAudio(format!(
                    "no audio output device at index {index}. Available devices:\n{}",
                    format_device_list(&devices)
                ))
            });
    }

    let config_lower = device_config.to_lowercase();
    if let Some(dev) = devices.iter().find(|d| d.name.to_lowercase() == config_lower) {
        log::info!("[LocalAudio] using named device {}", dev.name);
        return Ok(dev.clone());
    }

    let matches: Vec<&AudioDeviceInfo> =
        devices.iter().filter(|d| d.name.to_lowercase().contains(&config_lower)).collect();
    match matches.len() {
        0 => Err(RenderError::LocalAudio(format!(
            "no audio device matching '{device_config}'. Available devices:\n{}",
            format_device_list(&devices)
        ))),
        1 => {
            log::info!("[LocalAudio] using substring match {}", matches[0].name);
            Ok(matches[0].clone())
        }
        _ => {
            log::warn!("[LocalAudio] ambiguous device query '{}', choosing {}", device_config, matches[0].name);
            Ok(matches[0].clone())
        }
    }
}

/// Formats a device list for an error message or a config-diagnostic log line.
pub fn format_device_list(devices: &[AudioDeviceInfo]) -> String {
    devices
        .iter()
        .map(|dev| {
            let marker = if dev.is_default { " (default)" } else { "" };
            format!("  [{}] {}{} - {}ch, {}Hz", dev.index, dev.name, marker, dev.channels, dev.default_sample_rate)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_devices() -> Vec<AudioDeviceInfo> {
        vec![
            AudioDeviceInfo { index: 0, name: "Built-in Output".into(), channels: 2, default_sample_rate: 44100, is_default: true },
            AudioDeviceInfo { index: 1, name: "USB DAC".into(), channels: 2, default_sample_rate: 96000, is_default: false },
        ]
    }

    #[test]
    fn format_device_list_marks_default() {
        let listing = format_device_list(&sample_devices());
        assert!(listing.contains("(default)"));
        assert!(listing.contains("USB DAC"));
    }

    #[test]
    fn default_keyword_picks_default_device() {
        let devices = sample_devices();
        let picked = select_device(&devices, "default").unwrap();
        assert_eq!(picked.name, "Built-in Output");
    }

    #[test]
    fn numeric_index_picks_by_index() {
        let devices = sample_devices();
        let picked = select_device(&devices, "1").unwrap();
        assert_eq!(picked.name, "USB DAC");
    }

    #[test]
    fn unknown_index_lists_available_devices() {
        let devices = sample_devices();
        let err = select_device(&devices, "7").unwrap_err();
        assert!(matches!(err, RenderError::LocalAudio(ref msg) if msg.contains("USB DAC")));
    }

    #[test]
    fn exact_name_match_is_case_insensitive() {
        let devices = sample_devices();
        let picked = select_device(&devices, "usb dac").unwrap();
        assert_eq!(picked.name, "USB DAC");
    }

    #[test]
    fn substring_match_picks_unique_device() {
        let devices = sample_devices();
        let picked = select_device(&devices, "Built-in").unwrap();
        assert_eq!(picked.name, "Built-in Output");
    }

    #[test]
    fn no_match_returns_error_with_device_list() {
        let devices = sample_devices();
        let err = select_device(&devices, "nonexistent").unwrap_err();
        assert!(matches!(err, RenderError::LocalAudio(ref msg) if msg.contains("Available devices")));
    }

    #[test]
    fn empty_device_list_is_an_error() {
        let err = select_device(&[], "default").unwrap_err();
        assert!(matches!(err, RenderError::LocalAudio(_)));
    }
}
