//! TOML parsing, serialization, validation, and discovery for device files.
//!
//! Device descriptors are stored as `.device.toml` files in the `devices/`
//! directory of a cnnsynth project.

use std::path::{Path, PathBuf};

use crate::descriptor::{CapabilityDescriptor, DeviceFamily, PowerController};
use crate::error::{DeviceError, Result};

/// How serious a validation finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A validation issue found in a device descriptor.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

impl ValidationIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// Load a descriptor from a `.device.toml` file.
pub fn load_device_toml(path: &Path) -> Result<CapabilityDescriptor> {
    if !path.exists() {
        return Err(DeviceError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    parse_device_toml(&content)
}

/// Parse a descriptor from a TOML string.
pub fn parse_device_toml(toml_str: &str) -> Result<CapabilityDescriptor> {
    let device: CapabilityDescriptor = toml::from_str(toml_str)?;
    Ok(device)
}

/// Serialize a descriptor to pretty TOML.
pub fn device_to_toml(device: &CapabilityDescriptor) -> Result<String> {
    let toml_str = toml::to_string_pretty(device)?;
    Ok(toml_str)
}

/// Validate a descriptor for structural consistency.
///
/// Returns `Ok(())` if there is nothing to report, or `Err(issues)` otherwise.
/// Only issues with [`Severity::Error`] make a descriptor unusable.
pub fn validate_device(device: &CapabilityDescriptor) -> std::result::Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    if device.name.trim().is_empty() {
        issues.push(ValidationIssue::error("device name is empty"));
    }

    if device.group_count == 0 || device.group_count > 16 {
        issues.push(ValidationIssue::error(format!(
            "group count {} is out of range (expected 1..=16)",
            device.group_count
        )));
    }

    if device.apb_base % 4 != 0 || device.cnn_base % 4 != 0 || device.group_stride % 4 != 0 {
        issues.push(ValidationIssue::error(
            "apb-base, cnn-base and group-stride must be word aligned",
        ));
    }

    if device.group_count > 1 && device.group_stride == 0 {
        issues.push(ValidationIssue::error(
            "group-stride is 0 but the device has more than one group",
        ));
    }

    // The highest group control register must be addressable.
    let last_group = u32::from(device.group_count.saturating_sub(1));
    let last_ctl = device
        .apb_base
        .checked_add(device.cnn_base)
        .and_then(|base| base.checked_add(device.group_stride.checked_mul(last_group)?))
        .and_then(|addr| addr.checked_add(device.ctl_register.checked_mul(4)?));
    if last_ctl.is_none() {
        issues.push(ValidationIssue::error(
            "group control registers overflow the 32-bit address space",
        ));
    }

    if device.family == DeviceFamily::Ai84 && device.power_controller == PowerController::Gcfr {
        issues.push(ValidationIssue::error(
            "ai84-family parts have no GCFR power controller",
        ));
    }

    if device.family == DeviceFamily::Ai84 && device.companion.is_some() {
        issues.push(ValidationIssue::error(
            "ai84-family parts have no companion core",
        ));
    }

    if device.family == DeviceFamily::Ai84 && device.modern_sim {
        issues.push(ValidationIssue::warning(
            "modern-sim is set on an ai84-family part; legacy simulation paths will be skipped",
        ));
    }

    if let Some(companion) = &device.companion {
        if companion.code_origin == 0 || companion.sram_origin == 0 {
            issues.push(ValidationIssue::error(
                "companion code and SRAM origins must be non-zero",
            ));
        }
    }

    if device.require_sema_lpwken && device.companion.is_none() {
        issues.push(ValidationIssue::warning(
            "require-sema-lpwken has no effect without a companion core",
        ));
    }

    if device.clocks.ipo_mhz == 0 || device.clocks.apb_mhz == 0 {
        issues.push(ValidationIssue::error("clock labels must be non-zero"));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// Generate a template `.device.toml` for a new device.
///
/// Seeds from the ai85 preset with the given name.
pub fn generate_template(name: &str) -> Result<String> {
    let mut device = CapabilityDescriptor::ai85();
    device.name = name.into();
    device_to_toml(&device)
}

/// Discover all `.device.toml` files in a project's `devices/` directory.
///
/// Returns a list of (device_name, file_path) pairs sorted by name.
pub fn discover_devices(project_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let devices_dir = project_dir.join("devices");
    if !devices_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut devices = Vec::new();
    for entry in std::fs::read_dir(&devices_dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".device.toml"))
            .map(str::to_string);
        if let Some(name) = name {
            devices.push((name, path));
        }
    }
    devices.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(devices)
}
