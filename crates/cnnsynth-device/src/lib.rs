//! Accelerator capability descriptors for cnnsynth.
//!
//! A [`CapabilityDescriptor`] captures the per-chip facts the code generator
//! needs and never mutates: peripheral base addresses, the power-domain
//! controller variant, clock labels, and feature-support flags.
//!
//! Descriptors come from the built-in presets or from `.device.toml` files in
//! the `devices/` directory of a cnnsynth project.

pub mod descriptor;
pub mod error;
pub mod parse;

pub use descriptor::{
    builtin_devices, resolve_device, CapabilityDescriptor, ClockSpeeds, CompanionMemory,
    DeviceFamily, PowerController,
};
pub use error::{DeviceError, Result};
pub use parse::{
    device_to_toml, discover_devices, generate_template, load_device_toml, parse_device_toml,
    validate_device, Severity, ValidationIssue,
};
