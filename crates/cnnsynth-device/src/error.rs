//! Error types for device descriptor operations.

use std::path::PathBuf;

/// Errors that can occur while loading or validating a device descriptor.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// TOML deserialization error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// I/O error reading/writing device files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device file not found.
    #[error("device file not found: {}", path.display())]
    NotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// No built-in or project device with this name.
    #[error("unknown device: '{name}'")]
    UnknownDevice {
        /// The requested device name.
        name: String,
    },

    /// Validation error in a descriptor.
    #[error("validation error: {detail}")]
    Validation {
        /// Description of the validation failure.
        detail: String,
    },
}

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;
