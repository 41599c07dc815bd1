//! Synthesis errors.
//!
//! Every error here is a caller contract breach detected before or during
//! emission. None of them ever appears in generated text; runtime fault paths
//! in the generated firmware are ordinary operations.

use thiserror::Error;

/// Illegal or inconsistent configuration, rejected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("the compute-group set is empty")]
    NoGroups,

    #[error("master group {master} is not in the compute-group set")]
    MasterNotInGroups { master: u8 },

    #[error("{feature} requires a master group")]
    MasterRequired { feature: &'static str },

    #[error("{feature} is not available for the {target} target")]
    UnsupportedTarget {
        feature: &'static str,
        target: &'static str,
    },

    #[error("{feature} requires a dual-core topology")]
    DualCoreRequired { feature: &'static str },

    #[error("{feature} is not available on the arm-host side, which never drives the accelerator")]
    AcceleratorOwnerRequired { feature: &'static str },

    #[error("camera channel count {channels} is invalid (expected 1..=3)")]
    InvalidChannels { channels: u8 },

    #[error("output width {width} is invalid (expected 8, 16 or 32)")]
    InvalidOutputWidth { width: u8 },

    #[error("{feature} requires the fully-connected classification backend")]
    FullyConnectedRequired { feature: &'static str },

    #[error("{feature} requires {requirement}")]
    Requires {
        feature: &'static str,
        requirement: &'static str,
    },
}

/// A malformed array element format or wrap width.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("format descriptor '{descriptor}' has no numeric-format component")]
    MissingNumericFormat { descriptor: String },

    #[error("invalid numeric format '{spec}': {reason}")]
    InvalidNumericFormat { spec: String, reason: String },

    #[error("wrap width must be at least 1")]
    ZeroWrapWidth,
}

/// A violated bracket or naming rule in the text emitter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    #[error("cannot open '{requested}' on {sink}: '{open}' is still open")]
    UnitAlreadyOpen {
        sink: String,
        open: String,
        requested: String,
    },

    #[error("no function is open on {sink}")]
    NoOpenUnit { sink: String },

    #[error("function '{name}' is still open on {sink} at end of synthesis")]
    UnclosedUnit { sink: String, name: String },

    #[error("function '{name}' is defined twice")]
    DuplicateFunction { name: String },

    #[error("call to '{name}' has no matching definition")]
    UndefinedFunction { name: String },
}

/// Errors that abort a synthesis run.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("array format error: {0}")]
    Format(#[from] FormatError),

    #[error("emitter error: {0}")]
    Emit(#[from] EmitError),

    #[error("device error: {0}")]
    Device(#[from] cnnsynth_device::DeviceError),

    #[error("group {group} is out of range for {device} ({count} groups)")]
    GroupOutOfRange {
        group: u8,
        device: String,
        count: u8,
    },

    #[error("{feature} is not supported by device {device}")]
    UnsupportedByDevice { feature: &'static str, device: String },

    #[error("missing synthesis input: {input}")]
    MissingInput { input: &'static str },

    #[error("fully-connected weights have {actual} values, expected {rows} x {cols}")]
    WeightShape { rows: usize, cols: usize, actual: usize },

    #[error("illegal lifecycle transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for results within the codegen crate.
pub type Result<T> = std::result::Result<T, SynthesisError>;
