//! Configuration-driven C source synthesis for CNN accelerators.
//!
//! Given an immutable [`Configuration`], a device [`CapabilityDescriptor`]
//! and optional classification arrays, [`synthesize`] emits the firmware or
//! simulation program that powers up the accelerator, loads and runs the
//! network, retrieves the results and shuts everything down again. Output is
//! split across [`Sink`]s (main source, API source, weights header, sample
//! data header) and is byte-identical for identical inputs.
//!
//! [`CapabilityDescriptor`]: cnnsynth_device::CapabilityDescriptor

pub mod array;
pub mod classify;
pub mod clock;
pub mod config;
pub mod emitter;
pub mod error;
pub mod lifecycle;
pub mod op;
pub mod pipeline;
pub mod power;
pub mod report;
mod sequencer;

pub use array::{c_define, Array, ArraySerializer, ElementFormat, MacroLiteral, NumericSpec, Radix};
pub use classify::{
    ClassificationBackend, ClassificationEmitter, ClassificationUnit, FcWeights, WeightConverter,
    X4Interleave,
};
pub use clock::{select_clock, ClockDivider, ClockSource};
pub use config::{
    BoostPin, CameraConfig, ClockTrim, Configuration, ConfigurationBuilder, CoreTopology,
    ExecutionTarget, FailPolicy, OutputLayout, OutputWidth, PixelFormat, ResultRetrieval,
    WaitMode, WaitStrategy,
};
pub use emitter::{DefinedFunction, EmittedText, FunctionSignature, Return, Sink, TextEmitter};
pub use error::{ConfigError, EmitError, FormatError, Result, SynthesisError};
pub use lifecycle::{Lifecycle, Stage};
pub use op::{Callee, CompletionWait, Operation, Register, SleepInstruction, WriteOp};
pub use pipeline::{sink_file_name, synthesize, SynthesisInputs, SynthesisOutput};
pub use power::{power_sequence, GroupMask, PowerDirection};
pub use report::{SinkSummary, SynthesisReport};
