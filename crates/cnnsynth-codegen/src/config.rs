//! Synthesis configuration.
//!
//! A [`Configuration`] is the immutable record of every axis that affects
//! emission. It can only be obtained from [`ConfigurationBuilder::build`],
//! which rejects empty group sets and illegal axis combinations, so the
//! sequencer never has to second-guess the combination it was handed.

use std::collections::BTreeSet;
use std::fmt;

use cnnsynth_device::CapabilityDescriptor;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Where the generated program runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionTarget {
    /// RTL simulation harness.
    #[default]
    Simulation,
    /// Microcontroller SDK application.
    Embedded,
    /// SDK-less ARM image that only hosts the companion core.
    BareMetalArm,
}

impl ExecutionTarget {
    /// Whether the target links against the vendor SDK.
    pub fn uses_sdk(self) -> bool {
        matches!(self, ExecutionTarget::Embedded | ExecutionTarget::BareMetalArm)
    }

    pub fn name(self) -> &'static str {
        match self {
            ExecutionTarget::Simulation => "simulation",
            ExecutionTarget::Embedded => "embedded",
            ExecutionTarget::BareMetalArm => "bare-metal-arm",
        }
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which core the generated code runs on, and who owns the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoreTopology {
    /// Only the primary core exists (or the companion is unused).
    #[default]
    SingleCore,
    /// Runs on the primary ARM core, boots the companion and yields to it.
    ArmHost,
    /// Runs on the companion core, which owns the accelerator.
    Companion,
}

impl CoreTopology {
    /// Whether the code on this side drives the accelerator.
    pub fn owns_accelerator(self) -> bool {
        !matches!(self, CoreTopology::ArmHost)
    }

    pub fn is_dual_core(self) -> bool {
        !matches!(self, CoreTopology::SingleCore)
    }

    pub fn name(self) -> &'static str {
        match self {
            CoreTopology::SingleCore => "single-core",
            CoreTopology::ArmHost => "arm-host",
            CoreTopology::Companion => "companion",
        }
    }
}

impl fmt::Display for CoreTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How emitted functions are split across source files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputLayout {
    /// Everything lands in the primary source.
    #[default]
    Combined,
    /// Bring-up and teardown become API functions in a separate source.
    SplitApi,
}

/// Camera pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PixelFormat {
    Rgb555,
    Rgb565,
    Rgb888,
}

impl PixelFormat {
    /// Camera interface data width for this format.
    pub fn data_width_bits(self) -> u8 {
        match self {
            PixelFormat::Rgb555 => 10,
            PixelFormat::Rgb565 => 12,
            PixelFormat::Rgb888 => 8,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PixelFormat::Rgb555 => "555",
            PixelFormat::Rgb565 => "565",
            PixelFormat::Rgb888 => "888",
        }
    }
}

/// Parallel camera interface settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CameraConfig {
    pub format: PixelFormat,
    #[serde(default = "default_channels")]
    pub channels: u8,
}

fn default_channels() -> u8 {
    3
}

/// GPIO that drives the external boost circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostPin {
    pub port: u8,
    pub pin: u8,
}

/// What happens to the accelerator output after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultRetrieval {
    /// Copy the raw output into `ml_data`.
    #[default]
    Unload,
    /// Fixed-point fully-connected layer followed by softmax.
    FullyConnected,
    /// Softmax directly on the accelerator output.
    SoftmaxOnly,
}

impl ResultRetrieval {
    pub fn is_classification(self) -> bool {
        !matches!(self, ResultRetrieval::Unload)
    }
}

/// Bit width of one accelerator output element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OutputWidth {
    #[default]
    W8,
    W16,
    W32,
}

impl OutputWidth {
    pub fn bits(self) -> u8 {
        match self {
            OutputWidth::W8 => 8,
            OutputWidth::W16 => 16,
            OutputWidth::W32 => 32,
        }
    }

    /// Output elements packed into one 32-bit word.
    pub fn per_word(self) -> u8 {
        32 / self.bits()
    }
}

impl TryFrom<u8> for OutputWidth {
    type Error = ConfigError;

    fn try_from(width: u8) -> Result<Self, Self::Error> {
        match width {
            8 => Ok(OutputWidth::W8),
            16 => Ok(OutputWidth::W16),
            32 => Ok(OutputWidth::W32),
            _ => Err(ConfigError::InvalidOutputWidth { width }),
        }
    }
}

impl From<OutputWidth> for u8 {
    fn from(width: OutputWidth) -> u8 {
        width.bits()
    }
}

/// How the main completion wait idles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitMode {
    /// Sleep with wait-for-interrupt until the ISR stamps `cnn_time`.
    #[default]
    Interrupt,
    /// Busy-loop on `cnn_time`.
    Spin,
}

/// Manual oscillator trim values. Absent fields keep the factory trim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClockTrim {
    pub hirc8m: Option<u32>,
    pub hirc: Option<u32>,
    pub hirc96m: Option<u32>,
}

/// How completion of an accelerator run is awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitStrategy {
    /// The ISR signals through `cnn_time`.
    Interrupt,
    /// Blocking `cnn_wait()` poll of the control register.
    Poll,
}

/// What generated fatal checks do on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailPolicy {
    /// Report through `fail()`, which latches the indicator and halts.
    Halt,
    /// Report, signal the harness and return from `main`.
    AbortAndReturn,
}

/// Immutable record of every emission axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    pub(crate) target: ExecutionTarget,
    pub(crate) topology: CoreTopology,
    pub(crate) layout: OutputLayout,
    pub(crate) camera: Option<CameraConfig>,
    pub(crate) measure_energy: bool,
    pub(crate) oneshot: u32,
    pub(crate) stop_start: bool,
    pub(crate) fifo: bool,
    pub(crate) pll: bool,
    pub(crate) boost: Option<BoostPin>,
    pub(crate) retrieval: ResultRetrieval,
    pub(crate) output_width: OutputWidth,
    pub(crate) bias: bool,
    pub(crate) verify_kernels: bool,
    pub(crate) load_kernels: bool,
    pub(crate) verify_output: bool,
    pub(crate) forever: bool,
    pub(crate) wait_mode: WaitMode,
    pub(crate) sleep: bool,
    pub(crate) debug_wait: u32,
    pub(crate) fail_indicator: bool,
    pub(crate) boot_from_flash_cache: bool,
    pub(crate) exclusive_sram: bool,
    pub(crate) jtag_debug: bool,
    pub(crate) clock_trim: Option<ClockTrim>,
    pub(crate) compact_weights: bool,
    pub(crate) compact_data: bool,
    pub(crate) weights_header: String,
    pub(crate) sample_header: String,
    pub(crate) groups: BTreeSet<u8>,
    pub(crate) master: Option<u8>,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    pub fn target(&self) -> ExecutionTarget {
        self.target
    }

    pub fn topology(&self) -> CoreTopology {
        self.topology
    }

    pub fn layout(&self) -> OutputLayout {
        self.layout
    }

    pub fn retrieval(&self) -> ResultRetrieval {
        self.retrieval
    }

    pub fn output_width(&self) -> OutputWidth {
        self.output_width
    }

    pub fn groups(&self) -> &BTreeSet<u8> {
        &self.groups
    }

    pub fn master(&self) -> Option<u8> {
        self.master
    }

    pub fn weights_header(&self) -> &str {
        &self.weights_header
    }

    pub fn sample_header(&self) -> &str {
        &self.sample_header
    }

    /// Completion-wait strategy for this configuration on `caps`.
    ///
    /// Embedded targets and modern simulation environments wait on the ISR;
    /// everything else polls the control register through `cnn_wait()`.
    pub fn wait_strategy(&self, caps: &CapabilityDescriptor) -> WaitStrategy {
        if self.target == ExecutionTarget::Embedded || caps.modern_sim {
            WaitStrategy::Interrupt
        } else {
            WaitStrategy::Poll
        }
    }

    /// Failure behaviour of generated fatal checks.
    pub fn fail_policy(&self) -> FailPolicy {
        match self.target {
            ExecutionTarget::Embedded => FailPolicy::Halt,
            ExecutionTarget::Simulation | ExecutionTarget::BareMetalArm => {
                FailPolicy::AbortAndReturn
            }
        }
    }

    pub(crate) fn is_split(&self) -> bool {
        self.layout == OutputLayout::SplitApi
    }

    pub(crate) fn is_embedded(&self) -> bool {
        self.target == ExecutionTarget::Embedded
    }
}

/// Builder for [`Configuration`].
///
/// Also the deserialization target for the `[synthesis]` table of a project
/// manifest; every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigurationBuilder {
    target: ExecutionTarget,
    topology: CoreTopology,
    layout: OutputLayout,
    camera: Option<CameraConfig>,
    measure_energy: bool,
    oneshot: u32,
    stop_start: bool,
    fifo: bool,
    pll: bool,
    boost: Option<BoostPin>,
    retrieval: ResultRetrieval,
    output_width: OutputWidth,
    bias: bool,
    verify_kernels: bool,
    load_kernels: bool,
    verify_output: bool,
    forever: bool,
    wait_mode: WaitMode,
    sleep: bool,
    debug_wait: u32,
    fail_indicator: bool,
    boot_from_flash_cache: bool,
    exclusive_sram: bool,
    jtag_debug: bool,
    clock_trim: Option<ClockTrim>,
    compact_weights: bool,
    compact_data: bool,
    weights_header: String,
    sample_header: String,
    groups: BTreeSet<u8>,
    master: Option<u8>,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self {
            target: ExecutionTarget::default(),
            topology: CoreTopology::default(),
            layout: OutputLayout::default(),
            camera: None,
            measure_energy: false,
            oneshot: 0,
            stop_start: false,
            fifo: false,
            pll: false,
            boost: None,
            retrieval: ResultRetrieval::default(),
            output_width: OutputWidth::default(),
            bias: false,
            verify_kernels: false,
            load_kernels: true,
            verify_output: true,
            forever: false,
            wait_mode: WaitMode::default(),
            sleep: false,
            debug_wait: 1,
            fail_indicator: false,
            boot_from_flash_cache: false,
            exclusive_sram: false,
            jtag_debug: false,
            clock_trim: None,
            compact_weights: false,
            compact_data: false,
            weights_header: "weights.h".into(),
            sample_header: "sampledata.h".into(),
            groups: BTreeSet::new(),
            master: None,
        }
    }
}

macro_rules! setter {
    ($(#[$doc:meta])* $name:ident: $ty:ty) => {
        $(#[$doc])*
        pub fn $name(mut self, value: $ty) -> Self {
            self.$name = value;
            self
        }
    };
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    setter!(target: ExecutionTarget);
    setter!(topology: CoreTopology);
    setter!(layout: OutputLayout);
    setter!(camera: Option<CameraConfig>);
    setter!(measure_energy: bool);
    setter!(
        /// Number of extra `cnn_continue()` runs after the first completion.
        oneshot: u32
    );
    setter!(stop_start: bool);
    setter!(
        /// Load input through the FIFO, after the engine has started.
        fifo: bool
    );
    setter!(pll: bool);
    setter!(boost: Option<BoostPin>);
    setter!(retrieval: ResultRetrieval);
    setter!(output_width: OutputWidth);
    setter!(bias: bool);
    setter!(verify_kernels: bool);
    setter!(
        /// When false, kernels are assumed pre-loaded.
        load_kernels: bool
    );
    setter!(verify_output: bool);
    setter!(forever: bool);
    setter!(wait_mode: WaitMode);
    setter!(sleep: bool);
    setter!(
        /// Debugger settle delay in seconds; 0 disables it.
        debug_wait: u32
    );
    setter!(fail_indicator: bool);
    setter!(boot_from_flash_cache: bool);
    setter!(exclusive_sram: bool);
    setter!(jtag_debug: bool);
    setter!(clock_trim: Option<ClockTrim>);
    setter!(compact_weights: bool);
    setter!(compact_data: bool);
    setter!(master: Option<u8>);

    pub fn weights_header(mut self, name: impl Into<String>) -> Self {
        self.weights_header = name.into();
        self
    }

    pub fn sample_header(mut self, name: impl Into<String>) -> Self {
        self.sample_header = name.into();
        self
    }

    /// Replace the compute-group set.
    pub fn groups(mut self, groups: impl IntoIterator<Item = u8>) -> Self {
        self.groups = groups.into_iter().collect();
        self
    }

    /// Validate the axis combination and freeze it.
    pub fn build(self) -> Result<Configuration, ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::NoGroups);
        }
        if let Some(master) = self.master {
            if !self.groups.contains(&master) {
                return Err(ConfigError::MasterNotInGroups { master });
            }
        }
        if self.master.is_none() {
            if self.oneshot > 0 {
                return Err(ConfigError::MasterRequired {
                    feature: "one-shot repeat",
                });
            }
            if self.stop_start {
                return Err(ConfigError::MasterRequired {
                    feature: "stop/start",
                });
            }
        }

        if let Some(camera) = &self.camera {
            if camera.channels == 0 || camera.channels > 3 {
                return Err(ConfigError::InvalidChannels {
                    channels: camera.channels,
                });
            }
        }

        let embedded = self.target == ExecutionTarget::Embedded;
        if self.layout == OutputLayout::SplitApi && !embedded {
            return Err(ConfigError::UnsupportedTarget {
                feature: "the split API layout",
                target: self.target.name(),
            });
        }
        if self.measure_energy {
            if !embedded {
                return Err(ConfigError::UnsupportedTarget {
                    feature: "energy measurement",
                    target: self.target.name(),
                });
            }
            if self.layout != OutputLayout::SplitApi {
                return Err(ConfigError::Requires {
                    feature: "energy measurement",
                    requirement: "the split API layout",
                });
            }
        }
        if self.target == ExecutionTarget::BareMetalArm && self.topology != CoreTopology::ArmHost
        {
            return Err(ConfigError::Requires {
                feature: "the bare-metal ARM target",
                requirement: "the arm-host topology",
            });
        }

        if !self.topology.owns_accelerator() {
            let accelerator_options = [
                (self.layout == OutputLayout::SplitApi, "the split API layout"),
                (self.measure_energy, "energy measurement"),
            ];
            if let Some(&(_, feature)) = accelerator_options.iter().find(|(on, _)| *on) {
                return Err(ConfigError::AcceleratorOwnerRequired { feature });
            }
        }

        if !self.topology.is_dual_core() {
            let companion_options = [
                (self.boot_from_flash_cache, "boot from flash cache"),
                (self.exclusive_sram, "exclusive SRAM"),
                (self.jtag_debug, "companion JTAG debug"),
                (self.sleep, "deep sleep"),
            ];
            if let Some(&(_, feature)) = companion_options.iter().find(|(on, _)| *on) {
                return Err(ConfigError::DualCoreRequired { feature });
            }
        }

        Ok(Configuration {
            target: self.target,
            topology: self.topology,
            layout: self.layout,
            camera: self.camera,
            measure_energy: self.measure_energy,
            oneshot: self.oneshot,
            stop_start: self.stop_start,
            fifo: self.fifo,
            pll: self.pll,
            boost: self.boost,
            retrieval: self.retrieval,
            output_width: self.output_width,
            bias: self.bias,
            verify_kernels: self.verify_kernels,
            load_kernels: self.load_kernels,
            verify_output: self.verify_output,
            forever: self.forever,
            wait_mode: self.wait_mode,
            sleep: self.sleep,
            debug_wait: self.debug_wait,
            fail_indicator: self.fail_indicator,
            boot_from_flash_cache: self.boot_from_flash_cache,
            exclusive_sram: self.exclusive_sram,
            jtag_debug: self.jtag_debug,
            clock_trim: self.clock_trim,
            compact_weights: self.compact_weights,
            compact_data: self.compact_data,
            weights_header: self.weights_header,
            sample_header: self.sample_header,
            groups: self.groups,
            master: self.master,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_groups_rejected() {
        let err = Configuration::builder().build().unwrap_err();
        assert_eq!(err, ConfigError::NoGroups);
    }

    #[test]
    fn master_must_be_a_member() {
        let err = Configuration::builder()
            .groups([0, 1])
            .master(Some(2))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::MasterNotInGroups { master: 2 });
    }

    #[test]
    fn oneshot_needs_master() {
        let err = Configuration::builder()
            .groups([0])
            .oneshot(3)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MasterRequired { .. }));
    }

    #[test]
    fn split_layout_is_embedded_only() {
        let err = Configuration::builder()
            .groups([0])
            .layout(OutputLayout::SplitApi)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedTarget { .. }));

        assert!(Configuration::builder()
            .groups([0])
            .target(ExecutionTarget::Embedded)
            .layout(OutputLayout::SplitApi)
            .build()
            .is_ok());
    }

    #[test]
    fn energy_measurement_needs_split_layout() {
        let err = Configuration::builder()
            .groups([0])
            .target(ExecutionTarget::Embedded)
            .measure_energy(true)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Requires { .. }));
    }

    #[test]
    fn companion_options_need_dual_core() {
        let err = Configuration::builder()
            .groups([0])
            .exclusive_sram(true)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::DualCoreRequired {
                feature: "exclusive SRAM"
            }
        );
    }

    #[test]
    fn arm_host_rejects_accelerator_options() {
        let arm_host = || {
            Configuration::builder()
                .groups([0])
                .target(ExecutionTarget::Embedded)
                .topology(CoreTopology::ArmHost)
                .layout(OutputLayout::SplitApi)
        };
        assert_eq!(
            arm_host().build().unwrap_err(),
            ConfigError::AcceleratorOwnerRequired {
                feature: "the split API layout"
            }
        );
        assert_eq!(
            arm_host()
                .layout(OutputLayout::Combined)
                .measure_energy(true)
                .build()
                .unwrap_err(),
            ConfigError::Requires {
                feature: "energy measurement",
                requirement: "the split API layout",
            }
        );
        assert_eq!(
            arm_host().measure_energy(true).build().unwrap_err(),
            ConfigError::AcceleratorOwnerRequired {
                feature: "the split API layout"
            }
        );

        let companion = Configuration::builder()
            .groups([0])
            .target(ExecutionTarget::Embedded)
            .topology(CoreTopology::Companion)
            .layout(OutputLayout::SplitApi)
            .measure_energy(true)
            .build();
        assert!(companion.is_ok());
    }

    #[test]
    fn bare_metal_arm_hosts_only() {
        let err = Configuration::builder()
            .groups([0])
            .target(ExecutionTarget::BareMetalArm)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Requires { .. }));
    }

    #[test]
    fn invalid_camera_channels() {
        let err = Configuration::builder()
            .groups([0])
            .camera(Some(CameraConfig {
                format: PixelFormat::Rgb888,
                channels: 4,
            }))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidChannels { channels: 4 });
    }

    #[test]
    fn wait_strategy_follows_target_and_device() {
        let sim = Configuration::builder().groups([0]).build().unwrap();
        assert_eq!(
            sim.wait_strategy(&CapabilityDescriptor::ai84()),
            WaitStrategy::Poll
        );
        assert_eq!(
            sim.wait_strategy(&CapabilityDescriptor::ai85()),
            WaitStrategy::Interrupt
        );

        let embedded = Configuration::builder()
            .groups([0])
            .target(ExecutionTarget::Embedded)
            .build()
            .unwrap();
        assert_eq!(
            embedded.wait_strategy(&CapabilityDescriptor::ai84()),
            WaitStrategy::Interrupt
        );
        assert_eq!(embedded.fail_policy(), FailPolicy::Halt);
        assert_eq!(sim.fail_policy(), FailPolicy::AbortAndReturn);
    }

    #[test]
    fn builder_deserializes_from_manifest_table() {
        let builder: ConfigurationBuilder = builder_from_json(
            r#"{"target": "embedded", "groups": [0, 2], "master": 0, "output-width": 32,
                "retrieval": "softmax-only", "camera": {"format": "rgb565"}}"#,
        );
        let config = builder.build().unwrap();
        assert_eq!(config.target(), ExecutionTarget::Embedded);
        assert_eq!(config.output_width(), OutputWidth::W32);
        assert_eq!(config.groups().len(), 2);
        assert_eq!(config.camera.map(|c| c.channels), Some(3));
        assert!(config.load_kernels);
    }

    #[test]
    fn invalid_output_width_rejected() {
        let result: Result<ConfigurationBuilder, _> =
            serde_json::from_str(r#"{"groups": [0], "output-width": 12}"#);
        assert!(result.is_err());
    }

    fn builder_from_json(text: &str) -> ConfigurationBuilder {
        serde_json::from_str(text).unwrap()
    }
}
