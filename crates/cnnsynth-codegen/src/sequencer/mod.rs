//! Phase-ordered operation sequencer.
//!
//! [`Sequencer::run`] walks the phases of the generated program in a fixed
//! order: declarations, core bring-up, camera, accelerator bring-up,
//! load/configure, execute, result retrieval, teardown and the companion
//! handoff. Each phase decides from the configuration and the device what to
//! emit and pushes operations straight into the [`TextEmitter`]. The
//! [`Lifecycle`] is advanced alongside to mirror what the generated program
//! does at run time.

mod bringup;
mod declarations;
mod execute;
mod teardown;

use cnnsynth_device::{CapabilityDescriptor, CompanionMemory};

use crate::config::{Configuration, CoreTopology, WaitMode, WaitStrategy};
use crate::emitter::{EmittedText, FunctionSignature, Return, Sink, TextEmitter};
use crate::error::{Result, SynthesisError};
use crate::lifecycle::{Lifecycle, Stage};
use crate::op::{Callee, CompletionWait, Operation, SleepInstruction};
use crate::power::GroupMask;
use crate::SynthesisInputs;

/// Where the body of a bring-up or teardown phase is emitted.
///
/// Decided once per phase; the call left in `main` and the function body
/// always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// Straight into `main`.
    Inline,
    /// Into an API function on [`Sink::Api`], called from `main`.
    Api,
}

impl Route {
    fn body_sink(self) -> Sink {
        match self {
            Route::Inline => Sink::Main,
            Route::Api => Sink::Api,
        }
    }
}

/// Which half of the program a declaration block serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Application and accelerator library in one source.
    Combined,
    /// `main` and the code that only it uses.
    Application,
    /// The accelerator API source.
    Library,
}

impl Role {
    fn application(self) -> bool {
        !matches!(self, Role::Library)
    }

    fn library(self) -> bool {
        !matches!(self, Role::Application)
    }
}

/// GPIO level driven by [`gpio_output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    High,
    Low,
}

/// Configure `port`/`mask` as a push-pull output and drive it to `level`.
fn gpio_output(port: &str, mask: &str, level: Level) -> Vec<Operation> {
    let drive = match level {
        Level::High => "MXC_GPIO_OutSet",
        Level::Low => "MXC_GPIO_OutClr",
    };
    vec![
        Operation::declare("mxc_gpio_cfg_t gpio_out;"),
        Operation::statement(format!("gpio_out.port = {port};")),
        Operation::statement(format!("gpio_out.mask = {mask};")),
        Operation::statement("gpio_out.pad = MXC_GPIO_PAD_NONE;"),
        Operation::statement("gpio_out.func = MXC_GPIO_FUNC_OUT;"),
        Operation::call(Callee::external("MXC_GPIO_Config"), &["&gpio_out"]),
        Operation::call(
            Callee::external(drive),
            &["gpio_out.port", "gpio_out.mask"],
        ),
    ]
}

/// What a finished run hands back to [`crate::synthesize`].
#[derive(Debug)]
pub(crate) struct SequencedProgram {
    pub text: EmittedText,
    pub lifecycle: Lifecycle,
}

pub(crate) struct Sequencer<'a> {
    config: &'a Configuration,
    caps: &'a CapabilityDescriptor,
    inputs: &'a SynthesisInputs,
    groups: GroupMask,
    emitter: TextEmitter,
    lifecycle: Lifecycle,
}

impl<'a> Sequencer<'a> {
    pub(crate) fn new(
        config: &'a Configuration,
        caps: &'a CapabilityDescriptor,
        inputs: &'a SynthesisInputs,
    ) -> Result<Self> {
        let groups = GroupMask::new(config.groups(), caps)?;
        Ok(Self {
            config,
            caps,
            inputs,
            groups,
            emitter: TextEmitter::new(),
            lifecycle: Lifecycle::new(),
        })
    }

    pub(crate) fn run(mut self) -> Result<SequencedProgram> {
        tracing::debug!(layout = ?self.config.layout(), "phase 1: declarations");
        self.declarations()?;
        self.file_scope_functions()?;

        self.emitter.open(Sink::Main, FunctionSignature::int("main"))?;
        self.locals();

        tracing::debug!(topology = %self.config.topology(), "phase 2: core bring-up");
        self.core_bringup()?;

        tracing::debug!(camera = self.config.camera.is_some(), "phase 3: camera");
        self.camera();

        if self.config.topology().owns_accelerator() {
            tracing::debug!(route = ?self.route(), "phase 4: accelerator bring-up");
            self.accelerator_bringup()?;

            tracing::debug!("phase 5: load and configure");
            self.load_and_configure()?;

            tracing::debug!(oneshot = self.config.oneshot, "phase 6: execute");
            self.execute()?;

            tracing::debug!(retrieval = ?self.config.retrieval(), "phase 7: result retrieval");
            self.retrieve()?;

            tracing::debug!(forever = self.config.forever, "phase 8: teardown");
            self.teardown()?;
        } else {
            self.lifecycle.advance(Stage::Delegated)?;
        }

        tracing::debug!("phase 9: companion handoff");
        self.handoff();

        if !self.config.target().uses_sdk() {
            self.main(Operation::Blank);
            self.main(Operation::call_external("pass"));
        }
        self.emitter.close(Sink::Main, Return::value("0"))?;

        let text = self.emitter.finish()?;
        Ok(SequencedProgram {
            text,
            lifecycle: self.lifecycle,
        })
    }

    fn main(&mut self, op: Operation) {
        self.emitter.push(Sink::Main, op);
    }

    fn main_all(&mut self, ops: impl IntoIterator<Item = Operation>) {
        self.emitter.extend(Sink::Main, ops);
    }

    fn route(&self) -> Route {
        if self.config.is_split() {
            Route::Api
        } else {
            Route::Inline
        }
    }

    /// Embedded code, or a simulation environment that mirrors the SDK
    /// runtime (interrupts, peripheral clock API).
    fn sdk_runtime(&self) -> bool {
        self.config.is_embedded() || self.caps.modern_sim
    }

    /// Whether the ARM side installs `WakeISR` for the companion's signal.
    fn hosts_wake_isr(&self) -> bool {
        self.config.topology() == CoreTopology::ArmHost
            && (self.config.target().uses_sdk() || self.caps.modern_sim)
    }

    /// Manual trim override is only emitted on SDK bring-up of current parts.
    fn applies_clock_trim(&self) -> bool {
        self.config.clock_trim.is_some()
            && self.config.topology() != CoreTopology::Companion
            && self.config.target().uses_sdk()
            && !self.caps.family.is_legacy()
    }

    /// Whether `main` ends with a per-class printout.
    fn prints_classification(&self) -> bool {
        self.config.is_embedded()
            && !self.config.forever
            && self.config.retrieval().is_classification()
            && self.config.topology().owns_accelerator()
    }

    fn sleep_instruction(&self) -> SleepInstruction {
        match self.config.topology() {
            CoreTopology::Companion => SleepInstruction::RiscV,
            CoreTopology::SingleCore | CoreTopology::ArmHost => SleepInstruction::Arm,
        }
    }

    /// The completion wait used at every wait site.
    fn completion_wait(&self) -> Operation {
        let wait = match self.config.wait_strategy(self.caps) {
            WaitStrategy::Poll => CompletionWait::Poll,
            WaitStrategy::Interrupt => match self.config.wait_mode {
                WaitMode::Interrupt => CompletionWait::Sleep(self.sleep_instruction()),
                WaitMode::Spin => CompletionWait::Spin,
            },
        };
        Operation::AwaitCompletion(wait)
    }

    /// Emit a fatal check on `callee` and record it in the lifecycle.
    fn check(&mut self, callee: Callee) -> Result<()> {
        self.lifecycle.fatal_check()?;
        let policy = self.config.fail_policy();
        self.main(Operation::Check { callee, policy });
        Ok(())
    }

    fn companion_memory(&self) -> Result<&'a CompanionMemory> {
        self.caps
            .companion
            .as_ref()
            .ok_or_else(|| SynthesisError::UnsupportedByDevice {
                feature: "dual-core topology",
                device: self.caps.name.clone(),
            })
    }
}
