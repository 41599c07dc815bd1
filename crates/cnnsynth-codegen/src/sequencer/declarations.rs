//! Phase 1: includes, file-scope state and the helper functions `main`
//! calls into.

use crate::classify::{
    ml_data_declaration, ClassificationBackend, ClassificationEmitter, ClassificationUnit,
};
use crate::config::{CoreTopology, ExecutionTarget, OutputLayout, ResultRetrieval, WaitStrategy};
use crate::emitter::{FunctionSignature, Return, Sink};
use crate::error::Result;
use crate::op::{Callee, Operation, Register, WriteOp};

use super::{gpio_output, Level, Role, Sequencer};

/// Headers of the SDK-style simulation runtime.
const SIM_RUNTIME_HEADERS: [&str; 8] = [
    "mxc_device.h",
    "mxc_delay.h",
    "mxc_assert.h",
    "mxc_errors.h",
    "mxc_lock.h",
    "mxc_pins.h",
    "mxc_sys.h",
    "nvic_table.h",
];

const INFERENCE_TIMER_STOP: &str = "#ifdef CNN_INFERENCE_TIMER
cnn_time = MXC_TMR_SW_Stop(CNN_INFERENCE_TIMER);
#else
cnn_time = 1;
#endif";

impl Sequencer<'_> {
    pub(super) fn declarations(&mut self) -> Result<()> {
        match self.config.layout() {
            OutputLayout::Combined => self.declare_for(Sink::Main, Role::Combined),
            OutputLayout::SplitApi => {
                self.declare_for(Sink::Main, Role::Application)?;
                self.declare_for(Sink::Api, Role::Library)
            }
        }
    }

    fn declare_for(&mut self, sink: Sink, role: Role) -> Result<()> {
        let includes = self.includes(role);
        self.emitter.extend(sink, includes);

        if !self.config.topology().owns_accelerator() {
            return Ok(());
        }
        if role.application() {
            self.application_state(sink)?;
        }
        if role.library() {
            self.completion_handler(sink)?;
            if let Some(master) = self.config.master() {
                self.group_control(sink, master)?;
            }
        }
        Ok(())
    }

    fn includes(&self, role: Role) -> Vec<Operation> {
        let cfg = self.config;
        let embedded = cfg.is_embedded();
        let mut ops = vec![
            Operation::system_include("stdlib.h"),
            Operation::system_include("stdint.h"),
        ];
        if embedded || cfg.verify_kernels || self.inputs.fc_expected.is_some() {
            ops.push(Operation::system_include("string.h"));
        }
        if embedded {
            ops.push(Operation::system_include("stdio.h"));
        }

        if cfg.target().uses_sdk() {
            ops.push(Operation::include("mxc.h"));
            if role.library() {
                ops.push(Operation::include(self.caps.power_controller.header()));
            }
            if cfg.topology().is_dual_core() && role.application() {
                ops.push(Operation::include("fcr_regs.h"));
                ops.push(Operation::include("sema_regs.h"));
            }
        } else {
            if self.caps.modern_sim {
                if cfg.camera.is_some() {
                    ops.push(Operation::include("cameraif_regs.h"));
                }
                ops.extend(SIM_RUNTIME_HEADERS.iter().map(|h| Operation::include(*h)));
            }
            ops.push(Operation::include("global_functions.h").with_comment("For RTL Simulation"));
        }

        if cfg.camera.is_some() {
            ops.push(Operation::include("pcif_defines_af2.h"));
            ops.push(Operation::define("NUM_DATA_WORDS", 4));
            ops.push(Operation::include("pcif.c"));
        }
        if embedded {
            ops.push(Operation::include("cnn.h"));
        }
        if role.library() && (embedded || cfg.compact_weights) {
            ops.push(Operation::include(cfg.weights_header()));
        }
        if role.application() && (embedded || cfg.compact_data) {
            ops.push(Operation::include(cfg.sample_header()));
        }
        ops.push(Operation::Blank);

        if !cfg.target().uses_sdk() {
            ops.push(Operation::define("CNN_FAIL", 0));
            ops.push(Operation::define("CNN_OK", 1));
            ops.push(Operation::Blank);
        }
        if role.application() && cfg.target() == ExecutionTarget::BareMetalArm {
            ops.push(
                Operation::declare("extern volatile void const *__FlashStart_; // Defined in linker file"),
            );
            ops.push(Operation::Blank);
        }
        ops
    }

    /// Stopwatch and the embedded `fail()` reporter.
    fn application_state(&mut self, sink: Sink) -> Result<()> {
        if self.sdk_runtime() {
            self.emitter
                .push(sink, Operation::declare("volatile uint32_t cnn_time; // Stopwatch"));
            self.emitter.push(sink, Operation::Blank);
        }
        if !self.config.is_embedded() {
            return Ok(());
        }

        let mut body = Vec::new();
        if self.config.fail_indicator {
            body.extend(gpio_output("MXC_GPIO2", "MXC_GPIO_PIN_4", Level::High));
            body.push(Operation::Blank);
        }
        body.push(Operation::statement(r#"printf("\n*** FAIL ***\n\n");"#));
        body.push(Operation::statement("while (1);"));
        self.emitter
            .function(sink, FunctionSignature::void("fail"), body, Return::Void)?;
        Ok(())
    }

    /// The completion ISR, or the polling `cnn_wait()` where no interrupt
    /// is available.
    fn completion_handler(&mut self, sink: Sink) -> Result<()> {
        match self.config.wait_strategy(self.caps) {
            WaitStrategy::Interrupt => {
                let signature = match self.config.topology() {
                    CoreTopology::Companion => FunctionSignature::new(
                        r#"void __attribute__((interrupt("machine")))"#,
                        "CNN_IRQHandler",
                        "void",
                    ),
                    CoreTopology::SingleCore | CoreTopology::ArmHost => {
                        FunctionSignature::void("CNN_ISR")
                    }
                };
                let acknowledge = if self.config.oneshot > 0 && !self.caps.require_oneshot_clear {
                    "~(1<<12)"
                } else {
                    "~((1<<12) | 1)"
                };

                let mut body = vec![Operation::comment("Acknowledge interrupt to all groups")];
                for &group in self.config.groups() {
                    body.push(Operation::write(
                        Register::Address(self.caps.ctl_address(group)),
                        WriteOp::And,
                        acknowledge,
                    ));
                }
                body.push(Operation::Blank);
                if self.config.is_embedded() && !self.config.measure_energy {
                    body.push(
                        Operation::statement("CNN_COMPLETE;")
                            .with_comment("Signal that processing is complete"),
                    );
                }
                body.push(Operation::verbatim(INFERENCE_TIMER_STOP));
                if self.config.topology() == CoreTopology::Companion {
                    body.push(Operation::Blank);
                    body.push(Operation::call(Callee::external("NVIC_ClearPendingIRQ"), &["CNN_IRQn"]));
                    body.push(Operation::call(Callee::external("NVIC_ClearPendingEVENT"), &["CNN_IRQn"]));
                }
                self.emitter.function(sink, signature, body, Return::Void)?;
            }
            WaitStrategy::Poll => {
                let condition = format!(
                    "(*((volatile uint32_t *) 0x{:08x}) & (1<<12)) != 1<<12",
                    self.caps.cnn_base_address()
                );
                self.emitter.function(
                    sink,
                    FunctionSignature::void("cnn_wait"),
                    [Operation::wait_until(condition)],
                    Return::Void,
                )?;
            }
        }
        Ok(())
    }

    /// `cnn_continue()` / `cnn_stop()` on the master group.
    fn group_control(&mut self, sink: Sink, master: u8) -> Result<()> {
        let ctl = Register::Address(self.caps.ctl_address(master));

        let mut resume = Vec::new();
        if self.config.wait_strategy(self.caps) == WaitStrategy::Interrupt {
            resume.push(Operation::statement("cnn_time = 0;"));
            resume.push(Operation::Blank);
        }
        resume.push(
            Operation::write(ctl.clone(), WriteOp::Or, "1")
                .with_comment(format!("Re-enable group {master}")),
        );
        self.emitter
            .function(sink, FunctionSignature::int("cnn_continue"), resume, Return::ok())?;

        let halt = Operation::write(ctl, WriteOp::And, "~1")
            .with_comment(format!("Disable group {master}"));
        self.emitter
            .function(sink, FunctionSignature::int("cnn_stop"), [halt], Return::ok())?;
        Ok(())
    }

    /// Classification layers, the unload buffer and the ARM-side wake-up
    /// helpers, all defined ahead of `main`.
    pub(super) fn file_scope_functions(&mut self) -> Result<()> {
        let owns = self.config.topology().owns_accelerator();
        if owns {
            self.classification()?;
            if self.config.retrieval() == ResultRetrieval::Unload {
                self.main(ml_data_declaration(self.config.output_width()));
                self.main(Operation::Blank);
            }
        }

        if self.hosts_wake_isr() {
            self.emitter.function(
                Sink::Main,
                FunctionSignature::void("WakeISR"),
                [Operation::write(
                    Register::named("MXC_SEMA->irq0"),
                    WriteOp::Assign,
                    "MXC_F_SEMA_IRQ0_EN & ~MXC_F_SEMA_IRQ0_CM4_IRQ",
                )],
                Return::Void,
            )?;
        }

        // The simulation runtime lacks this SDK helper.
        if self.config.topology() == CoreTopology::ArmHost
            && self.config.sleep
            && !self.config.is_embedded()
        {
            let clear = |reg: &str| {
                Operation::write(Register::named(reg), WriteOp::Assign, "0xFFFFFFFF")
            };
            self.emitter.function(
                Sink::Main,
                FunctionSignature::void("_MXC_LP_ClearWakeStatus"),
                [
                    Operation::verbatim("/* Write 1 to clear */"),
                    clear("MXC_PWRSEQ->lpwkst0"),
                    clear("MXC_PWRSEQ->lpwkst1"),
                    clear("MXC_PWRSEQ->lppwst"),
                ],
                Return::Void,
            )?;
        }
        Ok(())
    }

    fn classification(&mut self) -> Result<()> {
        let Some(backend) = ClassificationBackend::for_retrieval(self.config.retrieval()) else {
            return Ok(());
        };
        let inputs = self.inputs;
        let emitter = ClassificationEmitter::new(self.config.output_width());

        let layer = emitter.emit(inputs.fc_weights.as_ref(), inputs.fc_bias.as_deref(), backend)?;
        self.emit_unit(layer)?;
        if let Some(expected) = &inputs.fc_expected {
            let verify = emitter.emit_verify(expected)?;
            self.emit_unit(verify)?;
        }
        Ok(())
    }

    fn emit_unit(&mut self, unit: ClassificationUnit) -> Result<()> {
        for (sink, literal) in &unit.literals {
            self.emitter.raw(*sink, literal);
            self.emitter.raw(*sink, "\n");
        }
        self.main_all(unit.declarations);
        self.emitter
            .function(Sink::Main, unit.signature, unit.body, unit.ret)?;
        Ok(())
    }

    /// Locals of `main`.
    pub(super) fn locals(&mut self) {
        let cfg = self.config;
        let owns = cfg.topology().owns_accelerator();
        let mut ops = Vec::new();

        if self.applies_clock_trim() {
            ops.push(Operation::declare("uint32_t trim;"));
        }
        if owns
            && ((cfg.is_embedded() && cfg.retrieval().is_classification())
                || cfg.oneshot > 0
                || cfg.measure_energy)
        {
            ops.push(Operation::declare("int i;"));
        }
        if self.prints_classification() {
            ops.push(Operation::declare("int digs, tens;"));
            let bits = cfg.output_width().bits();
            if bits != 32 {
                ops.push(Operation::declare(format!(
                    "int{bits}_t *ml_data = (int{bits}_t *) ml_data32;"
                )));
            }
        }
        if !ops.is_empty() {
            ops.push(Operation::Blank);
        }
        self.main_all(ops);
    }
}
