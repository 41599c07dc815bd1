//! Phases 8 and 9: teardown (or the endless loop) and the companion
//! handoff.

use crate::config::{CoreTopology, ResultRetrieval};
use crate::emitter::{FunctionSignature, Return, Sink};
use crate::error::Result;
use crate::lifecycle::Stage;
use crate::op::{Callee, Operation, Register, WriteOp};
use crate::power::{power_sequence, PowerDirection};

use super::{Route, Sequencer};

impl Sequencer<'_> {
    pub(super) fn teardown(&mut self) -> Result<()> {
        let route = self.route();
        if self.config.forever {
            self.endless_loop();
            // The API keeps its disable entry point even when main never
            // returns.
            if route == Route::Api {
                let shutdown = self.shutdown();
                self.emitter.function(
                    Sink::Api,
                    FunctionSignature::int("cnn_disable"),
                    shutdown,
                    Return::ok(),
                )?;
            }
            return self.lifecycle.advance(Stage::LoopingForever);
        }

        let shutdown = self.shutdown();
        match route {
            Route::Api => {
                self.main(
                    Operation::call_local("cnn_disable")
                        .with_comment("Shut down CNN clock, disable peripheral"),
                );
                self.main(Operation::Blank);
                self.emitter.function(
                    Sink::Api,
                    FunctionSignature::int("cnn_disable"),
                    shutdown,
                    Return::ok(),
                )?;
            }
            Route::Inline => self.main_all(shutdown),
        }
        self.lifecycle.advance(Stage::TornDown)?;

        if self.prints_classification() {
            self.classification_printout();
        }
        Ok(())
    }

    /// Clock disable followed by the zeroing power sequence.
    fn shutdown(&self) -> Vec<Operation> {
        let mut ops = Vec::new();
        if self.sdk_runtime() {
            ops.push(Operation::comment("Disable CNN clock"));
            ops.push(Operation::call(
                Callee::external("MXC_SYS_ClockDisable"),
                &["MXC_SYS_PERIPH_CLOCK_CNN"],
            ));
            ops.push(Operation::Blank);
        }
        ops.extend(power_sequence(
            self.caps.power_controller,
            PowerDirection::Down,
            &self.groups,
        ));
        ops
    }

    fn endless_loop(&mut self) {
        if self.config.is_embedded() {
            self.main(Operation::statement(r#"printf("Starting endless loop...\n");"#));
            self.main(Operation::Blank);
            self.main(Operation::call(Callee::external("LED_On"), &["1"]));
            self.main(Operation::Blank);
        }
        let body = vec![Operation::call_external("cnn_start"), self.completion_wait()];
        self.main(Operation::Forever { body });
    }

    fn classification_printout(&mut self) {
        let source = match self.config.retrieval() {
            ResultRetrieval::FullyConnected => "fc_output",
            ResultRetrieval::SoftmaxOnly | ResultRetrieval::Unload => "ml_data",
        };
        self.main(Operation::statement(r#"printf("Classification results:\n");"#));
        self.main(Operation::verbatim(format!(
            "for (i = 0; i < CNN_NUM_OUTPUTS; i++) {{\n  \
             digs = (1000 * ml_softmax[i] + 0x4000) >> 15;\n  \
             tens = digs % 10;\n  \
             digs = digs / 10;\n  \
             printf(\"[%7d] -> Class %d: %d.%d%%\\n\", {source}[i], i, digs, tens);\n\
             }}"
        )));
    }

    /// Companion handshake: the ARM host sleeps until woken, the companion
    /// signals completion through the semaphore.
    pub(super) fn handoff(&mut self) {
        match self.config.topology() {
            CoreTopology::SingleCore => {}
            CoreTopology::ArmHost => {
                if self.config.sleep {
                    if self.caps.require_sema_lpwken {
                        self.main(
                            Operation::write(
                                Register::named("MXC_PWRSEQ->lppwen"),
                                WriteOp::Or,
                                "0x400",
                            )
                            .with_comment("CPU1WKEN=1"),
                        );
                    }
                    // Simulation provides its own copy of the SDK helper.
                    let clear = if self.config.is_embedded() {
                        Callee::external("MXC_LP_ClearWakeStatus")
                    } else {
                        Callee::local("_MXC_LP_ClearWakeStatus")
                    };
                    self.main(Operation::call(clear, &[]));
                    self.main(
                        Operation::write(
                            Register::named("SCB->SCR"),
                            WriteOp::Or,
                            "SCB_SCR_SLEEPDEEP_Msk",
                        )
                        .with_comment("SLEEPDEEP=1"),
                    );
                }
                self.main(Operation::statement("__WFI();").with_comment("Let RISC-V run"));
            }
            CoreTopology::Companion => {
                if self.sdk_runtime() {
                    self.main(Operation::Blank);
                    self.main(Operation::comment("Signal the Cortex-M4"));
                    self.main(Operation::write(
                        Register::named("MXC_SEMA->irq0"),
                        WriteOp::Assign,
                        "MXC_F_SEMA_IRQ0_EN | MXC_F_SEMA_IRQ0_CM4_IRQ",
                    ));
                }
            }
        }
    }
}
