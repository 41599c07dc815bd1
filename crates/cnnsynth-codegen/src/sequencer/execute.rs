//! Phases 5 to 7: load and configure, execute, result retrieval.

use crate::classify::{unload_call, ClassificationBackend};
use crate::clock::{select_clock, ClockDivider, ClockSource};
use crate::emitter::{FunctionSignature, Return, Sink};
use crate::error::Result;
use crate::lifecycle::Stage;
use crate::op::{Callee, Operation, Register, WriteOp};

use super::{gpio_output, Level, Route, Sequencer};

/// Iterations of each energy-measurement loop.
const ENERGY_LOOPS: u32 = 100;

fn load_weights() -> Operation {
    Operation::call_external("cnn_load_weights").with_comment("Load kernels")
}

impl Sequencer<'_> {
    /// Input load and start, ordered for the FIFO or the memory path.
    fn load_and_start(&self, start_comment: &str) -> Vec<Operation> {
        let start = Operation::call_external("cnn_start").with_comment(start_comment);
        if self.config.fifo {
            vec![
                start,
                Operation::call_external("load_input").with_comment("Load data input via FIFO"),
            ]
        } else {
            vec![
                Operation::call_external("load_input").with_comment("Load data input"),
                start,
            ]
        }
    }

    pub(super) fn load_and_configure(&mut self) -> Result<()> {
        let cfg = self.config;
        if cfg.is_embedded() {
            self.main(Operation::statement(r#"printf("\n*** CNN Inference Test ***\n");"#));
            self.main(Operation::Blank);
        }
        self.main(
            Operation::call_external("cnn_init")
                .with_comment("Bring state machine into consistent state"),
        );

        if cfg.measure_energy {
            if cfg.pll {
                self.main_all(select_clock(
                    ClockSource::Ito,
                    ClockDivider::Fixed(1),
                    Some("Switch CNN clock to PLL (ITO)"),
                    self.caps,
                ));
            }
            self.main(Operation::Blank);
            self.main(Operation::statement(r#"printf("Measuring weight loading...\n");"#));
            self.main(Operation::statement("CNN_START;"));
            self.main(Operation::Repeat {
                count: ENERGY_LOOPS,
                body: vec![load_weights()],
            });
            self.main(Operation::statement("CNN_COMPLETE;"));
            self.main(Operation::Blank);
            self.main(Operation::statement(r#"printf("Measuring input loading...\n");"#));
            self.main(Operation::call(
                Callee::external("MXC_TMR_Delay"),
                &["MXC_TMR0", "500000"],
            ));
            self.main(Operation::statement("CNN_START;"));
            self.main(Operation::Repeat {
                count: ENERGY_LOOPS,
                body: vec![Operation::call_external("load_input").with_comment("Load data input")],
            });
            self.main(Operation::statement("CNN_COMPLETE;"));
            self.main(Operation::Blank);
        } else if cfg.load_kernels {
            self.main(load_weights());
        } else {
            self.main(Operation::comment("Kernels are pre-loaded"));
        }

        if cfg.verify_kernels {
            self.check(Callee::external("cnn_verify_weights"))?;
        }
        if cfg.bias {
            self.main(Operation::call_external("cnn_load_bias"));
        } else if cfg.is_embedded() {
            self.main(Operation::comment("cnn_load_bias(); // Not used in this network"));
        } else {
            self.main(Operation::comment("No bias values"));
        }
        self.check(Callee::external("cnn_configure"))?;
        self.lifecycle.advance(Stage::Configured)
    }

    pub(super) fn execute(&mut self) -> Result<()> {
        let cfg = self.config;
        if !cfg.measure_energy {
            let ops = self.load_and_start("Start CNN processing");
            self.main_all(ops);
            self.lifecycle.advance(Stage::Running)?;
            self.main(Operation::Blank);
        }

        if cfg.stop_start {
            self.main(Operation::call_local("cnn_stop"));
            self.main(Operation::call_local("cnn_continue"));
            self.main(Operation::Blank);
        }

        if cfg.measure_energy {
            self.main(Operation::statement(
                r#"printf("Measuring input load + inference...\n");"#,
            ));
            self.main(Operation::call(
                Callee::external("MXC_TMR_Delay"),
                &["MXC_TMR0", "500000"],
            ));
            self.main(
                Operation::statement("CNN_START;").with_comment("Allow capture of processing time"),
            );
            let mut body = self.load_and_start("Run inference");
            body.push(self.completion_wait());
            self.main(Operation::Repeat {
                count: ENERGY_LOOPS,
                body,
            });
            self.main(Operation::statement("CNN_COMPLETE;"));
            self.main(Operation::Blank);
            self.lifecycle.advance(Stage::Running)?;
        } else {
            let wait = self.completion_wait();
            self.main(wait);
            self.main(Operation::Blank);
        }

        if cfg.oneshot > 0 {
            let body = vec![Operation::call_local("cnn_continue"), self.completion_wait()];
            self.main(Operation::Repeat {
                count: cfg.oneshot,
                body,
            });
            self.main(Operation::Blank);
            self.lifecycle.advance(Stage::Running)?;
        }
        self.lifecycle.advance(Stage::Complete)?;

        if cfg.pll {
            self.main_all(select_clock(
                ClockSource::Pclk,
                ClockDivider::Fixed(1),
                Some("Switch CNN clock and disable PLL"),
                self.caps,
            ));
            self.main(Operation::write(
                Register::named("MXC_GCR->ito_ctrl"),
                WriteOp::And,
                "~MXC_F_GCR_ITO_CTRL_EN",
            ));
            self.main(Operation::Blank);
        }
        self.boost_off()
    }

    fn boost_off(&mut self) -> Result<()> {
        let route = self.route();
        if route == Route::Api {
            self.emitter.function(
                Sink::Api,
                FunctionSignature::new(
                    "int",
                    "cnn_boost_disable",
                    "mxc_gpio_regs_t *port, uint32_t pin",
                ),
                gpio_output("port", "pin", Level::Low),
                Return::ok(),
            )?;
        }
        if self.config.forever {
            return Ok(());
        }
        let Some(boost) = self.config.boost else {
            return Ok(());
        };
        match route {
            Route::Inline => {
                self.main(Operation::comment("Turn off the CNN Boost"));
                self.main(Operation::call(
                    Callee::external("MXC_GPIO_OutClr"),
                    &["gpio_out.port", "gpio_out.mask"],
                ));
            }
            Route::Api => self.main(
                Operation::call(
                    Callee::local("cnn_boost_disable"),
                    &[
                        format!("MXC_GPIO{}", boost.port).as_str(),
                        format!("MXC_GPIO_PIN_{}", boost.pin).as_str(),
                    ],
                )
                .with_comment("Turn off the boost circuit"),
            ),
        }
        self.main(Operation::Blank);
        Ok(())
    }

    pub(super) fn retrieve(&mut self) -> Result<()> {
        let cfg = self.config;
        if cfg.verify_output {
            self.check(Callee::external("check_output"))?;
        }
        match ClassificationBackend::for_retrieval(cfg.retrieval()) {
            Some(backend) => self.main(Operation::call_local(backend.function_name())),
            None => self.main(unload_call(cfg.output_width())),
        }
        if self.inputs.fc_expected.is_some() {
            self.check(Callee::local("fc_verify"))?;
        }

        if cfg.is_embedded() {
            let what = if cfg.fifo {
                "data loading and inference"
            } else {
                "inference"
            };
            self.main(Operation::Blank);
            self.main(Operation::statement(r#"printf("\n*** PASS ***\n\n");"#));
            self.main(Operation::Blank);
            self.main(Operation::verbatim(format!(
                "#ifdef CNN_INFERENCE_TIMER\n\
                 printf(\"Approximate {what} time: %d us\\n\\n\", cnn_time);\n\
                 #endif"
            )));
            self.main(Operation::Blank);
            if cfg.measure_energy {
                self.main(Operation::statement(
                    r#"printf("See monitor display for inference energy.\n\n");"#,
                ));
                self.main(Operation::Blank);
            }
        }
        Ok(())
    }
}
