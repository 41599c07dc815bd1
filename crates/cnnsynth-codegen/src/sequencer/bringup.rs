//! Phases 2 to 4: core, camera and accelerator bring-up.

use cnnsynth_device::PowerController;

use crate::clock::{select_clock, ClockDivider, ClockSource};
use crate::config::{ClockTrim, CoreTopology};
use crate::emitter::{FunctionSignature, Return, Sink};
use crate::error::Result;
use crate::op::{Callee, Operation, Register, WriteOp};
use crate::power::{power_sequence, PowerDirection};

use super::{gpio_output, Level, Route, Sequencer};

const TME: u32 = 0x4000_0c00;
const TRIM_HIRC: u32 = 0x4000_5420;
const TRIM_HIRC96M_LIMIT: u32 = 0x4000_5440;
const TRIM_HIRC96M: u32 = 0x4000_6c04;
const NBBFC_SRAM_CTRL: u32 = 0x4000_0814;

fn addr(address: u32, op: WriteOp, value: impl Into<String>) -> Operation {
    Operation::write(Register::Address(address), op, value)
}

fn named(register: &str, op: WriteOp, value: impl Into<String>) -> Operation {
    Operation::write(Register::named(register), op, value)
}

fn debugger_settle(seconds: u32) -> [Operation; 2] {
    [
        Operation::comment("DO NOT DELETE THIS LINE:"),
        Operation::call(Callee::external("MXC_Delay"), &[format!("SEC({seconds})").as_str()])
            .with_comment("Let debugger interrupt if needed"),
    ]
}

impl Sequencer<'_> {
    pub(super) fn core_bringup(&mut self) -> Result<()> {
        match self.config.topology() {
            CoreTopology::SingleCore | CoreTopology::ArmHost => {
                if self.config.target().uses_sdk() {
                    self.sdk_core_clock();
                } else {
                    self.simulation_core_clock();
                }
                if self.config.topology() == CoreTopology::ArmHost {
                    self.boot_companion()?;
                } else if self.config.target().uses_sdk() && self.config.debug_wait > 0 {
                    self.main(Operation::Blank);
                    self.main(Operation::statement(r#"printf("Waiting...\n");"#));
                    self.main(Operation::Blank);
                    self.main_all(debugger_settle(self.config.debug_wait));
                }
                self.main(Operation::Blank);
            }
            CoreTopology::Companion => {
                if self.config.jtag_debug && self.config.is_embedded() {
                    self.main(Operation::call_external("Debug_Init").with_comment("Set up RISCV JTAG"));
                }
                if self.config.boot_from_flash_cache {
                    if self.config.is_embedded() {
                        self.main(
                            Operation::call(Callee::external("MXC_ICC_Enable"), &["MXC_ICC1"])
                                .with_comment("Enable cache"),
                        );
                    } else {
                        self.main(Operation::call_external("icache1_enable"));
                        self.main(Operation::call_external("invalidate_icache1"));
                    }
                    self.main(Operation::Blank);
                }
            }
        }
        Ok(())
    }

    fn sdk_core_clock(&mut self) {
        if self.caps.family.is_legacy() {
            self.main(Operation::call_external("icache_enable"));
            self.main(Operation::Blank);
            self.main(Operation::call(
                Callee::external("SYS_ClockEnable"),
                &["SYS_PERIPH_CLOCK_AI"],
            ));
            return;
        }

        self.main(
            Operation::call(Callee::external("MXC_ICC_Enable"), &["MXC_ICC0"])
                .with_comment("Enable cache"),
        );
        self.main(Operation::Blank);
        if let (true, Some(trim)) = (self.applies_clock_trim(), self.config.clock_trim) {
            self.main_all(clock_trim(&trim));
        }
        self.main(Operation::comment(format!(
            "Switch to {} MHz clock",
            self.caps.clocks.ipo_mhz
        )));
        self.main(Operation::call(
            Callee::external("MXC_SYS_Clock_Select"),
            &["MXC_SYS_CLOCK_IPO"],
        ));
        if self.config.pll {
            self.main(
                named("MXC_GCR->ito_ctrl", WriteOp::Or, "MXC_F_GCR_ITO_CTRL_EN")
                    .with_comment("Enable PLL (ITO)"),
            );
        }
        self.main(Operation::call_external("SystemCoreClockUpdate"));
    }

    fn simulation_core_clock(&mut self) {
        self.main(Operation::call_external("icache_enable"));
        self.main(Operation::Blank);
        if self.caps.family.is_legacy() {
            self.main(named("MXC_GCR->perckcn1", WriteOp::And, "~0x20").with_comment("Enable CNN clock"));
            return;
        }

        self.main(addr(TME, WriteOp::Assign, "0x00000001").with_comment("Set TME"));
        self.main(addr(TRIM_HIRC96M, WriteOp::Assign, "0x000001a0").with_comment("96M trim"));
        self.main(addr(TME, WriteOp::Assign, "0x00000000").with_comment("Clear TME"));
        self.main(Operation::Blank);

        let legacy_power_up = !self.caps.modern_sim;
        match self.caps.power_controller {
            PowerController::Gcfr => {
                self.main(
                    named("MXC_GCR->clkctrl", WriteOp::Or, "MXC_F_GCR_CLKCTRL_IPO_EN")
                        .with_comment("Enable internal primary osc (IPO)"),
                );
                if self.config.pll {
                    self.main(
                        named("MXC_GCR->ito_ctrl", WriteOp::Or, "MXC_F_GCR_ITO_CTRL_EN")
                            .with_comment("Enable PLL (ITO)"),
                    );
                }
                self.main(
                    Operation::wait_until("(MXC_GCR->clkctrl & MXC_F_GCR_CLKCTRL_IPO_RDY) == 0")
                        .with_comment("Wait for osc"),
                );
                self.main(
                    named("MXC_GCR->clkctrl", WriteOp::Or, "MXC_S_GCR_CLKCTRL_SYSCLK_SEL_IPO")
                        .with_comment("Select osc"),
                );
                if legacy_power_up {
                    self.main(Operation::Blank);
                    self.main_all(power_sequence(
                        self.caps.power_controller,
                        PowerDirection::Up,
                        &self.groups,
                    ));
                    self.main(Operation::Blank);
                    self.main_all(select_clock(
                        ClockSource::Pclk,
                        ClockDivider::Fixed(1),
                        Some("CNN clock: APB div 1"),
                        self.caps,
                    ));
                    self.main(
                        named("MXC_GCR->pclkdis0", WriteOp::And, "~MXC_F_GCR_PCLKDIS0_CNN")
                            .with_comment("Enable CNN clock"),
                    );
                }
            }
            PowerController::Bbfc => {
                self.main(
                    named("MXC_GCR->clkcn", WriteOp::Or, "MXC_F_GCR_CLKCN_HIRC96M_EN")
                        .with_comment("Enable 96M"),
                );
                self.main(
                    Operation::wait_until("(MXC_GCR->clkcn & MXC_F_GCR_CLKCN_HIRC96M_RDY) == 0")
                        .with_comment("Wait for 96M"),
                );
                self.main(
                    named("MXC_GCR->clkcn", WriteOp::Or, "MXC_S_GCR_CLKCN_CLKSEL_HIRC96")
                        .with_comment("Select 96M"),
                );
                if legacy_power_up {
                    self.main(Operation::Blank);
                    self.main_all(power_sequence(
                        self.caps.power_controller,
                        PowerDirection::Up,
                        &self.groups,
                    ));
                    self.main(Operation::Blank);
                    self.main(
                        named("MXC_GCR->pckdiv", WriteOp::Assign, "0x00010000")
                            .with_comment("CNN clock 96M div 2"),
                    );
                    self.main(
                        named("MXC_GCR->perckcn", WriteOp::And, "~0x2000000")
                            .with_comment("Enable CNN clock"),
                    );
                }
            }
        }
    }

    /// ARM side of a dual-core program: point the companion at its code,
    /// arm the wake-up path and release it.
    fn boot_companion(&mut self) -> Result<()> {
        let memory = self.companion_memory()?;
        let cfg = self.config;
        let sdk = cfg.target().uses_sdk();
        let modern = self.caps.modern_sim;

        if cfg.boot_from_flash_cache {
            if sdk {
                self.main(Operation::Blank);
                self.main(
                    named("MXC_FCR->urvbootaddr", WriteOp::Assign, "(uint32_t) &__FlashStart_")
                        .with_comment("Set RISC-V boot address"),
                );
            } else if modern {
                self.main(
                    named(
                        "MXC_FCR->urvbootaddr",
                        WriteOp::Assign,
                        format!("0x{:08x}", memory.code_origin),
                    )
                    .with_comment("Set RISC-V boot address"),
                );
            } else {
                self.main(
                    named(
                        "MXC_NBBFC->reg4",
                        WriteOp::Assign,
                        format!("0x{:08x}", memory.code_origin),
                    )
                    .with_comment("Set RISC-V boot address"),
                );
            }
        } else if modern {
            self.main(
                named(
                    "MXC_FCR->urvbootaddr",
                    WriteOp::Assign,
                    format!("0x{:08x}", memory.sram_origin),
                )
                .with_comment("Set RISC-V boot address"),
            );
        }

        if cfg.exclusive_sram {
            if sdk || modern {
                self.main(
                    named("MXC_FCR->urvctrl", WriteOp::Or, "0x00000001")
                        .with_comment("Exclusive SRAM access for RISC-V"),
                );
            } else {
                self.main(
                    addr(NBBFC_SRAM_CTRL, WriteOp::Or, "0x00000001")
                        .with_comment("Exclusive SRAM access for RISC-V (MXC_NBBFC->reg5)"),
                );
            }
        }

        if self.hosts_wake_isr() {
            self.main(
                Operation::call(
                    Callee::external("MXC_SYS_ClockEnable"),
                    &["MXC_SYS_PERIPH_CLOCK_SMPHR"],
                )
                .with_comment("Enable Semaphore clock"),
            );
            self.main(Operation::InstallVector {
                irq: "RISCV_IRQn".into(),
                handler: "WakeISR".into(),
                comment: Some("Set wakeup ISR".into()),
            });
            if sdk && cfg.debug_wait > 0 {
                self.main(Operation::Blank);
                self.main_all(debugger_settle(cfg.debug_wait));
                self.main(Operation::Blank);
            }
            self.main(
                Operation::call(
                    Callee::external("MXC_SYS_ClockEnable"),
                    &["MXC_SYS_PERIPH_CLOCK_CPU1"],
                )
                .with_comment("Enable RISC-V clock"),
            );
        } else {
            self.main(
                named("MXC_GCR->perckcn1", WriteOp::And, "~MXC_F_GCR_PERCKCN1_CPU1")
                    .with_comment("Enable RISC-V clock"),
            );
        }
        Ok(())
    }

    pub(super) fn camera(&mut self) {
        let Some(camera) = self.config.camera else {
            return;
        };
        self.main(Operation::call_external("enable_pcif_clock").with_comment("Enable camera clock"));
        self.main(Operation::call_external("set_pcif_gpio_altf"));
        self.main(Operation::Blank);
        self.main(Operation::comment(format!(
            "Enable {} format single image in external timing mode",
            camera.format.label()
        )));

        let width = camera.format.data_width_bits();
        let three_channel = camera.channels == 3;
        let (register, mut fields) = if self.caps.modern_sim {
            (
                "MXC_PCIF->ctrl",
                vec![
                    "MXC_S_CAMERAIF_CTRL_READ_MODE_SINGLE_IMG".to_string(),
                    format!("MXC_S_CAMERAIF_CTRL_DATA_WIDTH_{width}BIT"),
                    "MXC_F_CAMERAIF_CTRL_PCIF_SYS".to_string(),
                ],
            )
        } else {
            (
                "MXC_CAMERAIF0->ctrl",
                vec![
                    "MXC_S_CAMERAIF_CTRL_READ_MODE_SINGLE_IMG".to_string(),
                    format!("MXC_S_CAMERAIF_CTRL_DATA_WIDTH_{width}BIT"),
                    "MXC_S_CAMERAIF_CTRL_DS_TIMING_EN_DIS".to_string(),
                    "MXC_S_CAMERAIF_CTRL_PCIF_SYS_EN_EN".to_string(),
                ],
            )
        };
        if three_channel {
            fields.push(if self.caps.modern_sim {
                "MXC_F_CAMERAIF_CTRL_THREE_CH_EN".to_string()
            } else {
                "(1<<30)".to_string()
            });
        }
        self.main(named(register, WriteOp::Assign, fields.join(" +\n")));
        self.main(Operation::Blank);
    }

    pub(super) fn accelerator_bringup(&mut self) -> Result<()> {
        if !self.sdk_runtime() {
            return Ok(());
        }
        let route = self.route();
        let body = route.body_sink();

        if self.config.measure_energy {
            self.measure_base_power();
        }

        if route == Route::Api {
            let (label, selector) = match self.caps.clocks.pll_mhz {
                Some(pll) if self.config.pll => (pll, "ITO"),
                _ => (self.caps.clocks.apb_mhz, "PCLK"),
            };
            self.main(Operation::comment(
                "Enable peripheral, enable CNN interrupt, turn on CNN clock",
            ));
            self.main(Operation::comment(format!("CNN clock: {label} MHz div 1")));
            self.main(Operation::call(
                Callee::local("cnn_enable"),
                &[
                    format!("MXC_S_GCR_PCLKDIV_CNNCLKSEL_{selector}").as_str(),
                    "MXC_S_GCR_PCLKDIV_CNNCLKDIV_DIV1",
                ],
            ));
            self.emitter.open(
                Sink::Api,
                FunctionSignature::new(
                    "int",
                    "cnn_enable",
                    "uint32_t clock_source, uint32_t clock_divider",
                ),
            )?;
        }

        let power_up = power_sequence(self.caps.power_controller, PowerDirection::Up, &self.groups);
        self.emitter.extend(body, power_up);
        self.emitter.push(body, Operation::Blank);
        let clock = match route {
            Route::Api => select_clock(ClockSource::Parameter, ClockDivider::Parameter, None, self.caps),
            Route::Inline if self.config.pll => select_clock(
                ClockSource::Ito,
                ClockDivider::Fixed(1),
                Some("CNN clock: PLL div 1"),
                self.caps,
            ),
            Route::Inline => select_clock(
                ClockSource::Pclk,
                ClockDivider::Fixed(1),
                Some("CNN clock: APB div 1"),
                self.caps,
            ),
        };
        self.emitter.extend(body, clock);
        self.emitter.push(
            body,
            Operation::call(
                Callee::external("MXC_SYS_ClockEnable"),
                &["MXC_SYS_PERIPH_CLOCK_CNN"],
            )
            .with_comment("Enable CNN clock"),
        );
        self.emitter.push(body, Operation::Blank);
        let vector = self.completion_vector();
        self.emitter.extend(body, vector);

        match route {
            Route::Api => {
                self.emitter.close(Sink::Api, Return::ok())?;
                self.emitter.function(
                    Sink::Api,
                    FunctionSignature::new(
                        "int",
                        "cnn_boost_enable",
                        "mxc_gpio_regs_t *port, uint32_t pin",
                    ),
                    gpio_output("port", "pin", Level::High),
                    Return::ok(),
                )?;
                if let Some(boost) = self.config.boost {
                    self.main(
                        Operation::call(
                            Callee::local("cnn_boost_enable"),
                            &[
                                format!("MXC_GPIO{}", boost.port).as_str(),
                                format!("MXC_GPIO_PIN_{}", boost.pin).as_str(),
                            ],
                        )
                        .with_comment("Turn on the boost circuit"),
                    );
                }
            }
            Route::Inline => {
                if let Some(boost) = self.config.boost {
                    self.main(Operation::Blank);
                    self.main(Operation::comment(format!(
                        "Configure P{}.{}, turn on the CNN Boost",
                        boost.port, boost.pin
                    )));
                    self.main_all(gpio_output(
                        &format!("MXC_GPIO{}", boost.port),
                        &format!("MXC_GPIO_PIN_{}", boost.pin),
                        Level::High,
                    ));
                }
            }
        }
        self.main(Operation::Blank);
        Ok(())
    }

    /// Interrupt registration: a vector on the primary core, evented IRQ on
    /// the companion.
    fn completion_vector(&self) -> Vec<Operation> {
        match self.config.topology() {
            CoreTopology::Companion => vec![
                Operation::comment("Set CNN complete vector"),
                Operation::call_external("__enable_irq"),
                Operation::call(Callee::external("NVIC_EnableIRQ"), &["CNN_IRQn"]),
                Operation::call(Callee::external("NVIC_EnableEVENT"), &["CNN_IRQn"]),
            ],
            CoreTopology::SingleCore | CoreTopology::ArmHost => vec![Operation::InstallVector {
                irq: "CNN_IRQn".into(),
                handler: "CNN_ISR".into(),
                comment: Some("Set CNN complete vector".into()),
            }],
        }
    }

    fn measure_base_power(&mut self) {
        self.main(
            Operation::call_local("cnn_disable").with_comment("Disable clock and power to CNN"),
        );
        self.main(Operation::comment("Enable primary clock"));
        self.main(Operation::call(
            Callee::external("MXC_SYS_ClockSourceEnable"),
            &["MXC_SYS_CLOCK_IPO"],
        ));
        self.main(Operation::Blank);
        self.main(Operation::statement(r#"printf("Measuring system base power...\n");"#));
        self.main(Operation::statement("SYS_START;"));
        match self.config.topology() {
            CoreTopology::Companion => self.main(Operation::call(
                Callee::external("MXC_TMR_Delay"),
                &["MXC_TMR0", "1000000"],
            )),
            CoreTopology::SingleCore | CoreTopology::ArmHost => {
                self.main(Operation::call(Callee::external("MXC_Delay"), &["SEC(1)"]))
            }
        }
        self.main(Operation::statement("SYS_COMPLETE;"));
    }
}

/// Manual trim override of the internal oscillators.
fn clock_trim(trim: &ClockTrim) -> Vec<Operation> {
    let mut ops = vec![
        Operation::comment("Manual clock trim override:"),
        addr(TME, WriteOp::Assign, "1").with_comment("Set TME"),
    ];
    if trim.hirc8m.is_some() || trim.hirc.is_some() {
        ops.push(Operation::statement(format!(
            "trim = *((volatile uint32_t *) 0x{TRIM_HIRC:08x});"
        )));
        if let Some(value) = trim.hirc8m {
            ops.push(Operation::statement("trim &= ~0xffff;"));
            ops.push(
                Operation::statement(format!("trim |= 0x{value:x};"))
                    .with_comment("HIRC8M (7.3728 MHz) trim"),
            );
        }
        if let Some(value) = trim.hirc {
            ops.push(Operation::statement("trim &= ~(0x1ff << 22);"));
            ops.push(
                Operation::statement(format!("trim |= 0x{value:x} << 22;"))
                    .with_comment("HIRC (60 MHz) trim"),
            );
        }
        ops.push(addr(TRIM_HIRC, WriteOp::Assign, "trim"));
    }
    if let Some(value) = trim.hirc96m {
        ops.push(Operation::statement(format!(
            "trim = *((volatile uint32_t *) 0x{TRIM_HIRC96M_LIMIT:08x}) & ~(0x1ff << 15);"
        )));
        ops.push(
            addr(TRIM_HIRC96M_LIMIT, WriteOp::Assign, "trim | (0xff << 15)").with_comment("HILIM"),
        );
        ops.push(
            addr(TRIM_HIRC96M, WriteOp::Assign, format!("0x{value:x}"))
                .with_comment("HIRC96M (100 MHz) trim"),
        );
    }
    ops.push(addr(TME, WriteOp::Assign, "0").with_comment("Clear TME"));
    ops.push(Operation::Blank);
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::render_all;

    #[test]
    fn trim_covers_only_requested_oscillators() {
        let text = render_all(
            &clock_trim(&ClockTrim {
                hirc8m: None,
                hirc: None,
                hirc96m: Some(0x1a0),
            }),
            1,
        );
        assert!(!text.contains("0x40005420"));
        assert!(text.contains("*((volatile uint32_t *) 0x40006c04) = 0x1a0; // HIRC96M (100 MHz) trim"));
        assert!(text.starts_with("  // Manual clock trim override:\n  *((volatile uint32_t *) 0x40000c00) = 1; // Set TME\n"));
        assert!(text.ends_with("= 0; // Clear TME\n\n"));
    }

    #[test]
    fn trim_shifts_hirc_field() {
        let text = render_all(
            &clock_trim(&ClockTrim {
                hirc8m: Some(0x12),
                hirc: Some(0x34),
                hirc96m: None,
            }),
            1,
        );
        assert!(text.contains("  trim |= 0x12; // HIRC8M (7.3728 MHz) trim\n"));
        assert!(text.contains("  trim |= 0x34 << 22; // HIRC (60 MHz) trim\n"));
        assert!(text.contains("*((volatile uint32_t *) 0x40005420) = trim;"));
    }

    #[test]
    fn debugger_settle_keeps_marker_comment() {
        let text = render_all(&debugger_settle(2), 1);
        assert_eq!(
            text,
            "  // DO NOT DELETE THIS LINE:\n  MXC_Delay(SEC(2)); // Let debugger interrupt if needed\n"
        );
    }
}
