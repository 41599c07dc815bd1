//! End-to-end synthesis scenarios.

use cnnsynth_codegen::{
    synthesize, CameraConfig, Configuration, ConfigurationBuilder, CoreTopology, ExecutionTarget,
    FcWeights, OutputLayout, OutputWidth, PixelFormat, ResultRetrieval, Sink, Stage,
    SynthesisInputs, SynthesisOutput, WaitMode,
};
use cnnsynth_device::CapabilityDescriptor;

fn embedded() -> ConfigurationBuilder {
    Configuration::builder()
        .target(ExecutionTarget::Embedded)
        .groups([0, 1, 2, 3])
}

fn run(builder: ConfigurationBuilder, caps: &CapabilityDescriptor) -> SynthesisOutput {
    run_with(builder, caps, &SynthesisInputs::default())
}

fn run_with(
    builder: ConfigurationBuilder,
    caps: &CapabilityDescriptor,
    inputs: &SynthesisInputs,
) -> SynthesisOutput {
    let config = builder.build().expect("valid configuration");
    synthesize(&config, caps, inputs).expect("synthesis")
}

fn main_text(out: &SynthesisOutput) -> &str {
    out.stream(Sink::Main).expect("main stream")
}

/// Byte offset of `needle` in `text`, searching from `from`.
fn find_from(text: &str, from: usize, needle: &str) -> usize {
    match text[from..].find(needle) {
        Some(pos) => from + pos,
        None => panic!("`{needle}` not found after offset {from} in:\n{text}"),
    }
}

/// Assert the needles occur in `text` in the given order.
fn assert_in_order(text: &str, needles: &[&str]) {
    let mut cursor = 0;
    for needle in needles {
        cursor = find_from(text, cursor, needle) + needle.len();
    }
}

/// Element count of the `#define name { ... }` literal in `text`.
fn literal_len(text: &str, name: &str) -> usize {
    let start = find_from(text, 0, &format!("#define {name} {{"));
    let open = find_from(text, start, "{") + 1;
    let close = find_from(text, open, "}");
    text[open..close]
        .split(',')
        .filter(|s| !s.replace('\\', "").trim().is_empty())
        .count()
}

fn fc_inputs(rows: usize, cols: usize) -> SynthesisInputs {
    let values = (0..rows * cols).map(|v| (v % 7) as i64 - 3).collect();
    SynthesisInputs {
        fc_weights: Some(FcWeights::new(rows, cols, values).expect("shape")),
        fc_bias: Some(vec![1; rows]),
        fc_expected: Some((0..rows as i64).collect()),
    }
}

#[test]
fn synthesis_is_deterministic() {
    let caps = CapabilityDescriptor::ai85();
    let builder = || {
        embedded()
            .master(Some(0))
            .oneshot(2)
            .retrieval(ResultRetrieval::FullyConnected)
    };
    let a = run_with(builder(), &caps, &fc_inputs(10, 8));
    let b = run_with(builder(), &caps, &fc_inputs(10, 8));

    assert_eq!(a.streams, b.streams);
    for sink in Sink::ALL {
        assert_eq!(a.report.digest(sink), b.report.digest(sink));
    }
}

#[test]
fn every_stream_is_balanced() {
    let caps = CapabilityDescriptor::ai87();
    let configs = [
        embedded(),
        embedded().layout(OutputLayout::SplitApi).master(Some(1)).stop_start(true),
        embedded().topology(CoreTopology::Companion),
        embedded().topology(CoreTopology::ArmHost),
        Configuration::builder().groups([0, 2]),
    ];
    for builder in configs {
        let out = run(builder, &caps);
        for (sink, text) in &out.streams {
            assert_eq!(
                text.matches('{').count(),
                text.matches('}').count(),
                "unbalanced braces on {sink}:\n{text}"
            );
        }
        for func in &out.report.functions {
            let text = out.stream(func.sink).expect("function sink");
            assert!(
                text.contains(&format!(" {}(", func.name)),
                "{} missing from {}",
                func.name,
                func.sink
            );
        }
    }
}

#[test]
fn embedded_single_core_phase_order() {
    let out = run(embedded().groups([0]), &CapabilityDescriptor::ai85());
    let main = main_text(&out);

    assert_in_order(
        main,
        &[
            "#include <stdlib.h>",
            "void fail(void)",
            "void CNN_ISR(void)",
            "int main(void)",
            "MXC_ICC_Enable(MXC_ICC0);",
            "MXC_SYS_Clock_Select(MXC_SYS_CLOCK_IPO);",
            "MXC_BBFC->reg0 = 0x1; // Power",
            "MXC_S_GCR_PCLKDIV_CNNCLKSEL_PCLK",
            "cnn_init();",
            "cnn_load_weights();",
            "if (cnn_configure() != CNN_OK) fail();",
            "load_input();",
            "cnn_start();",
            "while (cnn_time == 0)",
            "if (check_output() != CNN_OK) fail();",
            "cnn_unload((uint32_t *) ml_data32);",
            "MXC_BBFC->reg0 = 0x0; // Power",
            "return 0;",
        ],
    );
    assert_eq!(out.report.final_stage, Stage::TornDown);
    assert!(out.stream(Sink::Api).is_none());
}

#[test]
fn camera_selects_one_data_width() {
    let caps = CapabilityDescriptor::ai85();
    let formats = [
        (PixelFormat::Rgb555, "10BIT"),
        (PixelFormat::Rgb565, "12BIT"),
        (PixelFormat::Rgb888, "8BIT"),
    ];
    for (format, width) in formats {
        let camera = CameraConfig {
            format,
            channels: 3,
        };
        let out = run(embedded().camera(Some(camera)), &caps);
        let main = main_text(&out);
        let data_width = format!("MXC_S_CAMERAIF_CTRL_DATA_WIDTH_{width}");

        assert_in_order(
            main,
            &[
                "MXC_SYS_Clock_Select(MXC_SYS_CLOCK_IPO);",
                "enable_pcif_clock();",
                "set_pcif_gpio_altf();",
                data_width.as_str(),
                "MXC_F_CAMERAIF_CTRL_THREE_CH_EN",
                "MXC_BBFC->reg3 = 0xf; // Reset",
            ],
        );
        assert_eq!(main.matches("MXC_S_CAMERAIF_CTRL_DATA_WIDTH_").count(), 1);
    }

    let out = run(embedded(), &caps);
    assert!(!main_text(&out).contains("pcif"));
}

#[test]
fn power_down_mirrors_power_up() {
    let out = run(embedded().groups([1, 3]), &CapabilityDescriptor::ai85());
    let main = main_text(&out);

    assert_eq!(main.matches("MXC_BBFC->reg").count(), 10);
    assert_in_order(
        main,
        &[
            "MXC_BBFC->reg3 = 0xf; // Reset",
            "MXC_BBFC->reg1 = 0xa; // Mask memory",
            "MXC_BBFC->reg0 = 0xa; // Power",
            "MXC_BBFC->reg2 = 0x5; // Iso",
            "MXC_BBFC->reg3 = 0x0; // Reset",
            "MXC_BBFC->reg3 = 0xf; // Reset",
            "MXC_BBFC->reg1 = 0x0; // Mask memory",
            "MXC_BBFC->reg0 = 0x0; // Power",
            "MXC_BBFC->reg2 = 0xf; // Iso",
            "MXC_BBFC->reg3 = 0x0; // Reset",
        ],
    );
}

#[test]
fn pll_clocks_inference_then_switches_back() {
    let out = run(embedded().pll(true), &CapabilityDescriptor::ai87());
    let main = main_text(&out);

    assert_in_order(
        main,
        &[
            "MXC_GCR->ito_ctrl |= MXC_F_GCR_ITO_CTRL_EN; // Enable PLL (ITO)",
            "MXC_GCFR->reg",
            "// CNN clock: PLL div 1",
            "while ((MXC_GCR->ito_ctrl & MXC_F_GCR_ITO_CTRL_RDY) != MXC_F_GCR_ITO_CTRL_RDY) ;",
            "MXC_S_GCR_PCLKDIV_CNNCLKSEL_ITO;",
            "cnn_start();",
            "while (cnn_time == 0)",
            "// Switch CNN clock and disable PLL",
            "MXC_S_GCR_PCLKDIV_CNNCLKSEL_PCLK;",
            "MXC_GCR->ito_ctrl &= ~MXC_F_GCR_ITO_CTRL_EN;",
            "cnn_unload(",
        ],
    );
    // Only the switch to the PLL waits for it to settle.
    assert_eq!(main.matches("MXC_F_GCR_ITO_CTRL_RDY) !=").count(), 1);

    let out = run(embedded(), &CapabilityDescriptor::ai87());
    assert!(!main_text(&out).contains("ito_ctrl"));
}

#[test]
fn spin_wait_at_every_site() {
    let out = run(
        embedded().wait_mode(WaitMode::Spin).master(Some(0)).oneshot(2),
        &CapabilityDescriptor::ai85(),
    );
    let main = main_text(&out);

    assert_eq!(main.matches("while (cnn_time == 0); // Spin wait").count(), 2);
    let started = find_from(main, 0, "cnn_start();");
    assert!(!main[started..].contains("__WFI()"));
    assert_in_order(
        main,
        &[
            "cnn_start();",
            "while (cnn_time == 0); // Spin wait",
            "cnn_continue();",
            "while (cnn_time == 0); // Spin wait",
        ],
    );

    let out = run(embedded(), &CapabilityDescriptor::ai85());
    assert!(!main_text(&out).contains("Spin wait"));
}

#[test]
fn bare_metal_host_only_boots_companion() {
    let out = run(
        Configuration::builder()
            .target(ExecutionTarget::BareMetalArm)
            .topology(CoreTopology::ArmHost)
            .boot_from_flash_cache(true)
            .groups([0, 1]),
        &CapabilityDescriptor::ai87(),
    );
    let main = main_text(&out);

    assert_in_order(
        main,
        &[
            "#include \"mxc.h\"",
            "#include \"fcr_regs.h\"",
            "#include \"sema_regs.h\"",
            "extern volatile void const *__FlashStart_; // Defined in linker file",
            "void WakeISR(void)",
            "int main(void)",
            "MXC_FCR->urvbootaddr = (uint32_t) &__FlashStart_; // Set RISC-V boot address",
            "NVIC_SetVector(RISCV_IRQn, WakeISR); // Set wakeup ISR",
            "MXC_SYS_ClockEnable(MXC_SYS_PERIPH_CLOCK_CPU1); // Enable RISC-V clock",
            "__WFI(); // Let RISC-V run",
        ],
    );
    for absent in ["global_functions.h", "CNN_FAIL", "MXC_GCFR->reg", "cnn_start", "void fail(void)"] {
        assert!(!main.contains(absent), "unexpected `{absent}`");
    }

    let handoff = find_from(main, 0, "__WFI(); // Let RISC-V run");
    let tail: Vec<&str> = main[handoff..]
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    assert_eq!(tail, ["return 0;", "}"]);
    assert_eq!(out.report.final_stage, Stage::Delegated);
}

#[test]
fn fifo_starts_before_loading() {
    let out = run(embedded().fifo(true), &CapabilityDescriptor::ai85());
    assert_in_order(
        main_text(&out),
        &["cnn_start(); // Start CNN processing", "load_input(); // Load data input via FIFO"],
    );

    let out = run(embedded(), &CapabilityDescriptor::ai85());
    assert_in_order(
        main_text(&out),
        &["load_input(); // Load data input", "cnn_start(); // Start CNN processing"],
    );
}

#[test]
fn oneshot_repeats_continue() {
    let out = run(
        embedded().master(Some(0)).oneshot(3),
        &CapabilityDescriptor::ai85(),
    );
    let main = main_text(&out);

    assert!(main.contains("int cnn_continue(void)"));
    assert!(main.contains("  for (i = 0; i < 3; i++) {\n    cnn_continue();\n"));
    let running = out
        .report
        .stages
        .iter()
        .filter(|s| **s == Stage::Running)
        .count();
    assert_eq!(running, 2);
}

#[test]
fn softmax_on_wide_output() {
    let out = run(
        embedded()
            .retrieval(ResultRetrieval::SoftmaxOnly)
            .output_width(OutputWidth::W32),
        &CapabilityDescriptor::ai85(),
    );
    let main = main_text(&out);

    assert!(main.contains("softmax_q17p14_q15((const q31_t *) ml_data, CNN_NUM_OUTPUTS, ml_softmax);"));
    assert!(main.contains("void softmax_layer(void)"));
    assert_in_order(main, &["softmax_layer();", "Classification results"]);
    assert!(!main.contains("fc_layer"));
    assert!(out.report.warnings.is_empty());
}

#[test]
fn retrieval_paths_are_exclusive() {
    let caps = CapabilityDescriptor::ai85();

    let unload = run(embedded(), &caps);
    let main = main_text(&unload);
    assert!(!main.contains("fc_layer") && !main.contains("softmax_layer"));
    assert!(!main.contains("Classification results"));

    let fc = run_with(
        embedded().retrieval(ResultRetrieval::FullyConnected),
        &caps,
        &fc_inputs(4, 4),
    );
    let main = main_text(&fc);
    assert!(main.contains("fc_layer();"));
    assert!(!main.contains("softmax_layer"));
    // Only the layer itself unloads.
    assert_eq!(main.matches("cnn_unload(").count(), 1);
    assert!(main.contains("if (fc_verify() != CNN_OK) fail();"));
}

#[test]
fn classification_literal_counts() {
    let out = run_with(
        embedded().retrieval(ResultRetrieval::FullyConnected),
        &CapabilityDescriptor::ai85(),
        &fc_inputs(10, 36),
    );
    let weights = out.stream(Sink::Weights).expect("weights stream");
    assert_eq!(literal_len(weights, "FC_WEIGHTS"), 360);
    assert_eq!(literal_len(weights, "FC_BIAS"), 10);
    let sample = out.stream(Sink::SampleData).expect("sample stream");
    assert_eq!(literal_len(sample, "FC_EXPECTED"), 10);
    assert!(main_text(&out).contains("#define FC_IN 36"));
}

#[test]
fn split_layout_routes_to_api() {
    let out = run(
        embedded().layout(OutputLayout::SplitApi),
        &CapabilityDescriptor::ai85(),
    );
    let main = main_text(&out);
    let api = out.stream(Sink::Api).expect("api stream");

    assert!(main.contains(
        "cnn_enable(MXC_S_GCR_PCLKDIV_CNNCLKSEL_PCLK, MXC_S_GCR_PCLKDIV_CNNCLKDIV_DIV1);"
    ));
    assert!(main.contains("cnn_disable();"));
    assert!(!main.contains("MXC_BBFC->reg"));
    assert!(api.contains("int cnn_enable(uint32_t clock_source, uint32_t clock_divider)"));
    assert!(api.contains("int cnn_disable(void)"));
    assert!(api.contains("void CNN_ISR(void)"));
    assert!(api.contains("#include \"bbfc_regs.h\""));

    let on_api = |name: &str| {
        out.report
            .functions
            .iter()
            .any(|f| f.name == name && f.sink == Sink::Api)
    };
    assert!(on_api("cnn_enable") && on_api("cnn_disable") && on_api("CNN_ISR"));
}

#[test]
fn energy_measurement_loops() {
    let out = run(
        embedded().layout(OutputLayout::SplitApi).measure_energy(true),
        &CapabilityDescriptor::ai85(),
    );
    let main = main_text(&out);

    assert_in_order(
        main,
        &[
            "Measuring system base power...",
            "SYS_START;",
            "SYS_COMPLETE;",
            "cnn_enable(",
            "Measuring weight loading...",
            "for (i = 0; i < 100; i++) {",
            "cnn_load_weights();",
            "CNN_COMPLETE;",
            "Measuring input loading...",
            "Measuring input load + inference...",
            "cnn_start(); // Run inference",
            "CNN_COMPLETE;",
        ],
    );
    assert_eq!(main.matches("for (i = 0; i < 100; i++) {").count(), 3);
    assert_eq!(out.report.final_stage, Stage::TornDown);
}

#[test]
fn fail_indicator_drives_gpio() {
    let caps = CapabilityDescriptor::ai85();

    let out = run(embedded().fail_indicator(true), &caps);
    assert_in_order(
        main_text(&out),
        &[
            "void fail(void)",
            "gpio_out.mask = MXC_GPIO_PIN_4;",
            "MXC_GPIO_OutSet(gpio_out.port, gpio_out.mask);",
            "*** FAIL ***",
        ],
    );

    let out = run(embedded(), &caps);
    assert!(!main_text(&out).contains("MXC_GPIO_PIN_4"));
}

#[test]
fn arm_host_delegates_to_companion() {
    let out = run(
        embedded().topology(CoreTopology::ArmHost).sleep(true),
        &CapabilityDescriptor::ai87(),
    );
    let main = main_text(&out);

    assert_eq!(out.report.final_stage, Stage::Delegated);
    assert!(main.contains("void WakeISR(void)"));
    assert!(main.contains("WakeISR);"));
    assert!(main.contains("MXC_PWRSEQ->lppwen |= 0x400;"));
    assert_in_order(main, &["MXC_LP_ClearWakeStatus();", "__WFI(); // Let RISC-V run"]);
    assert!(!main.contains("cnn_init"));
    assert!(!main.contains("CNN_ISR"));
}

#[test]
fn companion_owns_accelerator() {
    let out = run(
        embedded().topology(CoreTopology::Companion),
        &CapabilityDescriptor::ai85(),
    );
    let main = main_text(&out);

    assert!(main.contains("CNN_IRQHandler"));
    assert!(main.contains("NVIC_EnableEVENT(CNN_IRQn);"));
    assert!(main.contains("MXC_SEMA->irq0 = MXC_F_SEMA_IRQ0_EN | MXC_F_SEMA_IRQ0_CM4_IRQ;"));
    assert!(!main.contains("WakeISR"));
    assert!(!main.contains("MXC_ICC_Enable(MXC_ICC0)"));
    assert_eq!(out.report.final_stage, Stage::TornDown);
}

#[test]
fn legacy_simulation_polls() {
    let out = run(
        Configuration::builder().groups([0]),
        &CapabilityDescriptor::ai84(),
    );
    let main = main_text(&out);

    assert!(main.contains("#include \"global_functions.h\" // For RTL Simulation"));
    assert!(main.contains("void cnn_wait(void)"));
    assert!(main.contains("  cnn_wait();\n"));
    assert!(main.contains("if (cnn_configure() != CNN_OK) { fail(); pass(); return 0; }"));
    assert_in_order(main, &["pass();", "return 0;"]);
    assert!(!main.contains("cnn_time"));
}

#[test]
fn forever_never_tears_down() {
    let out = run(embedded().forever(true), &CapabilityDescriptor::ai85());
    let main = main_text(&out);

    assert_eq!(out.report.final_stage, Stage::LoopingForever);
    assert_in_order(main, &["while (1) {", "cnn_start();"]);
    assert!(!main.contains("Disable power to CNN"));
}

#[test]
fn write_to_directory() {
    let out = run_with(
        embedded()
            .retrieval(ResultRetrieval::FullyConnected)
            .weights_header("fc_weights.h"),
        &CapabilityDescriptor::ai85(),
        &fc_inputs(4, 4),
    );
    let dir = tempfile::tempdir().expect("tempdir");
    let written = out.write_to(&dir.path().join("out")).expect("write");

    assert_eq!(written.len(), out.streams.len());
    let main = std::fs::read_to_string(dir.path().join("out/main.c")).expect("main.c");
    assert_eq!(main, main_text(&out));
    assert!(dir.path().join("out/fc_weights.h").exists());
    assert!(dir.path().join("out/sampledata.h").exists());
}
