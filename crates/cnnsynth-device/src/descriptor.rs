//! Capability descriptor model.
//!
//! Describes the fixed facts of one accelerator-bearing microcontroller:
//! where its CNN register file lives, which power-domain controller gates
//! the accelerator groups, and which optional hardware features exist.

use serde::{Deserialize, Serialize};

/// Accelerator generation. Selects between legacy and current bring-up paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceFamily {
    /// First-generation part with the legacy SDK clock and cache API.
    Ai84,
    Ai85,
    Ai87,
}

impl DeviceFamily {
    /// Whether the family uses the legacy (pre-ICC) SDK calls.
    pub fn is_legacy(self) -> bool {
        matches!(self, DeviceFamily::Ai84)
    }
}

/// The power-domain controller that gates accelerator groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerController {
    /// Bus/bridge function controller.
    Bbfc,
    /// Global control function registers.
    Gcfr,
}

impl PowerController {
    /// Register block name as used by the vendor headers.
    pub fn block(self) -> &'static str {
        match self {
            PowerController::Bbfc => "MXC_BBFC",
            PowerController::Gcfr => "MXC_GCFR",
        }
    }

    /// Register definition header for the controller.
    pub fn header(self) -> &'static str {
        match self {
            PowerController::Bbfc => "bbfc_regs.h",
            PowerController::Gcfr => "gcfr_regs.h",
        }
    }
}

/// Human-readable clock speed labels (MHz), used in emitted comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClockSpeeds {
    /// Internal primary oscillator.
    pub ipo_mhz: u32,
    /// Peripheral bus clock.
    pub apb_mhz: u32,
    /// PLL (ITO) output, when the part has one.
    pub pll_mhz: Option<u32>,
}

/// Load addresses for the companion (RISC-V) core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CompanionMemory {
    /// Companion code origin when booting from the flash cache.
    pub code_origin: u32,
    /// Companion code origin when booting from SRAM.
    pub sram_origin: u32,
}

/// Read-only per-chip facts consumed by the sequencer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CapabilityDescriptor {
    /// Device name (e.g., "ai85").
    pub name: String,
    /// Accelerator generation.
    pub family: DeviceFamily,
    /// Base address of the APB window that holds the CNN register file.
    pub apb_base: u32,
    /// Offset of the CNN control block inside the APB window.
    pub cnn_base: u32,
    /// Address distance between consecutive accelerator groups.
    pub group_stride: u32,
    /// Index of the group control register.
    pub ctl_register: u32,
    /// Number of accelerator groups on the die.
    pub group_count: u8,
    /// Power-domain controller variant.
    pub power_controller: PowerController,
    /// Whether simulations target the current SDK-based RTL environment.
    pub modern_sim: bool,
    /// Whether one-shot runs must also clear the group enable bit in the ISR.
    pub require_oneshot_clear: bool,
    /// Whether companion wake-up requires the semaphore low-power enable bit.
    pub require_sema_lpwken: bool,
    /// Clock labels.
    pub clocks: ClockSpeeds,
    /// Companion core memory map, present only on dual-core parts.
    pub companion: Option<CompanionMemory>,
}

impl CapabilityDescriptor {
    /// Whether the part has a PLL that can clock the accelerator.
    pub fn supports_pll(&self) -> bool {
        self.clocks.pll_mhz.is_some()
    }

    /// Whether the part has a companion core.
    pub fn has_companion_core(&self) -> bool {
        self.companion.is_some()
    }

    /// Absolute address of the CNN control block.
    pub fn cnn_base_address(&self) -> u32 {
        self.apb_base.wrapping_add(self.cnn_base)
    }

    /// Absolute address of the control register for `group`.
    pub fn ctl_address(&self, group: u8) -> u32 {
        self.cnn_base_address()
            .wrapping_add(self.group_stride.wrapping_mul(u32::from(group)))
            .wrapping_add(self.ctl_register.wrapping_mul(4))
    }

    /// Bit pattern with one bit set for every group on the die.
    pub fn all_groups_mask(&self) -> u32 {
        if self.group_count >= 32 {
            u32::MAX
        } else {
            (1u32 << self.group_count) - 1
        }
    }

    /// First-generation part.
    pub fn ai84() -> Self {
        Self {
            name: "ai84".into(),
            family: DeviceFamily::Ai84,
            apb_base: 0x5010_0000,
            cnn_base: 0x0000_0000,
            group_stride: 0x0010_0000,
            ctl_register: 0,
            group_count: 4,
            power_controller: PowerController::Bbfc,
            modern_sim: false,
            require_oneshot_clear: false,
            require_sema_lpwken: false,
            clocks: ClockSpeeds {
                ipo_mhz: 96,
                apb_mhz: 48,
                pll_mhz: None,
            },
            companion: None,
        }
    }

    /// Second-generation dual-core part.
    pub fn ai85() -> Self {
        Self {
            name: "ai85".into(),
            family: DeviceFamily::Ai85,
            apb_base: 0x5000_0000,
            cnn_base: 0x0010_0000,
            group_stride: 0x0040_0000,
            ctl_register: 0,
            group_count: 4,
            power_controller: PowerController::Bbfc,
            modern_sim: true,
            require_oneshot_clear: true,
            require_sema_lpwken: false,
            clocks: ClockSpeeds {
                ipo_mhz: 100,
                apb_mhz: 50,
                pll_mhz: None,
            },
            companion: Some(CompanionMemory {
                code_origin: 0x1008_0000,
                sram_origin: 0x2001_c000,
            }),
        }
    }

    /// Third-generation dual-core part with a PLL-clocked accelerator.
    pub fn ai87() -> Self {
        Self {
            name: "ai87".into(),
            family: DeviceFamily::Ai87,
            apb_base: 0x5000_0000,
            cnn_base: 0x0010_0000,
            group_stride: 0x0040_0000,
            ctl_register: 0,
            group_count: 4,
            power_controller: PowerController::Gcfr,
            modern_sim: true,
            require_oneshot_clear: false,
            require_sema_lpwken: true,
            clocks: ClockSpeeds {
                ipo_mhz: 120,
                apb_mhz: 60,
                pll_mhz: Some(200),
            },
            companion: Some(CompanionMemory {
                code_origin: 0x1030_0000,
                sram_origin: 0x2005_1000,
            }),
        }
    }
}

/// Resolve a built-in device name to its descriptor.
pub fn resolve_device(name: &str) -> Option<CapabilityDescriptor> {
    match name {
        "ai84" => Some(CapabilityDescriptor::ai84()),
        "ai85" => Some(CapabilityDescriptor::ai85()),
        "ai87" => Some(CapabilityDescriptor::ai87()),
        _ => None,
    }
}

/// List all built-in device names with a short description.
pub fn builtin_devices() -> Vec<(&'static str, &'static str)> {
    vec![
        ("ai84", "First-generation CNN accelerator (legacy SDK, single core)"),
        ("ai85", "Dual-core Cortex-M4 + RISC-V, BBFC power control"),
        ("ai87", "Dual-core Cortex-M4 + RISC-V, GCFR power control, PLL"),
    ]
}
