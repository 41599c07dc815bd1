//! Accelerator clock switching.
//!
//! The CNN clock source and divider share one register with unrelated
//! peripheral clock fields, so both fields are always cleared together and
//! set in the same write.

use cnnsynth_device::CapabilityDescriptor;

use crate::op::{Operation, Register, WriteOp};

const PCLKDIV: &str = "MXC_GCR->pclkdiv";
const FIELD_MASK: &str = "~(MXC_F_GCR_PCLKDIV_CNNCLKDIV | MXC_F_GCR_PCLKDIV_CNNCLKSEL)";
const PLL_READY: &str =
    "(MXC_GCR->ito_ctrl & MXC_F_GCR_ITO_CTRL_RDY) != MXC_F_GCR_ITO_CTRL_RDY";

/// Accelerator clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// Peripheral bus clock; stable as soon as it is selected.
    Pclk,
    /// PLL (ITO); must report ready before it is selected.
    Ito,
    /// Chosen at run time through the `clock_source` function parameter.
    Parameter,
}

impl ClockSource {
    fn selector(self) -> &'static str {
        match self {
            ClockSource::Pclk => "MXC_S_GCR_PCLKDIV_CNNCLKSEL_PCLK",
            ClockSource::Ito => "MXC_S_GCR_PCLKDIV_CNNCLKSEL_ITO",
            ClockSource::Parameter => "clock_source",
        }
    }

    /// Stabilization wait required before switching to this source.
    ///
    /// A run-time source can only be the PLL on parts that have one, so the
    /// wait is guarded by a comparison against the PLL selector.
    pub fn ready_wait(self, caps: &CapabilityDescriptor) -> Option<Operation> {
        match self {
            ClockSource::Pclk => None,
            ClockSource::Ito => Some(Operation::wait_until(PLL_READY)),
            ClockSource::Parameter if caps.supports_pll() => Some(Operation::Guarded {
                condition: "clock_source == MXC_F_GCR_PCLKDIV_CNNCLKSEL_ITO".into(),
                body: Box::new(Operation::wait_until(PLL_READY).with_comment("Wait for PLL")),
            }),
            ClockSource::Parameter => None,
        }
    }
}

/// Accelerator clock divider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockDivider {
    Fixed(u8),
    /// Chosen at run time through the `clock_divider` function parameter.
    Parameter,
}

impl ClockDivider {
    fn selector(self) -> String {
        match self {
            ClockDivider::Fixed(div) => format!("MXC_S_GCR_PCLKDIV_CNNCLKDIV_DIV{div}"),
            ClockDivider::Parameter => "clock_divider".into(),
        }
    }
}

/// Switch the accelerator clock to `source` / `divider`.
pub fn select_clock(
    source: ClockSource,
    divider: ClockDivider,
    comment: Option<&str>,
    caps: &CapabilityDescriptor,
) -> Vec<Operation> {
    let mut ops = Vec::new();
    if let Some(comment) = comment {
        ops.push(Operation::comment(comment));
    }
    ops.extend(source.ready_wait(caps));
    ops.push(Operation::write(
        Register::named(PCLKDIV),
        WriteOp::Assign,
        format!(
            "({PCLKDIV} & {FIELD_MASK})\n| {} | {}",
            divider.selector(),
            source.selector()
        ),
    ));
    ops
}
