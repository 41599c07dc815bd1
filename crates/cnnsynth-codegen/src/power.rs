//! Accelerator power-domain sequencing.
//!
//! Both directions drive the same five registers in the same order:
//! reset, memory mask, power, isolation, reset release. Bring-up powers the
//! active groups and isolates the rest; teardown zeroes mask and power and
//! isolates every group.

use std::collections::BTreeSet;

use cnnsynth_device::{CapabilityDescriptor, PowerController};

use crate::error::SynthesisError;
use crate::op::{Operation, Register, WriteOp};

/// Active-group bitmask and its complement, computed once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMask {
    mask: u32,
    unmask: u32,
    all: u32,
}

impl GroupMask {
    pub fn new(groups: &BTreeSet<u8>, caps: &CapabilityDescriptor) -> Result<Self, SynthesisError> {
        let all = caps.all_groups_mask();
        let mut mask = 0u32;
        for &group in groups {
            if group >= caps.group_count || group >= 32 {
                return Err(SynthesisError::GroupOutOfRange {
                    group,
                    device: caps.name.clone(),
                    count: caps.group_count,
                });
            }
            mask |= 1u32 << group;
        }
        Ok(Self {
            mask,
            unmask: !mask & all,
            all,
        })
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn unmask(&self) -> u32 {
        self.unmask
    }

    /// Every group on the die.
    pub fn all(&self) -> u32 {
        self.all
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDirection {
    Up,
    Down,
}

/// The five-step power-domain sequence for `direction`.
pub fn power_sequence(
    controller: PowerController,
    direction: PowerDirection,
    groups: &GroupMask,
) -> Vec<Operation> {
    let (heading, mask, power, iso) = match direction {
        PowerDirection::Up => (
            "Reset all domains, restore power to CNN",
            groups.mask,
            groups.mask,
            groups.unmask,
        ),
        PowerDirection::Down => ("Disable power to CNN", 0, 0, groups.all),
    };
    let reg = |n: u8| Register::named(format!("{}->reg{n}", controller.block()));
    let write = |n: u8, value: u32, comment: &str| {
        Operation::write(reg(n), WriteOp::Assign, format!("0x{value:x}")).with_comment(comment)
    };

    vec![
        Operation::comment(heading),
        write(3, groups.all, "Reset"),
        write(1, mask, "Mask memory"),
        write(0, power, "Power"),
        write(2, iso, "Iso"),
        write(3, 0, "Reset"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::render_all;

    fn groups(ids: &[u8]) -> BTreeSet<u8> {
        ids.iter().copied().collect()
    }

    #[test]
    fn mask_and_complement() {
        let m = GroupMask::new(&groups(&[0, 2]), &CapabilityDescriptor::ai85()).unwrap();
        assert_eq!(m.mask(), 0x5);
        assert_eq!(m.unmask(), 0xa);
        assert_eq!(m.all(), 0xf);
    }

    #[test]
    fn out_of_range_group() {
        let err = GroupMask::new(&groups(&[4]), &CapabilityDescriptor::ai85()).unwrap_err();
        assert!(matches!(err, SynthesisError::GroupOutOfRange { group: 4, .. }));
    }

    #[test]
    fn bring_up_sequence() {
        let m = GroupMask::new(&groups(&[0]), &CapabilityDescriptor::ai85()).unwrap();
        let text = render_all(&power_sequence(PowerController::Bbfc, PowerDirection::Up, &m), 1);
        assert_eq!(
            text,
            "  // Reset all domains, restore power to CNN\n\
             \x20 MXC_BBFC->reg3 = 0xf; // Reset\n\
             \x20 MXC_BBFC->reg1 = 0x1; // Mask memory\n\
             \x20 MXC_BBFC->reg0 = 0x1; // Power\n\
             \x20 MXC_BBFC->reg2 = 0xe; // Iso\n\
             \x20 MXC_BBFC->reg3 = 0x0; // Reset\n"
        );
    }

    #[test]
    fn directions_are_symmetric() {
        let m = GroupMask::new(&groups(&[1, 3]), &CapabilityDescriptor::ai87()).unwrap();
        let up = power_sequence(PowerController::Gcfr, PowerDirection::Up, &m);
        let down = power_sequence(PowerController::Gcfr, PowerDirection::Down, &m);
        assert_eq!(up.len(), down.len());

        let registers = |ops: &[Operation]| -> Vec<Register> {
            ops.iter()
                .filter_map(|op| match op {
                    Operation::RegisterWrite { register, .. } => Some(register.clone()),
                    _ => None,
                })
                .collect()
        };
        assert_eq!(registers(&up), registers(&down));

        let text = render_all(&down, 0);
        assert!(text.contains("MXC_GCFR->reg1 = 0x0;"));
        assert!(text.contains("MXC_GCFR->reg0 = 0x0;"));
        assert!(text.contains("MXC_GCFR->reg2 = 0xf;"));
    }
}
