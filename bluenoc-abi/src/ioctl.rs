//! Control-plane ioctl surface (spec §4.6, §6).
//!
//! The magic byte and the numbered operations below are the entire contract
//! between the driver and any userland caller — the status CLI and the
//! clock-tunnel helper both only ever touch the driver through this set.
//!
//! `Deactivate`/`Reactivate` only toggle the activation strobe and the
//! board's cached level; they do not run the PCI-enable/BAR-map/IRQ-bind
//! rungs the original driver's `deactivate()`/`activate()` functions tear
//! down and rebuild. A `Board` owns its mapped `Bar0` for its entire
//! lifetime, and the full ladder's teardown path consumes that value —
//! there is no way to hand it back out of a live board without either
//! leaving the board briefly unusable mid-ioctl or making every other
//! operation on it fallible while the bar is away. Full ladder climbs and
//! teardowns stay exclusive to probe/remove, where the board isn't yet (or
//! no longer) reachable from a second caller.

/// Magic byte shared by every bluenoc ioctl.
pub const BLUENOC_IOCTL_MAGIC: u8 = 0xB5;

/// Numbered ioctl operations, matching spec §6's table exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum IoctlOp {
    /// Copy out a [`BoardInfo`] snapshot.
    Identify = 0,
    /// Strike the activation strobe low then high, with a settling sleep
    /// between (register-level only — does not touch PCI/BAR/IRQ state).
    SoftReset = 1,
    /// Drop the activation strobe and mark the board inactive, then a
    /// settling sleep. Register-level only; see [`crate::ioctl`] module
    /// docs for why this doesn't run the full Activation Ladder teardown.
    Deactivate = 2,
    /// Re-check [`crate::regs::REG_MAGIC`] and strike the activation
    /// strobe, restoring the board to active. Register-level only, the
    /// mirror image of `Deactivate`.
    Reactivate = 3,
    /// Copy out the current debug bitset.
    GetDebug = 4,
    /// Install a new debug bitset.
    SetDebug = 5,
    /// Read the link/status MMIO word.
    GetStatus = 6,
    /// Read the PLL-tunnel response register.
    ClkRdWord = 7,
    /// Read the PLL-tunnel status register.
    ClkGetStatus = 8,
    /// Write the PLL-tunnel response register (to clear it).
    ClkClrWord = 9,
    /// Write a 32-bit PLL control word.
    ClkSendCtrl = 10,
    /// Read the capabilities bitmap.
    Capabilities = 11,
}

impl IoctlOp {
    /// Decode a raw ioctl number, as would arrive packed into a `_IOx`
    /// command word alongside [`BLUENOC_IOCTL_MAGIC`].
    pub const fn from_raw(n: u32) -> Option<Self> {
        Some(match n {
            0 => Self::Identify,
            1 => Self::SoftReset,
            2 => Self::Deactivate,
            3 => Self::Reactivate,
            4 => Self::GetDebug,
            5 => Self::SetDebug,
            6 => Self::GetStatus,
            7 => Self::ClkRdWord,
            8 => Self::ClkGetStatus,
            9 => Self::ClkClrWord,
            10 => Self::ClkSendCtrl,
            11 => Self::Capabilities,
            _ => return None,
        })
    }

    /// Whether this operation copies data out to the caller.
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            Self::Identify
                | Self::GetDebug
                | Self::GetStatus
                | Self::ClkRdWord
                | Self::ClkGetStatus
                | Self::Capabilities
        )
    }

    /// Whether this operation copies data in from the caller.
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            Self::SetDebug | Self::ClkClrWord | Self::ClkSendCtrl
        )
    }
}

/// Snapshot returned by the `IDENTIFY` ioctl.
///
/// Field order is part of the ABI — do not reorder. Matches spec §6
/// exactly: `u32 board_number; u32 is_active; u32 major_rev; u32 minor_rev;
/// u32 build; u32 timestamp; u32 bytes_per_beat; u64 content_id; u32
/// subvendor_id; u32 subdevice_id;`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C, packed)]
pub struct BoardInfo {
    pub board_number: u32,
    pub is_active: u32,
    pub major_rev: u32,
    pub minor_rev: u32,
    pub build: u32,
    pub timestamp: u32,
    pub bytes_per_beat: u32,
    pub content_id: u64,
    pub subvendor_id: u32,
    pub subdevice_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip_covers_all_ops() {
        for n in 0..=11u32 {
            assert!(IoctlOp::from_raw(n).is_some(), "op {n} should decode");
        }
        assert!(IoctlOp::from_raw(12).is_none());
    }

    #[test]
    fn direction_classification_matches_spec_table() {
        assert!(IoctlOp::Identify.is_read());
        assert!(!IoctlOp::Identify.is_write());
        assert!(IoctlOp::SetDebug.is_write());
        assert!(!IoctlOp::SetDebug.is_read());
        assert!(!IoctlOp::SoftReset.is_read());
        assert!(!IoctlOp::SoftReset.is_write());
    }

    #[test]
    fn board_info_is_packed_to_spec_layout() {
        // 4*7 u32 fields + 1 u64 + 2 u32 = 28 + 8 + 8 = 44 bytes, no padding.
        assert_eq!(core::mem::size_of::<BoardInfo>(), 44);
    }
}
