//! Per-board debug bitset (spec §3, §6).
//!
//! Mirrors the `DEBUG_*` flags in the original driver's `bluenoc.h`: a
//! caller sets these through `SET_DEBUG` to turn on `klog_debug!` call
//! sites in the relevant subsystem without recompiling the driver.

use bitflags::bitflags;

bitflags! {
    /// Bits accepted by the `GET_DEBUG`/`SET_DEBUG` ioctls.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct DebugBits: u32 {
        /// Log entry/exit of driver calls (open, release, read, write, ioctl).
        const CALLS = 1 << 0;
        /// Log user-visible data (buffer contents, byte counts).
        const DATA = 1 << 1;
        /// Log DMA scatter-gather construction and command submission.
        const DMA = 1 << 2;
        /// Log interrupt handler activity.
        const INTR = 1 << 3;
        /// Accumulate and report profiling counters.
        const PROFILE = 1 << 31;
    }
}

impl DebugBits {
    /// Whether `new` has the `PROFILE` bit set where `self` (the previous
    /// value) did not — a rising edge that should reset the counters.
    pub fn profile_rising_edge(self, new: DebugBits) -> bool {
        !self.contains(DebugBits::PROFILE) && new.contains(DebugBits::PROFILE)
    }

    /// Whether `new` has cleared the `PROFILE` bit that `self` had set — a
    /// falling edge that should emit the formatted summary.
    pub fn profile_falling_edge(self, new: DebugBits) -> bool {
        self.contains(DebugBits::PROFILE) && !new.contains(DebugBits::PROFILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_raw_bits() {
        let bits = DebugBits::CALLS | DebugBits::DMA;
        assert_eq!(DebugBits::from_bits_truncate(bits.bits()), bits);
    }

    #[test]
    fn detects_profile_edges() {
        let off = DebugBits::CALLS;
        let on = DebugBits::CALLS | DebugBits::PROFILE;
        assert!(off.profile_rising_edge(on));
        assert!(!off.profile_falling_edge(on));
        assert!(on.profile_falling_edge(off));
        assert!(!on.profile_rising_edge(off));
        assert!(!on.profile_rising_edge(on));
        assert!(!off.profile_falling_edge(off));
    }
}
