//! DMA Status Cache (spec §4.3).
//!
//! The one piece of state touched from both the interrupt handler and
//! ordinary call contexts. The lock is irq-safe and held only for the
//! duration of one unpack or one compound clear — never across a sleep
//! (spec §5).

use bluenoc_abi::regs::{Direction, DmaStatusWord, REG_DMA_STATUS};
use bluenoc_lib::IrqMutex;
use bluenoc_mm::Bar0;

pub struct DmaStatusCache {
    inner: IrqMutex<DmaStatusWord>,
}

impl DmaStatusCache {
    pub const fn new() -> Self {
        Self {
            inner: IrqMutex::new(DmaStatusWord {
                read_buffers_level: 0,
                read_flushed: false,
                read_completed: false,
                read_queue_full: false,
                read_ok: false,
                write_buffers_level: 0,
                write_completed: false,
                write_queue_full: false,
                write_ok: false,
            }),
        }
    }

    /// Read the device's status word and unpack it under the lock.
    /// Called from the interrupt handler, and on demand from call contexts
    /// that need a fresh read before deciding whether to sleep.
    pub fn refresh(&self, bar0: &dyn Bar0) -> DmaStatusWord {
        let raw = bar0.read64(REG_DMA_STATUS);
        let decoded = DmaStatusWord::decode(raw);
        *self.inner.lock() = decoded;
        decoded
    }

    /// Current cached snapshot, without touching the device.
    pub fn snapshot(&self) -> DmaStatusWord {
        *self.inner.lock()
    }

    /// Write 0 to the status register, then zero the matching direction's
    /// flushed/completed/ok fields in the cache (spec §4.3 `clear`).
    pub fn clear(&self, bar0: &dyn Bar0, dir: Direction) {
        bar0.write64(REG_DMA_STATUS, 0);
        let mut word = self.inner.lock();
        match dir {
            Direction::Read => {
                word.read_flushed = false;
                word.read_completed = false;
                word.read_ok = false;
            }
            Direction::Write => {
                word.write_completed = false;
                word.write_ok = false;
            }
        }
    }

    pub fn poll_mask(&self) -> u32 {
        self.snapshot().poll_mask()
    }
}

impl Default for DmaStatusCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluenoc_mm::mmio::sim::SimBar0;

    #[test]
    fn refresh_unpacks_device_word() {
        let bar = SimBar0::new();
        bar.write64(REG_DMA_STATUS, 5 | (1 << 8) | (3u64 << 32) | (1 << 38));
        let cache = DmaStatusCache::new();
        let snap = cache.refresh(&bar);
        assert_eq!(snap.read_buffers_level, 5);
        assert!(snap.read_ok);
        assert!(snap.write_completed);
        assert_eq!(cache.snapshot(), snap);
    }

    #[test]
    fn clear_zeros_register_and_matching_direction() {
        let bar = SimBar0::new();
        bar.write64(REG_DMA_STATUS, (1 << 8) | (1 << 40));
        let cache = DmaStatusCache::new();
        cache.refresh(&bar);
        cache.clear(&bar, Direction::Read);
        assert_eq!(bar.read64(REG_DMA_STATUS), 0);
        let snap = cache.snapshot();
        assert!(!snap.read_ok);
        // write_ok was cached before clear(Read) and is untouched by it,
        // but the device register write zeroed the whole word, so a
        // subsequent refresh would show it cleared too.
        assert!(snap.write_ok);
    }

    #[test]
    fn poll_mask_reflects_ok_bits() {
        let bar = SimBar0::new();
        bar.write64(REG_DMA_STATUS, (1 << 8) | (1 << 40));
        let cache = DmaStatusCache::new();
        cache.refresh(&bar);
        assert_eq!(cache.poll_mask(), 0b11);
    }
}
