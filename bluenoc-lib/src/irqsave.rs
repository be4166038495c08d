//! IRQ-disable primitive backing [`crate::spinlock`].
//!
//! The original kernel tracked per-CPU preemption counts alongside the raw
//! interrupt flag; a loadable PCIe driver has no scheduler of its own to
//! preempt, so the only thing worth saving and restoring here is whether
//! interrupts were enabled on entry.
//!
//! Host unit tests run as ordinary ring-3 processes and cannot execute
//! `cli`/`sti`, so the `cfg(test)` build substitutes a thread-local flag that
//! models the same enabled/disabled transitions without touching the CPU.

#[cfg(not(test))]
mod backend {
    use x86_64::instructions::interrupts;

    #[inline]
    pub fn save_flags_cli() -> bool {
        let was_enabled = interrupts::are_enabled();
        interrupts::disable();
        was_enabled
    }

    #[inline]
    pub fn restore_flags(was_enabled: bool) {
        if was_enabled {
            interrupts::enable();
        }
    }
}

#[cfg(test)]
mod backend {
    use core::cell::Cell;

    thread_local! {
        static ENABLED: Cell<bool> = const { Cell::new(true) };
    }

    pub fn save_flags_cli() -> bool {
        ENABLED.with(|e| e.replace(false))
    }

    pub fn restore_flags(was_enabled: bool) {
        ENABLED.with(|e| e.set(was_enabled));
    }
}

pub use backend::{restore_flags, save_flags_cli};
