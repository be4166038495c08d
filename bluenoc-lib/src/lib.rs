#![cfg_attr(not(test), no_std)]

//! Shared runtime support for the bluenoc driver stack: locking primitives,
//! the blocking wait queue, and the klog logging subsystem, used throughout
//! `bluenoc-mm`, `bluenoc-core`, and `bluenoc-drivers`.

pub mod irqsave;
pub mod klog;
pub mod runtime;
pub mod spinlock;
pub mod waitqueue;

pub use klog::{
    KlogLevel, klog_get_level, klog_init, klog_is_enabled, klog_register_backend, klog_set_level,
};
pub use runtime::{
    DriverTaskHandle, msleep, register_msleep_fn, register_runtime, register_udelay_fn,
    register_uptime_fn, udelay,
};
pub use spinlock::{IrqMutex, IrqMutexGuard, IrqRwLock, IrqRwLockReadGuard, IrqRwLockWriteGuard};
pub use waitqueue::WaitQueue;
