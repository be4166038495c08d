//! Host scheduler integration, indirected through function pointers.
//!
//! [`crate::waitqueue`] needs to block and wake callers but has no
//! scheduler of its own — it runs inside whatever kernel loaded the driver.
//! Rather than linking against a specific scheduler API, the host registers
//! three callbacks once at module-init time, the same backend-indirection
//! pattern [`crate::klog`] uses for its output sink.

use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// Opaque handle to whatever the host scheduler uses to identify a task.
/// `null` is reserved as "no task" / "not initialized".
pub type DriverTaskHandle = *mut ();

/// Returns the handle of the calling task.
pub type CurrentTaskFn = fn() -> DriverTaskHandle;
/// Puts the calling task to sleep until `unblock_task` targets it.
pub type BlockCurrentTaskFn = fn();
/// Wakes the task identified by the given handle.
pub type UnblockTaskFn = fn(DriverTaskHandle) -> bool;

static CURRENT_TASK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
static BLOCK_CURRENT_TASK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
static UNBLOCK_TASK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Register the three scheduler callbacks. Must be called once before any
/// [`crate::waitqueue::WaitQueue`] is used to block.
pub fn register_runtime(
    current_task: CurrentTaskFn,
    block_current_task: BlockCurrentTaskFn,
    unblock_task: UnblockTaskFn,
) {
    CURRENT_TASK.store(current_task as *mut (), Ordering::Release);
    BLOCK_CURRENT_TASK.store(block_current_task as *mut (), Ordering::Release);
    UNBLOCK_TASK.store(unblock_task as *mut (), Ordering::Release);
    INITIALIZED.store(true, Ordering::Release);
}

/// Clear the registered callbacks (used by tests between cases).
pub fn reset_runtime() {
    INITIALIZED.store(false, Ordering::Release);
}

pub fn is_driver_runtime_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

pub fn current_task() -> DriverTaskHandle {
    let ptr = CURRENT_TASK.load(Ordering::Acquire);
    if ptr.is_null() {
        return core::ptr::null_mut();
    }
    let f: CurrentTaskFn = unsafe { core::mem::transmute(ptr) };
    f()
}

pub fn block_current_task() {
    let ptr = BLOCK_CURRENT_TASK.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    let f: BlockCurrentTaskFn = unsafe { core::mem::transmute(ptr) };
    f()
}

pub fn unblock_task(task: DriverTaskHandle) -> bool {
    let ptr = UNBLOCK_TASK.load(Ordering::Acquire);
    if ptr.is_null() {
        return false;
    }
    let f: UnblockTaskFn = unsafe { core::mem::transmute(ptr) };
    f(task)
}

/// Monotonic uptime, in milliseconds, used for timed waits.
pub type UptimeMsFn = fn() -> u64;
static UPTIME_MS: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

pub fn register_uptime_fn(f: UptimeMsFn) {
    UPTIME_MS.store(f as *mut (), Ordering::Release);
}

pub fn uptime_ms() -> u64 {
    let ptr = UPTIME_MS.load(Ordering::Acquire);
    if ptr.is_null() {
        return 0;
    }
    let f: UptimeMsFn = unsafe { core::mem::transmute(ptr) };
    f()
}

/// Puts the calling task to sleep for (at least) `ms` milliseconds without
/// consuming a wait queue slot. Used by ioctl handlers that need a plain
/// settling delay (`SOFT_RESET`'s 100 ms de-assert window, the clock
/// tunnel's handshake retries) rather than a condition to block on.
pub type MsleepFn = fn(u64);
static MSLEEP: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

pub fn register_msleep_fn(f: MsleepFn) {
    MSLEEP.store(f as *mut (), Ordering::Release);
}

/// Sleep for `ms` milliseconds. A no-op until the host registers a
/// backend, matching `klog`'s early-fallback behavior rather than
/// panicking or busy-looping against hardware this driver doesn't own.
pub fn msleep(ms: u64) {
    let ptr = MSLEEP.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    let f: MsleepFn = unsafe { core::mem::transmute(ptr) };
    f(ms)
}

/// Busy-waits (or, on the host side, spins on a calibrated delay loop) for
/// `us` microseconds. Used for the short settling windows too fine-grained
/// for [`msleep`]'s millisecond granularity, such as the Transfer Engine's
/// re-poll delay between an empty-FIFO observation and `wait_event`.
pub type UdelayFn = fn(u64);
static UDELAY: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

pub fn register_udelay_fn(f: UdelayFn) {
    UDELAY.store(f as *mut (), Ordering::Release);
}

/// Delay for `us` microseconds. A no-op until the host registers a backend.
pub fn udelay(us: u64) {
    let ptr = UDELAY.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    let f: UdelayFn = unsafe { core::mem::transmute(ptr) };
    f(us)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicI32;

    static LAST_WOKEN: AtomicI32 = AtomicI32::new(-1);

    fn fake_current_task() -> DriverTaskHandle {
        0x1usize as DriverTaskHandle
    }
    fn fake_block() {}
    fn fake_unblock(task: DriverTaskHandle) -> bool {
        LAST_WOKEN.store(task as usize as i32, Ordering::Relaxed);
        true
    }

    #[test]
    fn uninitialized_runtime_reports_no_task() {
        reset_runtime();
        assert!(!is_driver_runtime_initialized());
        assert!(current_task().is_null());
        assert!(!unblock_task(core::ptr::null_mut()));
    }

    #[test]
    fn udelay_is_a_no_op_until_a_backend_is_registered_then_dispatches() {
        static CALLED_WITH: AtomicI32 = AtomicI32::new(-1);
        fn fake_udelay(us: u64) {
            CALLED_WITH.store(us as i32, Ordering::Relaxed);
        }
        udelay(5);
        assert_eq!(CALLED_WITH.load(Ordering::Relaxed), -1);
        register_udelay_fn(fake_udelay);
        udelay(5);
        assert_eq!(CALLED_WITH.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn registered_runtime_dispatches_through_callbacks() {
        register_runtime(fake_current_task, fake_block, fake_unblock);
        assert!(is_driver_runtime_initialized());
        assert_eq!(current_task(), 0x1usize as DriverTaskHandle);
        assert!(unblock_task(0x1usize as DriverTaskHandle));
        assert_eq!(LAST_WOKEN.load(Ordering::Relaxed), 1);
        reset_runtime();
    }
}
