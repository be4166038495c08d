//! bluenoc kernel-userland ABI types.
//!
//! This crate provides the canonical definitions shared between the bluenoc
//! driver and any userland caller (the status CLI, the clock-tunnel helper,
//! or a hand-rolled `ioctl()` caller). Having a single source of truth
//! eliminates ABI mismatches between the driver and its callers.
//!
//! All types in this crate are `#[repr(C)]` for ABI stability.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod addr;
pub mod consts;
pub mod debug;
pub mod ioctl;
pub mod regs;

pub use addr::{PhysAddr, VirtAddr};
pub use consts::*;
pub use debug::DebugBits;
pub use ioctl::{BLUENOC_IOCTL_MAGIC, BoardInfo, IoctlOp};

/// Standard 4KB page size, used throughout the transfer engine for
/// scatter-gather page-count math.
pub const PAGE_SIZE: u64 = 0x1000;
