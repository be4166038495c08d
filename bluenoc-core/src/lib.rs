//! Board state machinery: the Activation Ladder, the per-board record, the
//! DMA Status Cache, and the board registry (spec §3, §4.2, §4.3).
//!
//! Everything in this crate is generic over [`bluenoc_mm::Bar0`] so it runs,
//! unmodified, against `bluenoc_mm::mmio::sim::SimBar0` in unit tests and
//! against a real `MmioRegion` in production.

#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod board;
pub mod error;
pub mod ladder;
pub mod registry;
pub mod status;

pub use board::{Board, GateGuard, Identity, ProfileCounters};
pub use error::{ActivationError, DriverError};
pub use ladder::{Activated, ActivationBackend, ActivationLevel, IrqMode, activate, deactivate};
pub use registry::BoardRegistry;
pub use status::DmaStatusCache;
