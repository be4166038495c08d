//! Top-level driver error, composed from every lower layer (spec §7).

use core::fmt;

use bluenoc_mm::MmError;

/// Failure during one rung of the Activation Ladder (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationError {
    ResourceBusy,
    NoMemory,
    HardwareInvalid,
    IoError,
}

impl fmt::Display for ActivationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceBusy => write!(f, "device resource unavailable"),
            Self::NoMemory => write!(f, "out of memory during activation"),
            Self::HardwareInvalid => write!(f, "magic mismatch: not a Bluespec NoC device"),
            Self::IoError => write!(f, "hardware refused activation step"),
        }
    }
}

/// Negative-errno-style error kinds surfaced to callers (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    InvalidArgument,
    ResourceBusy,
    NoMemory,
    IoError,
    HardwareInvalid,
    NotATty,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::ResourceBusy => write!(f, "resource busy"),
            Self::NoMemory => write!(f, "out of memory"),
            Self::IoError => write!(f, "I/O error"),
            Self::HardwareInvalid => write!(f, "hardware invalid"),
            Self::NotATty => write!(f, "not a tty"),
        }
    }
}

impl From<ActivationError> for DriverError {
    fn from(e: ActivationError) -> Self {
        match e {
            ActivationError::ResourceBusy => Self::ResourceBusy,
            ActivationError::NoMemory => Self::NoMemory,
            ActivationError::HardwareInvalid => Self::HardwareInvalid,
            ActivationError::IoError => Self::IoError,
        }
    }
}

impl From<MmError> for DriverError {
    fn from(e: MmError) -> Self {
        match e {
            MmError::InvalidAddress
            | MmError::NotAligned { .. }
            | MmError::TooManyPages { .. }
            | MmError::ShortPin { .. } => Self::InvalidArgument,
            MmError::NoMemory => Self::NoMemory,
            MmError::MappingFailed => Self::IoError,
        }
    }
}
