//! Errors produced while validating or pinning user-supplied buffers, or
//! while mapping a device's BAR.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// A user pointer was null, non-canonical, or its `addr + len` overflowed.
    InvalidAddress,
    /// Buffer start offset within its page was not a multiple of the
    /// required alignment (spec §4.4 precondition 3).
    NotAligned { address: u64, required: u64 },
    /// The request spans more pages than the engine is willing to pin
    /// (spec §4.4 precondition 4).
    TooManyPages { requested: usize, max: usize },
    /// The host's page-pinning backend ran out of memory building the
    /// page list or the scatter-gather table.
    NoMemory,
    /// Fewer pages were pinned than requested; the caller rolls back
    /// whatever was pinned and reports invalid-argument (spec §4.4).
    ShortPin { requested: usize, pinned: usize },
    /// A host-provided mapping (BAR0 `ioremap`, DMA map) returned nothing.
    MappingFailed,
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress => write!(f, "invalid user address"),
            Self::NotAligned { address, required } => {
                write!(f, "address {:#x} not aligned to {:#x}", address, required)
            }
            Self::TooManyPages { requested, max } => {
                write!(f, "request spans {requested} pages, max is {max}")
            }
            Self::NoMemory => write!(f, "out of memory"),
            Self::ShortPin { requested, pinned } => {
                write!(f, "pinned {pinned} of {requested} requested pages")
            }
            Self::MappingFailed => write!(f, "mapping failed"),
        }
    }
}

pub type MmResult<T = ()> = Result<T, MmError>;
