//! Board-wide configuration constants.
//!
//! These are compile-time limits, not a runtime config file — the original
//! driver never read its tunables from anywhere but the preprocessor, and
//! there is no reason for this rewrite to behave differently.

/// Bluespec's PCI vendor id.
pub const BLUESPEC_VENDOR_ID: u16 = 0x1be7;

/// Bluespec's NoC device id.
pub const BLUESPEC_NOC_DEVICE_ID: u16 = 0xb100;

/// Maximum number of boards the driver will track simultaneously.
pub const MAX_BOARDS: usize = 16;

/// Device name stem used for `/dev/<stem>_<board_number>`.
pub const DEV_NAME_STEM: &str = "bluenoc";

/// Depth of each direction's on-device DMA command FIFO.
pub const DMA_FIFO_DEPTH: u32 = 16;

/// Maximum number of pages a single read/write request may span.
pub const MAX_SG_PAGES: usize = 4096;

/// Maximum byte length of a single scatter-gather DMA entry (14-bit field).
pub const MAX_SG_ENTRY_LEN: usize = 16384;

/// Required alignment, in bytes, of a transfer buffer's starting offset
/// within its first page.
pub const TRANSFER_ALIGN: u64 = 128;

/// Width of the DMA-addressable window requested during activation.
pub const DMA_ADDR_BITS: u32 = 48;

/// Mask selecting the low `DMA_ADDR_BITS` bits of a bus address.
pub const DMA_ADDR_MASK: u64 = (1u64 << DMA_ADDR_BITS) - 1;

/// `bluenoc_magic` value read from BAR0 offset 0 — the ASCII bytes
/// `"Bluespec"` interpreted as a little-endian `u64`.
pub const MAGIC_VALUE: u64 = u64::from_le_bytes(*b"Bluespec");
