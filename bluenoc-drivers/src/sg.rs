//! Scatter-gather table construction (spec §4.4).
//!
//! Turns a pinned page list plus a byte range into the sequence of
//! [`SgEntry`] values the Transfer Engine writes, one per FIFO slot, to
//! `REG_READ_FIFO` / `REG_WRITE_FIFO`. Grounded on the original driver's
//! per-page splitting: a single page is one entry; a multi-page buffer
//! becomes a short first entry, full-page middle entries, and a short last
//! entry.

use alloc::vec::Vec;

use bluenoc_abi::PAGE_SIZE;

/// One scatter-gather entry: a bus address and a byte length, not yet
/// checked against [`bluenoc_abi::MAX_SG_ENTRY_LEN`] or
/// [`bluenoc_abi::DMA_ADDR_MASK`] — the caller validates each entry before
/// submitting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgEntry {
    pub bus_addr: u64,
    pub len: u32,
}

/// Build the scatter-gather entry list for a pinned buffer.
///
/// `frames` is the pinned physical frame number of each page, in ascending
/// address order. `offset_in_first_page` is where the buffer starts inside
/// `frames[0]`. `byte_len` is the total transfer length.
///
/// Panics if `frames` is empty or too short to cover `byte_len` starting at
/// `offset_in_first_page` — callers are expected to have already sized
/// `frames` to match (as [`bluenoc_mm::pin_user_pages`] does).
pub fn build_sg_list(frames: &[u64], offset_in_first_page: u64, byte_len: usize) -> Vec<SgEntry> {
    assert!(!frames.is_empty(), "empty frame list");

    if frames.len() == 1 {
        return alloc::vec![SgEntry {
            bus_addr: frames[0] * PAGE_SIZE + offset_in_first_page,
            len: byte_len as u32,
        }];
    }

    let mut entries = Vec::with_capacity(frames.len());
    let mut remaining = byte_len;

    let first_len = (PAGE_SIZE - offset_in_first_page) as u32;
    entries.push(SgEntry {
        bus_addr: frames[0] * PAGE_SIZE + offset_in_first_page,
        len: first_len,
    });
    remaining -= first_len as usize;

    for &frame in &frames[1..frames.len() - 1] {
        entries.push(SgEntry {
            bus_addr: frame * PAGE_SIZE,
            len: PAGE_SIZE as u32,
        });
        remaining -= PAGE_SIZE as usize;
    }

    let last_frame = frames[frames.len() - 1];
    entries.push(SgEntry {
        bus_addr: last_frame * PAGE_SIZE,
        len: remaining as u32,
    });

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_page_is_one_entry() {
        let entries = build_sg_list(&[7], 0x80, 256);
        assert_eq!(entries, alloc::vec![SgEntry { bus_addr: 7 * PAGE_SIZE + 0x80, len: 256 }]);
    }

    #[test]
    fn multi_page_splits_first_middle_last() {
        // offset 0x80 into frame 4, spanning into frames 5 and 6.
        let byte_len = (PAGE_SIZE as usize - 0x80) + PAGE_SIZE as usize + 100;
        let entries = build_sg_list(&[4, 5, 6], 0x80, byte_len);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], SgEntry { bus_addr: 4 * PAGE_SIZE + 0x80, len: (PAGE_SIZE - 0x80) as u32 });
        assert_eq!(entries[1], SgEntry { bus_addr: 5 * PAGE_SIZE, len: PAGE_SIZE as u32 });
        assert_eq!(entries[2], SgEntry { bus_addr: 6 * PAGE_SIZE, len: 100 });
    }

    #[test]
    fn total_length_matches_sum_of_entries() {
        let byte_len = 9000;
        let entries = build_sg_list(&[1, 2, 3], 0x80, byte_len);
        let sum: u32 = entries.iter().map(|e| e.len).sum();
        assert_eq!(sum as usize, byte_len);
    }

    #[test]
    fn aligned_two_page_buffer_has_full_first_entry() {
        let entries = build_sg_list(&[10, 11], 0, (PAGE_SIZE * 2) as usize);
        assert_eq!(entries[0].len, PAGE_SIZE as u32);
        assert_eq!(entries[1].len, PAGE_SIZE as u32);
    }
}
