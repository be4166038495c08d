//! Clock Tunnel Helper (spec §4.7).
//!
//! The board's programmable NoC clock is a PLL sitting behind three BAR0
//! registers (`REG_CLK_SEND_CTRL`/`REG_CLK_STATUS`/`REG_CLK_RD_WORD`) that
//! tunnel reads and writes to the PLL's own 5-bit register file. Grounded
//! on the original `ClockGenerator::Write`/`Read`/`SetRate`/`GetRate`: the
//! handshake polls a status bit up to five times with a one-second sleep
//! between checks, then proceeds regardless — a stuck handshake degrades
//! to best-effort rather than failing the ioctl outright, matching the
//! original's behavior of logging and issuing the request anyway.

use bluenoc_abi::regs::{ClockWord, REG_CLK_RD_WORD, REG_CLK_SEND_CTRL, REG_CLK_STATUS};
use bluenoc_lib::{klog_warn, runtime::msleep};
use bluenoc_mm::Bar0;

/// Tunnel handshake bit: the PLL register file is idle and can accept a
/// new request.
const HANDSHAKE_IDLE: u32 = 1 << 0;
/// Tunnel handshake bit: a requested read word is ready at
/// [`REG_CLK_RD_WORD`].
const HANDSHAKE_WORD_READY: u32 = 1 << 1;

const RETRY_COUNT: u32 = 5;
const RETRY_SLEEP_MS: u64 = 1000;

// PLL internal register-file addresses (tunneled through `ClockWord`).
const REG_UPDATE_ENABLE: u16 = 0x01;
const REG_CLKOUT0_1: u16 = 0x02;
const REG_CLKOUT0_2: u16 = 0x03;
const REG_CLK_DIV: u16 = 0x10;
const REG_CLK_FB_1: u16 = 0x11;
const REG_CLK_FB_2: u16 = 0x12;
const REG_LOCK_1: u16 = 0x13;
const REG_LOCK_2: u16 = 0x14;
const REG_LOCK_3: u16 = 0x15;
const REG_FILTER_1: u16 = 0x16;
const REG_FILTER_2: u16 = 0x17;
const REG_STATUS: u16 = 0x1f;

/// PLL status-register bit 0: output clock locked.
const STATUS_LOCKED: u32 = 1 << 0;
/// PLL status-register bit 1: PLL held in reset.
const STATUS_IN_RESET: u32 = 1 << 1;

/// Loop-filter setting, indexed by `M - 1`. Entries beyond
/// [`FILTER_TABLE`]'s length fall back to [`FILTER_FALLBACK`].
#[rustfmt::skip]
const FILTER_TABLE: [u32; 47] = [
    0x01001990, 0x01001190, 0x01009890, 0x01001890,
    0x01008890, 0x01009090, 0x01009090, 0x01009090,
    0x01009090, 0x01000890, 0x01000890, 0x01000890,
    0x08009090, 0x01001090, 0x01001090, 0x01001090,
    0x01001090, 0x01001090, 0x01001090, 0x01001090,
    0x01001090, 0x01001090, 0x01001090, 0x01008090,
    0x01008090, 0x01008090, 0x01008090, 0x01008090,
    0x01008090, 0x01008090, 0x01008090, 0x01008090,
    0x01008090, 0x01008090, 0x01008090, 0x01008090,
    0x01008090, 0x08001090, 0x08001090, 0x08001090,
    0x08001090, 0x08001090, 0x08001090, 0x08001090,
    0x08001090, 0x08001090, 0x08001090,
];
const FILTER_FALLBACK: u32 = 0x0800_8090;

/// Lock-detector setting, indexed by `M - 1`. Entries beyond
/// [`LOCK_TABLE`]'s length fall back to [`LOCK_FALLBACK`].
#[rustfmt::skip]
const LOCK_TABLE: [u32; 36] = [
    0x060603e8, 0x060603e8, 0x080803e8, 0x0b0b03e8,
    0x0e0e03e8, 0x111103e8, 0x131303e8, 0x161603e8,
    0x191903e8, 0x1c1c03e8, 0x1f1f0384, 0x1f1f0339,
    0x1f1f02ee, 0x1f1f02bc, 0x1f1f028a, 0x1f1f0271,
    0x1f1f023f, 0x1f1f0226, 0x1f1f020d, 0x1f1f01f4,
    0x1f1f01db, 0x1f1f01c2, 0x1f1f01a9, 0x1f1f0190,
    0x1f1f0190, 0x1f1f0177, 0x1f1f015e, 0x1f1f015e,
    0x1f1f0145, 0x1f1f0145, 0x1f1f012c, 0x1f1f012c,
    0x1f1f012c, 0x1f1f0113, 0x1f1f0113, 0x1f1f0113,
];
const LOCK_FALLBACK: u32 = 0x1f1f_00fa;

fn lookup_filter(m_minus_1: u32) -> u32 {
    FILTER_TABLE.get(m_minus_1 as usize).copied().unwrap_or(FILTER_FALLBACK)
}

fn lookup_lock(m_minus_1: u32) -> u32 {
    LOCK_TABLE.get(m_minus_1 as usize).copied().unwrap_or(LOCK_FALLBACK)
}

/// A candidate `(D, M, Dout)` divider triple and the VCO frequency (Hz)
/// it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllTriple {
    pub d: u32,
    pub m: u32,
    pub dout: u32,
    pub fvco_hz: u64,
}

/// Search the `(D, M, Dout)` space for the triple that best approximates
/// `fout_hz` given an input of `fin_hz`, subject to the VCO staying in
/// [600, 1200] MHz and the phase detector in [10, 300] kHz (spec §4.7).
/// Returns the first exact match found, or the closest approximation.
///
/// All arithmetic stays in integer kHz, mirroring the original's
/// `calc_params` (which works in the same units for the same reason: the
/// PLL's internal dividers are integers, so there is nothing finer to
/// resolve).
pub fn calc_params(fin_hz: u64, fout_hz: u64) -> Option<PllTriple> {
    if fin_hz == 0 || fout_hz == 0 {
        return None;
    }

    const FPFD_MIN_KHZ: u64 = 10_000;
    const FPFD_MAX_KHZ: u64 = 300_000;
    const FVCO_MIN_KHZ: u64 = 600_000;
    const FVCO_MAX_KHZ: u64 = 1_200_000;

    let fin = fin_hz / 1000;
    let fout = fout_hz / 1000;
    if fin == 0 || fout == 0 {
        return None;
    }

    let div_round_up = |x: u64, y: u64| x.div_ceil(y);

    let d_min = div_round_up(fin, FPFD_MAX_KHZ).max(1);
    let d_max = (fin / FPFD_MIN_KHZ).min(80);
    if d_max < d_min {
        return None;
    }

    let m_min = (div_round_up(FVCO_MIN_KHZ, fin) * d_min).max(1);
    let m_max = (FVCO_MAX_KHZ * d_max / fin).min(64);
    if m_max < m_min {
        return None;
    }

    let mut best: Option<(u64, PllTriple)> = None;

    'search: for m in m_min..=m_max {
        let fin_m = fin * m;
        let d_lo = d_min.max(div_round_up(fin_m, FVCO_MAX_KHZ));
        let d_hi = d_max.min(fin_m / FVCO_MIN_KHZ);
        if d_hi < d_lo {
            continue;
        }
        for d in d_lo..=d_hi {
            let fvco = fin_m / d;
            let dout = ((2 * fvco + fout) / (2 * fout)).clamp(1, 128);
            let f = fvco / dout;
            let diff = f.abs_diff(fout);

            let better = match best {
                None => true,
                Some((best_diff, _)) => diff < best_diff,
            };
            if better {
                best = Some((
                    diff,
                    PllTriple { d: d as u32, m: m as u32, dout: dout as u32, fvco_hz: fvco * 1000 },
                ));
                if diff == 0 {
                    break 'search;
                }
            }
        }
    }

    best.map(|(_, triple)| triple)
}

/// `(low, high, edge, nocount)` register fields for one divider value
/// (spec §4.7's divider encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DividerFields {
    pub low: u32,
    pub high: u32,
    pub edge: u32,
    pub nocount: u32,
}

pub fn calc_clk_params(divider: u32) -> DividerFields {
    let nocount = if divider == 1 { 1 } else { 0 };
    let high = divider / 2;
    let edge = divider % 2;
    let low = divider - high;
    DividerFields { low, high, edge, nocount }
}

fn status_word<B: Bar0>(bar0: &B) -> u32 {
    bar0.read32(REG_CLK_STATUS)
}

/// Poll [`HANDSHAKE_IDLE`] up to [`RETRY_COUNT`] times, sleeping
/// [`RETRY_SLEEP_MS`] between checks. Proceeds regardless of the outcome —
/// a busy tunnel is logged, not treated as a hard failure, matching the
/// original driver's "warn and send anyway" handling.
fn wait_idle<B: Bar0>(bar0: &B) {
    let mut retries = RETRY_COUNT;
    loop {
        if status_word(bar0) & HANDSHAKE_IDLE != 0 {
            return;
        }
        if retries == 0 {
            klog_warn!("bluenoc: clock tunnel busy after {} retries, proceeding anyway", RETRY_COUNT);
            return;
        }
        retries -= 1;
        msleep(RETRY_SLEEP_MS);
    }
}

fn wait_word_ready<B: Bar0>(bar0: &B) -> bool {
    let mut retries = RETRY_COUNT;
    loop {
        if status_word(bar0) & HANDSHAKE_WORD_READY != 0 {
            return true;
        }
        if retries == 0 {
            klog_warn!("bluenoc: clock tunnel read timed out after {} retries", RETRY_COUNT);
            return false;
        }
        retries -= 1;
        msleep(RETRY_SLEEP_MS);
    }
}

fn tunnel_write<B: Bar0>(bar0: &B, reg: u16, value: u32) {
    wait_idle(bar0);
    bar0.write32(REG_CLK_SEND_CTRL, ClockWord::write(reg, (value & 0xFFFF) as u16).encode());
}

fn tunnel_read<B: Bar0>(bar0: &B, reg: u16) -> u32 {
    wait_idle(bar0);
    bar0.write32(REG_CLK_SEND_CTRL, ClockWord::read(reg).encode());
    if !wait_word_ready(bar0) {
        return 0;
    }
    let value = bar0.read32(REG_CLK_RD_WORD);
    bar0.write32(REG_CLK_RD_WORD, value);
    value
}

/// Whether the PLL currently reports its output clock as locked.
pub fn is_locked<B: Bar0>(bar0: &B) -> bool {
    tunnel_read(bar0, REG_STATUS) & STATUS_LOCKED != 0
}

/// Whether the PLL is currently held in reset.
pub fn in_reset<B: Bar0>(bar0: &B) -> bool {
    (tunnel_read(bar0, REG_STATUS) >> 1) & 1 != 0
}

/// Program the NoC clock generator for `rate_hz`, derived from an input
/// of `parent_rate_hz` (spec §4.7's `SET_RATE`). Returns whether the PLL
/// reports lock a second after the new divider set is latched.
///
/// Grounded on `ClockGenerator::SetRate`: deassert `update_enable`, write
/// every divider/filter/lock register for the chosen `(D, M, Dout)`
/// triple, reassert `update_enable`, then sample lock status.
pub fn set_rate<B: Bar0>(bar0: &B, rate_hz: u64, parent_rate_hz: u64) -> Result<bool, bluenoc_core::DriverError> {
    let triple = calc_params(parent_rate_hz, rate_hz).ok_or(bluenoc_core::DriverError::InvalidArgument)?;
    if triple.d == 0 || triple.m == 0 || triple.dout == 0 {
        return Err(bluenoc_core::DriverError::InvalidArgument);
    }

    let filter = lookup_filter(triple.m - 1);
    let lock = lookup_lock(triple.m - 1);

    tunnel_write(bar0, REG_UPDATE_ENABLE, 0);

    let dout_fields = calc_clk_params(triple.dout);
    tunnel_write(bar0, REG_CLKOUT0_1, (dout_fields.high << 6) | dout_fields.low);
    tunnel_write(bar0, REG_CLKOUT0_2, (dout_fields.edge << 7) | (dout_fields.nocount << 6));

    let d_fields = calc_clk_params(triple.d);
    tunnel_write(
        bar0,
        REG_CLK_DIV,
        (d_fields.edge << 13) | (d_fields.nocount << 12) | (d_fields.high << 6) | d_fields.low,
    );

    let m_fields = calc_clk_params(triple.m);
    tunnel_write(bar0, REG_CLK_FB_1, (m_fields.high << 6) | m_fields.low);
    tunnel_write(bar0, REG_CLK_FB_2, (m_fields.edge << 7) | (m_fields.nocount << 6));

    tunnel_write(bar0, REG_LOCK_1, lock & 0x3FF);
    tunnel_write(bar0, REG_LOCK_2, (((lock >> 16) & 0x1f) << 10) | 0x1);
    tunnel_write(bar0, REG_LOCK_3, (((lock >> 24) & 0x1f) << 10) | 0x3e9);
    tunnel_write(bar0, REG_FILTER_1, filter >> 16);
    tunnel_write(bar0, REG_FILTER_2, filter);

    tunnel_write(bar0, REG_UPDATE_ENABLE, 1);

    msleep(1000);
    Ok(is_locked(bar0))
}

/// Read back the clock generator's currently-programmed rate (spec
/// §4.7's `GET_RATE`). Returns 0 if the divider registers are not yet
/// programmed, saturates to `u32::MAX` on overflow.
pub fn get_rate<B: Bar0>(bar0: &B, parent_rate_hz: u64) -> u32 {
    let reg = tunnel_read(bar0, REG_CLKOUT0_1);
    let dout = (reg & 0x3f) + ((reg >> 6) & 0x3f);
    let reg = tunnel_read(bar0, REG_CLK_DIV);
    let d = (reg & 0x3f) + ((reg >> 6) & 0x3f);
    let reg = tunnel_read(bar0, REG_CLK_FB_1);
    let m = (reg & 0x3f) + ((reg >> 6) & 0x3f);

    if d == 0 || dout == 0 {
        return 0;
    }

    let tmp = (parent_rate_hz / d as u64) * m as u64 / dout as u64;
    tmp.min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluenoc_mm::mmio::sim::SimBar0;

    #[test]
    fn calc_params_rejects_zero_frequencies() {
        assert_eq!(calc_params(0, 250_000_000), None);
        assert_eq!(calc_params(125_000_000, 0), None);
    }

    #[test]
    fn calc_params_finds_exact_triple_within_vco_range() {
        let triple = calc_params(125_000_000, 250_000_000).unwrap();
        assert!(triple.fvco_hz >= 600_000_000 && triple.fvco_hz <= 1_200_000_000);
        let achieved = (125_000_000u64 / triple.d as u64) * triple.m as u64 / triple.dout as u64;
        assert_eq!(achieved, 250_000_000);
    }

    #[test]
    fn calc_clk_params_splits_even_and_odd_dividers() {
        let even = calc_clk_params(4);
        assert_eq!(even, DividerFields { low: 2, high: 2, edge: 0, nocount: 0 });

        let odd = calc_clk_params(5);
        assert_eq!(odd, DividerFields { low: 3, high: 2, edge: 1, nocount: 0 });

        let one = calc_clk_params(1);
        assert_eq!(one.nocount, 1);
    }

    #[test]
    fn lookup_tables_fall_back_past_their_length() {
        assert_eq!(lookup_filter(100), FILTER_FALLBACK);
        assert_eq!(lookup_lock(100), LOCK_FALLBACK);
        assert_eq!(lookup_filter(0), FILTER_TABLE[0]);
        assert_eq!(lookup_lock(0), LOCK_TABLE[0]);
    }

    #[test]
    fn tunnel_write_then_read_round_trips_through_sim_bar() {
        let bar0 = SimBar0::new();
        // SimBar0 has no PLL-side state machine, so the handshake bits
        // never set themselves; wait_idle/wait_word_ready exhaust their
        // retries and proceed, exercising the best-effort path while the
        // raw register plumbing (send/status/rd-word) still gets
        // exercised end to end.
        bluenoc_lib::runtime::register_msleep_fn(|_| {});
        tunnel_write(&bar0, REG_UPDATE_ENABLE, 1);
        assert_eq!(bar0.read32(REG_CLK_SEND_CTRL) & 0xFFFF, 1);
        assert_eq!((bar0.read32(REG_CLK_SEND_CTRL) >> 16) & 0x7FFF, REG_UPDATE_ENABLE as u32);
    }

    #[test]
    fn set_rate_rejects_zero_rate() {
        let bar0 = SimBar0::new();
        bluenoc_lib::runtime::register_msleep_fn(|_| {});
        assert!(set_rate(&bar0, 0, 125_000_000).is_err());
    }
}
