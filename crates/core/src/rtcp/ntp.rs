//! Mapping from the sender clock to 64-bit NTP timestamps (RFC 5905 §6).
//!
//! The sender clock is monotonic with an arbitrary origin, so the result is
//! not synchronized to real time. It is only used to pair an NTP value with
//! the RTP timestamp in sender reports, which receivers treat as relative.

/// Offset added to clock microseconds: `(70 * 365 + 17)` days.
///
/// Receivers in the field expect exactly this value; keep it.
pub const NTP_EPOCH_OFFSET_US: u64 = (70 * 365 + 17) * 24 * 60 * 60 * 1_000_000;

/// Convert clock microseconds into NTP format: seconds in the high 32 bits,
/// binary fraction of a second in the low 32 bits.
pub fn ntp_from_us(now_us: i64) -> u64 {
    let us = (now_us as u64).wrapping_add(NTP_EPOCH_OFFSET_US);

    let hi = us / 1_000_000;
    let lo = ((1u64 << 32) * (us % 1_000_000)) / 1_000_000;

    (hi << 32) | lo
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_offset_constant() {
        assert_eq!(NTP_EPOCH_OFFSET_US, 2_208_988_800 * 1_000_000);
    }

    #[test]
    fn zero_maps_to_offset_seconds() {
        assert_eq!(ntp_from_us(0), 2_208_988_800u64 << 32);
    }

    #[test]
    fn half_second_fraction() {
        let ntp = ntp_from_us(1_500_000);
        assert_eq!(ntp >> 32, 2_208_988_801);
        assert_eq!(ntp & 0xffff_ffff, 1 << 31);
    }
}
