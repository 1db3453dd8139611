//! Time unit conversions
//!
//! Playback positions are tracked in microseconds internally and exposed in
//! milliseconds at the facade boundary. Unknown values are `Option::None`
//! throughout; there is no sentinel constant.

/// Convert a millisecond position to microseconds.
pub fn ms_to_us(ms: u64) -> u64 {
    ms.saturating_mul(1000)
}

/// Convert a microsecond position to milliseconds, rounding down.
pub fn us_to_ms(us: u64) -> u64 {
    us / 1000
}

/// Convert an optional millisecond position to microseconds.
pub fn opt_ms_to_us(ms: Option<u64>) -> Option<u64> {
    ms.map(ms_to_us)
}

/// Convert an optional microsecond position to milliseconds.
pub fn opt_us_to_ms(us: Option<u64>) -> Option<u64> {
    us.map(us_to_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_whole_milliseconds() {
        assert_eq!(us_to_ms(ms_to_us(1234)), 1234);
    }

    #[test]
    fn us_to_ms_rounds_down() {
        assert_eq!(us_to_ms(1999), 1);
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        assert_eq!(ms_to_us(u64::MAX), u64::MAX);
    }
}
