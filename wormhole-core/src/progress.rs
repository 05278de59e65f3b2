//! Progress display helpers: clamped fraction and human-readable byte counts (SI units).

const UNITS: [&str; 6] = ["kB", "MB", "GB", "TB", "PB", "EB"];

/// `received / total` clamped to `[0, 1]`; `0` when the total is unknown (zero).
pub fn progress_fraction(received: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (received as f64 / total as f64).clamp(0.0, 1.0) as f32
}

/// Format a byte count, e.g. `1536` -> `"1.5 kB"`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1000 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    for unit in UNITS {
        value /= 1000.0;
        // Decide on the rounded text so 999_950 becomes "1.0 MB", not "1000.0 kB".
        let shown = format!("{:.1}", value);
        if value < 1000.0 && shown != "1000.0" {
            return format!("{} {}", shown, unit);
        }
    }
    format!("{:.1} {}", value, UNITS[UNITS.len() - 1])
}

/// `"<current> / <total>"`, e.g. `"1.5 MB / 10.0 MB"`.
pub fn format_progress(current: u64, total: u64) -> String {
    format!("{} / {}", format_bytes(current), format_bytes(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_is_clamped() {
        assert_eq!(progress_fraction(0, 0), 0.0);
        assert_eq!(progress_fraction(50, 0), 0.0);
        assert_eq!(progress_fraction(0, 100), 0.0);
        assert_eq!(progress_fraction(50, 100), 0.5);
        assert_eq!(progress_fraction(100, 100), 1.0);
        assert_eq!(progress_fraction(250, 100), 1.0);
        assert_eq!(progress_fraction(u64::MAX, 1), 1.0);
    }

    #[test]
    fn fraction_in_unit_interval() {
        for total in [0u64, 1, 7, 1000, u64::MAX] {
            for received in [0u64, 1, 3, 999, 1000, 5000, u64::MAX] {
                let f = progress_fraction(received, total);
                assert!((0.0..=1.0).contains(&f), "{received}/{total} -> {f}");
            }
        }
    }

    #[test]
    fn bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(999), "999 B");
        assert_eq!(format_bytes(1536), "1.5 kB");
        assert_eq!(format_bytes(10_000_000), "10.0 MB");
        assert_eq!(format_progress(1_500_000, 10_000_000), "1.5 MB / 10.0 MB");
    }

    #[test]
    fn bytes_roll_over_at_unit_boundary() {
        assert_eq!(format_bytes(999_949), "999.9 kB");
        assert_eq!(format_bytes(999_950), "1.0 MB");
        assert_eq!(format_bytes(999_999_999), "1.0 GB");
        assert_eq!(format_bytes(u64::MAX), "18.4 EB");
    }
}
