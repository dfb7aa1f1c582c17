//! Human readable uptime.

const UNITS: [(&str, u64); 6] = [
    ("year", 365 * 24 * 3600),
    ("month", 30 * 24 * 3600),
    ("day", 24 * 3600),
    ("hour", 3600),
    ("minute", 60),
    ("second", 1),
];

/// Render `seconds` greedily in the largest units first, skipping zero parts.
///
/// `90061` becomes `"1 day, 1 hour, 1 minute, 1 second"`. Zero renders as an
/// empty string.
pub fn format_uptime(seconds: u64) -> String {
    let mut remaining = seconds;
    let mut parts = Vec::new();

    for (label, unit) in UNITS {
        let count = remaining / unit;
        if count > 0 {
            let plural = if count > 1 { "s" } else { "" };
            parts.push(format!("{count} {label}{plural}"));
            remaining %= unit;
        }
    }

    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_of_each_small_unit() {
        assert_eq!(format_uptime(90061), "1 day, 1 hour, 1 minute, 1 second");
    }

    #[test]
    fn test_plurals_and_skipped_units() {
        assert_eq!(format_uptime(2 * 3600 + 5), "2 hours, 5 seconds");
    }

    #[test]
    fn test_years_and_months() {
        let seconds = 365 * 24 * 3600 + 2 * 30 * 24 * 3600 + 59;
        assert_eq!(format_uptime(seconds), "1 year, 2 months, 59 seconds");
    }

    #[test]
    fn test_zero() {
        assert_eq!(format_uptime(0), "");
    }
}
