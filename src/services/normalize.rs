use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Parse a locale-ambiguous numeric cell.
///
/// Strips currency symbols, regular and non-breaking whitespace, then applies
/// the separator heuristic, biased toward Brazilian-Portuguese exports (the
/// primary source format — a policy decision, not a bug):
/// - both `.` and `,` present: `.` is a thousands separator, `,` is decimal;
/// - only `,`: decimal separator;
/// - only `.` occurring more than once: thousands separators;
/// - a single `.`: decimal separator.
///
/// Returns `None` for blank or unparseable input; never panics.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }

    let has_comma = cleaned.contains(',');
    let has_dot = cleaned.contains('.');
    let canonical = if has_comma && has_dot {
        cleaned.replace('.', "").replace(',', ".")
    } else if has_comma {
        cleaned.replace(',', ".")
    } else if has_dot && cleaned.matches('.').count() > 1 {
        cleaned.replace('.', "")
    } else {
        cleaned
    };

    canonical.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Non-negative integer count (quantities, click counts). Accepts numeric
/// strings with the same separator heuristic, truncating any decimal part.
pub fn parse_count(raw: &str) -> Option<i64> {
    parse_numeric(raw).map(|v| v.trunc() as i64)
}

/// A parsed date cell, with the time-of-day component when the source column
/// carried a full datetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedStamp {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

// Day-first variants before month-first, matching the source locale.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d/%m/%y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%m/%d/%Y",
];

/// Parse a date or datetime cell, trying ISO first, then the fixed list of
/// day/month/year and month/day/year variants. `None` if nothing matches;
/// the caller substitutes the processing date and records a warning.
pub fn parse_stamp(raw: &str) -> Option<ParsedStamp> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ParsedStamp {
                date: dt.date(),
                time: Some(dt.time()),
            });
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(ParsedStamp { date: d, time: None });
        }
    }
    None
}

/// Parse a standalone time-of-day cell.
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let s = raw.trim();
    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(s, fmt) {
            return Some(t);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_round_trip_separator_variants() {
        assert_eq!(parse_numeric("1.234,56"), Some(1234.56));
        assert_eq!(parse_numeric("1234,56"), Some(1234.56));
        assert_eq!(parse_numeric("1234.56"), Some(1234.56));
    }

    #[test]
    fn numeric_strips_currency_and_whitespace() {
        assert_eq!(parse_numeric("R$ 45,00"), Some(45.0));
        assert_eq!(parse_numeric("R$\u{a0}1.500,75"), Some(1500.75));
        assert_eq!(parse_numeric(" -12,5 "), Some(-12.5));
    }

    #[test]
    fn multiple_dots_are_thousands_separators() {
        assert_eq!(parse_numeric("1.000.000"), Some(1_000_000.0));
        assert_eq!(parse_numeric("1.19"), Some(1.19));
    }

    #[test]
    fn numeric_garbage_is_none_not_nan() {
        assert_eq!(parse_numeric(""), None);
        assert_eq!(parse_numeric("abc"), None);
        assert_eq!(parse_numeric("-"), None);
    }

    #[test]
    fn count_truncates_decimals() {
        assert_eq!(parse_count("5"), Some(5));
        assert_eq!(parse_count("3,7"), Some(3));
        assert_eq!(parse_count("x"), None);
    }

    #[test]
    fn stamp_accepts_iso_and_dayfirst() {
        let iso = parse_stamp("2024-01-02").unwrap();
        assert_eq!(iso.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(iso.time, None);

        // Day-first wins for ambiguous slash dates.
        let br = parse_stamp("01/02/2024").unwrap();
        assert_eq!(br.date, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());

        let dt = parse_stamp("2026-01-07 23:59:22").unwrap();
        assert_eq!(dt.date, NaiveDate::from_ymd_opt(2026, 1, 7).unwrap());
        assert_eq!(dt.time, Some(NaiveTime::from_hms_opt(23, 59, 22).unwrap()));
    }

    #[test]
    fn stamp_rejects_noise() {
        assert_eq!(parse_stamp("Instagram"), None);
        assert_eq!(parse_stamp(""), None);
    }

    #[test]
    fn time_parses_with_and_without_seconds() {
        assert_eq!(parse_time("09:30"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(parse_time("23:59:22"), NaiveTime::from_hms_opt(23, 59, 22));
        assert_eq!(parse_time("later"), None);
    }
}
