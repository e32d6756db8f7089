use chrono::NaiveDate;
use md5::{Digest, Md5};

/// Sentinel for absent or NaN-like identifier values.
const MISSING: &str = "nan";

/// Normalize an identifier-like field before hashing so that incidental
/// re-export formatting does not change the digest:
/// - `None`, blank, or NaN/Inf-like values collapse to the `"nan"` sentinel;
/// - numeric-looking strings collapse to their integer representation
///   (`"12345.0"` and `"12345"` hash identically);
/// - everything else is trimmed and lowercased.
pub fn normalize_id(value: Option<&str>) -> String {
    let s = match value {
        Some(v) => v.trim().to_lowercase(),
        None => return MISSING.to_string(),
    };
    if s.is_empty() || matches!(s.as_str(), "nan" | "inf" | "-inf" | "infinity" | "-infinity") {
        return MISSING.to_string();
    }
    if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < 9e15 {
            return format!("{}", f as i64);
        }
        if f.is_finite() {
            return s;
        }
        return MISSING.to_string();
    }
    s
}

fn digest(components: &[&str]) -> String {
    let joined = components.join("|");
    let hash = Md5::digest(joined.as_bytes());
    format!("{:x}", hash)
}

/// Deduplication key for a transaction record: `user_id` + normalized
/// order and product identifiers. Measures are deliberately excluded so a
/// re-upload with corrected totals updates the row instead of duplicating it.
pub fn transaction_row_hash(user_id: i64, order_id: Option<&str>, product_id: Option<&str>) -> String {
    let uid = user_id.to_string();
    let oid = normalize_id(order_id);
    let pid = normalize_id(product_id);
    digest(&[&uid, &oid, &pid])
}

/// Deduplication key for a click record: `user_id` + date + channel + sub-id.
pub fn click_row_hash(user_id: i64, date: NaiveDate, channel: &str, sub_id: Option<&str>) -> String {
    let uid = user_id.to_string();
    let date_str = date.format("%Y-%m-%d").to_string();
    let channel_norm = channel.trim().to_lowercase();
    let sub = sub_id
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_default();
    digest(&[&uid, &date_str, &channel_norm, &sub])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_collapse_to_integers() {
        assert_eq!(normalize_id(Some("12345.0")), "12345");
        assert_eq!(normalize_id(Some("12345")), "12345");
        assert_eq!(normalize_id(Some(" 0042 ")), "42");
    }

    #[test]
    fn blank_and_nan_collapse_to_sentinel() {
        assert_eq!(normalize_id(None), "nan");
        assert_eq!(normalize_id(Some("")), "nan");
        assert_eq!(normalize_id(Some("  ")), "nan");
        assert_eq!(normalize_id(Some("NaN")), "nan");
        assert_eq!(normalize_id(Some("inf")), "nan");
    }

    #[test]
    fn string_ids_trim_and_lowercase() {
        assert_eq!(normalize_id(Some(" ABC-123 ")), "abc-123");
    }

    #[test]
    fn hash_stable_across_reexport_formatting() {
        let a = transaction_row_hash(7, Some("12345.0"), Some("99"));
        let b = transaction_row_hash(7, Some("12345"), Some("99.0"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn hash_varies_with_user_and_dimensions() {
        let base = transaction_row_hash(7, Some("1"), Some("2"));
        assert_ne!(base, transaction_row_hash(8, Some("1"), Some("2")));
        assert_ne!(base, transaction_row_hash(7, Some("1"), Some("3")));
    }

    #[test]
    fn click_hash_ignores_case_and_padding() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let a = click_row_hash(1, d, "Instagram", Some(" Promo "));
        let b = click_row_hash(1, d, "instagram", Some("promo"));
        assert_eq!(a, b);
        assert_ne!(a, click_row_hash(1, d, "facebook", Some("promo")));
    }

    #[test]
    fn click_hash_treats_blank_sub_id_as_absent() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(
            click_row_hash(1, d, "x", Some("  ")),
            click_row_hash(1, d, "x", None)
        );
    }
}
