//! Fixed-point ×10⁶ price math.
//!
//! All prices and money amounts are i64 integers scaled by 10⁶. Intermediate
//! products run in i128 and division truncates toward zero, except bucket
//! mapping which floors.

use thiserror::Error;

/// Scale factor for fixed-point prices.
pub const PX_SCALE: i64 = 1_000_000;

const FRAC_DIGITS: usize = 6;

/// Errors from fixed-point parsing and math.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixedError {
    #[error("invalid decimal string: {0}")]
    Parse(String),
    #[error("value out of i64 range: {0}")]
    Overflow(String),
    #[error("tick must be positive")]
    BadTick,
    #[error("lot ratio must have a positive denominator")]
    BadLot,
}

/// Parse a decimal string into an i64 ×10⁶ value.
///
/// The fractional part is padded to six digits; digits beyond the sixth are
/// truncated toward zero. The sign is preserved.
pub fn parse_px6(s: &str) -> Result<i64, FixedError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(FixedError::Parse("empty string".to_string()));
    }

    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1i128, rest),
        None => (1i128, s.strip_prefix('+').unwrap_or(s)),
    };

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(FixedError::Parse(s.to_string()));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(FixedError::Parse(s.to_string()));
    }

    let int_value: i128 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse::<i128>()
            .map_err(|_| FixedError::Overflow(s.to_string()))?
    };

    let mut frac = frac_part.to_string();
    frac.truncate(FRAC_DIGITS);
    while frac.len() < FRAC_DIGITS {
        frac.push('0');
    }
    let frac_value: i128 = frac.parse::<i128>().unwrap_or(0);

    let value = sign * (int_value * PX_SCALE as i128 + frac_value);
    i64::try_from(value).map_err(|_| FixedError::Overflow(s.to_string()))
}

/// Format an i64 ×10⁶ value as a decimal string without trailing zeros.
pub fn format_px6(v: i64) -> String {
    let sign = if v < 0 { "-" } else { "" };
    let abs = (v as i128).unsigned_abs();
    let int_part = abs / PX_SCALE as u128;
    let frac_part = abs % PX_SCALE as u128;
    if frac_part == 0 {
        return format!("{}{}", sign, int_part);
    }
    let frac = format!("{:06}", frac_part);
    let frac = frac.trim_end_matches('0');
    format!("{}{}.{}", sign, int_part, frac)
}

/// Map a ×10⁶ price into its bucket: floor(price_x6 / tick_x6).
pub fn bucket_id(price_x6: i64, tick_x6: i64) -> Result<i64, FixedError> {
    if tick_x6 <= 0 {
        return Err(FixedError::BadTick);
    }
    Ok(price_x6.div_euclid(tick_x6))
}

/// Notional in USD ×10⁶: floor toward zero of entry_x6 · lots · lot_num / lot_den.
pub fn notional_usd6(
    entry_x6: i64,
    lots: i64,
    lot_num: i64,
    lot_den: i64,
) -> Result<i64, FixedError> {
    if lot_den <= 0 {
        return Err(FixedError::BadLot);
    }
    let n = entry_x6 as i128 * lots as i128 * lot_num as i128 / lot_den as i128;
    i64::try_from(n).map_err(|_| FixedError::Overflow(format!("notional {}", n)))
}

/// Margin in USD ×10⁶: truncating division of notional by leverage.
///
/// Only meaningful for open positions with leverage >= 1; zero otherwise.
pub fn margin_usd6(notional_usd6: i64, leverage_x: i64) -> i64 {
    if leverage_x <= 0 {
        return 0;
    }
    notional_usd6 / leverage_x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_px6_whole_and_fraction() {
        assert_eq!(parse_px6("108910.01").unwrap(), 108_910_010_000);
        assert_eq!(parse_px6("100").unwrap(), 100_000_000);
        assert_eq!(parse_px6("0.000001").unwrap(), 1);
        assert_eq!(parse_px6(".5").unwrap(), 500_000);
        assert_eq!(parse_px6("7.").unwrap(), 7_000_000);
    }

    #[test]
    fn test_parse_px6_sign_preserved() {
        assert_eq!(parse_px6("-1.5").unwrap(), -1_500_000);
        assert_eq!(parse_px6("+2").unwrap(), 2_000_000);
    }

    #[test]
    fn test_parse_px6_truncates_extra_digits() {
        assert_eq!(parse_px6("1.1234567").unwrap(), 1_123_456);
        assert_eq!(parse_px6("-1.9999999").unwrap(), -1_999_999);
    }

    #[test]
    fn test_parse_px6_rejects_garbage() {
        assert!(matches!(parse_px6(""), Err(FixedError::Parse(_))));
        assert!(matches!(parse_px6("."), Err(FixedError::Parse(_))));
        assert!(matches!(parse_px6("1.2.3"), Err(FixedError::Parse(_))));
        assert!(matches!(parse_px6("abc"), Err(FixedError::Parse(_))));
        assert!(matches!(
            parse_px6("99999999999999999999"),
            Err(FixedError::Overflow(_))
        ));
    }

    #[test]
    fn test_format_px6() {
        assert_eq!(format_px6(108_910_010_000), "108910.01");
        assert_eq!(format_px6(100_000_000), "100");
        assert_eq!(format_px6(1), "0.000001");
        assert_eq!(format_px6(-1_500_000), "-1.5");
        assert_eq!(format_px6(0), "0");
    }

    #[test]
    fn test_parse_format_round_trip() {
        for v in [0, 1, -1, 999_999, 1_000_000, 108_910_010_000, -42_123_456] {
            assert_eq!(parse_px6(&format_px6(v)).unwrap(), v);
        }
    }

    #[test]
    fn test_bucket_id_floors() {
        assert_eq!(bucket_id(108_910_010_000, 10_000).unwrap(), 10_891_001);
        assert_eq!(bucket_id(99_000_000, 10_000).unwrap(), 9_900);
        assert_eq!(bucket_id(9_999, 10_000).unwrap(), 0);
        // Floor, not truncation, for negative prices.
        assert_eq!(bucket_id(-1, 10_000).unwrap(), -1);
    }

    #[test]
    fn test_bucket_id_rejects_bad_tick() {
        assert_eq!(bucket_id(100, 0), Err(FixedError::BadTick));
        assert_eq!(bucket_id(100, -5), Err(FixedError::BadTick));
    }

    #[test]
    fn test_notional_and_margin() {
        // 100 USD entry, 2 lots, 1:1 lot ratio => 200 USD notional.
        let notional = notional_usd6(100_000_000, 2, 1, 1).unwrap();
        assert_eq!(notional, 200_000_000);
        assert_eq!(margin_usd6(notional, 5), 40_000_000);
    }

    #[test]
    fn test_notional_truncates_toward_zero() {
        // 1 lot of 1/3 with an odd entry price.
        assert_eq!(notional_usd6(100, 1, 1, 3).unwrap(), 33);
        assert_eq!(notional_usd6(-100, 1, 1, 3).unwrap(), -33);
    }

    #[test]
    fn test_notional_guards() {
        assert_eq!(notional_usd6(1, 1, 1, 0), Err(FixedError::BadLot));
        assert_eq!(margin_usd6(100, 0), 0);
    }

    #[test]
    fn test_notional_survives_large_inputs() {
        // i64-max entry with max lots would overflow i64 multiplication;
        // the i128 intermediate must carry it until the final range check.
        let r = notional_usd6(i64::MAX, 65_535, 1, 1_000_000);
        assert!(r.is_ok());
    }
}
