//! Decimal <-> base-unit conversion for token amounts.

use crate::error::AmountError;

/// Parse a human decimal string ("12.5", "100") into base units.
pub fn parse_units(s: &str, decimals: u8) -> Result<u64, AmountError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(AmountError::Empty);
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(AmountError::Invalid(s.to_string()));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountError::Invalid(s.to_string()));
    }
    if frac.len() > decimals as usize {
        return Err(AmountError::TooPrecise { value: s.to_string(), decimals });
    }

    let scale = 10u64
        .checked_pow(decimals as u32)
        .ok_or_else(|| AmountError::Overflow(s.to_string()))?;
    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| AmountError::Overflow(s.to_string()))?
    };
    let frac_units: u64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = decimals as usize);
        padded.parse().map_err(|_| AmountError::Invalid(s.to_string()))?
    };

    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(|| AmountError::Overflow(s.to_string()))
}

/// Render base units as a decimal string with at least two fractional
/// digits and no trailing zeros beyond that.
pub fn format_units(amount: u64, decimals: u8) -> String {
    if decimals == 0 {
        return format!("{amount}.00");
    }
    let scale = 10u64.pow(decimals as u32);
    let whole = amount / scale;
    let frac = format!("{:0width$}", amount % scale, width = decimals as usize);
    let trimmed = frac.trim_end_matches('0');
    let frac = if trimmed.len() < 2 { &frac[..2.min(frac.len())] } else { trimmed };
    format!("{whole}.{frac}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(parse_units("100", 6).unwrap(), 100_000_000);
        assert_eq!(parse_units("12.5", 6).unwrap(), 12_500_000);
        assert_eq!(parse_units(" 0.000001 ", 6).unwrap(), 1);
        assert_eq!(parse_units(".25", 6).unwrap(), 250_000);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_units("", 6), Err(AmountError::Empty));
        assert!(matches!(parse_units("-1", 6), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_units("1.2.3", 6), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_units(".", 6), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_units("0.0000001", 6), Err(AmountError::TooPrecise { .. })));
        assert!(matches!(parse_units("99999999999999999999", 6), Err(AmountError::Overflow(_))));
    }

    #[test]
    fn formats_with_two_decimals_minimum() {
        assert_eq!(format_units(80_000_000, 6), "80.00");
        assert_eq!(format_units(12_500_000, 6), "12.50");
        assert_eq!(format_units(1, 6), "0.000001");
        assert_eq!(format_units(1_234_560, 6), "1.23456");
        assert_eq!(format_units(7, 0), "7.00");
    }
}
