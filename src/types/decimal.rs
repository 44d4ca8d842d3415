//! Fixed-point decimal values.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Largest scale representable with an `i128` mantissa.
pub const MAX_SCALE: u32 = 38;

/// Decimal value: `mantissa * 10^-scale`.
///
/// Two decimals are equal when they denote the same number, whatever their
/// scales (`1.50 == 1.5`).
#[derive(Debug, Clone, Copy)]
pub struct Decimal {
    mantissa: i128,
    scale: u32,
}

pub(crate) fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

impl Decimal {
    pub fn new(mantissa: i128, scale: u32) -> Self {
        Self { mantissa, scale }
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Rescale to `scale` digits. Extra digits are truncated toward zero.
    /// Returns `None` when the mantissa would overflow.
    pub fn rescale(&self, scale: u32) -> Option<Decimal> {
        let mantissa = match scale.cmp(&self.scale) {
            Ordering::Equal => self.mantissa,
            Ordering::Greater => self.mantissa.checked_mul(pow10(scale - self.scale)?)?,
            Ordering::Less => match pow10(self.scale - scale) {
                Some(div) => self.mantissa / div,
                None => 0,
            },
        };
        Some(Decimal { mantissa, scale })
    }

    /// Number of significant decimal digits in the mantissa.
    pub fn digits(&self) -> u32 {
        let mut n = self.mantissa.unsigned_abs();
        let mut digits = 1;
        while n >= 10 {
            n /= 10;
            digits += 1;
        }
        digits
    }

    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 / 10f64.powi(self.scale as i32)
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        let scale = self.scale.max(other.scale);
        // A side that overflows at the common scale is larger than any side
        // that fits, so they cannot be equal.
        match (self.rescale(scale), other.rescale(scale)) {
            (Some(a), Some(b)) => a.mantissa == b.mantissa,
            _ => false,
        }
    }
}

impl From<i64> for Decimal {
    fn from(v: i64) -> Self {
        Decimal::new(v as i128, 0)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let scale = self.scale as usize;
        if scale == 0 {
            return write!(f, "{}{}", sign, digits);
        }
        if digits.len() > scale {
            let (int, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{}{}.{}", sign, int, frac)
        } else {
            write!(f, "{}0.{}{}", sign, "0".repeat(scale - digits.len()), digits)
        }
    }
}

/// Error parsing a decimal literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDecimalError(String);

impl fmt::Display for ParseDecimalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid decimal literal '{}'", self.0)
    }
}

impl std::error::Error for ParseDecimalError {}

impl FromStr for Decimal {
    type Err = ParseDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDecimalError(s.to_string());
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (int, frac) = body.split_once('.').unwrap_or((body, ""));
        if int.is_empty() && frac.is_empty() {
            return Err(err());
        }
        if !int.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        let scale = frac.len() as u32;
        if scale > MAX_SCALE {
            return Err(err());
        }
        let mut mantissa: i128 = 0;
        for c in int.chars().chain(frac.chars()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add((c as u8 - b'0') as i128))
                .ok_or_else(err)?;
        }
        if negative {
            mantissa = -mantissa;
        }
        Ok(Decimal { mantissa, scale })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_across_scales() {
        assert_eq!(Decimal::new(150, 2), Decimal::new(15, 1));
        assert_ne!(Decimal::new(151, 2), Decimal::new(15, 1));
        assert_ne!(Decimal::new(i128::MAX, 0), Decimal::new(1, 1));
    }

    #[test]
    fn test_rescale_truncates_toward_zero() {
        assert_eq!(Decimal::new(12_345, 3).rescale(1).unwrap().mantissa(), 123);
        assert_eq!(Decimal::new(-12_345, 3).rescale(1).unwrap().mantissa(), -123);
        assert_eq!(Decimal::new(7, 0).rescale(2).unwrap().mantissa(), 700);
        assert!(Decimal::new(i128::MAX, 0).rescale(1).is_none());
    }

    #[test]
    fn test_display_and_parse() {
        assert_eq!(Decimal::new(-5, 3).to_string(), "-0.005");
        assert_eq!(Decimal::new(123_450, 3).to_string(), "123.450");
        assert_eq!(Decimal::new(42, 0).to_string(), "42");

        let d: Decimal = "-123.450".parse().unwrap();
        assert_eq!(d.mantissa(), -123_450);
        assert_eq!(d.scale(), 3);
        assert!("1.2.3".parse::<Decimal>().is_err());
        assert!("abc".parse::<Decimal>().is_err());
    }

    #[test]
    fn test_digits() {
        assert_eq!(Decimal::new(0, 0).digits(), 1);
        assert_eq!(Decimal::new(-99_999, 2).digits(), 5);
    }
}
