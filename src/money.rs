//! Fixed-point money.
//!
//! Every ledger amount is held as an `i64` count of 10^-8 units. Human input
//! (decimal strings, JSON numbers, Postgres `NUMERIC`) is converted exactly,
//! rounding half-up at the ninth fractional digit. Arithmetic and equality
//! checks never touch floating point.

use bigdecimal::BigDecimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits carried by [`Amount`].
pub const SCALE: u32 = 8;

/// Scaled units in one whole unit of currency.
pub const UNIT: i64 = 100_000_000;

/// One cent, in scaled units.
pub const CENT: i64 = UNIT / 100;

// Exponents beyond this either overflow i64 or round to zero.
const MAX_EXPONENT: i64 = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("malformed amount: {0:?}")]
    Malformed(String),

    #[error("amount out of range: {0}")]
    Overflow(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_scaled(units: i64) -> Self {
        Amount(units)
    }

    pub const fn scaled(self) -> i64 {
        self.0
    }

    pub fn from_whole(value: i64) -> Result<Self, AmountError> {
        value
            .checked_mul(UNIT)
            .map(Amount)
            .ok_or_else(|| AmountError::Overflow(value.to_string()))
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, rhs: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_add(rhs.0)
            .map(Amount)
            .ok_or_else(|| AmountError::Overflow(format!("{} + {}", self, rhs)))
    }

    pub fn checked_sub(self, rhs: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_sub(rhs.0)
            .map(Amount)
            .ok_or_else(|| AmountError::Overflow(format!("{} - {}", self, rhs)))
    }

    /// Converts an on-chain integer token value with `decimals` fractional
    /// digits (USDT-TRC20 uses 6).
    pub fn from_base_units(raw: &str, decimals: u32) -> Result<Self, AmountError> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::Malformed(raw.to_string()));
        }
        parse_decimal(&format!("{}e-{}", raw, decimals))
    }

    /// Whether the amount can be expressed with `decimals` fractional digits.
    pub fn fits_decimals(self, decimals: u32) -> bool {
        if decimals >= SCALE {
            return true;
        }
        self.0 % 10_i64.pow(SCALE - decimals) == 0
    }

    pub fn to_bigdecimal(self) -> BigDecimal {
        BigDecimal::new(self.0.into(), SCALE as i64)
    }

    pub fn from_bigdecimal(value: &BigDecimal) -> Result<Self, AmountError> {
        parse_decimal(&value.to_string())
    }
}

fn parse_decimal(input: &str) -> Result<Amount, AmountError> {
    let malformed = || AmountError::Malformed(input.to_string());
    let overflow = || AmountError::Overflow(input.to_string());

    let s = input.trim();
    let (negative, body) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let (mantissa, exponent) = match body.find(|c| c == 'e' || c == 'E') {
        Some(idx) => {
            let exp = body[idx + 1..].parse::<i64>().map_err(|_| malformed())?;
            (&body[..idx], exp)
        }
        None => (body, 0),
    };

    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(malformed());
    }
    if !int_part
        .bytes()
        .chain(frac_part.bytes())
        .all(|b| b.is_ascii_digit())
    {
        return Err(malformed());
    }

    let digits: Vec<i64> = int_part
        .bytes()
        .chain(frac_part.bytes())
        .map(|b| i64::from(b - b'0'))
        .collect();
    let all_zero = digits.iter().all(|d| *d == 0);
    if all_zero {
        return Ok(Amount::ZERO);
    }
    if exponent > MAX_EXPONENT {
        return Err(overflow());
    }
    let exponent = exponent.max(-MAX_EXPONENT);

    // `cut` digits form the integer part of value * 10^8; the digit right
    // after them decides rounding.
    let cut = int_part.len() as i64 + exponent + i64::from(SCALE);
    let mut units: i64 = 0;
    for i in 0..cut.max(0) {
        let digit = digits.get(i as usize).copied().unwrap_or(0);
        units = units
            .checked_mul(10)
            .and_then(|u| u.checked_add(digit))
            .ok_or_else(overflow)?;
    }

    let round_digit = if cut >= 0 {
        digits.get(cut as usize).copied().unwrap_or(0)
    } else {
        0
    };
    if round_digit >= 5 {
        units = units.checked_add(1).ok_or_else(overflow)?;
    }

    Ok(Amount(if negative { -units } else { units }))
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_decimal(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let unit = UNIT as u64;
        write!(f, "{}{}.{:08}", sign, abs / unit, abs % unit)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal amount as a string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        Amount::from_whole(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        let v = i64::try_from(v).map_err(E::custom)?;
        Amount::from_whole(v).map_err(E::custom)
    }

    // JSON numbers arrive as f64; the shortest round-trip rendering is the
    // decimal the client actually wrote.
    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
        if !v.is_finite() {
            return Err(E::custom(AmountError::Malformed(v.to_string())));
        }
        v.to_string().parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_plain_decimals() {
        assert_eq!(amount("50").scaled(), 50 * UNIT);
        assert_eq!(amount("49.99").scaled(), 4_999_000_000);
        assert_eq!(amount("0.00000001").scaled(), 1);
        assert_eq!(amount(".5").scaled(), 50_000_000);
        assert_eq!(amount("7.").scaled(), 7 * UNIT);
        assert_eq!(amount("  12.5  ").scaled(), 1_250_000_000);
        assert_eq!(amount("-3.25").scaled(), -325_000_000);
    }

    #[test]
    fn test_rounds_half_up_at_ninth_digit() {
        assert_eq!(amount("1.000000004").scaled(), UNIT);
        assert_eq!(amount("1.000000005").scaled(), UNIT + 1);
        assert_eq!(amount("1.0000000049999").scaled(), UNIT);
        assert_eq!(amount("0.999999999").scaled(), UNIT);
        assert_eq!(amount("-1.000000005").scaled(), -(UNIT + 1));
    }

    #[test]
    fn test_parse_exponent_notation() {
        assert_eq!(amount("1.5e2").scaled(), 150 * UNIT);
        assert_eq!(amount("5E-9").scaled(), 1);
        assert_eq!(amount("4E-9").scaled(), 0);
        assert_eq!(amount("1e-300").scaled(), 0);
        assert_eq!(amount("0e999").scaled(), 0);
    }

    #[test]
    fn test_rejects_malformed_input() {
        for bad in ["", "-", ".", "abc", "1.2.3", "1,5", "1e", "e5", "--1", "1 000"] {
            assert!(
                matches!(bad.parse::<Amount>(), Err(AmountError::Malformed(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_overflow() {
        assert!(matches!(
            "100000000000".parse::<Amount>(),
            Err(AmountError::Overflow(_))
        ));
        assert!(matches!("1e90".parse::<Amount>(), Err(AmountError::Overflow(_))));
        assert!(Amount::from_scaled(i64::MAX)
            .checked_add(Amount::from_scaled(1))
            .is_err());
    }

    #[test]
    fn test_display_round_trips_scaled_values() {
        let samples = [
            0,
            1,
            99,
            CENT,
            UNIT,
            4_999_000_000,
            123_456_789_012,
            -1,
            -4_999_000_000,
            i64::MAX,
            i64::MIN + 1,
        ];
        for units in samples {
            let a = Amount::from_scaled(units);
            assert_eq!(a.to_string().parse::<Amount>().unwrap(), a, "{units}");
        }
        assert_eq!(Amount::from_scaled(4_999_000_000).to_string(), "49.99000000");
        assert_eq!(Amount::from_scaled(-1).to_string(), "-0.00000001");
    }

    #[test]
    fn test_from_base_units() {
        assert_eq!(
            Amount::from_base_units("49990000", 6).unwrap(),
            amount("49.99")
        );
        assert_eq!(Amount::from_base_units("1", 18).unwrap(), Amount::ZERO);
        assert_eq!(
            Amount::from_base_units("5000000000", 18).unwrap().scaled(),
            1
        );
        assert!(Amount::from_base_units("-5", 6).is_err());
        assert!(Amount::from_base_units("0x10", 6).is_err());
    }

    #[test]
    fn test_fits_decimals() {
        let amount = |s: &str| s.parse::<Amount>().unwrap();
        assert!(amount("10.123456").fits_decimals(6));
        assert!(amount("49.99").fits_decimals(6));
        assert!(!amount("10.1234567").fits_decimals(6));
        assert!(!amount("10.123456789").fits_decimals(6));
        assert!(amount("10.1234567").fits_decimals(8));
        assert!(!amount("0.5").fits_decimals(0));
    }

    #[test]
    fn test_bigdecimal_conversion() {
        let a = amount("49.99");
        let bd = a.to_bigdecimal();
        assert_eq!(bd, BigDecimal::from_str("49.99000000").unwrap());
        assert_eq!(Amount::from_bigdecimal(&bd).unwrap(), a);
    }

    #[test]
    fn test_serde_accepts_strings_and_numbers() {
        let from_str: Amount = serde_json::from_str("\"49.99\"").unwrap();
        let from_float: Amount = serde_json::from_str("49.99").unwrap();
        let from_int: Amount = serde_json::from_str("50").unwrap();
        assert_eq!(from_str, amount("49.99"));
        assert_eq!(from_float, amount("49.99"));
        assert_eq!(from_int, amount("50"));
        assert_eq!(serde_json::to_string(&from_str).unwrap(), "\"49.99000000\"");
    }
}
