//! Fixed-point money
//!
//! Amounts are whole nanodollars so that summing thousands of per-call costs
//! is exact. JSON carries plain dollar numbers.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An amount of US dollars stored as nanodollars (1e-9 USD)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Usd(i64);

impl Usd {
    /// Zero dollars
    pub const ZERO: Usd = Usd(0);

    /// Nanodollars in one dollar
    pub const NANOS_PER_DOLLAR: i64 = 1_000_000_000;

    /// Build from a nanodollar count
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Build from a dollar amount, rounded to the nearest nanodollar.
    /// Non-finite input maps to zero.
    pub fn from_dollars(dollars: f64) -> Self {
        if !dollars.is_finite() {
            return Self::ZERO;
        }
        let nanos = (dollars * Self::NANOS_PER_DOLLAR as f64).round();
        Self(nanos.clamp(i64::MIN as f64, i64::MAX as f64) as i64)
    }

    /// Raw nanodollar count
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Dollar amount as a float, for display and JSON
    pub fn as_dollars(self) -> f64 {
        self.0 as f64 / Self::NANOS_PER_DOLLAR as f64
    }

    /// Whether the amount is exactly zero
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// `self * numerator / denominator`, rounded half away from zero.
    pub fn scaled(self, numerator: u64, denominator: u64) -> Self {
        if denominator == 0 {
            return Self::ZERO;
        }
        Self(round_div(
            i128::from(self.0) * i128::from(numerator),
            i128::from(denominator),
        ))
    }
}

/// Integer division rounding half away from zero, saturating into `i64`.
pub(crate) fn round_div(value: i128, denominator: i128) -> i64 {
    let half = denominator / 2;
    let rounded = if value >= 0 {
        (value + half) / denominator
    } else {
        (value - half) / denominator
    };
    rounded.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

impl Add for Usd {
    type Output = Usd;

    fn add(self, rhs: Usd) -> Usd {
        Usd(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Usd {
    fn add_assign(&mut self, rhs: Usd) {
        *self = *self + rhs;
    }
}

impl Sum for Usd {
    fn sum<I: Iterator<Item = Usd>>(iter: I) -> Usd {
        iter.fold(Usd::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Usd> for Usd {
    fn sum<I: Iterator<Item = &'a Usd>>(iter: I) -> Usd {
        iter.copied().sum()
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.6}", self.as_dollars())
    }
}

impl Serialize for Usd {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_dollars())
    }
}

impl<'de> Deserialize<'de> for Usd {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(UsdVisitor)
    }
}

struct UsdVisitor;

impl<'de> Visitor<'de> for UsdVisitor {
    type Value = Usd;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a dollar amount")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Usd, E> {
        if v.is_finite() {
            Ok(Usd::from_dollars(v))
        } else {
            Err(E::custom("dollar amount must be finite"))
        }
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Usd, E> {
        Ok(Usd(v.saturating_mul(Usd::NANOS_PER_DOLLAR)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Usd, E> {
        let v = i64::try_from(v).map_err(|_| E::custom("dollar amount out of range"))?;
        self.visit_i64(v)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Usd, E> {
        let parsed: f64 = v.trim().trim_start_matches('$').parse().map_err(E::custom)?;
        self.visit_f64(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_dollars_rounds() {
        assert_eq!(Usd::from_dollars(0.59).as_nanos(), 590_000_000);
        assert_eq!(Usd::from_dollars(0.000_000_000_4).as_nanos(), 0);
        assert_eq!(Usd::from_dollars(0.000_000_000_6).as_nanos(), 1);
        assert_eq!(Usd::from_dollars(f64::NAN), Usd::ZERO);
    }

    #[test]
    fn test_scaled_rounds_half_up() {
        let price = Usd::from_nanos(590);
        assert_eq!(price.scaled(1, 2).as_nanos(), 295);
        assert_eq!(Usd::from_nanos(3).scaled(1, 2).as_nanos(), 2);
        assert_eq!(Usd::from_nanos(5).scaled(3, 0), Usd::ZERO);
    }

    #[test]
    fn test_summing_many_small_amounts_is_exact() {
        let tiny = Usd::from_dollars(0.000_001_234);
        let total: Usd = std::iter::repeat(tiny).take(10_000).sum();
        assert_eq!(total.as_nanos(), 12_340_000);
        assert!((total.as_dollars() - 0.01234).abs() < 1e-12);
    }

    #[test]
    fn test_json_round_trip_is_exact() {
        let amount = Usd::from_nanos(1_234_567_891);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "1.234567891");
        let back: Usd = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);

        let whole: Usd = serde_json::from_str("2").unwrap();
        assert_eq!(whole.as_nanos(), 2_000_000_000);
    }

    #[test]
    fn test_display() {
        assert_eq!(Usd::from_dollars(0.0105).to_string(), "$0.010500");
    }
}
