//! Integer wei amounts.
//!
//! Amounts are always held as an integer count of wei. ETH strings coming
//! from forms are parsed digit by digit, so `"0.0001"` is exactly
//! `100_000_000_000_000` wei with no floating-point rounding on the way.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{CoordinatorError, Result};

const ETH_DECIMALS: usize = 18;
const BPS_DENOMINATOR: u128 = 10_000;

/// An amount in wei. Serialized as a decimal string because values routinely
/// exceed the safe integer range of JSON consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Wei(pub u128);

impl Wei {
    pub const ZERO: Wei = Wei(0);
    pub const ONE_ETH: Wei = Wei(1_000_000_000_000_000_000);

    /// Parse a decimal ETH amount (`"1"`, `"0.1"`, `"0.0001"`) into wei.
    pub fn from_eth_str(input: &str) -> Result<Self> {
        let s = input.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        let well_formed = !whole.is_empty()
            && whole.bytes().all(|b| b.is_ascii_digit())
            && frac.bytes().all(|b| b.is_ascii_digit())
            && !(s.contains('.') && frac.is_empty());
        if !well_formed {
            return Err(CoordinatorError::Validation(format!(
                "invalid ETH amount: {input:?}"
            )));
        }
        if frac.len() > ETH_DECIMALS {
            return Err(CoordinatorError::Validation(format!(
                "ETH amount {input:?} has more than {ETH_DECIMALS} decimal places"
            )));
        }

        let overflow = || CoordinatorError::Validation(format!("ETH amount {input:?} is too large"));
        let whole_wei = whole
            .parse::<u128>()
            .map_err(|_| overflow())?
            .checked_mul(Self::ONE_ETH.0)
            .ok_or_else(overflow)?;
        let frac_wei = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<width$}", width = ETH_DECIMALS);
            padded.parse::<u128>().map_err(|_| overflow())?
        };

        whole_wei
            .checked_add(frac_wei)
            .map(Wei)
            .ok_or_else(overflow)
    }

    /// Render as a decimal ETH string with trailing zeros trimmed.
    pub fn to_eth_string(&self) -> String {
        let whole = self.0 / Self::ONE_ETH.0;
        let frac = self.0 % Self::ONE_ETH.0;
        if frac == 0 {
            return whole.to_string();
        }
        let frac = format!("{frac:0>width$}", width = ETH_DECIMALS);
        format!("{whole}.{}", frac.trim_end_matches('0'))
    }

    pub fn checked_add(self, other: Wei) -> Option<Wei> {
        self.0.checked_add(other.0).map(Wei)
    }

    /// Fee of `bps` basis points, rounded down.
    pub fn fee(self, bps: u32) -> Result<Wei> {
        self.0
            .checked_mul(bps as u128)
            .map(|v| Wei(v / BPS_DENOMINATOR))
            .ok_or_else(|| CoordinatorError::Validation("fee computation overflowed".into()))
    }

    /// Amount plus platform fee: the value attached to `createBounty`.
    pub fn with_fee(self, bps: u32) -> Result<Wei> {
        self.checked_add(self.fee(bps)?)
            .ok_or_else(|| CoordinatorError::Validation("total value overflowed".into()))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Wei {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoordinatorError::Validation(format!(
                "invalid wei amount: {s:?}"
            )));
        }
        s.parse::<u128>()
            .map(Wei)
            .map_err(|_| CoordinatorError::Validation(format!("wei amount {s:?} is too large")))
    }
}

impl Serialize for Wei {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Wei {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct WeiVisitor;

        impl<'de> Visitor<'de> for WeiVisitor {
            type Value = Wei;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a wei amount as a decimal string or unsigned integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Wei, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Wei, E> {
                Ok(Wei(v as u128))
            }
        }

        deserializer.deserialize_any(WeiVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_eth_without_rounding() {
        assert_eq!(Wei::from_eth_str("1").unwrap(), Wei::ONE_ETH);
        assert_eq!(
            Wei::from_eth_str("0.1").unwrap(),
            Wei(100_000_000_000_000_000)
        );
        assert_eq!(
            Wei::from_eth_str("0.0001").unwrap(),
            Wei(100_000_000_000_000)
        );
        assert_eq!(Wei::from_eth_str("0.000000000000000001").unwrap(), Wei(1));
        assert_eq!(
            Wei::from_eth_str("10.5").unwrap(),
            Wei(10_500_000_000_000_000_000)
        );
    }

    #[test]
    fn rejects_malformed_eth() {
        for bad in ["", ".5", "1.", "-1", "1e18", "abc", "1.2.3", "0.0000000000000000001"] {
            assert!(Wei::from_eth_str(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn eth_string_trims_trailing_zeros() {
        assert_eq!(Wei::ONE_ETH.to_eth_string(), "1");
        assert_eq!(Wei(100_000_000_000_000).to_eth_string(), "0.0001");
        assert_eq!(Wei(1).to_eth_string(), "0.000000000000000001");
        assert_eq!(Wei::ZERO.to_eth_string(), "0");
    }

    #[test]
    fn platform_fee_is_basis_points() {
        let amount = Wei::from_eth_str("0.1").unwrap();
        assert_eq!(amount.fee(250).unwrap(), Wei(2_500_000_000_000_000));
        assert_eq!(amount.with_fee(250).unwrap(), Wei(102_500_000_000_000_000));
        assert_eq!(Wei(39).fee(250).unwrap(), Wei(0));
    }

    #[test]
    fn serializes_as_decimal_string() {
        let big = Wei(10_000_000_000_000_000_000);
        let json = serde_json::to_string(&big).unwrap();
        assert_eq!(json, "\"10000000000000000000\"");
        let back: Wei = serde_json::from_str(&json).unwrap();
        assert_eq!(back, big);
        let from_number: Wei = serde_json::from_str("42").unwrap();
        assert_eq!(from_number, Wei(42));
    }
}
