//! Currency amounts and the unit-suffixed text form users type.
//!
//! Amounts are unsigned integers of base units (hastings). A primary
//! currency amount is written with one of the SCP suffixes, a secondary
//! asset amount with `SPF`.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use thiserror::Error;

use crate::node::types::SiafundClass;

/// Decimal exponents larger than this are rejected as malformed.
const MAX_EXPONENT: i64 = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurrencyParseError {
    #[error("malformed amount")]
    Malformed,
    #[error("non-integer number of hastings")]
    NonIntegral,
    #[error("amount is missing currency units. Currency units are case sensitive")]
    MissingUnits,
    #[error("unknown coin type '{0}'")]
    UnknownCoinType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    PrimaryCurrency,
    SecondaryAsset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    Hasting,
    PicoScp,
    NanoScp,
    MicroScp,
    MilliScp,
    Scp,
    KiloScp,
    MegaScp,
    GigaScp,
    TeraScp,
    Spf,
}

impl Unit {
    pub const ALL: [Unit; 11] = [
        Unit::Hasting,
        Unit::PicoScp,
        Unit::NanoScp,
        Unit::MicroScp,
        Unit::MilliScp,
        Unit::Scp,
        Unit::KiloScp,
        Unit::MegaScp,
        Unit::GigaScp,
        Unit::TeraScp,
        Unit::Spf,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Unit::Hasting => "H",
            Unit::PicoScp => "pS",
            Unit::NanoScp => "nS",
            Unit::MicroScp => "uS",
            Unit::MilliScp => "mS",
            Unit::Scp => "SCP",
            Unit::KiloScp => "KS",
            Unit::MegaScp => "MS",
            Unit::GigaScp => "GS",
            Unit::TeraScp => "TS",
            Unit::Spf => "SPF",
        }
    }

    /// Power of ten one unit is worth in base units.
    pub fn exponent(self) -> u32 {
        match self {
            Unit::Hasting | Unit::Spf => 0,
            Unit::PicoScp => 15,
            Unit::NanoScp => 18,
            Unit::MicroScp => 21,
            Unit::MilliScp => 24,
            Unit::Scp => 27,
            Unit::KiloScp => 30,
            Unit::MegaScp => 33,
            Unit::GigaScp => 36,
            Unit::TeraScp => 39,
        }
    }

    pub fn kind(self) -> UnitKind {
        match self {
            Unit::Spf => UnitKind::SecondaryAsset,
            _ => UnitKind::PrimaryCurrency,
        }
    }

    fn scale(self) -> BigUint {
        BigUint::from(10u32).pow(self.exponent())
    }
}

/// Non-negative amount of base units.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Currency(BigUint);

impl Currency {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn from_u64(v: u64) -> Self {
        Self(BigUint::from(v))
    }

    /// `amount` whole units of `unit`.
    pub fn from_units(amount: u64, unit: Unit) -> Self {
        Self(BigUint::from(amount) * unit.scale())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_sub(&self, other: &Currency) -> Option<Currency> {
        if self.0 >= other.0 {
            Some(Currency(&self.0 - &other.0))
        } else {
            None
        }
    }

    pub fn saturating_sub(&self, other: &Currency) -> Currency {
        self.checked_sub(other).unwrap_or_default()
    }

    /// Approximate value in `unit`, for display and ranking only.
    pub fn to_f64(&self, unit: Unit) -> f64 {
        let scale = unit.scale();
        let (whole, rem) = self.0.div_rem(&scale);
        let whole = whole.to_f64().unwrap_or(f64::MAX);
        let frac = match (rem.to_f64(), scale.to_f64()) {
            (Some(r), Some(s)) if s > 0.0 => r / s,
            _ => 0.0,
        };
        whole + frac
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = CurrencyParseError;

    /// Parses a plain base-unit integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CurrencyParseError::Malformed);
        }
        BigUint::parse_bytes(s.as_bytes(), 10)
            .map(Currency)
            .ok_or(CurrencyParseError::Malformed)
    }
}

impl Add for &Currency {
    type Output = Currency;
    fn add(self, other: &Currency) -> Currency {
        Currency(&self.0 + &other.0)
    }
}

impl Add for Currency {
    type Output = Currency;
    fn add(self, other: Currency) -> Currency {
        Currency(self.0 + other.0)
    }
}

impl AddAssign<&Currency> for Currency {
    fn add_assign(&mut self, other: &Currency) {
        self.0 += &other.0;
    }
}

impl<'a> Sum<&'a Currency> for Currency {
    fn sum<I: Iterator<Item = &'a Currency>>(iter: I) -> Self {
        iter.fold(Currency::zero(), |acc, c| &acc + c)
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A parsed amount together with the unit it was written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amount {
    pub value: Currency,
    pub unit: Unit,
}

/// Parses text such as `1.5KS`, `100H` or `3SPF` into base units.
///
/// The longest matching suffix wins. The numeral may carry a decimal
/// point and an `e` exponent; whatever it denotes must be a whole number
/// of base units.
pub fn parse(text: &str) -> Result<Amount, CurrencyParseError> {
    let text = text.trim();
    let unit = Unit::ALL
        .iter()
        .copied()
        .filter(|u| text.ends_with(u.suffix()))
        .max_by_key(|u| u.suffix().len())
        .ok_or(CurrencyParseError::MissingUnits)?;

    let numeral = text[..text.len() - unit.suffix().len()].trim();
    let value = scale_decimal(numeral, unit.exponent())?;
    Ok(Amount {
        value: Currency(value),
        unit,
    })
}

/// Parses a bare number typed for `coin`, appending the coin's unit.
pub fn parse_for(coin: CoinType, text: &str) -> Result<Amount, CurrencyParseError> {
    parse(&format!("{}{}", text.trim(), coin.unit().suffix()))
}

fn scale_decimal(numeral: &str, exponent: u32) -> Result<BigUint, CurrencyParseError> {
    let (mantissa, exp_part) = match numeral.find(['e', 'E']) {
        Some(i) => (&numeral[..i], Some(&numeral[i + 1..])),
        None => (numeral, None),
    };
    let mantissa = mantissa.strip_prefix('+').unwrap_or(mantissa);
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(CurrencyParseError::Malformed);
    }
    let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !digits_only(int_part) || !digits_only(frac_part) {
        return Err(CurrencyParseError::Malformed);
    }

    let extra: i64 = match exp_part {
        Some(e) => e.parse().map_err(|_| CurrencyParseError::Malformed)?,
        None => 0,
    };
    if extra.abs() > MAX_EXPONENT {
        return Err(CurrencyParseError::Malformed);
    }

    let digits = format!("{}{}", int_part, frac_part);
    let value =
        BigUint::parse_bytes(digits.as_bytes(), 10).ok_or(CurrencyParseError::Malformed)?;

    let shift = exponent as i64 + extra - frac_part.len() as i64;
    let ten = BigUint::from(10u32);
    if shift >= 0 {
        Ok(value * ten.pow(shift as u32))
    } else {
        let (q, r) = value.div_rem(&ten.pow(shift.unsigned_abs() as u32));
        if !r.is_zero() {
            return Err(CurrencyParseError::NonIntegral);
        }
        Ok(q)
    }
}

/// Renders `amount` in `unit` rounded half-up to `precision` decimals.
pub fn format(amount: &Currency, unit: Unit, precision: usize) -> String {
    let scale = unit.scale();
    let (mut whole, rem) = amount.0.div_rem(&scale);
    let frac_scale = BigUint::from(10u32).pow(precision as u32);
    let mut frac = (rem * &frac_scale * 2u32 + &scale) / (&scale * 2u32);
    if frac >= frac_scale {
        whole += 1u32;
        frac -= &frac_scale;
    }
    if precision == 0 {
        whole.to_string()
    } else {
        format!("{}.{:0>width$}", whole, frac.to_string(), width = precision)
    }
}

/// Right-aligned two-decimal balance, as shown on the wallet page.
pub fn display_balance(amount: &Currency, unit: Unit) -> String {
    match unit.kind() {
        UnitKind::PrimaryCurrency => format!("{:>15}", format(amount, unit, 2)),
        UnitKind::SecondaryAsset => format(amount, unit, 0),
    }
}

/// The coin a send request moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoinType {
    PrimaryCurrency,
    SecondaryAssetA,
    SecondaryAssetB,
}

impl CoinType {
    pub fn unit(self) -> Unit {
        match self {
            CoinType::PrimaryCurrency => Unit::Scp,
            CoinType::SecondaryAssetA | CoinType::SecondaryAssetB => Unit::Spf,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CoinType::PrimaryCurrency => "SCP",
            CoinType::SecondaryAssetA => "SPF-A",
            CoinType::SecondaryAssetB => "SPF-B",
        }
    }

    pub fn siafund_class(self) -> Option<SiafundClass> {
        match self {
            CoinType::PrimaryCurrency => None,
            CoinType::SecondaryAssetA => Some(SiafundClass::A),
            CoinType::SecondaryAssetB => Some(SiafundClass::B),
        }
    }
}

impl FromStr for CoinType {
    type Err = CurrencyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "SCP" => Ok(CoinType::PrimaryCurrency),
            "SPF" | "SPF-A" => Ok(CoinType::SecondaryAssetA),
            "SPF-B" => Ok(CoinType::SecondaryAssetB),
            other => Err(CurrencyParseError::UnknownCoinType(other.to_string())),
        }
    }
}
