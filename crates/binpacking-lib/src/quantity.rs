//! Exact resource quantities
//!
//! Kubernetes expresses requests and allocatable capacity as decimal
//! quantities ("100m", "128Mi", "1.5", "2e3"). Summing many of those as
//! floats drifts, so amounts are kept as an integer count of nano-units
//! and only converted to `f64` at the metric boundary.

use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;
use thiserror::Error;

/// Nano-units per whole unit
const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Errors produced while parsing a quantity string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid number in quantity {0:?}")]
    InvalidNumber(String),

    #[error("unknown suffix {suffix:?} in quantity {input:?}")]
    UnknownSuffix { input: String, suffix: String },

    #[error("negative quantity {0:?}")]
    Negative(String),

    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}

/// A non-negative resource amount stored as nano-units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity {
    nanos: i128,
}

/// Multiplier applied by a quantity suffix
enum Scale {
    /// Power of 1024
    Binary(u32),
    /// Power of 10, may be negative
    Decimal(i32),
}

impl Quantity {
    pub const ZERO: Quantity = Quantity { nanos: 0 };

    /// Build from a whole number of units (cores, bytes, ...)
    pub fn from_units(units: u64) -> Self {
        Self {
            nanos: units as i128 * NANOS_PER_UNIT,
        }
    }

    /// Build from thousandths of a unit (millicores)
    pub fn from_milli(milli: u64) -> Self {
        Self {
            nanos: milli as i128 * 1_000_000,
        }
    }

    /// Raw value in nano-units
    pub fn as_nanos(&self) -> i128 {
        self.nanos
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Convert to a float in whole units.
    ///
    /// Whole and fractional parts are converted separately so integral
    /// amounts stay exact up to 2^53.
    pub fn as_f64(&self) -> f64 {
        let whole = self.nanos / NANOS_PER_UNIT;
        let frac = self.nanos % NANOS_PER_UNIT;
        whole as f64 + frac as f64 / NANOS_PER_UNIT as f64
    }

    /// Parse a Kubernetes quantity string.
    ///
    /// Accepts binary SI suffixes (`Ki`..`Ei`), decimal SI suffixes
    /// (`n`, `u`, `m`, `k`, `M`..`E`) and decimal exponents (`1e3`).
    /// Precision finer than one nano-unit is rounded up.
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (sign_negative, s) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let number_end = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(number_end);

        let (mantissa, frac_digits) = parse_decimal(number)
            .ok_or_else(|| QuantityError::InvalidNumber(input.to_string()))?;
        let scale = parse_suffix(suffix).ok_or_else(|| QuantityError::UnknownSuffix {
            input: input.to_string(),
            suffix: suffix.to_string(),
        })?;

        if sign_negative && mantissa != 0 {
            return Err(QuantityError::Negative(input.to_string()));
        }

        let out_of_range = || QuantityError::OutOfRange(input.to_string());

        // value = mantissa * 10^-frac_digits * scale, expressed in nanos
        let nanos = match scale {
            Scale::Binary(power) => {
                let factor = 1024i128.checked_pow(power).ok_or_else(out_of_range)?;
                let scaled = mantissa
                    .checked_mul(factor)
                    .and_then(|v| v.checked_mul(NANOS_PER_UNIT))
                    .ok_or_else(out_of_range)?;
                div_ceil_pow10(scaled, frac_digits).ok_or_else(out_of_range)?
            }
            Scale::Decimal(exp) => {
                let exp = i32::try_from(frac_digits)
                    .ok()
                    .and_then(|digits| exp.checked_add(9)?.checked_sub(digits))
                    .ok_or_else(out_of_range)?;
                if exp >= 0 {
                    let factor = 10i128.checked_pow(exp as u32).ok_or_else(out_of_range)?;
                    mantissa.checked_mul(factor).ok_or_else(out_of_range)?
                } else {
                    div_ceil_pow10(mantissa, exp.unsigned_abs()).ok_or_else(out_of_range)?
                }
            }
        };

        Ok(Self { nanos })
    }
}

/// Parse "123", "1.5", ".5", "2." into (digits as integer, digits after the point)
fn parse_decimal(number: &str) -> Option<(i128, u32)> {
    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.contains('.') {
        return None;
    }

    let mut mantissa: i128 = 0;
    for c in int_part.chars().chain(frac_part.chars()) {
        let digit = c.to_digit(10)? as i128;
        mantissa = mantissa.checked_mul(10)?.checked_add(digit)?;
    }
    Some((mantissa, frac_part.len() as u32))
}

fn parse_suffix(suffix: &str) -> Option<Scale> {
    let scale = match suffix {
        "" => Scale::Decimal(0),
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        "Ki" => Scale::Binary(1),
        "Mi" => Scale::Binary(2),
        "Gi" => Scale::Binary(3),
        "Ti" => Scale::Binary(4),
        "Pi" => Scale::Binary(5),
        "Ei" => Scale::Binary(6),
        _ => {
            let exp = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            Scale::Decimal(exp.parse::<i32>().ok()?)
        }
    };
    Some(scale)
}

/// Divide by 10^power, rounding any remainder up.
///
/// `None` when a non-zero value needs a divisor beyond `i128`.
fn div_ceil_pow10(value: i128, power: u32) -> Option<i128> {
    if power == 0 || value == 0 {
        return Some(value);
    }
    let divisor = 10i128.checked_pow(power)?;
    let quotient = value / divisor;
    if value % divisor == 0 {
        Some(quotient)
    } else {
        quotient.checked_add(1)
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity {
            nanos: self.nanos.saturating_add(rhs.nanos),
        }
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Quantity> for Quantity {
    fn sum<I: Iterator<Item = &'a Quantity>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.nanos / NANOS_PER_UNIT;
        let frac = self.nanos % NANOS_PER_UNIT;
        if frac == 0 {
            write!(f, "{}", whole)
        } else if frac % 1_000_000 == 0 {
            write!(f, "{}m", self.nanos / 1_000_000)
        } else {
            write!(f, "{}n", self.nanos)
        }
    }
}
