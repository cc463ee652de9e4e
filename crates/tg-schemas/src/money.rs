//! Integer-micros money representation.
//!
//! All amounts on the decision surface (limits, risk, capital, prices,
//! strikes, account values) are `i64` micros. `f64` only appears at the
//! wire boundary: config files written in dollars, broker payloads, and
//! human-facing output.

/// Scale factor: 1 unit = 1_000_000 micros (6 decimal places).
pub const MICROS_PER_UNIT: i64 = 1_000_000;

/// Shares controlled by one listed equity option contract.
pub const OPTION_CONTRACT_MULTIPLIER: i64 = 100;

/// Whole dollars to micros. Intended for constants and tests.
pub const fn usd(dollars: i64) -> i64 {
    dollars * MICROS_PER_UNIT
}

/// Errors returned by [`price_to_micros`] when the input is not representable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// Input was `NaN` or infinite.
    NotFinite,
    /// Input would overflow `i64` after scaling by [`MICROS_PER_UNIT`].
    OutOfRange,
}

impl std::fmt::Display for PricingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricingError::NotFinite => {
                write!(f, "price_to_micros: non-finite input (NaN or Inf)")
            }
            PricingError::OutOfRange => {
                write!(f, "price_to_micros: price out of i64 range after scaling")
            }
        }
    }
}

impl std::error::Error for PricingError {}

/// Convert micros to `f64` for display or broker serialization.
pub fn micros_to_price(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_UNIT as f64
}

/// Convert an `f64` amount (config value, broker payload) to micros.
///
/// Rounds to the nearest micro. Rejects non-finite and overflowing input in
/// every build profile.
pub fn price_to_micros(price: f64) -> Result<i64, PricingError> {
    if !price.is_finite() {
        return Err(PricingError::NotFinite);
    }
    let scaled = price * MICROS_PER_UNIT as f64;
    if scaled > i64::MAX as f64 || scaled < i64::MIN as f64 {
        return Err(PricingError::OutOfRange);
    }
    Ok(scaled.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_scales_whole_dollars() {
        assert_eq!(usd(500), 500_000_000);
        assert_eq!(usd(0), 0);
    }

    #[test]
    fn price_to_micros_rounds_cents() {
        assert_eq!(price_to_micros(1.25).unwrap(), 1_250_000);
        assert_eq!(price_to_micros(0.000_000_5).unwrap(), 1);
    }

    #[test]
    fn non_finite_is_rejected() {
        assert_eq!(price_to_micros(f64::NAN), Err(PricingError::NotFinite));
        assert_eq!(price_to_micros(f64::INFINITY), Err(PricingError::NotFinite));
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert_eq!(price_to_micros(f64::MAX), Err(PricingError::OutOfRange));
    }

    #[test]
    fn micros_to_price_formats_dollars() {
        assert!((micros_to_price(usd(600)) - 600.0).abs() < f64::EPSILON);
    }
}
