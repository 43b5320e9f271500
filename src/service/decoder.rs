//! Decoding of the in-store EAN-13 variant printed by counter scales.
//!
//! ```text
//!  digit:  1   2 3 4 5 6   7 8 9 10 11 12   13
//!          |   \_______/   \____________/   |
//!        scheme   PLU       embedded value  check digit
//! ```
//!
//! Scheme `2` embeds a price (value / 100), scheme `1` a weight in kg (value / 1000).

use crate::error::EngineError;
use bigdecimal::BigDecimal;
use serde::Serialize;

pub const CODE_LENGTH: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    PriceEmbedded,
    WeightEmbedded,
    Unknown,
}

/// Structured view of a scanned code
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedCode {
    pub scheme: Scheme,
    /// Digits 2-6
    pub product_id: String,
    /// Digits 7-12, verbatim
    pub raw_value: String,
    /// The 13 digits
    pub ean: String,
    pub leading_digit: char,
}

impl DecodedCode {
    fn embedded(&self) -> i64 {
        // Six ASCII digits always fit
        self.raw_value.parse().unwrap_or(0)
    }

    /// Unit price in minor units, for price-embedded codes.
    pub fn price_cents(&self) -> Option<i64> {
        match self.scheme {
            Scheme::PriceEmbedded => Some(self.embedded()),
            _ => None,
        }
    }

    /// Unit price in currency units with two decimals, for price-embedded codes.
    pub fn price(&self) -> Option<BigDecimal> {
        self.price_cents().map(|cents| BigDecimal::new(cents.into(), 2))
    }

    /// Weight in kilograms with three decimals, for weight-embedded codes.
    pub fn weight(&self) -> Option<BigDecimal> {
        match self.scheme {
            Scheme::WeightEmbedded => Some(BigDecimal::new(self.embedded().into(), 3)),
            _ => None,
        }
    }
}

/// Keeps only ASCII digits.
pub fn digits_of(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Decodes a raw scanner payload. Pure and deterministic.
pub fn decode(raw: &str) -> Result<DecodedCode, EngineError> {
    let ean = digits_of(raw);
    if ean.len() != CODE_LENGTH {
        return Err(EngineError::InvalidCodeLength(ean.len()));
    }

    let leading_digit = ean.chars().next().unwrap_or('0');
    let scheme = match leading_digit {
        '2' => Scheme::PriceEmbedded,
        '1' => Scheme::WeightEmbedded,
        _ => Scheme::Unknown,
    };

    Ok(DecodedCode {
        scheme,
        product_id: ean[1..6].to_string(),
        raw_value: ean[6..12].to_string(),
        leading_digit,
        ean,
    })
}

/// Recognises operator badges, which share the scanner but are not product codes.
#[derive(Debug, Clone)]
pub struct BadgeRecognizer {
    prefix: String,
}

impl BadgeRecognizer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// True when the payload's digits start with the badge prefix.
    pub fn is_employee_badge(&self, raw_digits: &str) -> bool {
        !self.prefix.is_empty() && digits_of(raw_digits).starts_with(&self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    #[test]
    fn price_embedded_code() {
        let code = decode("2046880019990").unwrap();
        assert_eq!(code.scheme, Scheme::PriceEmbedded);
        assert_eq!(code.product_id, "04688");
        assert_eq!(code.raw_value, "001999");
        assert_eq!(code.leading_digit, '2');
        assert_eq!(code.price_cents(), Some(1999));
        assert_eq!(code.price(), Some(BigDecimal::from_str("19.99").unwrap()));
        assert_eq!(code.weight(), None);
    }

    #[test]
    fn weight_embedded_code() {
        let code = decode("1012340015125").unwrap();
        assert_eq!(code.scheme, Scheme::WeightEmbedded);
        assert_eq!(code.product_id, "01234");
        assert_eq!(code.weight(), Some(BigDecimal::from_str("1.512").unwrap()));
        assert_eq!(code.price_cents(), None);
    }

    #[test]
    fn unknown_scheme_still_decodes_product() {
        let code = decode("7891234567895").unwrap();
        assert_eq!(code.scheme, Scheme::Unknown);
        assert_eq!(code.product_id, "91234");
        assert_eq!(code.price(), None);
        assert_eq!(code.weight(), None);
    }

    #[test]
    fn non_digits_are_stripped() {
        let code = decode(" 2-04688-001999-0\r\n").unwrap();
        assert_eq!(code.ean, "2046880019990");
    }

    #[test]
    fn wrong_lengths_fail() {
        assert!(matches!(decode(""), Err(EngineError::InvalidCodeLength(0))));
        assert!(matches!(decode("204688001999"), Err(EngineError::InvalidCodeLength(12))));
        assert!(matches!(decode("20468800199901"), Err(EngineError::InvalidCodeLength(14))));
    }

    #[test]
    fn badge_prefix() {
        let badges = BadgeRecognizer::new("3122");
        assert!(badges.is_employee_badge("3122000123456"));
        assert!(badges.is_employee_badge("31-22 0001"));
        assert!(!badges.is_employee_badge("2046880019990"));
        assert!(!BadgeRecognizer::new("").is_employee_badge("3122000123456"));
    }

    proptest! {
        #[test]
        fn price_scheme_scales_by_hundred(plu in 0u32..100_000, value in 0u32..1_000_000, check in 0u32..10) {
            let raw = format!("2{plu:05}{value:06}{check}");
            let code = decode(&raw).unwrap();
            prop_assert_eq!(code.price_cents(), Some(value as i64));
            prop_assert_eq!(code.price(), Some(BigDecimal::from(value) / BigDecimal::from(100)));
            prop_assert_eq!(code.product_id, format!("{plu:05}"));
        }

        #[test]
        fn weight_scheme_scales_by_thousand(plu in 0u32..100_000, value in 0u32..1_000_000, check in 0u32..10) {
            let raw = format!("1{plu:05}{value:06}{check}");
            let code = decode(&raw).unwrap();
            prop_assert_eq!(code.weight(), Some(BigDecimal::from(value) / BigDecimal::from(1000)));
            prop_assert_eq!(code.price_cents(), None);
        }

        #[test]
        fn anything_but_thirteen_digits_is_rejected(raw in "[0-9a-z ]{0,30}") {
            let digits = digits_of(&raw).len();
            prop_assume!(digits != CODE_LENGTH);
            prop_assert!(matches!(decode(&raw), Err(EngineError::InvalidCodeLength(n)) if n == digits));
        }
    }
}
