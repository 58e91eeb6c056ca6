//! Unit of measure for stocked products.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A unit symbol other than `L` or `kg`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid unit: {0} (expected \"L\" or \"kg\")")]
pub struct UnitParseError(pub String);

/// How a product's quantity is measured.
///
/// The wire form is the symbol itself (`"L"` or `"kg"`), which is also what
/// the `product_unit` Postgres enum stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(type_name = "product_unit"))]
pub enum Unit {
    /// Volume, in litres.
    #[serde(rename = "L")]
    #[cfg_attr(feature = "postgres", sqlx(rename = "L"))]
    Liter,
    /// Mass, in kilograms.
    #[serde(rename = "kg")]
    #[cfg_attr(feature = "postgres", sqlx(rename = "kg"))]
    Kilogram,
}

impl Unit {
    /// The symbol used on the wire and in storage.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Liter => "L",
            Self::Kilogram => "kg",
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl std::str::FromStr for Unit {
    type Err = UnitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L" => Ok(Self::Liter),
            "kg" => Ok(Self::Kilogram),
            _ => Err(UnitParseError(s.to_owned())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_from_str() {
        assert_eq!("L".parse::<Unit>().unwrap(), Unit::Liter);
        assert_eq!("kg".parse::<Unit>().unwrap(), Unit::Kilogram);
        assert!("KG".parse::<Unit>().is_err());
        assert_eq!(
            "litre".parse::<Unit>().unwrap_err(),
            UnitParseError("litre".to_owned())
        );
    }

    #[test]
    fn test_unit_serde_uses_symbol() {
        assert_eq!(serde_json::to_string(&Unit::Liter).unwrap(), "\"L\"");
        assert_eq!(serde_json::to_string(&Unit::Kilogram).unwrap(), "\"kg\"");
        assert!(serde_json::from_str::<Unit>("\"g\"").is_err());
    }

    #[test]
    fn test_unit_display_matches_symbol() {
        assert_eq!(Unit::Kilogram.to_string(), "kg");
    }
}
