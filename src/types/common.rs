//! Common validated types shared across terminals, transactions, and adapters.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A validated terminal identifier (`term_` followed by 1-40 alphanumeric/`_`/`-` characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TerminalId(String);

/// A validated transaction identifier (`txn_` followed by 1-40 alphanumeric/`_`/`-` characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(String);

macro_rules! prefixed_id {
    ($ty:ident, $prefix:literal) => {
        impl $ty {
            /// The required prefix for this identifier kind.
            pub const PREFIX: &'static str = $prefix;

            /// Build a new validated identifier, checking the prefix and charset.
            pub fn new(s: impl Into<String>) -> Result<Self, String> {
                let s = s.into();
                if !s.starts_with(Self::PREFIX) {
                    return Err(format!("{} must start with '{}', got '{}'", stringify!($ty), Self::PREFIX, s));
                }
                let suffix = &s[Self::PREFIX.len()..];
                if suffix.is_empty() || suffix.len() > 40 {
                    return Err(format!(
                        "{} suffix must be 1-40 characters, got {}",
                        stringify!($ty),
                        suffix.len()
                    ));
                }
                if !suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                    return Err(format!("{} suffix must be alphanumeric, '_', or '-'", stringify!($ty)));
                }
                Ok(Self(s))
            }

            /// Get the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::new(s).map_err(serde::de::Error::custom)
            }
        }

        #[cfg(feature = "postgres-store")]
        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Self::new(s).map_err(|e| e.into())
            }
        }

        #[cfg(feature = "postgres-store")]
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }
    };
}

prefixed_id!(TerminalId, "term_");
prefixed_id!(TransactionId, "txn_");

/// The three currencies this system accepts from merchants.
///
/// Acceptance is always in TRY; USD/EUR/GBP terminals exist for acquirers
/// that settle foreign-currency transactions directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Try,
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    /// Parse a three-letter ISO 4217 alpha code.
    pub fn from_alpha3(code: &str) -> Option<Self> {
        match code {
            "TRY" => Some(Currency::Try),
            "USD" => Some(Currency::Usd),
            "EUR" => Some(Currency::Eur),
            "GBP" => Some(Currency::Gbp),
            _ => None,
        }
    }

    /// The three-letter ISO 4217 alpha code.
    pub fn alpha3(self) -> &'static str {
        match self {
            Currency::Try => "TRY",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }

    /// The ISO 4217 numeric code, as required by most acquirer wire formats.
    pub fn numeric(self) -> &'static str {
        crate::codec::currency_numeric(self.alpha3()).expect("every Currency variant has a numeric code")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.alpha3())
    }
}

/// A monetary amount in minor units (kuruş/cents) plus its currency.
///
/// Minor units avoid floating point entirely; every wire format this system
/// speaks ultimately wants either minor units or a fixed-precision decimal
/// string, both of which are derived from this representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub minor_units: i64,
    pub currency: Currency,
}

impl Money {
    pub fn new(minor_units: i64, currency: Currency) -> Self {
        Self { minor_units, currency }
    }

    /// Parse a decimal amount string (e.g. `"149.90"`) in the given currency.
    pub fn from_decimal_str(amount: &str, currency: Currency) -> crate::error::Result<Self> {
        let minor_units = crate::codec::amount_to_minor_units(amount)?;
        Ok(Self { minor_units, currency })
    }

    /// Render as a decimal string with two fractional digits, e.g. `"149.90"`.
    pub fn to_decimal_str(self) -> String {
        format!("{}.{:02}", self.minor_units / 100, (self.minor_units % 100).abs())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_str(), self.currency)
    }
}

/// Number of equal installments a card payment is split into (1 = single payment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstallmentCount(u8);

impl InstallmentCount {
    pub const SINGLE: InstallmentCount = InstallmentCount(1);
    pub const MAX: u8 = 12;

    pub fn new(count: u8) -> Result<Self, String> {
        if count == 0 || count > Self::MAX {
            return Err(format!("installment count must be 1-{}, got {}", Self::MAX, count));
        }
        Ok(Self(count))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_single(self) -> bool {
        self.0 == 1
    }
}

impl Default for InstallmentCount {
    fn default() -> Self {
        Self::SINGLE
    }
}

impl fmt::Display for InstallmentCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_id_requires_prefix() {
        assert!(TerminalId::new("term_abc123").is_ok());
        assert!(TerminalId::new("txn_abc123").is_err());
        assert!(TerminalId::new("term_").is_err());
    }

    #[test]
    fn transaction_id_rejects_bad_charset() {
        assert!(TransactionId::new("txn_abc-123_XYZ").is_ok());
        assert!(TransactionId::new("txn_abc 123").is_err());
    }

    #[test]
    fn currency_roundtrip() {
        assert_eq!(Currency::from_alpha3("TRY"), Some(Currency::Try));
        assert_eq!(Currency::Try.numeric(), "949");
    }

    #[test]
    fn money_decimal_roundtrip() {
        let m = Money::from_decimal_str("149.90", Currency::Try).unwrap();
        assert_eq!(m.minor_units, 14990);
        assert_eq!(m.to_decimal_str(), "149.90");
    }

    #[test]
    fn installment_count_bounds() {
        assert!(InstallmentCount::new(0).is_err());
        assert!(InstallmentCount::new(12).is_ok());
        assert!(InstallmentCount::new(13).is_err());
        assert!(InstallmentCount::default().is_single());
    }
}
