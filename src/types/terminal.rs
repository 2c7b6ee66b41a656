//! Terminal (VirtualPos) types: the merchant×acquirer binding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::{Currency, Money, TerminalId};

/// The specific bank/aggregator a terminal is contracted with.
///
/// Distinct from [`ProviderTag`]: several banks share the same wire-protocol
/// family (e.g. Akbank and Denizbank both speak NestPay/Payten), so a
/// terminal's `bank_code` identifies the contracting bank while its
/// `provider` identifies which adapter drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankCode {
    Garanti,
    Akbank,
    Ykb,
    Vakifbank,
    Payten,
    Qnb,
    Denizbank,
    Kuveytturk,
    Paytr,
    Iyzico,
    Sigmapay,
}

impl BankCode {
    /// The lowercase tag used to match against a [`crate::types::BinInfo`]'s
    /// `bank_code` field for on-us routing.
    pub fn as_str(self) -> &'static str {
        match self {
            BankCode::Garanti => "garanti",
            BankCode::Akbank => "akbank",
            BankCode::Ykb => "ykb",
            BankCode::Vakifbank => "vakifbank",
            BankCode::Payten => "payten",
            BankCode::Qnb => "qnb",
            BankCode::Denizbank => "denizbank",
            BankCode::Kuveytturk => "kuveytturk",
            BankCode::Paytr => "paytr",
            BankCode::Iyzico => "iyzico",
            BankCode::Sigmapay => "sigmapay",
        }
    }

    /// The adapter family that drives this bank's terminals.
    pub fn provider_tag(self) -> ProviderTag {
        match self {
            BankCode::Garanti => ProviderTag::Garanti,
            BankCode::Akbank | BankCode::Denizbank | BankCode::Payten => ProviderTag::Payten,
            BankCode::Ykb => ProviderTag::Ykb,
            BankCode::Vakifbank => ProviderTag::Vakifbank,
            BankCode::Qnb => ProviderTag::Qnb,
            BankCode::Kuveytturk => ProviderTag::Kuveytturk,
            BankCode::Paytr => ProviderTag::Paytr,
            BankCode::Iyzico => ProviderTag::Iyzico,
            BankCode::Sigmapay => ProviderTag::Sigmapay,
        }
    }
}

/// The adapter-dispatch key used by [`crate::adapters::build_adapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTag {
    Garanti,
    Akbank,
    Ykb,
    Vakifbank,
    Payten,
    Qnb,
    Denizbank,
    Kuveytturk,
    Paytr,
    Iyzico,
    Sigmapay,
}

impl ProviderTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderTag::Garanti => "garanti",
            ProviderTag::Akbank => "akbank",
            ProviderTag::Ykb => "ykb",
            ProviderTag::Vakifbank => "vakifbank",
            ProviderTag::Payten => "payten",
            ProviderTag::Qnb => "qnb",
            ProviderTag::Denizbank => "denizbank",
            ProviderTag::Kuveytturk => "kuveytturk",
            ProviderTag::Paytr => "paytr",
            ProviderTag::Iyzico => "iyzico",
            ProviderTag::Sigmapay => "sigmapay",
        }
    }
}

/// Acquirer credentials. `password` and `secret_key` are stored as
/// `"<iv-hex>:<ciphertext-hex>"` at rest; plaintext is only ever held
/// transiently inside a decrypted view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Credentials {
    pub merchant_id: String,
    pub terminal_id: String,
    pub username: Option<String>,
    pub password: String,
    pub secret_key: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Per-terminal 3-D Secure configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreeDsConfig {
    pub enabled: bool,
    pub required: bool,
    /// Ciphertext, `"<iv-hex>:<ciphertext-hex>"`.
    pub store_key: String,
}

/// A rate schedule for a specific installment campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentCampaign {
    pub card_family: Option<String>,
    pub bin_prefix: Option<String>,
    /// Commission rate applied per installment count, e.g. `{3: 0.0199}`.
    pub rates: std::collections::BTreeMap<u8, f64>,
}

/// Installment acceptance and pricing policy for a terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentPolicy {
    pub enabled: bool,
    pub min_count: u8,
    pub max_count: u8,
    pub min_amount: Option<Money>,
    pub per_count_rates: std::collections::BTreeMap<u8, f64>,
    pub campaigns: Vec<InstallmentCampaign>,
}

impl Default for InstallmentPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            min_count: 2,
            max_count: 12,
            min_amount: None,
            per_count_rates: std::collections::BTreeMap::new(),
            campaigns: Vec::new(),
        }
    }
}

/// A time-indexed commission rate. Acquirer commission can change over the
/// life of a terminal; the applicable period is chosen by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionPeriod {
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub rate: f64,
}

/// Per-transaction acceptance limits for a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TransactionLimits {
    pub min_amount: Option<Money>,
    pub max_amount: Option<Money>,
    pub daily_max_amount: Option<Money>,
}

/// Per-terminal overrides for adapter behavior that is otherwise fixed by
/// the bit-exact wire contract (e.g. which Payten `mdStatus` values this
/// specific bank relationship treats as a pass).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TerminalSpec {
    pub payten_md_status_override: Option<Vec<String>>,
}

impl TerminalSpec {
    /// The accepted Payten `mdStatus` values for this terminal: the override
    /// if set, else the protocol default of `{"1"}`.
    pub fn payten_accepted_md_status(&self) -> Vec<String> {
        self.payten_md_status_override
            .clone()
            .unwrap_or_else(|| vec!["1".to_string()])
    }
}

/// A merchant×acquirer binding: one row per (company, bank) pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Terminal {
    pub id: TerminalId,
    pub company: String,
    pub bank_code: BankCode,
    pub provider: ProviderTag,
    pub currencies: Vec<Currency>,
    pub default_for_currencies: Vec<Currency>,
    pub priority: i32,
    pub test_mode: bool,
    pub credentials: Credentials,
    pub three_ds: ThreeDsConfig,
    pub installment: InstallmentPolicy,
    pub commission_periods: Vec<CommissionPeriod>,
    pub limits: TransactionLimits,
    pub supported_card_families: Vec<String>,
    pub spec: TerminalSpec,
    pub status: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Terminal {
    /// Whether this terminal currently accepts the given currency for routing.
    pub fn accepts_currency(&self, currency: Currency) -> bool {
        self.status && self.currencies.contains(&currency)
    }

    /// This terminal's bank code as the lowercase tag used for on-us matching.
    pub fn bank_code_str(&self) -> &'static str {
        self.bank_code.as_str()
    }

    /// Whether this terminal's `supportedCardFamilies` contains `family`,
    /// case-insensitively.
    pub fn supports_card_family(&self, family: &str) -> bool {
        self.supported_card_families
            .iter()
            .any(|f| f.eq_ignore_ascii_case(family))
    }

    /// The commission rate in effect at `at`, if any period covers it.
    pub fn commission_rate_at(&self, at: DateTime<Utc>) -> Option<f64> {
        self.commission_periods
            .iter()
            .find(|p| p.starts_at <= at && p.ends_at.map(|e| at < e).unwrap_or(true))
            .map(|p| p.rate)
    }
}

/// Fields required to create a new [`Terminal`]. Credentials may be supplied
/// in plaintext; the store encrypts them on write.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTerminal {
    pub company: String,
    pub bank_code: BankCode,
    pub currencies: Vec<Currency>,
    pub default_for_currencies: Vec<Currency>,
    pub priority: i32,
    pub test_mode: bool,
    pub credentials: Credentials,
    pub three_ds: ThreeDsConfig,
    #[serde(default)]
    pub installment: InstallmentPolicy,
    #[serde(default)]
    pub commission_periods: Vec<CommissionPeriod>,
    #[serde(default)]
    pub limits: TransactionLimits,
    #[serde(default)]
    pub supported_card_families: Vec<String>,
    #[serde(default)]
    pub spec: TerminalSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_code_maps_to_shared_provider_family() {
        assert_eq!(BankCode::Akbank.provider_tag(), ProviderTag::Payten);
        assert_eq!(BankCode::Denizbank.provider_tag(), ProviderTag::Payten);
        assert_eq!(BankCode::Garanti.provider_tag(), ProviderTag::Garanti);
    }

    #[test]
    fn payten_md_status_default_is_single_value() {
        let spec = TerminalSpec::default();
        assert_eq!(spec.payten_accepted_md_status(), vec!["1".to_string()]);
    }

    #[test]
    fn payten_md_status_override_applies() {
        let spec = TerminalSpec {
            payten_md_status_override: Some(vec!["1".into(), "2".into()]),
        };
        assert_eq!(spec.payten_accepted_md_status(), vec!["1", "2"]);
    }

    #[test]
    fn commission_rate_lookup_respects_open_ended_period() {
        let terminal_period = CommissionPeriod {
            starts_at: "2024-01-01T00:00:00Z".parse().unwrap(),
            ends_at: None,
            rate: 0.0175,
        };
        let at: DateTime<Utc> = "2025-01-01T00:00:00Z".parse().unwrap();
        assert!(terminal_period.starts_at <= at);
    }
}
