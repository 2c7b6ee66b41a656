//! Acquirer-selection policy: given a company, a currency, and (optionally)
//! resolved BIN metadata, pick the one terminal that should handle the
//! payment.

use crate::error::{Error, Result};
use crate::types::{BinInfo, Currency, Terminal};

/// Evaluate the four-rule selection chain against `candidates`.
///
/// `candidates` need not be pre-filtered or pre-sorted: this function applies
/// the currency/active filter and the priority-descending, then-insertion-order
/// tie-break itself, so the same candidate slice always yields the same
/// answer.
pub fn select_terminal<'a>(candidates: &'a [Terminal], currency: Currency, bin_info: Option<&BinInfo>) -> Result<&'a Terminal> {
    let mut eligible: Vec<&Terminal> = candidates.iter().filter(|t| t.accepts_currency(currency)).collect();
    // Stable sort preserves insertion order within equal priority, giving the
    // documented priority-desc/insertion-order tie-break for every rule below.
    eligible.sort_by(|a, b| b.priority.cmp(&a.priority));

    if eligible.is_empty() {
        return Err(no_suitable_terminal(&eligible, currency));
    }

    // Rule 1: on-us preference.
    if let Some(bank_code) = bin_info.and_then(|b| b.bank_code.as_deref()) {
        if let Some(found) = eligible.iter().find(|t| t.bank_code_str() == bank_code) {
            return Ok(found);
        }
    }

    // Rule 2: card-family preference.
    if let Some(family) = bin_info.and_then(|b| b.card_family.as_deref()) {
        if let Some(found) = eligible.iter().find(|t| t.supports_card_family(family)) {
            return Ok(found);
        }
    }

    // Rule 3: default-for-currency.
    if let Some(found) = eligible.iter().find(|t| t.default_for_currencies.contains(&currency)) {
        return Ok(found);
    }

    // Rule 4: priority fallback — the eligible list is already sorted.
    Ok(eligible[0])
}

fn no_suitable_terminal(eligible: &[&Terminal], currency: Currency) -> Error {
    let company = eligible.first().map(|t| t.company.clone()).unwrap_or_default();
    Error::NoSuitableTerminal {
        company,
        currency: currency.alpha3().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::terminal::{Credentials, ThreeDsConfig};
    use crate::types::{BankCode, ProviderTag, TerminalId};
    use chrono::Utc;

    fn terminal(id: &str, bank_code: BankCode, priority: i32, default_try: bool) -> Terminal {
        Terminal {
            id: TerminalId::new(id).unwrap(),
            company: "acme".into(),
            bank_code,
            provider: bank_code.provider_tag(),
            currencies: vec![Currency::Try],
            default_for_currencies: if default_try { vec![Currency::Try] } else { vec![] },
            priority,
            test_mode: true,
            credentials: Credentials {
                merchant_id: "m".into(),
                terminal_id: "t".into(),
                username: None,
                password: "p".into(),
                secret_key: None,
                extra: serde_json::Value::Null,
            },
            three_ds: ThreeDsConfig {
                enabled: true,
                required: true,
                store_key: "k".into(),
            },
            installment: Default::default(),
            commission_periods: vec![],
            limits: Default::default(),
            supported_card_families: vec![],
            spec: Default::default(),
            status: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn s4_on_us_beats_higher_priority() {
        let a = terminal("term_a", BankCode::Garanti, 0, true);
        let b = terminal("term_b", BankCode::Akbank, 10, false);
        let candidates = vec![a, b];

        let bin_info = BinInfo {
            bin: 42822090,
            bank: None,
            bank_code: Some("garanti".into()),
            brand: None,
            card_type: None,
            card_family: None,
            country: None,
        };

        let chosen = select_terminal(&candidates, Currency::Try, Some(&bin_info)).unwrap();
        assert_eq!(chosen.id.as_str(), "term_a");
    }

    #[test]
    fn falls_back_to_default_for_currency() {
        let a = terminal("term_a", BankCode::Garanti, 0, true);
        let b = terminal("term_b", BankCode::Akbank, 10, false);
        let candidates = vec![a, b];

        let chosen = select_terminal(&candidates, Currency::Try, None).unwrap();
        assert_eq!(chosen.id.as_str(), "term_a");
    }

    #[test]
    fn falls_back_to_priority_when_no_default() {
        let a = terminal("term_a", BankCode::Garanti, 0, false);
        let b = terminal("term_b", BankCode::Akbank, 10, false);
        let candidates = vec![a, b];

        let chosen = select_terminal(&candidates, Currency::Try, None).unwrap();
        assert_eq!(chosen.id.as_str(), "term_b");
    }

    #[test]
    fn no_candidates_yields_error() {
        let candidates: Vec<Terminal> = vec![];
        let err = select_terminal(&candidates, Currency::Try, None).unwrap_err();
        assert!(matches!(err, Error::NoSuitableTerminal { .. }));
    }

    #[test]
    fn card_family_preference_applies_before_default() {
        let mut a = terminal("term_a", BankCode::Garanti, 0, true);
        let mut b = terminal("term_b", BankCode::Akbank, 5, false);
        b.supported_card_families = vec!["bonus".into()];
        a.default_for_currencies = vec![Currency::Try];
        let candidates = vec![a, b];

        let bin_info = BinInfo {
            bin: 1,
            bank: None,
            bank_code: None,
            brand: None,
            card_type: None,
            card_family: Some("Bonus".into()),
            country: None,
        };

        let chosen = select_terminal(&candidates, Currency::Try, Some(&bin_info)).unwrap();
        assert_eq!(chosen.id.as_str(), "term_b");
    }
}
