//! The payment orchestrator: the single entry point that ties BIN
//! resolution, acquirer selection, transaction persistence, and adapter
//! dispatch into the five operations a caller actually needs.
//!
//! A thin coordinating layer over the lower-level store/client primitives,
//! not a place where new domain rules get invented.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::adapters::build_adapter;
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::http::AcquirerHttp;
use crate::selection::select_terminal;
use crate::store::{NewTransaction, TerminalStore, TransactionStore};
use crate::types::terminal::ProviderTag;
use crate::types::{
    BinResolver, BinSnapshot, CardView, Currency, CustomerSnapshot, InstallmentCount, Money, NewCard, PublicTransaction, Terminal, TerminalId,
    Transaction, TransactionId, TransactionStatus,
};

/// Fields a caller supplies to start a new payment.
#[derive(Debug, Clone)]
pub struct CreatePaymentSpec {
    pub company: String,
    /// An explicit terminal to use, bypassing acquirer selection.
    pub pos_id: Option<TerminalId>,
    pub amount: Money,
    pub installment: InstallmentCount,
    pub card: NewCard,
    pub customer: CustomerSnapshot,
    pub external_id: Option<String>,
}

/// The result of [`Orchestrator::create_payment`] on a successful hand-off
/// to the acquirer's 3-D flow.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePaymentResult {
    pub transaction_id: TransactionId,
    pub form_url: String,
}

/// One entry of the `installments` array in a BIN query response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InstallmentOption {
    pub count: u8,
    pub amount: Money,
}

/// The acquirer a BIN query would route to, projected for display.
#[derive(Debug, Clone, Serialize)]
pub struct PosSummary {
    pub id: TerminalId,
    pub name: String,
    pub bank_code: String,
    pub provider: String,
}

/// The flattened view `queryBin` returns.
#[derive(Debug, Clone, Serialize)]
pub struct BinQueryResult {
    pub bank: Option<String>,
    pub bank_code: Option<String>,
    pub card_type: Option<String>,
    pub card_family: Option<String>,
    pub brand: Option<String>,
    pub country: Option<String>,
    pub pos: PosSummary,
    pub installments: Vec<InstallmentOption>,
}

/// Compute the installment menu for `amount` against `terminal`'s policy.
///
/// Always includes `{count: 1, amount}`. For a TRY credit-card payment on a
/// terminal with installments enabled and `amount` at or above its minimum,
/// also emits one entry per count from 2 up to the terminal's configured
/// maximum — each entry currently reports the unmodified total; per-
/// installment commission pricing is a planned extension, not applied yet.
pub fn installment_options(amount: Money, card_type: Option<&str>, terminal: &Terminal) -> Vec<InstallmentOption> {
    let mut options = vec![InstallmentOption { count: 1, amount }];

    let is_try_credit = amount.currency == Currency::Try && card_type.map(|t| t.eq_ignore_ascii_case("credit")).unwrap_or(false);
    let meets_minimum = terminal
        .installment
        .min_amount
        .map(|min| amount.minor_units >= min.minor_units)
        .unwrap_or(true);

    if terminal.installment.enabled && is_try_credit && meets_minimum {
        for count in 2..=terminal.installment.max_count {
            options.push(InstallmentOption { count, amount });
        }
    }
    options
}

fn validate_card(card: &NewCard) -> Result<()> {
    if card.holder.trim().is_empty() {
        return Err(Error::Validation("card.holder is required".into()));
    }
    let digits = card.number.chars().filter(char::is_ascii_digit).count();
    if digits < 12 || digits > 19 {
        return Err(Error::Validation("card.number must be 12-19 digits".into()));
    }
    if !card.expiry.contains('/') {
        return Err(Error::Validation("card.expiry must be in MM/YY form".into()));
    }
    if card.cvv.trim().is_empty() {
        return Err(Error::Validation("card.cvv is required".into()));
    }
    Ok(())
}

/// Ties the BIN resolver, acquirer selector, persistence stores, and adapter
/// registry together behind the five operations a caller drives a payment
/// through. Cheaply `Clone`: every field is an `Arc` handle or a
/// `Clone`-cheap value.
#[derive(Clone)]
pub struct Orchestrator {
    terminals: Arc<dyn TerminalStore>,
    transactions: Arc<dyn TransactionStore>,
    bin_resolver: Arc<dyn BinResolver>,
    http: AcquirerHttp,
    config: Arc<OrchestratorConfig>,
}

impl Orchestrator {
    pub fn new(
        terminals: Arc<dyn TerminalStore>,
        transactions: Arc<dyn TransactionStore>,
        bin_resolver: Arc<dyn BinResolver>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        let http = AcquirerHttp::new(config.clone())?;
        Ok(Self {
            terminals,
            transactions,
            bin_resolver,
            http,
            config: Arc::new(config),
        })
    }

    /// Resolve a BIN, select the acquirer that would handle it, and compute
    /// the resulting installment menu, without creating any transaction.
    pub async fn query_bin(&self, company: &str, bin: u64, amount: Money, currency: Currency) -> Result<BinQueryResult> {
        let bin_info = self.bin_resolver.resolve(bin).await?;
        let candidates = self.terminals.find_for_selection(company, currency).await?;
        let terminal = select_terminal(&candidates, currency, bin_info.as_ref())?.clone();
        let card_type = bin_info.as_ref().and_then(|b| b.card_type.clone());
        let installments = installment_options(amount, card_type.as_deref(), &terminal);

        Ok(BinQueryResult {
            bank: bin_info.as_ref().and_then(|b| b.bank.clone()),
            bank_code: bin_info.as_ref().and_then(|b| b.bank_code.clone()),
            card_type,
            card_family: bin_info.as_ref().and_then(|b| b.card_family.clone()),
            brand: bin_info.as_ref().and_then(|b| b.brand.clone()),
            country: bin_info.as_ref().and_then(|b| b.country.clone()),
            pos: PosSummary {
                id: terminal.id.clone(),
                name: terminal.bank_code_str().to_string(),
                bank_code: terminal.bank_code_str().to_string(),
                provider: terminal.provider.as_str().to_string(),
            },
            installments,
        })
    }

    /// Validate, resolve a terminal, create the transaction, and hand it off
    /// to the acquirer's 3-D initialize call.
    pub async fn create_payment(&self, spec: CreatePaymentSpec) -> Result<CreatePaymentResult> {
        validate_card(&spec.card)?;
        if spec.amount.minor_units <= 0 {
            return Err(Error::Validation("amount must be positive".into()));
        }

        let bin = CardView::from_pan(&spec.card.number)?.bin;
        let bin_info = self.bin_resolver.resolve(bin).await?;

        if spec.amount.currency != Currency::Try {
            let issued_domestically = bin_info.as_ref().and_then(|b| b.country.as_deref()).map(|c| c.eq_ignore_ascii_case("tr")).unwrap_or(false);
            if issued_domestically {
                return Err(Error::Validation("foreign-currency payment rejected for a domestically issued card".into()));
            }
        }

        let terminal = match &spec.pos_id {
            Some(id) => {
                let terminal = self.terminals.find_by_id(id).await?;
                if !terminal.accepts_currency(spec.amount.currency) {
                    return Err(Error::Validation(format!("terminal {id} does not accept {}", spec.amount.currency)));
                }
                terminal
            }
            None => {
                let candidates = self.terminals.find_for_selection(&spec.company, spec.amount.currency).await?;
                select_terminal(&candidates, spec.amount.currency, bin_info.as_ref())?.clone()
            }
        };

        let bin_snapshot = bin_info.map(|b| BinSnapshot {
            bank: b.bank,
            bank_code: b.bank_code,
            brand: b.brand,
            card_type: b.card_type,
            card_family: b.card_family,
            country: b.country,
        });

        let tx = self
            .transactions
            .create(
                NewTransaction {
                    terminal_id: terminal.id.clone(),
                    company: spec.company,
                    amount: spec.amount,
                    installment: spec.installment,
                    card: spec.card.clone(),
                    bin_snapshot,
                    customer: spec.customer,
                    external_id: spec.external_id,
                },
                &self.config.master_key,
            )
            .await?;

        let adapter = build_adapter(terminal.provider)?;
        let http = self.http.clone();
        let config = self.config.clone();
        let card = spec.card;
        let terminal_for_closure = terminal.clone();

        let updated = self
            .transactions
            .with_lock(
                &tx.id,
                Box::new(move |tx: &mut Transaction| {
                    Box::pin(async move { adapter.initialize(tx, &terminal_for_closure, &card, &http, &config).await })
                }),
            )
            .await?;

        match updated.status {
            TransactionStatus::Processing => Ok(CreatePaymentResult {
                transaction_id: updated.id.clone(),
                form_url: self.config.callback_url(updated.id.as_str()).replace("/callback", "/form"),
            }),
            TransactionStatus::Failed => {
                let result = updated.result.clone().unwrap_or_default();
                Err(Error::Provider {
                    code: result.code.unwrap_or_default(),
                    message: result.message.unwrap_or_else(|| "payment initialization failed".into()),
                })
            }
            other => Err(Error::State(format!("transaction {} left in unexpected state {:?} after initialize", updated.id, other))),
        }
    }

    /// Serve the auto-submitting 3-D Secure form for a transaction awaiting it.
    pub async fn get_payment_form(&self, id: &TransactionId) -> Result<String> {
        let tx = self.transactions.find_by_id(id).await?;
        if tx.status != TransactionStatus::Processing {
            return Err(Error::State(format!("transaction {id} is not awaiting a 3-D Secure form (status={:?})", tx.status)));
        }
        let terminal = self.terminals.find_by_id(&tx.terminal_id).await?;
        let adapter = build_adapter(terminal.provider)?;
        adapter.get_form_html(&tx, &terminal)
    }

    /// Process a bank's 3-D Secure callback POST, provisioning on a valid
    /// status. A callback for an already-finalized transaction is a no-op
    /// short-circuit: a retried or duplicate bank POST never re-provisions
    /// or mutates the persisted result.
    pub async fn process_callback(&self, id: &TransactionId, fields: HashMap<String, String>) -> Result<PublicTransaction> {
        let tx = self.transactions.find_by_id(id).await?;
        if tx.is_finalized() {
            return Ok(PublicTransaction::from(&tx));
        }

        let terminal = self.terminals.find_by_id(&tx.terminal_id).await?;
        let adapter = build_adapter(terminal.provider)?;
        let http = self.http.clone();
        let config = self.config.clone();

        let updated = self
            .transactions
            .with_lock(
                id,
                Box::new(move |tx: &mut Transaction| {
                    Box::pin(async move {
                        if tx.is_finalized() {
                            return Ok(());
                        }
                        adapter.process_callback(tx, &terminal, &fields, &http, &config).await
                    })
                }),
            )
            .await?;

        Ok(PublicTransaction::from(&updated))
    }

    /// The public projection of a transaction's current state.
    pub async fn get_transaction_status(&self, id: &TransactionId) -> Result<PublicTransaction> {
        let tx = self.transactions.find_by_id(id).await?;
        Ok(PublicTransaction::from(&tx))
    }
}

/// Dispatch helper exposed for binaries/tests that want a registered
/// provider's adapter without going through [`Orchestrator`].
pub fn adapter_for(tag: ProviderTag) -> Result<Box<dyn crate::adapters::ProviderAdapter>> {
    build_adapter(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{InMemoryTerminalStore, InMemoryTransactionStore};
    use crate::types::terminal::{BankCode, Credentials, NewTerminal, ThreeDsConfig};
    use crate::types::{BinInfo, NullBinResolver};
    use async_trait::async_trait;

    fn garanti_terminal_spec() -> NewTerminal {
        NewTerminal {
            company: "acme".into(),
            bank_code: BankCode::Garanti,
            currencies: vec![Currency::Try],
            default_for_currencies: vec![Currency::Try],
            priority: 0,
            test_mode: true,
            credentials: Credentials {
                merchant_id: "7000679".into(),
                terminal_id: "30691298".into(),
                username: None,
                password: "123qweASD/".into(),
                secret_key: None,
                extra: serde_json::Value::Null,
            },
            three_ds: ThreeDsConfig {
                enabled: true,
                required: true,
                store_key: "12345678".into(),
            },
            installment: Default::default(),
            commission_periods: vec![],
            limits: Default::default(),
            supported_card_families: vec![],
            spec: Default::default(),
        }
    }

    async fn orchestrator_with_one_terminal() -> (Orchestrator, TerminalId) {
        let terminals = Arc::new(InMemoryTerminalStore::new("test-master-key"));
        let terminal = terminals.create(garanti_terminal_spec()).await.unwrap();
        let transactions = Arc::new(InMemoryTransactionStore::new());
        let config = OrchestratorConfig::new("test-master-key", "https://pay.example.com");
        let orchestrator = Orchestrator::new(terminals, transactions, Arc::new(NullBinResolver), config).unwrap();
        (orchestrator, terminal.id)
    }

    fn sample_card() -> NewCard {
        NewCard {
            holder: "Ali Veli".into(),
            number: "4282209004348016".into(),
            expiry: "03/28".into(),
            cvv: "358".into(),
        }
    }

    #[tokio::test]
    async fn create_payment_rejects_invalid_card() {
        let (orchestrator, pos_id) = orchestrator_with_one_terminal().await;
        let mut card = sample_card();
        card.holder = "".into();

        let err = orchestrator
            .create_payment(CreatePaymentSpec {
                company: "acme".into(),
                pos_id: Some(pos_id),
                amount: Money::from_decimal_str("150.00", Currency::Try).unwrap(),
                installment: InstallmentCount::SINGLE,
                card,
                customer: Default::default(),
                external_id: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn create_payment_rejects_foreign_currency_for_domestic_card() {
        struct DomesticResolver;
        #[async_trait]
        impl BinResolver for DomesticResolver {
            async fn resolve(&self, bin: u64) -> Result<Option<BinInfo>> {
                Ok(Some(BinInfo {
                    bin,
                    bank: None,
                    bank_code: None,
                    brand: None,
                    card_type: None,
                    card_family: None,
                    country: Some("TR".into()),
                }))
            }
        }

        let terminals = Arc::new(InMemoryTerminalStore::new("test-master-key"));
        let terminal = terminals.create(garanti_terminal_spec()).await.unwrap();
        let transactions = Arc::new(InMemoryTransactionStore::new());
        let config = OrchestratorConfig::new("test-master-key", "https://pay.example.com");
        let orchestrator = Orchestrator::new(terminals, transactions, Arc::new(DomesticResolver), config).unwrap();

        let err = orchestrator
            .create_payment(CreatePaymentSpec {
                company: "acme".into(),
                pos_id: Some(terminal.id),
                amount: Money::from_decimal_str("150.00", Currency::Usd).unwrap(),
                installment: InstallmentCount::SINGLE,
                card: sample_card(),
                customer: Default::default(),
                external_id: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_callback_on_finalized_transaction_is_a_noop() {
        let (orchestrator, pos_id) = orchestrator_with_one_terminal().await;

        let new_tx = NewTransaction {
            terminal_id: pos_id,
            company: "acme".into(),
            amount: Money::from_decimal_str("150.00", Currency::Try).unwrap(),
            installment: InstallmentCount::SINGLE,
            card: sample_card(),
            bin_snapshot: None,
            customer: Default::default(),
            external_id: None,
        };
        let tx = orchestrator.transactions.create(new_tx, "test-master-key").await.unwrap();
        orchestrator.transactions.update_status_atomic(&tx.id, TransactionStatus::Processing).await.unwrap();
        orchestrator.transactions.update_status_atomic(&tx.id, TransactionStatus::Failed).await.unwrap();

        let before = orchestrator.get_transaction_status(&tx.id).await.unwrap();
        let after = orchestrator.process_callback(&tx.id, HashMap::new()).await.unwrap();

        assert_eq!(before.status, after.status);
        assert_eq!(before.result, after.result);
    }

    #[test]
    fn installment_options_collapse_to_single_below_minimum() {
        let mut terminal = garanti_like_terminal_for_options();
        terminal.installment.enabled = true;
        terminal.installment.min_amount = Some(Money::from_decimal_str("100.00", Currency::Try).unwrap());
        terminal.installment.max_count = 6;

        let below_min = Money::from_decimal_str("50.00", Currency::Try).unwrap();
        let options = installment_options(below_min, Some("credit"), &terminal);
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].count, 1);
    }

    #[test]
    fn installment_options_expand_for_try_credit_above_minimum() {
        let mut terminal = garanti_like_terminal_for_options();
        terminal.installment.enabled = true;
        terminal.installment.min_amount = Some(Money::from_decimal_str("100.00", Currency::Try).unwrap());
        terminal.installment.max_count = 6;

        let amount = Money::from_decimal_str("500.00", Currency::Try).unwrap();
        let options = installment_options(amount, Some("credit"), &terminal);
        assert_eq!(options.len(), 6);
        assert_eq!(options.last().unwrap().count, 6);
    }

    #[test]
    fn installment_options_ignore_debit_cards() {
        let mut terminal = garanti_like_terminal_for_options();
        terminal.installment.enabled = true;
        terminal.installment.max_count = 6;

        let amount = Money::from_decimal_str("500.00", Currency::Try).unwrap();
        let options = installment_options(amount, Some("debit"), &terminal);
        assert_eq!(options.len(), 1);
    }

    fn garanti_like_terminal_for_options() -> Terminal {
        Terminal {
            id: TerminalId::new("term_0000000001").unwrap(),
            company: "acme".into(),
            bank_code: BankCode::Garanti,
            provider: ProviderTag::Garanti,
            currencies: vec![Currency::Try],
            default_for_currencies: vec![Currency::Try],
            priority: 0,
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
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }
}
