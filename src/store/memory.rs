//! In-memory store implementations: `Mutex`-guarded maps, sufficient for
//! tests and single-process deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{NewTransaction, TerminalPatch, TerminalStore, TransactionStore};
use crate::crypto::aes_encrypt_field;
use crate::error::{Error, Result};
use crate::types::terminal::NewTerminal;
use crate::types::{Currency, EncryptedCard, LogType, Terminal, TerminalId, Transaction, TransactionId, TransactionStatus};

fn next_id(counter: &AtomicU64, prefix: &str) -> String {
    let n = counter.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}{n:010}")
}

/// In-memory [`TerminalStore`].
pub struct InMemoryTerminalStore {
    terminals: Mutex<HashMap<TerminalId, Terminal>>,
    seq: AtomicU64,
    master_key: String,
}

impl InMemoryTerminalStore {
    pub fn new(master_key: impl Into<String>) -> Self {
        Self {
            terminals: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(1),
            master_key: master_key.into(),
        }
    }
}

#[async_trait]
impl TerminalStore for InMemoryTerminalStore {
    async fn create(&self, spec: NewTerminal) -> Result<Terminal> {
        if spec.currencies.is_empty() {
            return Err(Error::Validation("terminal must support at least one currency".into()));
        }
        if !spec.default_for_currencies.iter().all(|c| spec.currencies.contains(c)) {
            return Err(Error::Validation("defaultForCurrencies must be a subset of currencies".into()));
        }

        let mut terminals = self.terminals.lock().await;
        if terminals.values().any(|t| t.company == spec.company && t.bank_code == spec.bank_code) {
            return Err(Error::Conflict(format!(
                "terminal already exists for company={} bank_code={:?}",
                spec.company, spec.bank_code
            )));
        }
        for currency in &spec.default_for_currencies {
            if terminals.values().any(|t| t.company == spec.company && t.default_for_currencies.contains(currency)) {
                return Err(Error::Conflict(format!("company {} already has a default terminal for {currency}", spec.company)));
            }
        }

        let mut credentials = spec.credentials;
        credentials.password = aes_encrypt_field(&credentials.password, &self.master_key);
        if let Some(secret) = credentials.secret_key.as_deref() {
            credentials.secret_key = Some(aes_encrypt_field(secret, &self.master_key));
        }

        let mut three_ds = spec.three_ds;
        three_ds.store_key = aes_encrypt_field(&three_ds.store_key, &self.master_key);

        let now = Utc::now();
        let terminal = Terminal {
            id: TerminalId::new(next_id(&self.seq, TerminalId::PREFIX)).expect("generated id always valid"),
            company: spec.company,
            bank_code: spec.bank_code,
            provider: spec.bank_code.provider_tag(),
            currencies: spec.currencies,
            default_for_currencies: spec.default_for_currencies,
            priority: spec.priority,
            test_mode: spec.test_mode,
            credentials,
            three_ds,
            installment: spec.installment,
            commission_periods: spec.commission_periods,
            limits: spec.limits,
            supported_card_families: spec.supported_card_families,
            spec: spec.spec,
            status: true,
            created_at: now,
            updated_at: now,
        };
        terminals.insert(terminal.id.clone(), terminal.clone());
        Ok(terminal)
    }

    async fn find_by_id(&self, id: &TerminalId) -> Result<Terminal> {
        self.terminals
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("terminal {id}")))
    }

    async fn find_for_selection(&self, company: &str, currency: Currency) -> Result<Vec<Terminal>> {
        Ok(self
            .terminals
            .lock()
            .await
            .values()
            .filter(|t| t.company == company && t.accepts_currency(currency))
            .cloned()
            .collect())
    }

    async fn update(&self, id: &TerminalId, patch: TerminalPatch) -> Result<Terminal> {
        let mut terminals = self.terminals.lock().await;
        let terminal = terminals.get_mut(id).ok_or_else(|| Error::NotFound(format!("terminal {id}")))?;
        if let Some(status) = patch.status {
            terminal.status = status;
        }
        if let Some(priority) = patch.priority {
            terminal.priority = priority;
        }
        if let Some(test_mode) = patch.test_mode {
            terminal.test_mode = test_mode;
        }
        terminal.updated_at = Utc::now();
        Ok(terminal.clone())
    }

    async fn set_default_for_currency(&self, id: &TerminalId, currency: Currency) -> Result<Terminal> {
        let mut terminals = self.terminals.lock().await;
        let company = terminals.get(id).ok_or_else(|| Error::NotFound(format!("terminal {id}")))?.company.clone();

        for (other_id, other) in terminals.iter_mut() {
            if other.company == company && other_id != id {
                other.default_for_currencies.retain(|c| *c != currency);
            }
        }
        let terminal = terminals.get_mut(id).expect("checked above");
        if !terminal.default_for_currencies.contains(&currency) {
            terminal.default_for_currencies.push(currency);
        }
        terminal.updated_at = Utc::now();
        Ok(terminal.clone())
    }

    async fn delete(&self, id: &TerminalId) -> Result<()> {
        self.terminals
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("terminal {id}")))
    }
}

/// In-memory [`TransactionStore`].
///
/// Linearizable per-transaction writes can be had either via a per-transaction
/// lock or a CAS-on-status write; this implementation takes the simplest
/// correct option — a single
/// `tokio::sync::Mutex` guarding the whole map — which trivially satisfies
/// per-transaction linearizability at the cost of serializing unrelated
/// transactions too. The Postgres-backed store (`postgres-store` feature)
/// instead takes the CAS approach so unrelated transactions don't contend.
pub struct InMemoryTransactionStore {
    transactions: Mutex<HashMap<TransactionId, Transaction>>,
    seq: AtomicU64,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self {
            transactions: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(1),
        }
    }
}

impl Default for InMemoryTransactionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create(&self, fields: NewTransaction, master_key: &str) -> Result<Transaction> {
        let card_view = crate::types::CardView::from_pan(&fields.card.number)?;
        let encrypted = EncryptedCard::encrypt(&fields.card, master_key);

        let tx = Transaction {
            id: TransactionId::new(next_id(&self.seq, TransactionId::PREFIX)).expect("generated id always valid"),
            terminal_id: fields.terminal_id,
            company: fields.company,
            amount: fields.amount,
            installment: fields.installment,
            card: encrypted,
            card_view,
            bin_snapshot: fields.bin_snapshot,
            customer: fields.customer,
            status: TransactionStatus::Pending,
            secure: Default::default(),
            result: None,
            logs: Vec::new(),
            external_id: fields.external_id,
            created_at: Utc::now(),
            completed_at: None,
            refunded_at: None,
            cancelled_at: None,
        };
        self.transactions.lock().await.insert(tx.id.clone(), tx.clone());
        Ok(tx)
    }

    async fn find_by_id(&self, id: &TransactionId) -> Result<Transaction> {
        self.transactions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("transaction {id}")))
    }

    async fn append_log(&self, id: &TransactionId, log_type: LogType, request: serde_json::Value, response: serde_json::Value) -> Result<()> {
        let mut transactions = self.transactions.lock().await;
        let tx = transactions.get_mut(id).ok_or_else(|| Error::NotFound(format!("transaction {id}")))?;
        tx.append_log(log_type, request, response);
        Ok(())
    }

    async fn update_status_atomic(&self, id: &TransactionId, new_status: TransactionStatus) -> Result<Transaction> {
        let mut transactions = self.transactions.lock().await;
        let tx = transactions.get_mut(id).ok_or_else(|| Error::NotFound(format!("transaction {id}")))?;
        tx.transition(new_status)?;
        Ok(tx.clone())
    }

    async fn save_secure(&self, updated: &Transaction) -> Result<()> {
        let mut transactions = self.transactions.lock().await;
        let tx = transactions.get_mut(&updated.id).ok_or_else(|| Error::NotFound(format!("transaction {}", updated.id)))?;
        // Replace the whole mutable subtree in one assignment rather than
        // touching individual fields, so a partial-shape adapter mutation
        // (formData here, decrypted there) is never half-applied.
        tx.secure = updated.secure.clone();
        tx.result = updated.result.clone();
        tx.card = updated.card.clone();
        tx.refunded_at = updated.refunded_at;
        tx.cancelled_at = updated.cancelled_at;
        Ok(())
    }

    async fn clear_cvv(&self, id: &TransactionId) -> Result<()> {
        let mut transactions = self.transactions.lock().await;
        let tx = transactions.get_mut(id).ok_or_else(|| Error::NotFound(format!("transaction {id}")))?;
        tx.clear_cvv();
        Ok(())
    }

    async fn get_decrypted_card(&self, tx: &Transaction, master_key: &str) -> Result<crate::types::NewCard> {
        tx.card.decrypt(master_key)
    }

    async fn with_lock(&self, id: &TransactionId, f: super::LockedOp<'_>) -> Result<Transaction> {
        let mut transactions = self.transactions.lock().await;
        let tx = transactions.get_mut(id).ok_or_else(|| Error::NotFound(format!("transaction {id}")))?;
        f(tx).await?;
        Ok(tx.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, InstallmentCount, Money, NewCard};

    fn sample_card() -> NewCard {
        NewCard {
            holder: "Ali Veli".into(),
            number: "4282209004348016".into(),
            expiry: "03/28".into(),
            cvv: "358".into(),
        }
    }

    #[tokio::test]
    async fn create_then_find() {
        let store = InMemoryTransactionStore::new();
        let tx = store
            .create(
                NewTransaction {
                    terminal_id: TerminalId::new("term_0000000001").unwrap(),
                    company: "acme".into(),
                    amount: Money::from_decimal_str("150.00", Currency::Try).unwrap(),
                    installment: InstallmentCount::SINGLE,
                    card: sample_card(),
                    bin_snapshot: None,
                    customer: Default::default(),
                    external_id: None,
                },
                "master-key",
            )
            .await
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Pending);
        let found = store.find_by_id(&tx.id).await.unwrap();
        assert_eq!(found.id, tx.id);
    }

    #[tokio::test]
    async fn append_log_is_monotonically_growing() {
        let store = InMemoryTransactionStore::new();
        let tx = store
            .create(
                NewTransaction {
                    terminal_id: TerminalId::new("term_0000000001").unwrap(),
                    company: "acme".into(),
                    amount: Money::from_decimal_str("150.00", Currency::Try).unwrap(),
                    installment: InstallmentCount::SINGLE,
                    card: sample_card(),
                    bin_snapshot: None,
                    customer: Default::default(),
                    external_id: None,
                },
                "master-key",
            )
            .await
            .unwrap();

        store.append_log(&tx.id, LogType::Init, serde_json::json!({}), serde_json::json!({})).await.unwrap();
        store.append_log(&tx.id, LogType::ThreeDForm, serde_json::json!({}), serde_json::json!({})).await.unwrap();

        let found = store.find_by_id(&tx.id).await.unwrap();
        assert_eq!(found.logs.len(), 2);
    }

    #[tokio::test]
    async fn update_status_atomic_rejects_illegal_edge() {
        let store = InMemoryTransactionStore::new();
        let tx = store
            .create(
                NewTransaction {
                    terminal_id: TerminalId::new("term_0000000001").unwrap(),
                    company: "acme".into(),
                    amount: Money::from_decimal_str("150.00", Currency::Try).unwrap(),
                    installment: InstallmentCount::SINGLE,
                    card: sample_card(),
                    bin_snapshot: None,
                    customer: Default::default(),
                    external_id: None,
                },
                "master-key",
            )
            .await
            .unwrap();

        let err = store.update_status_atomic(&tx.id, TransactionStatus::Success).await.unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[tokio::test]
    async fn with_lock_applies_an_async_mutation() {
        let store = InMemoryTransactionStore::new();
        let tx = store
            .create(
                NewTransaction {
                    terminal_id: TerminalId::new("term_0000000001").unwrap(),
                    company: "acme".into(),
                    amount: Money::from_decimal_str("150.00", Currency::Try).unwrap(),
                    installment: InstallmentCount::SINGLE,
                    card: sample_card(),
                    bin_snapshot: None,
                    customer: Default::default(),
                    external_id: None,
                },
                "master-key",
            )
            .await
            .unwrap();

        let updated = store
            .with_lock(
                &tx.id,
                Box::new(|tx| {
                    Box::pin(async move {
                        tokio::task::yield_now().await;
                        tx.transition(TransactionStatus::Processing)
                    })
                }),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, TransactionStatus::Processing);
    }

    #[tokio::test]
    async fn terminal_store_enforces_unique_company_bank() {
        use crate::types::terminal::{Credentials, NewTerminal, ThreeDsConfig};
        use crate::types::BankCode;

        let store = InMemoryTerminalStore::new("master-key");
        let spec = |company: &str| NewTerminal {
            company: company.into(),
            bank_code: BankCode::Garanti,
            currencies: vec![Currency::Try],
            default_for_currencies: vec![],
            priority: 0,
            test_mode: true,
            credentials: Credentials {
                merchant_id: "m".into(),
                terminal_id: "t".into(),
                username: None,
                password: "secret".into(),
                secret_key: None,
                extra: serde_json::Value::Null,
            },
            three_ds: ThreeDsConfig {
                enabled: true,
                required: true,
                store_key: "key".into(),
            },
            installment: Default::default(),
            commission_periods: vec![],
            limits: Default::default(),
            supported_card_families: vec![],
            spec: Default::default(),
        };

        store.create(spec("acme")).await.unwrap();
        let err = store.create(spec("acme")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn set_default_for_currency_clears_peers() {
        use crate::types::terminal::{Credentials, NewTerminal, ThreeDsConfig};
        use crate::types::BankCode;

        let store = InMemoryTerminalStore::new("master-key");
        let spec = |bank: BankCode| NewTerminal {
            company: "acme".into(),
            bank_code: bank,
            currencies: vec![Currency::Try],
            default_for_currencies: vec![Currency::Try],
            priority: 0,
            test_mode: true,
            credentials: Credentials {
                merchant_id: "m".into(),
                terminal_id: "t".into(),
                username: None,
                password: "secret".into(),
                secret_key: None,
                extra: serde_json::Value::Null,
            },
            three_ds: ThreeDsConfig {
                enabled: true,
                required: true,
                store_key: "key".into(),
            },
            installment: Default::default(),
            commission_periods: vec![],
            limits: Default::default(),
            supported_card_families: vec![],
            spec: Default::default(),
        };

        let a = store.create(spec(BankCode::Garanti)).await.unwrap();
        let b = store
            .create(NewTerminal {
                default_for_currencies: vec![],
                ..spec(BankCode::Akbank)
            })
            .await
            .unwrap();

        store.set_default_for_currency(&b.id, Currency::Try).await.unwrap();

        let a_after = store.find_by_id(&a.id).await.unwrap();
        let b_after = store.find_by_id(&b.id).await.unwrap();
        assert!(!a_after.default_for_currencies.contains(&Currency::Try));
        assert!(b_after.default_for_currencies.contains(&Currency::Try));
    }
}
