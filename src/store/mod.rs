//! Persistence traits for terminals and transactions.
//!
//! An always-available in-memory implementation ([`memory`]) backs tests and
//! single-process deployments; a Postgres-backed implementation
//! ([`postgres`]) is available under the `postgres-store` feature.

pub mod memory;

#[cfg(feature = "postgres-store")]
pub mod postgres;

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::terminal::NewTerminal;
use crate::types::{BinSnapshot, CustomerSnapshot, Currency, InstallmentCount, LogType, Money, NewCard, Terminal, TerminalId, Transaction, TransactionId, TransactionStatus};

/// Abstraction over the terminal (merchant×acquirer binding) persistence
/// layer. Implementations apply field-level credential encryption on write.
#[async_trait]
pub trait TerminalStore: Send + Sync {
    async fn create(&self, spec: NewTerminal) -> Result<Terminal>;
    async fn find_by_id(&self, id: &TerminalId) -> Result<Terminal>;
    /// All active terminals for `company` that accept `currency`, in no
    /// particular order — callers (the selection policy) are responsible for
    /// sorting.
    async fn find_for_selection(&self, company: &str, currency: Currency) -> Result<Vec<Terminal>>;
    async fn update(&self, id: &TerminalId, patch: TerminalPatch) -> Result<Terminal>;
    /// Atomically clear `currency` from every other terminal of the same
    /// company's `default_for_currencies`, then add it to `id`'s.
    async fn set_default_for_currency(&self, id: &TerminalId, currency: Currency) -> Result<Terminal>;
    async fn delete(&self, id: &TerminalId) -> Result<()>;
}

/// A partial update to a [`Terminal`]. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct TerminalPatch {
    pub status: Option<bool>,
    pub priority: Option<i32>,
    pub test_mode: Option<bool>,
}

/// Fields supplied when a new transaction is created. The store is
/// responsible for encrypting the card, deriving the masked view/BIN, and
/// initializing `status = pending`.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub terminal_id: TerminalId,
    pub company: String,
    pub amount: Money,
    pub installment: InstallmentCount,
    pub card: NewCard,
    pub bin_snapshot: Option<BinSnapshot>,
    pub customer: CustomerSnapshot,
    pub external_id: Option<String>,
}

/// Abstraction over the transaction persistence layer.
///
/// Per-transaction mutation (`append_log`, `update_status_atomic`,
/// `save_secure`, `clear_cvv`) must be linearizable with respect to the same
/// transaction id: two concurrent callbacks for the same transaction must
/// not interleave their writes.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create(&self, fields: NewTransaction, master_key: &str) -> Result<Transaction>;
    async fn find_by_id(&self, id: &TransactionId) -> Result<Transaction>;
    async fn append_log(&self, id: &TransactionId, log_type: LogType, request: serde_json::Value, response: serde_json::Value) -> Result<()>;
    /// Move `id` to `new_status`, enforcing [`TransactionStatus::can_transition_to`].
    async fn update_status_atomic(&self, id: &TransactionId, new_status: TransactionStatus) -> Result<Transaction>;
    /// Persist an updated `secure` bundle and/or `result`, replacing the
    /// whole subtree — never a shallow diff.
    async fn save_secure(&self, tx: &Transaction) -> Result<()>;
    async fn clear_cvv(&self, id: &TransactionId) -> Result<()>;
    async fn get_decrypted_card(&self, tx: &Transaction, master_key: &str) -> Result<NewCard>;
    /// Run `f` with exclusive access to the transaction identified by `id`,
    /// reloading it first and persisting whatever `f` leaves in place
    /// afterwards. This is the mechanism the orchestrator uses to make
    /// init/callback/provision linearizable per transaction.
    ///
    /// `f` itself issues the acquirer HTTP call (adapter dispatch), so it must
    /// be able to `.await` while the lock is held — a plain synchronous
    /// `FnOnce` can't do that, hence the boxed-future return.
    async fn with_lock(&self, id: &TransactionId, f: LockedOp<'_>) -> Result<Transaction>;
}

/// The boxed, higher-ranked async closure [`TransactionStore::with_lock`]
/// accepts: borrows the locked transaction for the duration of its returned
/// future, so the adapter call inside can mutate it in place before the
/// future resolves.
pub type LockedOp<'a> = Box<dyn for<'b> FnOnce(&'b mut Transaction) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'b>> + Send + 'a>;
