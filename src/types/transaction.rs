//! Transaction types: a single payment attempt and its audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::{Currency, InstallmentCount, Money, TerminalId, TransactionId};
use crate::codec::mask_pan;
use crate::crypto::{aes_decrypt_field, aes_encrypt_field};
use crate::error::{Error, Result};

/// A transaction's position in the payment state machine.
///
/// `Pending` and `Processing` are the only states resumable across a process
/// restart; the rest are terminal. The allowed edges are enforced by
/// [`TransactionStatus::can_transition_to`], not by convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    /// Whether moving from `self` to `next` is a legal edge in the state graph.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Success) | (Processing, Failed) | (Success, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Failed | TransactionStatus::Cancelled)
    }
}

/// Clear-text card input accepted at transaction creation. Never persisted
/// as-is; the store encrypts every field before a [`Transaction`] exists.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCard {
    pub holder: String,
    pub number: String,
    /// `"MM/YY"`.
    pub expiry: String,
    pub cvv: String,
}

/// Card fields as persisted: every value is ciphertext (`"<iv-hex>:<ciphertext-hex>"`),
/// `cvv` becomes `None` once the transaction reaches `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedCard {
    pub holder: String,
    pub number: String,
    pub expiry: String,
    pub cvv: Option<String>,
}

impl EncryptedCard {
    pub fn encrypt(card: &NewCard, master_key: &str) -> Self {
        Self {
            holder: aes_encrypt_field(&card.holder, master_key),
            number: aes_encrypt_field(&card.number, master_key),
            expiry: aes_encrypt_field(&card.expiry, master_key),
            cvv: Some(aes_encrypt_field(&card.cvv, master_key)),
        }
    }

    /// Decrypt every field back into a [`NewCard`]-shaped clear view.
    ///
    /// Fails with `crypto_error` if `cvv` has already been cleared, since a
    /// cleared CVV means the issuer already authorized this payment and no
    /// adapter operation should need the clear card again.
    pub fn decrypt(&self, master_key: &str) -> Result<NewCard> {
        let cvv = self
            .cvv
            .as_deref()
            .ok_or_else(|| Error::Crypto("cvv has been cleared; clear card unavailable".into()))?;
        Ok(NewCard {
            holder: aes_decrypt_field(&self.holder, master_key)?,
            number: aes_decrypt_field(&self.number, master_key)?,
            expiry: aes_decrypt_field(&self.expiry, master_key)?,
            cvv: aes_decrypt_field(cvv, master_key)?,
        })
    }
}

/// The non-sensitive projection of a card, safe to serialize anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardView {
    pub bin: u64,
    pub masked: String,
}

impl CardView {
    /// Derive the numeric BIN and the masked display string from a clear PAN.
    /// Must be called at the one point the clear number is in hand; every
    /// later read sees only ciphertext.
    pub fn from_pan(pan: &str) -> Result<Self> {
        let digits: String = pan.chars().filter(char::is_ascii_digit).collect();
        if digits.len() < 8 {
            return Err(Error::Validation("card number too short to derive a BIN".into()));
        }
        let bin: u64 = digits[..8]
            .parse()
            .map_err(|_| Error::Validation("card number BIN prefix is not numeric".into()))?;
        Ok(Self { bin, masked: mask_pan(pan) })
    }
}

/// The BIN-lookup resolver's answer, snapshotted onto the transaction at
/// creation time so later reads don't depend on the resolver's availability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinSnapshot {
    pub bank: Option<String>,
    pub bank_code: Option<String>,
    pub brand: Option<String>,
    pub card_type: Option<String>,
    pub card_family: Option<String>,
    pub country: Option<String>,
}

/// Customer metadata carried alongside the transaction, used by some
/// adapters' wire payloads and surfaced in logs/auditing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub ip: Option<String>,
}

/// Adapter-private 3-D Secure payload, tagged by adapter family so the whole
/// subtree can be replaced atomically on every write, never diffed
/// field-by-field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "adapter", content = "payload", rename_all = "snake_case")]
pub enum SecureEnvelope {
    Garanti(serde_json::Value),
    Payten(serde_json::Value),
    Ykb(serde_json::Value),
    Vakifbank(serde_json::Value),
    Qnb(serde_json::Value),
    Iyzico(serde_json::Value),
}

impl SecureEnvelope {
    pub fn payload(&self) -> &serde_json::Value {
        match self {
            SecureEnvelope::Garanti(v)
            | SecureEnvelope::Payten(v)
            | SecureEnvelope::Ykb(v)
            | SecureEnvelope::Vakifbank(v)
            | SecureEnvelope::Qnb(v)
            | SecureEnvelope::Iyzico(v) => v,
        }
    }
}

/// The full 3-D Secure bundle: common cryptographic evidence plus the
/// adapter-opaque envelope. Always replaced wholesale on write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecureBundle {
    pub eci: Option<String>,
    pub cavv: Option<String>,
    pub md: Option<String>,
    pub envelope: Option<SecureEnvelope>,
}

/// The terminal-facing outcome of a transaction, as reported by the acquirer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub success: bool,
    pub code: Option<String>,
    pub message: Option<String>,
    pub auth_code: Option<String>,
    pub ref_number: Option<String>,
}

impl TransactionResult {
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code.into()),
            message: Some(message.into()),
            auth_code: None,
            ref_number: None,
        }
    }

    pub fn approved(auth_code: impl Into<String>, ref_number: impl Into<String>) -> Self {
        Self {
            success: true,
            code: None,
            message: Some("Approved".to_string()),
            auth_code: Some(auth_code.into()),
            ref_number: Some(ref_number.into()),
        }
    }
}

/// The kind of exchange a [`LogEntry`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Init,
    ThreeDForm,
    ThreeDCallback,
    Provision,
    Refund,
    Cancel,
    Status,
    PreAuth,
    PostAuth,
    Error,
}

/// One append-only entry in a transaction's audit log.
///
/// `request`/`response` are opaque JSON so every adapter can log its native
/// wire shape (XML stringified, form fields as a map, JSON body) without a
/// shared schema getting in the way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// A single payment attempt, the core auditable record this whole system
/// exists to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub terminal_id: TerminalId,
    pub company: String,
    pub amount: Money,
    pub installment: InstallmentCount,
    pub card: EncryptedCard,
    pub card_view: CardView,
    pub bin_snapshot: Option<BinSnapshot>,
    pub customer: CustomerSnapshot,
    pub status: TransactionStatus,
    pub secure: SecureBundle,
    pub result: Option<TransactionResult>,
    pub logs: Vec<LogEntry>,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Attempt a status transition, enforcing the state graph.
    ///
    /// Returns `Ok(())` if the move is a no-op repeat of the current terminal
    /// state (idempotent callback retries rely on this), an `Err(state_error)`
    /// for any other illegal edge.
    pub fn transition(&mut self, next: TransactionStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(Error::State(format!(
                "cannot move transaction {} from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        if next.is_terminal() && next != TransactionStatus::Cancelled {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn append_log(&mut self, log_type: LogType, request: serde_json::Value, response: serde_json::Value) {
        self.logs.push(LogEntry {
            log_type,
            request,
            response,
            at: Utc::now(),
        });
    }

    /// Clear the CVV in place. Idempotent: clearing an already-cleared CVV is a no-op.
    pub fn clear_cvv(&mut self) {
        self.card.cvv = None;
    }

    /// Whether this transaction is already in a terminal state, meaning a
    /// callback or provision retry should be treated as a duplicate and
    /// short-circuited rather than re-executed.
    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }
}

/// The public, wire-safe projection of a [`Transaction`] — the only shape
/// ever returned to a caller. No encrypted field, and no ciphertext, ever
/// appears here.
#[derive(Debug, Clone, Serialize)]
pub struct PublicTransaction {
    pub id: TransactionId,
    pub status: TransactionStatus,
    pub amount: Money,
    pub currency: Currency,
    pub installment: InstallmentCount,
    pub card: CardView,
    pub result: Option<TransactionResult>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Transaction> for PublicTransaction {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.clone(),
            status: tx.status,
            amount: tx.amount,
            currency: tx.amount.currency,
            installment: tx.installment,
            card: tx.card_view.clone(),
            result: tx.result.clone(),
            created_at: tx.created_at,
            completed_at: tx.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transaction() -> Transaction {
        let card = NewCard {
            holder: "Ali Veli".into(),
            number: "4282209004348016".into(),
            expiry: "03/28".into(),
            cvv: "358".into(),
        };
        let master_key = "test-master-key";
        Transaction {
            id: TransactionId::new("txn_abc123").unwrap(),
            terminal_id: TerminalId::new("term_abc123").unwrap(),
            company: "acme".into(),
            amount: Money::from_decimal_str("150.00", Currency::Try).unwrap(),
            installment: InstallmentCount::SINGLE,
            card_view: CardView::from_pan(&card.number).unwrap(),
            card: EncryptedCard::encrypt(&card, master_key),
            bin_snapshot: None,
            customer: CustomerSnapshot::default(),
            status: TransactionStatus::Pending,
            secure: SecureBundle::default(),
            result: None,
            logs: Vec::new(),
            external_id: None,
            created_at: Utc::now(),
            completed_at: None,
            refunded_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn transition_follows_state_graph() {
        let mut tx = sample_transaction();
        tx.transition(TransactionStatus::Processing).unwrap();
        tx.transition(TransactionStatus::Success).unwrap();
        assert!(tx.completed_at.is_some());

        let err = tx.transition(TransactionStatus::Pending).unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn duplicate_transition_to_same_state_is_noop() {
        let mut tx = sample_transaction();
        tx.transition(TransactionStatus::Processing).unwrap();
        tx.transition(TransactionStatus::Success).unwrap();
        let result_before = tx.result.clone();
        let logs_before = tx.logs.len();

        tx.transition(TransactionStatus::Success).unwrap();
        assert_eq!(tx.result, result_before);
        assert_eq!(tx.logs.len(), logs_before);
    }

    #[test]
    fn cvv_cleared_on_success() {
        let mut tx = sample_transaction();
        assert!(tx.card.cvv.is_some());
        tx.clear_cvv();
        assert!(tx.card.cvv.is_none());
    }

    #[test]
    fn public_projection_never_exposes_card_fields() {
        let mut tx = sample_transaction();
        tx.transition(TransactionStatus::Processing).unwrap();
        tx.transition(TransactionStatus::Success).unwrap();
        tx.clear_cvv();

        let public = PublicTransaction::from(&tx);
        let serialized = serde_json::to_string(&public).unwrap();
        assert!(!serialized.contains("4282209004348016"));
        assert!(!serialized.contains("holder"));
        assert!(!serialized.contains("358"));
        assert!(serialized.contains("\"bin\":42822090"));
        assert!(serialized.contains("\"masked\":\"4282 20** **** 8016\""));
    }

    #[test]
    fn decrypt_fails_after_cvv_cleared() {
        let mut tx = sample_transaction();
        tx.clear_cvv();
        let err = tx.card.decrypt("test-master-key").unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }
}
