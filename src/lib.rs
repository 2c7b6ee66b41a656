//! # vpos-core
//!
//! Multi-acquirer card payment orchestration for Turkish virtual-POS (VPOS)
//! banks: a single Rust API in front of several bit-exact acquirer wire
//! protocols (XML, form-urlencoded, JSON), 3-D Secure, and field-level
//! at-rest encryption.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vpos_core::{Currency, Money, NewCard, CreatePaymentSpec, OrchestratorConfig, Orchestrator};
//! use vpos_core::store::memory::{InMemoryTerminalStore, InMemoryTransactionStore};
//! use vpos_core::NullBinResolver;
//!
//! # async fn example() -> Result<(), vpos_core::Error> {
//! let terminals = Arc::new(InMemoryTerminalStore::new("a-32-byte-master-key-aaaaaaaaaa"));
//! let transactions = Arc::new(InMemoryTransactionStore::new());
//! let config = OrchestratorConfig::new("a-32-byte-master-key-aaaaaaaaaa", "https://pay.example.com");
//! let orchestrator = Orchestrator::new(terminals, transactions, Arc::new(NullBinResolver), config)?;
//!
//! let result = orchestrator.create_payment(CreatePaymentSpec {
//!     company: "acme".into(),
//!     pos_id: None,
//!     amount: Money::from_decimal_str("150.00", Currency::Try)?,
//!     installment: Default::default(),
//!     card: NewCard { holder: "Ali Veli".into(), number: "4282209004348016".into(), expiry: "03/28".into(), cvv: "358".into() },
//!     customer: Default::default(),
//!     external_id: None,
//! }).await?;
//!
//! println!("form at {}", result.form_url);
//! # Ok(())
//! # }
//! ```
//!
//! ## Acquirers
//!
//! | Bank | Wire format | 3-D flow |
//! |------|-------------|----------|
//! | Garanti BBVA | XML (ISO-8859-9) | ACS redirect |
//! | Payten/Akbank/Denizbank | form-urlencoded | ACS redirect |
//! | Yapı Kredi (YKB) | XML, `MerchantPacket` 3DES | ACS redirect |
//! | VakıfBank | XML (ISO-8859-9) | ACS redirect |
//! | QNB Finansbank | form-urlencoded, SHA-1 hash chain | ACS redirect |
//! | iyzico | JSON | inline HTML |
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Result<T>`]/[`Error`]; acquirer
//! rejections surface as [`Error::Provider`] with the acquirer's native code,
//! never as a generic failure. [`Error::is_retryable`] distinguishes
//! transport failures (safe to retry) from acquirer/validation failures
//! (not).
//!
//! ## Feature Flags
//!
//! - `postgres-store` — a `sqlx`/Postgres-backed [`TerminalStore`]/[`TransactionStore`] pair, using compare-and-swap on transaction status instead of the in-memory store's single mutex.
//! - `ingress` — the public bank-facing [`axum`] router (`GET /payment/:id/form`, `POST /payment/:id/callback`).
//! - `ingress-cli` — the `vpos-ingress` binary that serves the `ingress` router standalone.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod adapters;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
#[cfg(feature = "ingress")]
pub mod ingress;
pub mod orchestrator;
pub mod selection;
pub mod store;
pub mod types;

pub use adapters::{Capabilities, ProviderAdapter};
pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use http::AcquirerHttp;
pub use orchestrator::{
    installment_options, BinQueryResult, CreatePaymentResult, CreatePaymentSpec, InstallmentOption, Orchestrator, PosSummary,
};
pub use selection::select_terminal;

// Re-export the domain types callers build requests out of, flattened onto
// the crate root.
pub use types::{
    BankCode, BinInfo, BinResolver, BinSnapshot, CardView, Credentials, Currency, CustomerSnapshot, EncryptedCard, InstallmentCount,
    LogEntry, LogType, MemoizingBinResolver, Money, NewCard, NullBinResolver, ProviderTag, PublicTransaction, SecureBundle, SecureEnvelope,
    Terminal, TerminalId, TerminalSpec, ThreeDsConfig, Transaction, TransactionId, TransactionResult, TransactionStatus,
};

// Re-export the persistence contracts for convenience.
pub use store::{NewTransaction, TerminalPatch, TerminalStore, TransactionStore};
