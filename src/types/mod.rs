//! Core domain types: identifiers, money/currency, terminals, transactions,
//! and the BIN-resolver contract.

pub mod bin;
pub mod common;
pub mod terminal;
pub mod transaction;

pub use bin::{BinInfo, BinResolver, MemoizingBinResolver, NullBinResolver};
pub use common::{Currency, InstallmentCount, Money, TerminalId, TransactionId};
pub use terminal::{BankCode, Credentials, ProviderTag, Terminal, TerminalSpec, ThreeDsConfig};
pub use transaction::{
    BinSnapshot, CardView, CustomerSnapshot, EncryptedCard, LogEntry, LogType, NewCard, PublicTransaction,
    SecureBundle, SecureEnvelope, Transaction, TransactionResult, TransactionStatus,
};
