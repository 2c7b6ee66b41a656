//! Postgres-backed [`TerminalStore`] and [`TransactionStore`], available
//! under the `postgres-store` feature.
//!
//! A `PgPool` plus a `jsonb` "data" column holding the full serialized
//! entity, with a handful of promoted columns for the predicates the
//! selection policy and status queries actually filter on. Unlike the
//! in-memory store's single `Mutex`, per-transaction linearizability here
//! comes from a CAS write on `status`: unrelated transactions never contend
//! with each other.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use super::{NewTransaction, TerminalPatch, TerminalStore, TransactionStore};
use crate::crypto::aes_encrypt_field;
use crate::error::{Error, Result};
use crate::types::terminal::NewTerminal;
use crate::types::{Currency, EncryptedCard, LogType, Terminal, TerminalId, Transaction, TransactionId, TransactionStatus};

/// Configuration for the Postgres-backed stores.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub auto_create_schema: bool,
}

impl PostgresConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            auto_create_schema: true,
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_auto_schema(mut self, enabled: bool) -> Self {
        self.auto_create_schema = enabled;
        self
    }
}

const CREATE_TERMINALS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS vpos_terminals (
    id VARCHAR(64) PRIMARY KEY,
    data JSONB NOT NULL,
    company VARCHAR(255) NOT NULL,
    bank_code VARCHAR(32) NOT NULL,
    status BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_TERMINALS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_vpos_terminals_company ON vpos_terminals(company);
CREATE UNIQUE INDEX IF NOT EXISTS idx_vpos_terminals_company_bank ON vpos_terminals(company, bank_code)
"#;

const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS vpos_transactions (
    id VARCHAR(64) PRIMARY KEY,
    data JSONB NOT NULL,
    terminal_id VARCHAR(64) NOT NULL,
    company VARCHAR(255) NOT NULL,
    status VARCHAR(32) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_TRANSACTIONS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_vpos_transactions_terminal ON vpos_transactions(terminal_id);
CREATE INDEX IF NOT EXISTS idx_vpos_transactions_status ON vpos_transactions(status)
"#;

async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(CREATE_TERMINALS_TABLE).execute(pool).await?;
    sqlx::query(CREATE_TRANSACTIONS_TABLE).execute(pool).await?;
    for stmt in CREATE_TERMINALS_INDEXES.split(';') {
        let stmt = stmt.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt).execute(pool).await?;
        }
    }
    for stmt in CREATE_TRANSACTIONS_INDEXES.split(';') {
        let stmt = stmt.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt).execute(pool).await?;
        }
    }
    Ok(())
}

async fn connect(config: &PostgresConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .map_err(Error::Database)?;
    if config.auto_create_schema {
        ensure_schema(&pool).await?;
    }
    Ok(pool)
}

/// Postgres-backed [`TerminalStore`].
pub struct PostgresTerminalStore {
    pool: PgPool,
    master_key: String,
}

impl PostgresTerminalStore {
    pub async fn new(config: PostgresConfig, master_key: impl Into<String>) -> Result<Self> {
        let pool = connect(&config).await?;
        Ok(Self { pool, master_key: master_key.into() })
    }

    /// Reuse an already-connected pool (e.g. shared with [`PostgresTransactionStore`]).
    pub fn with_pool(pool: PgPool, master_key: impl Into<String>) -> Self {
        Self { pool, master_key: master_key.into() }
    }

    fn row_to_terminal(row: &sqlx::postgres::PgRow) -> Result<Terminal> {
        let data: serde_json::Value = row.get("data");
        serde_json::from_value(data).map_err(Error::Json)
    }
}

#[async_trait]
impl TerminalStore for PostgresTerminalStore {
    async fn create(&self, spec: NewTerminal) -> Result<Terminal> {
        if spec.currencies.is_empty() {
            return Err(Error::Validation("terminal must support at least one currency".into()));
        }
        if !spec.default_for_currencies.iter().all(|c| spec.currencies.contains(c)) {
            return Err(Error::Validation("defaultForCurrencies must be a subset of currencies".into()));
        }

        let existing = sqlx::query("SELECT 1 FROM vpos_terminals WHERE company = $1 AND bank_code = $2")
            .bind(&spec.company)
            .bind(format!("{:?}", spec.bank_code).to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(Error::Conflict(format!("terminal already exists for company={} bank_code={:?}", spec.company, spec.bank_code)));
        }

        for currency in &spec.default_for_currencies {
            let conflict = sqlx::query("SELECT 1 FROM vpos_terminals WHERE company = $1 AND data->'default_for_currencies' ? $2")
                .bind(&spec.company)
                .bind(currency.alpha3())
                .fetch_optional(&self.pool)
                .await?;
            if conflict.is_some() {
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
        let id = TerminalId::new(format!("{}{}", TerminalId::PREFIX, uuid_v4_hex())).expect("generated id always valid");
        let terminal = Terminal {
            id,
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

        let data = serde_json::to_value(&terminal)?;
        sqlx::query("INSERT INTO vpos_terminals (id, data, company, bank_code, status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7)")
            .bind(terminal.id.as_str())
            .bind(&data)
            .bind(&terminal.company)
            .bind(terminal.bank_code_str())
            .bind(terminal.status)
            .bind(terminal.created_at)
            .bind(terminal.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(terminal)
    }

    async fn find_by_id(&self, id: &TerminalId) -> Result<Terminal> {
        let row = sqlx::query("SELECT data FROM vpos_terminals WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("terminal {id}")))?;
        Self::row_to_terminal(&row)
    }

    async fn find_for_selection(&self, company: &str, currency: Currency) -> Result<Vec<Terminal>> {
        let rows = sqlx::query("SELECT data FROM vpos_terminals WHERE company = $1 AND status = TRUE")
            .bind(company)
            .fetch_all(&self.pool)
            .await?;
        let mut terminals = Vec::with_capacity(rows.len());
        for row in &rows {
            let terminal = Self::row_to_terminal(row)?;
            if terminal.accepts_currency(currency) {
                terminals.push(terminal);
            }
        }
        Ok(terminals)
    }

    async fn update(&self, id: &TerminalId, patch: TerminalPatch) -> Result<Terminal> {
        let mut terminal = self.find_by_id(id).await?;
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

        let data = serde_json::to_value(&terminal)?;
        let result = sqlx::query("UPDATE vpos_terminals SET data = $2, status = $3, updated_at = $4 WHERE id = $1")
            .bind(terminal.id.as_str())
            .bind(&data)
            .bind(terminal.status)
            .bind(terminal.updated_at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("terminal {id}")));
        }
        Ok(terminal)
    }

    async fn set_default_for_currency(&self, id: &TerminalId, currency: Currency) -> Result<Terminal> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let target_row = sqlx::query("SELECT data FROM vpos_terminals WHERE id = $1 FOR UPDATE")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("terminal {id}")))?;
        let mut target = Self::row_to_terminal(&target_row)?;
        let company = target.company.clone();

        let peer_rows = sqlx::query("SELECT id, data FROM vpos_terminals WHERE company = $1 AND id != $2 FOR UPDATE")
            .bind(&company)
            .bind(id.as_str())
            .fetch_all(&mut *tx)
            .await?;
        for row in peer_rows {
            let mut peer = Self::row_to_terminal(&row)?;
            if peer.default_for_currencies.contains(&currency) {
                peer.default_for_currencies.retain(|c| *c != currency);
                let data = serde_json::to_value(&peer)?;
                sqlx::query("UPDATE vpos_terminals SET data = $2 WHERE id = $1")
                    .bind(peer.id.as_str())
                    .bind(&data)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        if !target.default_for_currencies.contains(&currency) {
            target.default_for_currencies.push(currency);
        }
        target.updated_at = Utc::now();
        let data = serde_json::to_value(&target)?;
        sqlx::query("UPDATE vpos_terminals SET data = $2, updated_at = $3 WHERE id = $1")
            .bind(target.id.as_str())
            .bind(&data)
            .bind(target.updated_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(target)
    }

    async fn delete(&self, id: &TerminalId) -> Result<()> {
        let result = sqlx::query("DELETE FROM vpos_terminals WHERE id = $1").bind(id.as_str()).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("terminal {id}")));
        }
        Ok(())
    }
}

/// Postgres-backed [`TransactionStore`].
///
/// `update_status_atomic` and `with_lock` use `UPDATE ... WHERE status = $expected`
/// (a compare-and-swap on the promoted `status` column) instead of a process-wide
/// mutex, so two unrelated transactions never block each other. A lost race
/// surfaces as `Error::Conflict`, which the orchestrator treats as a retryable
/// condition for the caller to resubmit the callback.
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        let pool = connect(&config).await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<Transaction> {
        let data: serde_json::Value = row.get("data");
        serde_json::from_value(data).map_err(Error::Json)
    }

    async fn load(&self, id: &TransactionId) -> Result<Transaction> {
        let row = sqlx::query("SELECT data FROM vpos_transactions WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("transaction {id}")))?;
        Self::row_to_transaction(&row)
    }

    async fn store(&self, tx: &Transaction, expected_status: Option<TransactionStatus>) -> Result<()> {
        let data = serde_json::to_value(tx)?;
        let status_tag = format!("{:?}", tx.status).to_lowercase();

        let result = match expected_status {
            Some(expected) => {
                let expected_tag = format!("{expected:?}").to_lowercase();
                sqlx::query("UPDATE vpos_transactions SET data = $2, status = $3 WHERE id = $1 AND status = $4")
                    .bind(tx.id.as_str())
                    .bind(&data)
                    .bind(&status_tag)
                    .bind(&expected_tag)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("UPDATE vpos_transactions SET data = $2, status = $3 WHERE id = $1")
                    .bind(tx.id.as_str())
                    .bind(&data)
                    .bind(&status_tag)
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!("transaction {} changed concurrently", tx.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn create(&self, fields: NewTransaction, master_key: &str) -> Result<Transaction> {
        let card_view = crate::types::CardView::from_pan(&fields.card.number)?;
        let encrypted = EncryptedCard::encrypt(&fields.card, master_key);
        let id = TransactionId::new(format!("{}{}", TransactionId::PREFIX, uuid_v4_hex())).expect("generated id always valid");

        let tx = Transaction {
            id,
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

        let data = serde_json::to_value(&tx)?;
        sqlx::query("INSERT INTO vpos_transactions (id, data, terminal_id, company, status, created_at) VALUES ($1, $2, $3, $4, $5, $6)")
            .bind(tx.id.as_str())
            .bind(&data)
            .bind(tx.terminal_id.as_str())
            .bind(&tx.company)
            .bind(format!("{:?}", tx.status).to_lowercase())
            .bind(tx.created_at)
            .execute(&self.pool)
            .await?;

        Ok(tx)
    }

    async fn find_by_id(&self, id: &TransactionId) -> Result<Transaction> {
        self.load(id).await
    }

    async fn append_log(&self, id: &TransactionId, log_type: LogType, request: serde_json::Value, response: serde_json::Value) -> Result<()> {
        let mut tx = self.load(id).await?;
        tx.append_log(log_type, request, response);
        self.store(&tx, None).await
    }

    async fn update_status_atomic(&self, id: &TransactionId, new_status: TransactionStatus) -> Result<Transaction> {
        let mut tx = self.load(id).await?;
        let expected = tx.status;
        tx.transition(new_status)?;
        self.store(&tx, Some(expected)).await?;
        Ok(tx)
    }

    async fn save_secure(&self, updated: &Transaction) -> Result<()> {
        let mut tx = self.load(&updated.id).await?;
        tx.secure = updated.secure.clone();
        tx.result = updated.result.clone();
        tx.card = updated.card.clone();
        tx.refunded_at = updated.refunded_at;
        tx.cancelled_at = updated.cancelled_at;
        self.store(&tx, None).await
    }

    async fn clear_cvv(&self, id: &TransactionId) -> Result<()> {
        let mut tx = self.load(id).await?;
        tx.clear_cvv();
        self.store(&tx, None).await
    }

    async fn get_decrypted_card(&self, tx: &Transaction, master_key: &str) -> Result<crate::types::NewCard> {
        tx.card.decrypt(master_key)
    }

    async fn with_lock(&self, id: &TransactionId, f: super::LockedOp<'_>) -> Result<Transaction> {
        // Retry the CAS a bounded number of times: two concurrent callers
        // racing on the same transaction id will see exactly one winner and
        // one conflict, and the loser simply reloads and replays `f` against
        // the fresh state.
        const MAX_ATTEMPTS: u32 = 5;
        let mut attempt = 0;
        loop {
            let mut tx = self.load(id).await?;
            let expected = tx.status;
            f(&mut tx).await?;
            match self.store(&tx, Some(expected)).await {
                Ok(()) => return Ok(tx),
                Err(Error::Conflict(_)) if attempt < MAX_ATTEMPTS => {
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A lightweight random hex suffix for generated ids, avoiding a direct
/// `uuid` crate dependency in the non-`ingress` feature combination.
fn uuid_v4_hex() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
