//! The generic CRUD frame and the concrete
//! sqlite-backed implementation every other crate in this workspace is
//! built and tested against.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{StorageError, StorageResult};
use crate::models::*;

/// The Storage Provider contract: durable storage for users, transactions,
/// outputs, baskets, labels, tags, proven-tx(-req)s, certificates,
/// commissions, monitor events, sync state, and settings.
///
/// Listing is read-only and may run outside a transaction; every
/// mutation below opens a short-lived transaction internally.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn find_or_insert_user(&self, identity_key: &str) -> StorageResult<User>;
    async fn find_user_by_identity_key(&self, identity_key: &str) -> StorageResult<Option<User>>;

    async fn find_or_insert_default_basket(&self, user_id: i64) -> StorageResult<OutputBasket>;
    async fn find_or_insert_basket(&self, user_id: i64, name: &str) -> StorageResult<OutputBasket>;
    async fn find_basket_by_name(&self, user_id: i64, name: &str) -> StorageResult<Option<OutputBasket>>;
    async fn set_wallet_change_params(
        &self,
        user_id: i64,
        number_of_desired_utxos: i64,
        minimum_desired_utxo_value: i64,
    ) -> StorageResult<()>;

    async fn find_or_insert_tx_label(&self, user_id: i64, label: &str) -> StorageResult<TxLabel>;
    async fn find_or_insert_output_tag(&self, user_id: i64, tag: &str) -> StorageResult<OutputTag>;
    async fn map_tx_label(&self, tx_label_id: i64, transaction_id: i64) -> StorageResult<()>;
    async fn map_output_tag(&self, output_tag_id: i64, output_id: i64) -> StorageResult<()>;

    async fn insert_transaction(&self, tx: NewTransaction) -> StorageResult<Transaction>;
    async fn find_transaction_by_reference(&self, reference: &str) -> StorageResult<Option<Transaction>>;
    async fn find_transaction_by_txid(&self, user_id: i64, txid: &str) -> StorageResult<Option<Transaction>>;
    async fn find_transaction(&self, transaction_id: i64) -> StorageResult<Option<Transaction>>;

    /// `list_actions`: CRUD sibling of `list_outputs`
    /// sharing its pagination/count-before-page shape, but over
    /// transaction rows instead of output rows.
    async fn find_transactions(&self, query: TransactionQuery) -> StorageResult<(Vec<Transaction>, i64)>;

    /// Every Transaction in `status` older than `older_than`, oldest first.
    /// The Monitor's SendWaiting/FailAbandoned tasks scan this instead of
    /// paging through `find_outputs_raw`'s basket/tag filters, which don't
    /// apply to transaction rows.
    async fn find_transactions_by_status(
        &self,
        status: TransactionStatus,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> StorageResult<Vec<Transaction>>;

    /// Deletes every Transaction in `status` older than `older_than`,
    /// returning the number removed (the Monitor's Purge task,
    /// parametrized over spent/completed/failed age thresholds).
    async fn purge_transactions_older_than(
        &self,
        status: TransactionStatus,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> StorageResult<u64>;

    async fn update_transaction_status(
        &self,
        transaction_id: i64,
        status: TransactionStatus,
    ) -> StorageResult<()>;
    async fn update_transaction_signed(
        &self,
        transaction_id: i64,
        raw_tx: &[u8],
        txid: &str,
    ) -> StorageResult<()>;

    async fn insert_output(&self, output: NewOutput) -> StorageResult<Output>;
    async fn find_output(&self, transaction_id: i64, vout: i64) -> StorageResult<Option<Output>>;
    async fn find_outputs_raw(&self, query: OutputQuery) -> StorageResult<(Vec<Output>, i64)>;
    /// Resolves an input's value by looking up a previously-stored Output
    /// for this user at `(txid, vout)`: the case where the input spends the
    /// wallet's own tracked change/UTXO. Returns `None` for inputs storage
    /// has never seen (an externally-funded input the caller must prove the
    /// value of via `inputBEEF` instead).
    async fn find_output_by_txid_vout(&self, user_id: i64, txid: &str, vout: i64) -> StorageResult<Option<Output>>;
    async fn update_output_spendable(&self, output_id: i64, spendable: bool) -> StorageResult<()>;
    async fn mark_output_spent(&self, output_id: i64, spent_by: i64) -> StorageResult<()>;
    async fn tags_for_output(&self, output_id: i64) -> StorageResult<Vec<String>>;
    async fn labels_for_transaction(&self, transaction_id: i64) -> StorageResult<Vec<String>>;

    async fn insert_proven_tx_req(&self, req: NewProvenTxReq) -> StorageResult<ProvenTxReq>;
    async fn find_proven_tx_req_by_txid(&self, txid: &str) -> StorageResult<Option<ProvenTxReq>>;
    async fn find_proven_tx_reqs_awaiting_proof(&self) -> StorageResult<Vec<ProvenTxReq>>;
    async fn update_proven_tx_req_status(
        &self,
        proven_tx_req_id: i64,
        status: ProvenTxReqStatus,
    ) -> StorageResult<()>;
    async fn increment_proven_tx_req_attempts(&self, proven_tx_req_id: i64) -> StorageResult<()>;

    /// Idempotent on `(txid, proven_tx_req_id)`: a concurrent loser
    /// observes the row already present and proceeds without erroring.
    async fn update_proven_tx_req_with_new_proven_tx(
        &self,
        proven_tx_req_id: i64,
        proven_tx: NewProvenTx,
    ) -> StorageResult<ProvenTx>;

    async fn find_proven_tx_by_txid(&self, txid: &str) -> StorageResult<Option<ProvenTx>>;

    async fn ensure_settings(&self, settings: Settings) -> StorageResult<Settings>;
    async fn get_settings(&self) -> StorageResult<Settings>;

    async fn insert_monitor_event(&self, task: &str, event: &str, details: Option<&str>) -> StorageResult<()>;

    async fn abort_action(&self, reference: &str) -> StorageResult<u64>;

    /// Truncates all tables in FK-safe order.
    async fn destroy(&self) -> StorageResult<()>;

    /// Promotes/demotes an existing Output during `internalize_action` merge:
    /// flips `change`/`basket`/`provided_by` and, for
    /// a wallet-payment promotion, records the sender's derivation fields.
    async fn update_output_for_merge(&self, update: MergeOutputUpdate) -> StorageResult<()>;

    /// Adds `delta` to a Transaction's `satoshis` (merge-path bookkeeping in
    /// `internalize_action`).
    async fn add_to_transaction_satoshis(&self, transaction_id: i64, delta: i64) -> StorageResult<()>;

    async fn insert_certificate(&self, cert: NewCertificate) -> StorageResult<Certificate>;
    async fn insert_certificate_field(&self, field: NewCertificateField) -> StorageResult<()>;
    async fn find_certificate(&self, certificate_id: i64) -> StorageResult<Option<Certificate>>;
    async fn find_certificates(&self, query: CertificateQuery) -> StorageResult<(Vec<Certificate>, i64)>;
    async fn certificate_fields(&self, certificate_id: i64) -> StorageResult<Vec<CertificateField>>;
    async fn relinquish_certificate(&self, certificate_id: i64) -> StorageResult<()>;
}

/// Fields written back onto an existing Output row when `internalize_action`
/// merges into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutputUpdate {
    pub output_id: i64,
    pub basket_id: Option<i64>,
    pub change: bool,
    pub provided_by: String,
    pub purpose: String,
    pub sender_identity_key: Option<String>,
    pub derivation_prefix: Option<String>,
    pub derivation_suffix: Option<String>,
    pub custom_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCertificate {
    pub user_id: i64,
    pub r#type: String,
    pub serial_number: String,
    pub certifier: String,
    pub subject: String,
    pub verifier: Option<String>,
    pub revocation_outpoint: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCertificateField {
    pub certificate_id: i64,
    pub field_name: String,
    pub field_value: String,
    pub master_key: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CertificateQuery {
    pub user_id: i64,
    pub r#type: Option<String>,
    pub certifiers: Vec<String>,
    pub subject: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub user_id: i64,
    pub status: TransactionStatus,
    pub reference: String,
    pub is_outgoing: bool,
    pub satoshis: i64,
    pub version: Option<i64>,
    pub lock_time: Option<i64>,
    pub description: String,
    pub txid: Option<String>,
    pub input_beef: Option<Vec<u8>>,
    pub raw_tx: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutput {
    pub user_id: i64,
    pub transaction_id: i64,
    pub basket_id: Option<i64>,
    pub spendable: bool,
    pub change: bool,
    pub vout: i64,
    pub satoshis: i64,
    pub provided_by: String,
    pub purpose: String,
    pub r#type: String,
    pub output_description: Option<String>,
    pub txid: Option<String>,
    pub sender_identity_key: Option<String>,
    pub derivation_prefix: Option<String>,
    pub derivation_suffix: Option<String>,
    pub custom_instructions: Option<String>,
    pub script_length: Option<i64>,
    pub script_offset: Option<i64>,
    pub locking_script: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProvenTxReq {
    pub txid: String,
    pub raw_tx: Vec<u8>,
    pub input_beef: Option<Vec<u8>>,
    pub status: ProvenTxReqStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProvenTx {
    pub txid: String,
    pub height: i64,
    pub index_in_block: i64,
    pub merkle_path: Vec<u8>,
    pub raw_tx: Vec<u8>,
    pub block_hash: String,
    pub merkle_root: String,
}

/// Tag meta-selector recognized before the basket/tag query runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagMetaSelector {
    All,
    Change,
    Spent,
    Unspent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagQueryMode {
    Any,
    All,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct OutputQuery {
    pub user_id: i64,
    pub basket: Option<String>,
    pub tags: Vec<String>,
    pub tag_query_mode: Option<TagQueryMode>,
    pub meta_selector: Option<TagMetaSelector>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub include_spent: bool,
}

impl Default for TagQueryMode {
    fn default() -> Self {
        Self::Any
    }
}

/// Filters for `list_actions`: equalities AND-ed together,
/// `labels` matched via the same find-or-insert tx_labels_map join
/// `list_outputs` uses for tags.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TransactionQuery {
    pub user_id: i64,
    pub labels: Vec<String>,
    pub label_query_mode: TagQueryMode,
    pub reference: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub struct SqliteStorageProvider {
    pub pool: SqlitePool,
}

impl SqliteStorageProvider {
    /// Opens (creating if absent) the sqlite database at `path` and runs
    /// migrations. `path` of `":memory:"` gives an ephemeral pool, used by
    /// the test suite.
    pub async fn connect(path: &str) -> StorageResult<Self> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            SqliteConnectOptions::new().filename(path).create_if_missing(true)
        }
        .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(if path == ":memory:" { 1 } else { 8 })
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StorageProvider for SqliteStorageProvider {
    async fn find_or_insert_user(&self, identity_key: &str) -> StorageResult<User> {
        if let Some(existing) = self.find_user_by_identity_key(identity_key).await? {
            return Ok(existing);
        }
        let row = sqlx::query_as::<_, User>(
            "INSERT INTO users (identity_key, active_storage) VALUES (?1, '') \
             ON CONFLICT (identity_key) DO UPDATE SET identity_key = excluded.identity_key \
             RETURNING user_id, identity_key, active_storage",
        )
        .bind(identity_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_user_by_identity_key(&self, identity_key: &str) -> StorageResult<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            "SELECT user_id, identity_key, active_storage FROM users WHERE identity_key = ?1",
        )
        .bind(identity_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_or_insert_default_basket(&self, user_id: i64) -> StorageResult<OutputBasket> {
        if let Some(basket) = self.find_basket_by_name(user_id, DEFAULT_BASKET_NAME).await? {
            return Ok(basket);
        }
        let row = sqlx::query_as::<_, OutputBasket>(
            "INSERT INTO output_baskets (user_id, name) VALUES (?1, ?2) \
             ON CONFLICT (user_id, name) DO UPDATE SET name = excluded.name \
             RETURNING basket_id, user_id, name, number_of_desired_utxos, \
                       minimum_desired_utxo_value, is_deleted",
        )
        .bind(user_id)
        .bind(DEFAULT_BASKET_NAME)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_or_insert_basket(&self, user_id: i64, name: &str) -> StorageResult<OutputBasket> {
        if let Some(basket) = self.find_basket_by_name(user_id, name).await? {
            return Ok(basket);
        }
        let row = sqlx::query_as::<_, OutputBasket>(
            "INSERT INTO output_baskets (user_id, name) VALUES (?1, ?2) \
             ON CONFLICT (user_id, name) DO UPDATE SET name = excluded.name \
             RETURNING basket_id, user_id, name, number_of_desired_utxos, \
                       minimum_desired_utxo_value, is_deleted",
        )
        .bind(user_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_basket_by_name(&self, user_id: i64, name: &str) -> StorageResult<Option<OutputBasket>> {
        let row = sqlx::query_as::<_, OutputBasket>(
            "SELECT basket_id, user_id, name, number_of_desired_utxos, \
                    minimum_desired_utxo_value, is_deleted \
             FROM output_baskets WHERE user_id = ?1 AND name = ?2 AND is_deleted = 0",
        )
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_wallet_change_params(
        &self,
        user_id: i64,
        number_of_desired_utxos: i64,
        minimum_desired_utxo_value: i64,
    ) -> StorageResult<()> {
        self.find_or_insert_default_basket(user_id).await?;
        sqlx::query(
            "UPDATE output_baskets SET number_of_desired_utxos = ?1, minimum_desired_utxo_value = ?2, \
             updated_at = CURRENT_TIMESTAMP WHERE user_id = ?3 AND name = ?4",
        )
        .bind(number_of_desired_utxos)
        .bind(minimum_desired_utxo_value)
        .bind(user_id)
        .bind(DEFAULT_BASKET_NAME)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_or_insert_tx_label(&self, user_id: i64, label: &str) -> StorageResult<TxLabel> {
        let row = sqlx::query_as::<_, TxLabel>(
            "INSERT INTO tx_labels (user_id, label) VALUES (?1, ?2) \
             ON CONFLICT (user_id, label) DO UPDATE SET is_deleted = 0, updated_at = CURRENT_TIMESTAMP \
             RETURNING tx_label_id, user_id, label, is_deleted",
        )
        .bind(user_id)
        .bind(label)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_or_insert_output_tag(&self, user_id: i64, tag: &str) -> StorageResult<OutputTag> {
        let row = sqlx::query_as::<_, OutputTag>(
            "INSERT INTO output_tags (user_id, tag) VALUES (?1, ?2) \
             ON CONFLICT (user_id, tag) DO UPDATE SET is_deleted = 0, updated_at = CURRENT_TIMESTAMP \
             RETURNING output_tag_id, user_id, tag, is_deleted",
        )
        .bind(user_id)
        .bind(tag)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn map_tx_label(&self, tx_label_id: i64, transaction_id: i64) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO tx_labels_map (tx_label_id, transaction_id) VALUES (?1, ?2) \
             ON CONFLICT (tx_label_id, transaction_id) DO UPDATE SET is_deleted = 0",
        )
        .bind(tx_label_id)
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn map_output_tag(&self, output_tag_id: i64, output_id: i64) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO output_tags_map (output_tag_id, output_id) VALUES (?1, ?2) \
             ON CONFLICT (output_tag_id, output_id) DO UPDATE SET is_deleted = 0",
        )
        .bind(output_tag_id)
        .bind(output_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_transaction(&self, tx: NewTransaction) -> StorageResult<Transaction> {
        let row = sqlx::query_as::<_, Transaction>(
            "INSERT INTO transactions \
             (user_id, status, reference, is_outgoing, satoshis, version, lock_time, \
              description, txid, input_beef, raw_tx) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             RETURNING *",
        )
        .bind(tx.user_id)
        .bind(tx.status.as_str())
        .bind(tx.reference)
        .bind(tx.is_outgoing)
        .bind(tx.satoshis)
        .bind(tx.version)
        .bind(tx.lock_time)
        .bind(tx.description)
        .bind(tx.txid)
        .bind(tx.input_beef)
        .bind(tx.raw_tx)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_transaction_by_reference(&self, reference: &str) -> StorageResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE reference = ?1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_transaction_by_txid(&self, user_id: i64, txid: &str) -> StorageResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE user_id = ?1 AND txid = ?2",
        )
        .bind(user_id)
        .bind(txid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_transaction(&self, transaction_id: i64) -> StorageResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE transaction_id = ?1")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_transactions(&self, query: TransactionQuery) -> StorageResult<(Vec<Transaction>, i64)> {
        let mut sql = String::from("SELECT * FROM transactions t WHERE t.user_id = ?");
        let mut count_sql = String::from("SELECT COUNT(*) FROM transactions t WHERE t.user_id = ?");

        if query.reference.is_some() {
            sql.push_str(" AND t.reference = ?");
            count_sql.push_str(" AND t.reference = ?");
        }
        if !query.labels.is_empty() {
            let required = query.labels.len() as i64;
            let placeholders = query.labels.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let join = format!(
                " AND t.transaction_id IN ( \
                    SELECT m.transaction_id FROM tx_labels_map m \
                    JOIN tx_labels l ON l.tx_label_id = m.tx_label_id \
                    WHERE m.is_deleted = 0 AND l.is_deleted = 0 AND l.user_id = t.user_id AND l.label IN ({placeholders}) \
                    GROUP BY m.transaction_id \
                    HAVING COUNT(DISTINCT l.label) {op} \
                )",
                op = match query.label_query_mode {
                    TagQueryMode::Any => ">= 1".to_string(),
                    TagQueryMode::All => format!("= {required}"),
                }
            );
            sql.push_str(&join);
            count_sql.push_str(&join);
        }
        sql.push_str(" ORDER BY t.transaction_id");

        let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql).bind(query.user_id);
        if let Some(r) = &query.reference {
            count_q = count_q.bind(r);
        }
        for l in &query.labels {
            count_q = count_q.bind(l.as_str());
        }
        let total = count_q.fetch_one(&self.pool).await?;

        if query.limit.is_some() {
            sql.push_str(" LIMIT ?");
            if query.offset.is_some() {
                sql.push_str(" OFFSET ?");
            }
        }
        let mut q = sqlx::query_as::<_, Transaction>(&sql).bind(query.user_id);
        if let Some(r) = &query.reference {
            q = q.bind(r);
        }
        for l in &query.labels {
            q = q.bind(l.as_str());
        }
        if let Some(limit) = query.limit {
            q = q.bind(limit);
            if let Some(offset) = query.offset {
                q = q.bind(offset);
            }
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok((rows, total))
    }

    async fn find_transactions_by_status(
        &self,
        status: TransactionStatus,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> StorageResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE status = ?1 AND created_at <= ?2 ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn purge_transactions_older_than(
        &self,
        status: TransactionStatus,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM transactions WHERE status = ?1 AND created_at <= ?2")
            .bind(status.as_str())
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_transaction_status(
        &self,
        transaction_id: i64,
        status: TransactionStatus,
    ) -> StorageResult<()> {
        sqlx::query(
            "UPDATE transactions SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE transaction_id = ?2",
        )
        .bind(status.as_str())
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_transaction_signed(
        &self,
        transaction_id: i64,
        raw_tx: &[u8],
        txid: &str,
    ) -> StorageResult<()> {
        sqlx::query(
            "UPDATE transactions SET raw_tx = ?1, txid = ?2, status = ?3, updated_at = CURRENT_TIMESTAMP \
             WHERE transaction_id = ?4",
        )
        .bind(raw_tx)
        .bind(txid)
        .bind(TransactionStatus::Signed.as_str())
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_output(&self, o: NewOutput) -> StorageResult<Output> {
        let row = sqlx::query_as::<_, Output>(
            "INSERT INTO outputs \
             (user_id, transaction_id, basket_id, spendable, change, vout, satoshis, \
              provided_by, purpose, type, output_description, txid, sender_identity_key, \
              derivation_prefix, derivation_suffix, custom_instructions, script_length, \
              script_offset, locking_script) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19) \
             RETURNING *",
        )
        .bind(o.user_id)
        .bind(o.transaction_id)
        .bind(o.basket_id)
        .bind(o.spendable)
        .bind(o.change)
        .bind(o.vout)
        .bind(o.satoshis)
        .bind(o.provided_by)
        .bind(o.purpose)
        .bind(o.r#type)
        .bind(o.output_description)
        .bind(o.txid)
        .bind(o.sender_identity_key)
        .bind(o.derivation_prefix)
        .bind(o.derivation_suffix)
        .bind(o.custom_instructions)
        .bind(o.script_length)
        .bind(o.script_offset)
        .bind(o.locking_script)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_output(&self, transaction_id: i64, vout: i64) -> StorageResult<Option<Output>> {
        let row = sqlx::query_as::<_, Output>(
            "SELECT * FROM outputs WHERE transaction_id = ?1 AND vout = ?2",
        )
        .bind(transaction_id)
        .bind(vout)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_outputs_raw(&self, query: OutputQuery) -> StorageResult<(Vec<Output>, i64)> {
        crate::list_outputs::run_query(&self.pool, query).await
    }

    async fn find_output_by_txid_vout(&self, user_id: i64, txid: &str, vout: i64) -> StorageResult<Option<Output>> {
        let row = sqlx::query_as::<_, Output>(
            "SELECT o.* FROM outputs o JOIN transactions t ON t.transaction_id = o.transaction_id \
             WHERE o.user_id = ?1 AND t.txid = ?2 AND o.vout = ?3",
        )
        .bind(user_id)
        .bind(txid)
        .bind(vout)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_output_spendable(&self, output_id: i64, spendable: bool) -> StorageResult<()> {
        sqlx::query(
            "UPDATE outputs SET spendable = ?1, updated_at = CURRENT_TIMESTAMP WHERE output_id = ?2",
        )
        .bind(spendable)
        .bind(output_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_output_spent(&self, output_id: i64, spent_by: i64) -> StorageResult<()> {
        sqlx::query(
            "UPDATE outputs SET spent = 1, spent_by = ?1, spendable = 0, updated_at = CURRENT_TIMESTAMP \
             WHERE output_id = ?2",
        )
        .bind(spent_by)
        .bind(output_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn tags_for_output(&self, output_id: i64) -> StorageResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT ot.tag FROM output_tags ot \
             JOIN output_tags_map m ON m.output_tag_id = ot.output_tag_id \
             WHERE m.output_id = ?1 AND m.is_deleted = 0 AND ot.is_deleted = 0",
        )
        .bind(output_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    async fn labels_for_transaction(&self, transaction_id: i64) -> StorageResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT tl.label FROM tx_labels tl \
             JOIN tx_labels_map m ON m.tx_label_id = tl.tx_label_id \
             WHERE m.transaction_id = ?1 AND m.is_deleted = 0 AND tl.is_deleted = 0",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(l,)| l).collect())
    }

    async fn insert_proven_tx_req(&self, req: NewProvenTxReq) -> StorageResult<ProvenTxReq> {
        let row = sqlx::query_as::<_, ProvenTxReq>(
            "INSERT INTO proven_tx_reqs (status, txid, raw_tx, input_beef) VALUES (?1, ?2, ?3, ?4) \
             RETURNING *",
        )
        .bind(req.status.as_str())
        .bind(req.txid)
        .bind(req.raw_tx)
        .bind(req.input_beef)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_proven_tx_req_by_txid(&self, txid: &str) -> StorageResult<Option<ProvenTxReq>> {
        let row = sqlx::query_as::<_, ProvenTxReq>("SELECT * FROM proven_tx_reqs WHERE txid = ?1")
            .bind(txid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_proven_tx_reqs_awaiting_proof(&self) -> StorageResult<Vec<ProvenTxReq>> {
        let statuses: Vec<&'static str> = ProvenTxReqStatus::awaiting_proof().iter().map(|s| s.as_str()).collect();
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT * FROM proven_tx_reqs WHERE status IN ({placeholders})");
        let mut q = sqlx::query_as::<_, ProvenTxReq>(&sql);
        for s in &statuses {
            q = q.bind(*s);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    async fn update_proven_tx_req_status(
        &self,
        proven_tx_req_id: i64,
        status: ProvenTxReqStatus,
    ) -> StorageResult<()> {
        sqlx::query(
            "UPDATE proven_tx_reqs SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE proven_tx_req_id = ?2",
        )
        .bind(status.as_str())
        .bind(proven_tx_req_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_proven_tx_req_attempts(&self, proven_tx_req_id: i64) -> StorageResult<()> {
        sqlx::query(
            "UPDATE proven_tx_reqs SET attempts = attempts + 1, updated_at = CURRENT_TIMESTAMP \
             WHERE proven_tx_req_id = ?1",
        )
        .bind(proven_tx_req_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_proven_tx_req_with_new_proven_tx(
        &self,
        proven_tx_req_id: i64,
        p: NewProvenTx,
    ) -> StorageResult<ProvenTx> {
        // Idempotent on txid: a concurrent racer's INSERT ... ON CONFLICT DO
        // NOTHING loses gracefully and we just read back what won.
        sqlx::query(
            "INSERT INTO proven_txs (txid, height, index_in_block, merkle_path, raw_tx, block_hash, merkle_root) \
             VALUES (?1,?2,?3,?4,?5,?6,?7) ON CONFLICT (txid) DO NOTHING",
        )
        .bind(&p.txid)
        .bind(p.height)
        .bind(p.index_in_block)
        .bind(&p.merkle_path)
        .bind(&p.raw_tx)
        .bind(&p.block_hash)
        .bind(&p.merkle_root)
        .execute(&self.pool)
        .await?;

        let proven = self
            .find_proven_tx_by_txid(&p.txid)
            .await?
            .ok_or_else(|| StorageError::Other("proven_tx vanished after insert".into()))?;

        sqlx::query(
            "UPDATE proven_tx_reqs SET proven_tx_id = ?1, status = ?2, updated_at = CURRENT_TIMESTAMP \
             WHERE proven_tx_req_id = ?3",
        )
        .bind(proven.proven_tx_id)
        .bind(ProvenTxReqStatus::Completed.as_str())
        .bind(proven_tx_req_id)
        .execute(&self.pool)
        .await?;

        Ok(proven)
    }

    async fn find_proven_tx_by_txid(&self, txid: &str) -> StorageResult<Option<ProvenTx>> {
        let row = sqlx::query_as::<_, ProvenTx>("SELECT * FROM proven_txs WHERE txid = ?1")
            .bind(txid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn ensure_settings(&self, settings: Settings) -> StorageResult<Settings> {
        if let Ok(existing) = self.get_settings().await {
            return Ok(existing);
        }
        let row = sqlx::query_as::<_, Settings>(
            "INSERT INTO settings (storage_identity_key, storage_name, chain, dbtype, max_output_script) \
             VALUES (?1,?2,?3,?4,?5) RETURNING *",
        )
        .bind(settings.storage_identity_key)
        .bind(settings.storage_name)
        .bind(settings.chain)
        .bind(settings.dbtype)
        .bind(settings.max_output_script)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_settings(&self) -> StorageResult<Settings> {
        let row = sqlx::query_as::<_, Settings>("SELECT * FROM settings LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| StorageError::NotFound("settings".into()))
    }

    async fn insert_monitor_event(&self, task: &str, event: &str, details: Option<&str>) -> StorageResult<()> {
        sqlx::query("INSERT INTO monitor_events (task, event, details, created_at) VALUES (?1,?2,?3,?4)")
            .bind(task)
            .bind(event)
            .bind(details)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn abort_action(&self, reference: &str) -> StorageResult<u64> {
        let tx = self
            .find_transaction_by_reference(reference)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("transaction with reference {reference}")))?;
        self.update_transaction_status(tx.transaction_id, TransactionStatus::Aborted).await?;
        let result = sqlx::query(
            "UPDATE proven_tx_reqs SET status = ?1, updated_at = CURRENT_TIMESTAMP \
             WHERE txid IN (SELECT txid FROM transactions WHERE transaction_id = ?2 AND txid IS NOT NULL)",
        )
        .bind(ProvenTxReqStatus::Aborted.as_str())
        .bind(tx.transaction_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() + 1)
    }

    async fn destroy(&self) -> StorageResult<()> {
        // FK-safe order: leaves before roots.
        for table in [
            "output_tags_map",
            "tx_labels_map",
            "certificate_fields",
            "commissions",
            "outputs",
            "output_tags",
            "output_baskets",
            "tx_labels",
            "certificates",
            "sync_states",
            "transactions",
            "proven_tx_reqs",
            "proven_txs",
            "monitor_events",
            "users",
            "settings",
        ] {
            sqlx::query(&format!("DELETE FROM {table}")).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn update_output_for_merge(&self, u: MergeOutputUpdate) -> StorageResult<()> {
        sqlx::query(
            "UPDATE outputs SET basket_id = ?1, change = ?2, provided_by = ?3, purpose = ?4, \
             sender_identity_key = COALESCE(?5, sender_identity_key), \
             derivation_prefix = COALESCE(?6, derivation_prefix), \
             derivation_suffix = COALESCE(?7, derivation_suffix), \
             custom_instructions = COALESCE(?8, custom_instructions), \
             updated_at = CURRENT_TIMESTAMP \
             WHERE output_id = ?9",
        )
        .bind(u.basket_id)
        .bind(u.change)
        .bind(u.provided_by)
        .bind(u.purpose)
        .bind(u.sender_identity_key)
        .bind(u.derivation_prefix)
        .bind(u.derivation_suffix)
        .bind(u.custom_instructions)
        .bind(u.output_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_to_transaction_satoshis(&self, transaction_id: i64, delta: i64) -> StorageResult<()> {
        sqlx::query(
            "UPDATE transactions SET satoshis = satoshis + ?1, updated_at = CURRENT_TIMESTAMP \
             WHERE transaction_id = ?2",
        )
        .bind(delta)
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_certificate(&self, c: NewCertificate) -> StorageResult<Certificate> {
        let row = sqlx::query_as::<_, Certificate>(
            "INSERT INTO certificates \
             (user_id, type, serial_number, certifier, subject, verifier, revocation_outpoint, signature) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8) RETURNING *",
        )
        .bind(c.user_id)
        .bind(c.r#type)
        .bind(c.serial_number)
        .bind(c.certifier)
        .bind(c.subject)
        .bind(c.verifier)
        .bind(c.revocation_outpoint)
        .bind(c.signature)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_certificate_field(&self, f: NewCertificateField) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO certificate_fields (certificate_id, field_name, field_value, master_key) \
             VALUES (?1,?2,?3,?4)",
        )
        .bind(f.certificate_id)
        .bind(f.field_name)
        .bind(f.field_value)
        .bind(f.master_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_certificate(&self, certificate_id: i64) -> StorageResult<Option<Certificate>> {
        let row = sqlx::query_as::<_, Certificate>(
            "SELECT * FROM certificates WHERE certificate_id = ?1 AND is_deleted = 0",
        )
        .bind(certificate_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_certificates(&self, query: CertificateQuery) -> StorageResult<(Vec<Certificate>, i64)> {
        let mut sql = String::from("SELECT * FROM certificates WHERE user_id = ? AND is_deleted = 0");
        let mut count_sql = String::from("SELECT COUNT(*) FROM certificates WHERE user_id = ? AND is_deleted = 0");

        if query.r#type.is_some() {
            sql.push_str(" AND type = ?");
            count_sql.push_str(" AND type = ?");
        }
        if query.subject.is_some() {
            sql.push_str(" AND subject = ?");
            count_sql.push_str(" AND subject = ?");
        }
        if !query.certifiers.is_empty() {
            let placeholders = query.certifiers.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            sql.push_str(&format!(" AND certifier IN ({placeholders})"));
            count_sql.push_str(&format!(" AND certifier IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY certificate_id");

        let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql).bind(query.user_id);
        if let Some(t) = &query.r#type {
            count_q = count_q.bind(t);
        }
        if let Some(s) = &query.subject {
            count_q = count_q.bind(s);
        }
        for c in &query.certifiers {
            count_q = count_q.bind(c);
        }
        let total = count_q.fetch_one(&self.pool).await?;

        if query.limit.is_some() {
            sql.push_str(" LIMIT ?");
            if query.offset.is_some() {
                sql.push_str(" OFFSET ?");
            }
        }
        let mut q = sqlx::query_as::<_, Certificate>(&sql).bind(query.user_id);
        if let Some(t) = &query.r#type {
            q = q.bind(t);
        }
        if let Some(s) = &query.subject {
            q = q.bind(s);
        }
        for c in &query.certifiers {
            q = q.bind(c);
        }
        if let Some(limit) = query.limit {
            q = q.bind(limit);
            if let Some(offset) = query.offset {
                q = q.bind(offset);
            }
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok((rows, total))
    }

    async fn certificate_fields(&self, certificate_id: i64) -> StorageResult<Vec<CertificateField>> {
        let rows = sqlx::query_as::<_, CertificateField>(
            "SELECT * FROM certificate_fields WHERE certificate_id = ?1",
        )
        .bind(certificate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn relinquish_certificate(&self, certificate_id: i64) -> StorageResult<()> {
        sqlx::query(
            "UPDATE certificates SET is_deleted = 1, updated_at = CURRENT_TIMESTAMP WHERE certificate_id = ?1",
        )
        .bind(certificate_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn db() -> SqliteStorageProvider {
        SqliteStorageProvider::connect(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn find_or_insert_user_is_idempotent_on_identity_key() {
        let storage = db().await;
        let a = storage.find_or_insert_user("02aabb").await.unwrap();
        let b = storage.find_or_insert_user("02aabb").await.unwrap();
        assert_eq!(a.user_id, b.user_id);
        assert_eq!(a.identity_key, "02aabb");
    }

    #[tokio::test]
    async fn find_or_insert_default_basket_is_idempotent_and_named_default() {
        let storage = db().await;
        let user = storage.find_or_insert_user("02aabb").await.unwrap();
        let a = storage.find_or_insert_default_basket(user.user_id).await.unwrap();
        let b = storage.find_or_insert_default_basket(user.user_id).await.unwrap();
        assert_eq!(a.basket_id, b.basket_id);
        assert_eq!(a.name, DEFAULT_BASKET_NAME);
    }

    #[tokio::test]
    async fn set_wallet_change_params_writes_the_default_basket() {
        let storage = db().await;
        let user = storage.find_or_insert_user("02aabb").await.unwrap();
        storage.set_wallet_change_params(user.user_id, 6, 5000).await.unwrap();
        let basket = storage.find_basket_by_name(user.user_id, DEFAULT_BASKET_NAME).await.unwrap().unwrap();
        assert_eq!(basket.number_of_desired_utxos, 6);
        assert_eq!(basket.minimum_desired_utxo_value, 5000);
    }

    #[tokio::test]
    async fn insert_transaction_round_trips_by_reference() {
        let storage = db().await;
        let user = storage.find_or_insert_user("02aabb").await.unwrap();
        let tx = storage
            .insert_transaction(NewTransaction {
                user_id: user.user_id,
                status: TransactionStatus::Unsigned,
                reference: "ref-1".into(),
                is_outgoing: true,
                satoshis: 1000,
                version: Some(1),
                lock_time: Some(0),
                description: "test".into(),
                txid: None,
                input_beef: None,
                raw_tx: None,
            })
            .await
            .unwrap();
        let found = storage.find_transaction_by_reference("ref-1").await.unwrap().unwrap();
        assert_eq!(found.transaction_id, tx.transaction_id);
        assert_eq!(found.status(), TransactionStatus::Unsigned);
    }

    #[tokio::test]
    async fn insert_output_round_trips_by_vout() {
        let storage = db().await;
        let user = storage.find_or_insert_user("02aabb").await.unwrap();
        let basket = storage.find_or_insert_default_basket(user.user_id).await.unwrap();
        let tx = storage
            .insert_transaction(NewTransaction {
                user_id: user.user_id,
                status: TransactionStatus::Unsigned,
                reference: "ref-2".into(),
                is_outgoing: true,
                satoshis: 500,
                version: None,
                lock_time: None,
                description: "".into(),
                txid: None,
                input_beef: None,
                raw_tx: None,
            })
            .await
            .unwrap();
        storage
            .insert_output(NewOutput {
                user_id: user.user_id,
                transaction_id: tx.transaction_id,
                basket_id: Some(basket.basket_id),
                spendable: true,
                change: true,
                vout: 0,
                satoshis: 500,
                provided_by: "storage".into(),
                purpose: "change".into(),
                r#type: "custom".into(),
                output_description: None,
                txid: None,
                sender_identity_key: None,
                derivation_prefix: None,
                derivation_suffix: None,
                custom_instructions: None,
                script_length: None,
                script_offset: None,
                locking_script: Some(vec![0x76, 0xa9]),
            })
            .await
            .unwrap();
        let found = storage.find_output(tx.transaction_id, 0).await.unwrap().unwrap();
        assert_eq!(found.satoshis, 500);
        assert!(found.change);
        assert!(!found.spent);
    }

    #[tokio::test]
    async fn update_proven_tx_req_with_new_proven_tx_is_idempotent_on_txid() {
        let storage = db().await;
        let req = storage
            .insert_proven_tx_req(NewProvenTxReq {
                txid: "a".repeat(64),
                raw_tx: vec![1, 2, 3],
                input_beef: None,
                status: ProvenTxReqStatus::Unmined,
            })
            .await
            .unwrap();

        let new_proven = || NewProvenTx {
            txid: "a".repeat(64),
            height: 100,
            index_in_block: 3,
            merkle_path: vec![0xde, 0xad],
            raw_tx: vec![1, 2, 3],
            block_hash: "b".repeat(64),
            merkle_root: "c".repeat(64),
        };

        let first = storage
            .update_proven_tx_req_with_new_proven_tx(req.proven_tx_req_id, new_proven())
            .await
            .unwrap();
        // A concurrent loser racing to insert the same txid observes the
        // row already present and proceeds without erroring.
        let second = storage
            .update_proven_tx_req_with_new_proven_tx(req.proven_tx_req_id, new_proven())
            .await
            .unwrap();
        assert_eq!(first.proven_tx_id, second.proven_tx_id);

        let updated_req = storage.find_proven_tx_req_by_txid(&"a".repeat(64)).await.unwrap().unwrap();
        assert_eq!(updated_req.status(), ProvenTxReqStatus::Completed);
        assert_eq!(updated_req.proven_tx_id, Some(first.proven_tx_id));
    }

    #[tokio::test]
    async fn abort_action_marks_transaction_and_proven_tx_req_aborted() {
        let storage = db().await;
        let user = storage.find_or_insert_user("02aabb").await.unwrap();
        let tx = storage
            .insert_transaction(NewTransaction {
                user_id: user.user_id,
                status: TransactionStatus::Unsigned,
                reference: "ref-abort".into(),
                is_outgoing: true,
                satoshis: 0,
                version: None,
                lock_time: None,
                description: "".into(),
                txid: Some("d".repeat(64)),
                input_beef: None,
                raw_tx: None,
            })
            .await
            .unwrap();
        storage
            .insert_proven_tx_req(NewProvenTxReq {
                txid: "d".repeat(64),
                raw_tx: vec![],
                input_beef: None,
                status: ProvenTxReqStatus::Unknown,
            })
            .await
            .unwrap();

        storage.abort_action("ref-abort").await.unwrap();

        let reloaded = storage.find_transaction(tx.transaction_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status(), TransactionStatus::Aborted);
        let req = storage.find_proven_tx_req_by_txid(&"d".repeat(64)).await.unwrap().unwrap();
        assert_eq!(req.status(), ProvenTxReqStatus::Aborted);
    }

    #[tokio::test]
    async fn destroy_truncates_every_table() {
        let storage = db().await;
        let user = storage.find_or_insert_user("02aabb").await.unwrap();
        storage.find_or_insert_default_basket(user.user_id).await.unwrap();
        storage.destroy().await.unwrap();
        assert!(storage.find_user_by_identity_key("02aabb").await.unwrap().is_none());
    }
}
