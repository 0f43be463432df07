//! `list_outputs` — the central query. Recognizes basket
//! `SpecOp` magic strings before falling back to ordinary basket/tag
//! filtering, and handles the `tagQueryMode`/meta-selector semantics.

use sqlx::SqlitePool;

use crate::error::StorageResult;
use crate::models::Output;
use crate::provider::{OutputQuery, TagMetaSelector, TagQueryMode};

/// Basket names that reinterpret the query instead of filtering by basket
///.
pub const SPEC_OP_WALLET_BALANCE: &str = "wallet-balance";
pub const SPEC_OP_INVALID_CHANGE: &str = "invalid-change";
pub const SPEC_OP_SET_WALLET_CHANGE_PARAMS: &str = "set-wallet-change-params";

/// Tag meta-selectors consumed before the query runs.
pub fn parse_meta_selector(tags: &[String]) -> Option<TagMetaSelector> {
    tags.iter().find_map(|t| match t.as_str() {
        "all" => Some(TagMetaSelector::All),
        "change" => Some(TagMetaSelector::Change),
        "spent" => Some(TagMetaSelector::Spent),
        "unspent" => Some(TagMetaSelector::Unspent),
        _ => None,
    })
}

/// Identifies a basket SpecOp without running anything; the caller (the
/// signer / façade) uses this to decide whether to invoke a services
/// liveness check or a change-params write after the SQL step.
pub fn basket_spec_op(basket: Option<&str>) -> Option<&'static str> {
    match basket {
        Some(SPEC_OP_WALLET_BALANCE) => Some(SPEC_OP_WALLET_BALANCE),
        Some(SPEC_OP_INVALID_CHANGE) => Some(SPEC_OP_INVALID_CHANGE),
        Some(SPEC_OP_SET_WALLET_CHANGE_PARAMS) => Some(SPEC_OP_SET_WALLET_CHANGE_PARAMS),
        _ => None,
    }
}

/// Runs the SQL step of `list_outputs`: resolves basket/tag filters, applies
/// `spendable`/`change`, counts before paging, and orders by `output_id` for
/// determinism. SpecOp overrides to `limit` and the
/// post-query liveness check happen in the caller (`wallet-toolbox-signer`),
/// which has access to the Chain Services collaborator this crate does not.
pub async fn run_query(pool: &SqlitePool, query: OutputQuery) -> StorageResult<(Vec<Output>, i64)> {
    let meta = parse_meta_selector(&query.tags);
    let is_spec_op = query
        .basket
        .as_deref()
        .map(|b| basket_spec_op(Some(b)).is_some())
        .unwrap_or(false);

    let basket_id: Option<i64> = if is_spec_op {
        // `wallet-balance` / `invalid-change` / `set-wallet-change-params`
        // all force the default basket.
        sqlx::query_scalar(
            "SELECT basket_id FROM output_baskets WHERE user_id = ?1 AND name = 'default' AND is_deleted = 0",
        )
        .bind(query.user_id)
        .fetch_optional(pool)
        .await?
    } else if matches!(meta, Some(TagMetaSelector::Change)) {
        sqlx::query_scalar(
            "SELECT basket_id FROM output_baskets WHERE user_id = ?1 AND name = 'default' AND is_deleted = 0",
        )
        .bind(query.user_id)
        .fetch_optional(pool)
        .await?
    } else if matches!(meta, Some(TagMetaSelector::All)) {
        None
    } else if let Some(name) = &query.basket {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT basket_id FROM output_baskets WHERE user_id = ?1 AND name = ?2 AND is_deleted = 0",
        )
        .bind(query.user_id)
        .bind(name)
        .fetch_optional(pool)
        .await?;
        match id {
            Some(id) => Some(id),
            // Unknown basket name -> empty result.
            None => return Ok((Vec::new(), 0)),
        }
    } else {
        None
    };

    let tag_names: Vec<&String> = query
        .tags
        .iter()
        .filter(|t| !matches!(t.as_str(), "all" | "change" | "spent" | "unspent"))
        .collect();

    let include_spent = query.include_spent
        || matches!(meta, Some(TagMetaSelector::All) | Some(TagMetaSelector::Spent))
        || is_spec_op && query.basket.as_deref() != Some(SPEC_OP_INVALID_CHANGE);

    let want_spent_only = matches!(meta, Some(TagMetaSelector::Spent));
    let want_unspent_only = matches!(meta, Some(TagMetaSelector::Unspent)) || !include_spent;
    let want_change_only = matches!(meta, Some(TagMetaSelector::Change));

    let mut sql = String::from("SELECT o.* FROM outputs o WHERE o.user_id = ?");
    let mut count_sql = String::from("SELECT COUNT(*) FROM outputs o WHERE o.user_id = ?");

    if basket_id.is_some() {
        sql.push_str(" AND o.basket_id = ?");
        count_sql.push_str(" AND o.basket_id = ?");
    }
    if want_spent_only {
        sql.push_str(" AND o.spent = 1");
        count_sql.push_str(" AND o.spent = 1");
    } else if want_unspent_only {
        sql.push_str(" AND o.spent = 0");
        count_sql.push_str(" AND o.spent = 0");
    }
    if !include_spent {
        sql.push_str(" AND o.spendable = 1");
        count_sql.push_str(" AND o.spendable = 1");
    }
    if want_change_only {
        sql.push_str(" AND o.change = 1");
        count_sql.push_str(" AND o.change = 1");
    }

    if !tag_names.is_empty() {
        let required = tag_names.len() as i64;
        let placeholders = tag_names.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let join = format!(
            " AND o.output_id IN ( \
                SELECT m.output_id FROM output_tags_map m \
                JOIN output_tags t ON t.output_tag_id = m.output_tag_id \
                WHERE m.is_deleted = 0 AND t.is_deleted = 0 AND t.user_id = o.user_id AND t.tag IN ({placeholders}) \
                GROUP BY m.output_id \
                HAVING COUNT(DISTINCT t.tag) {op} \
            )",
            op = match query.tag_query_mode.unwrap_or(TagQueryMode::Any) {
                TagQueryMode::Any => ">= 1".to_string(),
                TagQueryMode::All => format!("= {required}"),
            }
        );
        sql.push_str(&join);
        count_sql.push_str(&join);
    }

    sql.push_str(" ORDER BY o.output_id");

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(query.user_id);
    if let Some(id) = basket_id {
        count_query = count_query.bind(id);
    }
    for t in &tag_names {
        count_query = count_query.bind(t.as_str());
    }
    let total = count_query.fetch_one(pool).await?;

    // `wallet-balance` ignores `limit` entirely.
    let ignores_limit = is_spec_op && query.basket.as_deref() == Some(SPEC_OP_WALLET_BALANCE);
    let limit = if ignores_limit { None } else { query.limit };
    if limit.is_some() {
        sql.push_str(" LIMIT ?");
        if query.offset.is_some() {
            sql.push_str(" OFFSET ?");
        }
    }

    let mut q = sqlx::query_as::<_, Output>(&sql).bind(query.user_id);
    if let Some(id) = basket_id {
        q = q.bind(id);
    }
    for t in &tag_names {
        q = q.bind(t.as_str());
    }
    if let Some(limit) = limit {
        q = q.bind(limit);
        if let Some(offset) = query.offset {
            q = q.bind(offset);
        }
    }

    let rows = q.fetch_all(pool).await?;
    Ok((rows, total))
}

/// Sums `outputs(basket = "default").satoshis` for the `wallet-balance`
/// SpecOp: ignores `limit`, returns an empty row set.
pub fn sum_satoshis(outputs: &[Output]) -> i64 {
    outputs.iter().map(|o| o.satoshis).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewOutput, NewTransaction, TransactionStatus};
    use crate::provider::{SqliteStorageProvider, StorageProvider};

    async fn seeded_wallet_with_outputs(satoshis: &[i64]) -> (SqliteStorageProvider, i64) {
        let storage = SqliteStorageProvider::connect(":memory:").await.unwrap();
        let user = storage.find_or_insert_user("02aabb").await.unwrap();
        let basket = storage.find_or_insert_default_basket(user.user_id).await.unwrap();
        let tx = storage
            .insert_transaction(NewTransaction {
                user_id: user.user_id,
                status: TransactionStatus::Completed,
                reference: "ref".into(),
                is_outgoing: false,
                satoshis: satoshis.iter().sum(),
                version: None,
                lock_time: None,
                description: "".into(),
                txid: Some("e".repeat(64)),
                input_beef: None,
                raw_tx: None,
            })
            .await
            .unwrap();
        for (vout, sats) in satoshis.iter().enumerate() {
            storage
                .insert_output(NewOutput {
                    user_id: user.user_id,
                    transaction_id: tx.transaction_id,
                    basket_id: Some(basket.basket_id),
                    spendable: true,
                    change: true,
                    vout: vout as i64,
                    satoshis: *sats,
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
        }
        (storage, user.user_id)
    }

    // S5: three spendable outputs (100, 200, 700) in the default basket;
    // `list_outputs({basket: "wallet-balance"})` returns the sum and no rows,
    // regardless of `limit`.
    #[tokio::test]
    async fn wallet_balance_spec_op_sums_regardless_of_limit() {
        let (storage, user_id) = seeded_wallet_with_outputs(&[100, 200, 700]).await;
        let (rows, _total) = run_query(
            &storage.pool,
            OutputQuery {
                user_id,
                basket: Some(SPEC_OP_WALLET_BALANCE.to_string()),
                limit: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(sum_satoshis(&rows), 1000);
    }

    #[tokio::test]
    async fn unknown_basket_name_returns_empty() {
        let (storage, user_id) = seeded_wallet_with_outputs(&[100]).await;
        let (rows, total) = run_query(
            &storage.pool,
            OutputQuery {
                user_id,
                basket: Some("does-not-exist".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(rows.is_empty());
        assert_eq!(total, 0);
    }

    // Property 5: `tagQueryMode = "all"` only returns outputs whose tag set
    // is a superset of the requested tags; `"any"` returns outputs sharing
    // at least one.
    #[tokio::test]
    async fn tag_query_mode_all_requires_every_tag() {
        let (storage, user_id) = seeded_wallet_with_outputs(&[100, 200]).await;
        let (outputs, _) = run_query(&storage.pool, OutputQuery { user_id, ..Default::default() }).await.unwrap();
        let red = storage.find_or_insert_output_tag(user_id, "red").await.unwrap();
        let blue = storage.find_or_insert_output_tag(user_id, "blue").await.unwrap();
        // output 0 gets both tags, output 1 only "red".
        storage.map_output_tag(red.output_tag_id, outputs[0].output_id).await.unwrap();
        storage.map_output_tag(blue.output_tag_id, outputs[0].output_id).await.unwrap();
        storage.map_output_tag(red.output_tag_id, outputs[1].output_id).await.unwrap();

        let (all_rows, _) = run_query(
            &storage.pool,
            OutputQuery {
                user_id,
                tags: vec!["red".into(), "blue".into()],
                tag_query_mode: Some(TagQueryMode::All),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(all_rows.len(), 1);
        assert_eq!(all_rows[0].output_id, outputs[0].output_id);

        let (any_rows, _) = run_query(
            &storage.pool,
            OutputQuery {
                user_id,
                tags: vec!["red".into(), "blue".into()],
                tag_query_mode: Some(TagQueryMode::Any),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(any_rows.len(), 2);
    }

    #[tokio::test]
    async fn meta_selector_change_forces_default_basket_and_change_filter() {
        let (storage, user_id) = seeded_wallet_with_outputs(&[100]).await;
        let (rows, _) = run_query(
            &storage.pool,
            OutputQuery {
                user_id,
                tags: vec!["change".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].change);
    }
}
