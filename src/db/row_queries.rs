use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::record::{ClickRecord, TransactionRecord};

/// Rows per INSERT statement; keeps bind counts well under the wire limit.
const BATCH_SIZE: usize = 500;

/// Bulk upsert of aggregated transaction rows, keyed by `row_hash`.
///
/// On conflict the incoming file's values win for every mutable field, but
/// `dataset_id` keeps its value from the first insert: re-uploading a
/// previously-seen report must not reassign historical rows to the new
/// dataset. Workers for distinct chunks may hit the same key concurrently;
/// the store's conflict handling is the only serialization point.
pub async fn upsert_transaction_rows(
    pool: &PgPool,
    dataset_id: i64,
    user_id: i64,
    records: &[TransactionRecord],
) -> Result<u64, sqlx::Error> {
    let mut affected = 0u64;

    for batch in records.chunks(BATCH_SIZE) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO transaction_rows \
             (dataset_id, user_id, date, \"time\", product, platform, category, status, \
              sub_id1, order_id, product_id, revenue, commission, cost, profit, quantity, row_hash) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(dataset_id)
                .push_bind(user_id)
                .push_bind(r.date)
                .push_bind(r.time)
                .push_bind(&r.product)
                .push_bind(&r.platform)
                .push_bind(&r.category)
                .push_bind(&r.status)
                .push_bind(&r.sub_id1)
                .push_bind(&r.order_id)
                .push_bind(&r.product_id)
                .push_bind(r.revenue)
                .push_bind(r.commission)
                .push_bind(r.cost)
                .push_bind(r.profit)
                .push_bind(r.quantity)
                .push_bind(&r.row_hash);
        });
        qb.push(
            " ON CONFLICT (row_hash) DO UPDATE SET \
             date = EXCLUDED.date, \
             \"time\" = EXCLUDED.\"time\", \
             product = EXCLUDED.product, \
             platform = EXCLUDED.platform, \
             category = EXCLUDED.category, \
             status = EXCLUDED.status, \
             sub_id1 = EXCLUDED.sub_id1, \
             revenue = EXCLUDED.revenue, \
             commission = EXCLUDED.commission, \
             cost = EXCLUDED.cost, \
             profit = EXCLUDED.profit, \
             quantity = EXCLUDED.quantity",
        );

        let result = qb.build().execute(pool).await?;
        affected += result.rows_affected();
    }

    Ok(affected)
}

/// Bulk upsert of aggregated click rows, keyed by `row_hash`. Same ownership
/// rule as transactions: `dataset_id` is never updated on conflict.
pub async fn upsert_click_rows(
    pool: &PgPool,
    dataset_id: i64,
    user_id: i64,
    records: &[ClickRecord],
) -> Result<u64, sqlx::Error> {
    let mut affected = 0u64;

    for batch in records.chunks(BATCH_SIZE) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO click_rows \
             (dataset_id, user_id, date, \"time\", channel, sub_id, clicks, row_hash) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(dataset_id)
                .push_bind(user_id)
                .push_bind(r.date)
                .push_bind(r.time)
                .push_bind(&r.channel)
                .push_bind(&r.sub_id)
                .push_bind(r.clicks)
                .push_bind(&r.row_hash);
        });
        qb.push(
            " ON CONFLICT (row_hash) DO UPDATE SET \
             date = EXCLUDED.date, \
             \"time\" = EXCLUDED.\"time\", \
             channel = EXCLUDED.channel, \
             sub_id = EXCLUDED.sub_id, \
             clicks = EXCLUDED.clicks",
        );

        let result = qb.build().execute(pool).await?;
        affected += result.rows_affected();
    }

    Ok(affected)
}
