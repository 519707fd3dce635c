//! Staging store writer - faithful, idempotent capture of raw source records

use crate::migration::types::{SourceRecord, StagedRecord};
use anyhow::Result;
use sqlx::{PgPool, QueryBuilder};
use tracing::{debug, info};

/// Rows per staging statement. Purely payload-size management; chunk
/// boundaries carry no semantics and earlier chunks stay committed if a
/// later chunk fails.
const STAGE_CHUNK: usize = 200;

/// Upsert a batch of source records keyed by (base, table, record id).
/// Re-staging a record overwrites its field map and creation timestamp
/// in place; no validation of field contents happens here.
pub async fn stage_records(
    db: &PgPool,
    base_id: &str,
    table_name: &str,
    table_id: Option<&str>,
    records: &[SourceRecord],
) -> Result<usize> {
    info!("Staging {} records for {}", records.len(), table_name);

    let mut staged = 0usize;
    for chunk in records.chunks(STAGE_CHUNK) {
        let mut qb = QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO staged_records (base_id, table_name, record_id, table_id, created_time, fields) ",
        );
        qb.push_values(chunk, |mut row, rec| {
            row.push_bind(base_id)
                .push_bind(table_name)
                .push_bind(&rec.id)
                .push_bind(table_id)
                .push_bind(rec.created_time)
                .push_bind(sqlx::types::Json(&rec.fields));
        });
        qb.push(
            " ON CONFLICT (base_id, table_name, record_id) DO UPDATE SET \
             table_id = EXCLUDED.table_id, \
             created_time = EXCLUDED.created_time, \
             fields = EXCLUDED.fields, \
             staged_at = NOW()",
        );

        qb.build().execute(db).await?;
        staged += chunk.len();
        debug!("Staged {}/{} records", staged, records.len());
    }

    info!("Staging complete for {}: {} rows", table_name, staged);
    Ok(staged)
}

/// Read every staged record for one source table. The staging table is
/// the single point of truth for all downstream transforms.
pub async fn load_staged(
    db: &PgPool,
    base_id: &str,
    table_name: &str,
) -> Result<Vec<StagedRecord>> {
    let records = sqlx::query_as::<_, StagedRecord>(
        "SELECT base_id, table_name, record_id, table_id, created_time, fields \
         FROM staged_records WHERE base_id = $1 AND table_name = $2",
    )
    .bind(base_id)
    .bind(table_name)
    .fetch_all(db)
    .await?;

    Ok(records)
}

/// Staged row count for one table, used by --verify.
pub async fn staged_count(db: &PgPool, base_id: &str, table_name: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM staged_records WHERE base_id = $1 AND table_name = $2",
    )
    .bind(base_id)
    .bind(table_name)
    .fetch_one(db)
    .await?;

    Ok(count)
}
