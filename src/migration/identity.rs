//! Identity map - persistent record of which target entity each source
//! record became, keyed by (base, source table, record id, target table).
//! Dependent stages use it to resolve linked-record foreign keys that
//! were migrated in an earlier pass.

use anyhow::Result;
use sqlx::PgPool;
use tracing::debug;

/// Look up the target-entity id a source record mapped into, if any.
pub async fn resolve(
    db: &PgPool,
    base_id: &str,
    table_name: &str,
    record_id: &str,
    target_table: &str,
) -> Result<Option<i64>> {
    let target_id = sqlx::query_scalar::<_, i64>(
        "SELECT target_id FROM migration_id_map \
         WHERE base_id = $1 AND table_name = $2 AND record_id = $3 AND target_table = $4",
    )
    .bind(base_id)
    .bind(table_name)
    .bind(record_id)
    .bind(target_table)
    .fetch_optional(db)
    .await?;

    Ok(target_id)
}

/// Record (or repoint) the mapping for a source record. Upsert on the
/// composite key so repeated runs never fail on conflict; the target id
/// is repointed when a re-run matched an existing natural-key row
/// instead of inserting.
pub async fn record(
    db: &PgPool,
    base_id: &str,
    table_name: &str,
    record_id: &str,
    target_table: &str,
    target_id: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO migration_id_map (base_id, table_name, record_id, target_table, target_id) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (base_id, table_name, record_id, target_table) \
         DO UPDATE SET target_id = EXCLUDED.target_id",
    )
    .bind(base_id)
    .bind(table_name)
    .bind(record_id)
    .bind(target_table)
    .bind(target_id)
    .execute(db)
    .await?;

    debug!(
        "Mapped {}/{}/{} -> {}#{}",
        base_id, table_name, record_id, target_table, target_id
    );
    Ok(())
}
