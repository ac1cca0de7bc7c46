//! Batched row insertion

use tokio_postgres::Transaction;
use tokio_postgres::types::ToSql;
use tracing::debug;

use super::{DatabaseResult, query_failed, sql};
use crate::models::Value;

/// Insert rows into `relation` with multi-row parameterized INSERTs
///
/// `relation` is an already-quoted table reference. Rows must have one value per
/// column. Statements are capped at `batch_size` rows and at the bind parameter limit.
/// Returns the number of rows inserted.
pub async fn insert_rows(
    tx: &Transaction<'_>,
    relation: &str,
    columns: &[&str],
    rows: &[Vec<Value>],
    batch_size: usize,
) -> DatabaseResult<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let per_statement = sql::rows_per_statement(columns.len(), batch_size);
    let full_statement = if rows.len() >= per_statement {
        let text = sql::insert_values(relation, columns, per_statement);
        Some(
            tx.prepare(&text)
                .await
                .map_err(|e| query_failed("Failed to prepare insert", e))?,
        )
    } else {
        None
    };

    let mut inserted = 0;
    for chunk in rows.chunks(per_statement) {
        let params: Vec<&(dyn ToSql + Sync)> = chunk
            .iter()
            .flat_map(|row| row.iter().map(|v| v as &(dyn ToSql + Sync)))
            .collect();

        let count = match &full_statement {
            Some(statement) if chunk.len() == per_statement => tx.execute(statement, &params).await,
            _ => {
                let text = sql::insert_values(relation, columns, chunk.len());
                tx.execute(text.as_str(), &params).await
            }
        }
        .map_err(|e| query_failed(&format!("Failed to insert into {}", relation), e))?;
        inserted += count;
    }

    debug!("Inserted {} rows into {}", inserted, relation);
    Ok(inserted)
}
