//! Full load: rebuild every target table from its snapshot
//!
//! Each table is dropped, recreated, filled and constrained inside one transaction, in
//! load order. The run as a whole is not atomic: tables loaded before a failure stay
//! loaded, keep their restored foreign keys and have their input files archived.

use chrono::NaiveDateTime;
use tracing::{info, warn};

use super::{DatasetStatus, PipelineResult, RunOptions, RunReport, archive_processed};
use crate::config::EtlConfig;
use crate::database::{Session, commit, execute, insert_rows, query_failed, sql};
use crate::models::DatasetSpec;
use crate::transform;

/// Drop, recreate and load every configured table
pub async fn full_load(
    session: &mut Session,
    config: &EtlConfig,
    options: &RunOptions,
) -> RunReport {
    let run_ts = options.run_timestamp();
    let mut report = RunReport::new(run_ts, config.datasets());
    info!(
        "Starting full load of {} datasets at {}",
        config.datasets().len(),
        run_ts
    );

    let mut loaded: Vec<&DatasetSpec> = Vec::new();
    for spec in config.datasets() {
        if report.halted {
            break;
        }
        match load_table(session, config, spec, run_ts).await {
            Ok(rows) => {
                report.set_status(&spec.name, DatasetStatus::Loaded { rows });
                loaded.push(spec);
            }
            Err(e) => report.fail(spec, e, options.error_policy),
        }
    }

    restore_foreign_keys(session, config, &loaded).await;

    if options.archive {
        archive_processed(&mut report, config, &loaded);
    }

    let report = report.finish();
    info!(
        "Full load finished in {}: {} of {} datasets loaded",
        report.duration_string(),
        loaded.len(),
        config.datasets().len()
    );
    report
}

/// Load one table in a single transaction and return its final row count
async fn load_table(
    session: &mut Session,
    config: &EtlConfig,
    spec: &DatasetSpec,
    run_ts: NaiveDateTime,
) -> PipelineResult<i64> {
    let path = config.source_path(spec);
    let rows = transform::prepare_dataset(spec, &path, run_ts)?.rows();

    let tx = session.transaction().await?;
    execute(&tx, &sql::drop_table(spec)).await?;
    execute(&tx, &sql::create_table(spec)).await?;

    let columns = spec.table_columns();
    let inserted = insert_rows(
        &tx,
        &sql::table_ref(&spec.table),
        &columns,
        &rows,
        config.sql.batch_size,
    )
    .await?;
    info!("[{}] Inserted {} rows into {}", spec.name, inserted, spec.table);

    for unique in &spec.unique_constraints {
        execute(&tx, &sql::add_unique(spec, unique)).await?;
    }
    if let Some(statement) = sql::add_primary_key(spec) {
        execute(&tx, &statement).await?;
    }
    for fk in &spec.foreign_keys {
        execute(&tx, &sql::add_foreign_key(spec, fk)).await?;
    }

    let count_sql = sql::count_rows(&sql::table_ref(&spec.table));
    let row = tx
        .query_one(count_sql.as_str(), &[])
        .await
        .map_err(|e| query_failed(&count_sql, e))?;
    let count: i64 = row.get(0);
    commit(tx).await?;

    info!("{} count: {}", spec.table, count);
    Ok(count)
}

/// Re-add foreign keys that `DROP … CASCADE` removed from tables this run did not reload
///
/// A constraint that no longer holds (orphaned rows) is left off with a warning.
async fn restore_foreign_keys(session: &Session, config: &EtlConfig, loaded: &[&DatasetSpec]) {
    for spec in config.datasets() {
        if loaded.iter().any(|l| l.name == spec.name) || spec.foreign_keys.is_empty() {
            continue;
        }
        match session.table_exists(&spec.table).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("[{}] {}", spec.name, e);
                continue;
            }
        }

        for fk in &spec.foreign_keys {
            let name = sql::constraint_name("fk", &spec.table, &fk.columns);
            match session.constraint_exists(&spec.table, &name).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!("[{}] {}", spec.name, e);
                    continue;
                }
            }
            match session.batch_execute(&sql::add_foreign_key(spec, fk)).await {
                Ok(()) => info!("[{}] Restored foreign key {}", spec.name, name),
                Err(e) => warn!(
                    "[{}] Could not restore foreign key {}: {}",
                    spec.name, name, e
                ),
            }
        }
    }
}
