//! Incremental update: reconcile existing tables with fresh snapshots
//!
//! Every dataset with an input file present is first read, transformed and checked.
//! The prepared snapshots are then reconciled in one transaction:
//!
//! 1. stage each snapshot in a temporary `<table>__stg` table and upsert it into the
//!    target, datasets in load order
//! 2. delete target rows whose key is absent from the snapshot, datasets in reverse load
//!    order so children are pruned before their parents
//! 3. commit, then archive the input file of every reconciled dataset
//!
//! Each dataset's upsert and prune run in their own savepoint. Under
//! [`ErrorPolicy::Continue`] a failed upsert is rolled back to its savepoint and the
//! dataset is reported failed. A failed prune would leave its upsert applied, so the whole
//! transaction is rolled back and reconciliation is retried without that dataset. Under
//! [`ErrorPolicy::Halt`] any database failure rolls back every dataset.
//!
//! Staging tables are dropped when the transaction ends.

use std::path::Path;

use chrono::NaiveDateTime;
use tokio_postgres::Transaction;
use tracing::{debug, error, info, warn};

use super::{
    ChangeCounts, DatasetStatus, ErrorPolicy, PipelineError, PipelineResult, RunOptions,
    RunReport, archive_processed,
};
use crate::config::EtlConfig;
use crate::database::{
    Session, commit, execute, insert_rows, query_failed, rollback, savepoint, sql,
};
use crate::models::{DatasetSpec, Value};
use crate::transform;

/// A dataset snapshot ready to be written
struct Prepared<'a> {
    spec: &'a DatasetSpec,
    rows: Vec<Vec<Value>>,
}

/// Outcome of one reconciliation transaction
enum Attempt<'a> {
    /// The transaction committed
    Committed {
        reconciled: Vec<(&'a DatasetSpec, ChangeCounts)>,
        /// Upserts rolled back to their savepoint
        failed: Vec<(&'a DatasetSpec, PipelineError)>,
    },
    /// A prune failed; retry without `spec`
    Replay {
        spec: &'a DatasetSpec,
        error: PipelineError,
    },
    /// Everything was rolled back and the run stops
    Aborted {
        spec: Option<&'a DatasetSpec>,
        error: PipelineError,
    },
}

/// Upsert and prune every dataset whose input file is present
pub async fn incremental_update(
    session: &mut Session,
    config: &EtlConfig,
    options: &RunOptions,
) -> RunReport {
    let run_ts = options.run_timestamp();
    let mut report = RunReport::new(run_ts, config.datasets());
    info!("Starting incremental update at {}", run_ts);

    let mut prepared: Vec<Prepared<'_>> = Vec::new();
    for spec in config.datasets() {
        if report.halted {
            break;
        }

        let path = config.source_path(spec);
        if !path.is_file() {
            info!("[{}] No input file at {}, skipping", spec.name, path.display());
            report.set_status(&spec.name, DatasetStatus::Skipped);
            continue;
        }

        match prepare(session, spec, &path, run_ts).await {
            Ok(rows) => prepared.push(Prepared { spec, rows }),
            Err(e) => report.fail(spec, e, options.error_policy),
        }
    }

    let mut reconciled: Vec<&DatasetSpec> = Vec::new();
    if !report.halted && !prepared.is_empty() {
        let mut excluded: Vec<(&DatasetSpec, PipelineError)> = Vec::new();
        loop {
            let active: Vec<&Prepared<'_>> = prepared
                .iter()
                .filter(|p| !excluded.iter().any(|(spec, _)| spec.name == p.spec.name))
                .collect();

            match reconcile(session, config, &active, options.error_policy).await {
                Attempt::Committed {
                    reconciled: done,
                    failed,
                } => {
                    for (spec, counts) in done {
                        info!("[{}] {}", spec.name, counts);
                        report.set_status(&spec.name, DatasetStatus::Reconciled(counts));
                        reconciled.push(spec);
                    }
                    for (spec, e) in failed {
                        report.fail(spec, e, options.error_policy);
                    }
                    break;
                }
                Attempt::Replay { spec, error } => {
                    warn!(
                        "[{}] Prune failed, rolling back and retrying without it: {}",
                        spec.name, error
                    );
                    excluded.push((spec, error));
                }
                Attempt::Aborted { spec, error } => {
                    match spec {
                        Some(spec) => report.fail(spec, error, ErrorPolicy::Halt),
                        None => {
                            error!("{}", error);
                            report.add_error(error.to_string());
                        }
                    }
                    report.halted = true;
                    for p in &active {
                        if spec.is_some_and(|s| s.name == p.spec.name) {
                            continue;
                        }
                        report.set_status(
                            &p.spec.name,
                            DatasetStatus::Failed {
                                error: "rolled back: run halted".to_string(),
                            },
                        );
                    }
                    break;
                }
            }
        }

        for (spec, e) in excluded {
            report.fail(spec, e, options.error_policy);
        }
    }

    if options.archive {
        archive_processed(&mut report, config, &reconciled);
    }

    let report = report.finish();
    let total = report.total_changes();
    info!(
        "Incremental update finished in {}: {} datasets reconciled, {}",
        report.duration_string(),
        reconciled.len(),
        total
    );
    report
}

/// Read, transform and check one snapshot against an existing table
async fn prepare(
    session: &Session,
    spec: &DatasetSpec,
    path: &Path,
    run_ts: NaiveDateTime,
) -> PipelineResult<Vec<Vec<Value>>> {
    if !session.table_exists(&spec.table).await? {
        return Err(PipelineError::MissingTable {
            dataset: spec.name.clone(),
            table: spec.table.clone(),
        });
    }

    let frame = transform::prepare_dataset(spec, path, run_ts)?;
    Ok(frame.rows())
}

/// Upsert then prune `datasets` in one transaction
async fn reconcile<'a>(
    session: &mut Session,
    config: &EtlConfig,
    datasets: &[&Prepared<'a>],
    policy: ErrorPolicy,
) -> Attempt<'a> {
    let mut tx = match session.transaction().await {
        Ok(tx) => tx,
        Err(e) => {
            return Attempt::Aborted {
                spec: None,
                error: e.into(),
            };
        }
    };

    let mut upserted: Vec<(&'a DatasetSpec, ChangeCounts)> = Vec::new();
    let mut failed: Vec<(&'a DatasetSpec, PipelineError)> = Vec::new();
    for dataset in datasets {
        let spec = dataset.spec;
        match upsert(&mut tx, config, spec, &dataset.rows).await {
            Ok(counts) => upserted.push((spec, counts)),
            Err(e) if policy == ErrorPolicy::Continue => failed.push((spec, e)),
            Err(error) => {
                abandon(tx).await;
                return Attempt::Aborted {
                    spec: Some(spec),
                    error,
                };
            }
        }
    }

    for (spec, counts) in upserted.iter_mut().rev() {
        let spec: &'a DatasetSpec = *spec;
        match prune(&mut tx, spec).await {
            Ok(deleted) => counts.deleted = deleted,
            Err(error) => {
                abandon(tx).await;
                return match policy {
                    ErrorPolicy::Continue => Attempt::Replay { spec, error },
                    ErrorPolicy::Halt => Attempt::Aborted {
                        spec: Some(spec),
                        error,
                    },
                };
            }
        }
    }

    if let Err(e) = commit(tx).await {
        return Attempt::Aborted {
            spec: None,
            error: e.into(),
        };
    }
    Attempt::Committed {
        reconciled: upserted,
        failed,
    }
}

async fn abandon(tx: Transaction<'_>) {
    if let Err(e) = rollback(tx).await {
        warn!("{}", e);
    }
}

/// Stage the snapshot and upsert it inside a savepoint
async fn upsert(
    tx: &mut Transaction<'_>,
    config: &EtlConfig,
    spec: &DatasetSpec,
    rows: &[Vec<Value>],
) -> PipelineResult<ChangeCounts> {
    let sp = savepoint(tx).await?;
    match stage_and_upsert(&sp, config, spec, rows).await {
        Ok(counts) => {
            commit(sp).await?;
            Ok(counts)
        }
        Err(e) => {
            if let Err(rb) = rollback(sp).await {
                warn!("[{}] {}", spec.name, rb);
            }
            Err(e)
        }
    }
}

async fn stage_and_upsert(
    tx: &Transaction<'_>,
    config: &EtlConfig,
    spec: &DatasetSpec,
    rows: &[Vec<Value>],
) -> PipelineResult<ChangeCounts> {
    execute(tx, &sql::create_staging_table(spec)).await?;

    let columns = spec.table_columns();
    let staged = insert_rows(
        tx,
        &sql::staging_ref(spec),
        &columns,
        rows,
        config.sql.batch_size,
    )
    .await?;
    debug!("[{}] Staged {} rows", spec.name, staged);

    let upsert = sql::upsert(spec, config.incremental.refresh_unchanged);
    debug!("{}", upsert);
    let changed = tx
        .query(upsert.as_str(), &[])
        .await
        .map_err(|e| query_failed(&format!("Failed to upsert into {}", spec.table), e))?;

    let inserted = changed.iter().filter(|row| row.get::<_, bool>(0)).count() as u64;
    let counts = ChangeCounts {
        inserted,
        updated: changed.len() as u64 - inserted,
        deleted: 0,
    };
    info!(
        "[{}] Upserted {} staged rows: {} inserted, {} updated",
        spec.name, staged, counts.inserted, counts.updated
    );
    Ok(counts)
}

/// Delete target rows missing from the staged snapshot, inside a savepoint
async fn prune(tx: &mut Transaction<'_>, spec: &DatasetSpec) -> PipelineResult<u64> {
    let statement = sql::prune(spec);
    debug!("{}", statement);

    let sp = savepoint(tx).await?;
    match sp.execute(statement.as_str(), &[]).await {
        Ok(deleted) => {
            commit(sp).await?;
            Ok(deleted)
        }
        Err(e) => {
            if let Err(rb) = rollback(sp).await {
                warn!("[{}] {}", spec.name, rb);
            }
            Err(query_failed(&format!("Failed to prune {}", spec.table), e).into())
        }
    }
}
