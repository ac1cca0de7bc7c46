//! Foreign-key orphan counts over the managed tables (read-only)

use tracing::{info, warn};

use super::PipelineResult;
use crate::config::EtlConfig;
use crate::database::{Session, sql};

/// Orphan count for one foreign key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanCheck {
    pub dataset: String,
    pub constraint: String,
    pub ref_table: String,
    /// Child rows with a non-NULL key and no parent row
    pub orphans: i64,
}

/// Result of [`check_integrity`]
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub checks: Vec<OrphanCheck>,
    /// Datasets whose table (or a referenced table) does not exist
    pub skipped: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.total_orphans() == 0
    }

    pub fn total_orphans(&self) -> i64 {
        self.checks.iter().map(|c| c.orphans).sum()
    }
}

/// Count orphaned child rows for every configured foreign key
pub async fn check_integrity(
    session: &Session,
    config: &EtlConfig,
) -> PipelineResult<IntegrityReport> {
    let mut report = IntegrityReport::default();

    for spec in config.datasets() {
        if spec.foreign_keys.is_empty() {
            continue;
        }
        if !session.table_exists(&spec.table).await? {
            warn!("[{}] Table {} does not exist, skipping", spec.name, spec.table);
            report.skipped.push(spec.name.clone());
            continue;
        }

        for fk in &spec.foreign_keys {
            let constraint = sql::constraint_name("fk", &spec.table, &fk.columns);
            if !session.table_exists(&fk.ref_table).await? {
                warn!(
                    "[{}] Referenced table {} does not exist, skipping {}",
                    spec.name, fk.ref_table, constraint
                );
                report.skipped.push(spec.name.clone());
                continue;
            }

            let orphans = session.scalar_count(&sql::orphan_count(spec, fk)).await?;
            if orphans > 0 {
                warn!("[{}] {}: {} orphaned rows", spec.name, constraint, orphans);
            } else {
                info!("[{}] {}: ok", spec.name, constraint);
            }
            report.checks.push(OrphanCheck {
                dataset: spec.name.clone(),
                constraint,
                ref_table: fk.ref_table.clone(),
                orphans,
            });
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(orphans: i64) -> OrphanCheck {
        OrphanCheck {
            dataset: "products".to_string(),
            constraint: "fk_products_brand_id".to_string(),
            ref_table: "brands".to_string(),
            orphans,
        }
    }

    #[test]
    fn test_clean_report() {
        let report = IntegrityReport {
            checks: vec![check(0), check(0)],
            skipped: Vec::new(),
        };
        assert!(report.is_clean());
    }

    #[test]
    fn test_orphans_counted() {
        let report = IntegrityReport {
            checks: vec![check(2), check(3)],
            skipped: Vec::new(),
        };
        assert!(!report.is_clean());
        assert_eq!(report.total_orphans(), 5);
    }
}
