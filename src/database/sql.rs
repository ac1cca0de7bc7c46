//! SQL statement builders
//!
//! Pure functions producing PostgreSQL statements for the load, staging, upsert, prune
//! and integrity steps. Identifiers are validated at configuration time and always
//! emitted quoted; row data only ever travels as bind parameters.

use crate::models::{ColumnSpec, DatasetSpec, ForeignKey, LAST_UPDATED};

/// Longest generated constraint name
pub const MAX_CONSTRAINT_NAME_LENGTH: usize = 60;

/// PostgreSQL's limit on bind parameters per statement
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Quote an identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn qualified_list<S: AsRef<str>>(alias: &str, columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| format!("{}.{}", alias, quote_ident(c.as_ref())))
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_condition<L: AsRef<str>, R: AsRef<str>>(
    left: &str,
    left_columns: &[L],
    right: &str,
    right_columns: &[R],
) -> String {
    left_columns
        .iter()
        .zip(right_columns)
        .map(|(l, r)| {
            format!(
                "{}.{} = {}.{}",
                left,
                quote_ident(l.as_ref()),
                right,
                quote_ident(r.as_ref())
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Reference to a dataset's target table, resolved through the search path
pub fn table_ref(table: &str) -> String {
    quote_ident(table)
}

/// Reference to a dataset's session-scoped staging table
pub fn staging_ref(spec: &DatasetSpec) -> String {
    format!("pg_temp.{}", quote_ident(&spec.staging_table()))
}

/// Deterministic constraint name, truncated to [`MAX_CONSTRAINT_NAME_LENGTH`]
pub fn constraint_name<S: AsRef<str>>(prefix: &str, table: &str, columns: &[S]) -> String {
    let joined = columns
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join("_");
    format!("{}_{}_{}", prefix, table, joined)
        .chars()
        .take(MAX_CONSTRAINT_NAME_LENGTH)
        .collect()
}

fn column_definitions(columns: &[ColumnSpec]) -> String {
    columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TABLE` with the declared columns and `last_updated`, no constraints
pub fn create_table(spec: &DatasetSpec) -> String {
    format!(
        "CREATE TABLE {} ({})",
        table_ref(&spec.table),
        column_definitions(&spec.table_column_specs())
    )
}

/// `DROP TABLE … CASCADE`, removing dependent foreign keys of child tables
pub fn drop_table(spec: &DatasetSpec) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE", table_ref(&spec.table))
}

/// Temporary staging table shaped like the target table, dropped at transaction end
pub fn create_staging_table(spec: &DatasetSpec) -> String {
    format!(
        "CREATE TEMP TABLE {} ({}) ON COMMIT DROP",
        quote_ident(&spec.staging_table()),
        column_definitions(&spec.table_column_specs())
    )
}

pub fn add_unique(spec: &DatasetSpec, columns: &[String]) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
        table_ref(&spec.table),
        quote_ident(&constraint_name("uq", &spec.table, columns)),
        column_list(columns)
    )
}

/// `ADD PRIMARY KEY`, when the dataset has one
pub fn add_primary_key(spec: &DatasetSpec) -> Option<String> {
    if spec.primary_key.is_empty() {
        return None;
    }
    Some(format!(
        "ALTER TABLE {} ADD PRIMARY KEY ({})",
        table_ref(&spec.table),
        column_list(&spec.primary_key)
    ))
}

pub fn add_foreign_key(spec: &DatasetSpec, fk: &ForeignKey) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
        table_ref(&spec.table),
        quote_ident(&constraint_name("fk", &spec.table, &fk.columns)),
        column_list(&fk.columns),
        table_ref(&fk.ref_table),
        column_list(&fk.ref_columns),
        fk.on_delete,
        fk.on_update
    )
}

/// Rows per INSERT so that `columns * rows` stays within the bind parameter limit
pub fn rows_per_statement(columns: usize, batch_size: usize) -> usize {
    let cap = MAX_BIND_PARAMS / columns.max(1);
    batch_size.clamp(1, cap.max(1))
}

/// Multi-row `INSERT … VALUES` with numbered placeholders
pub fn insert_values(relation: &str, columns: &[&str], rows: usize) -> String {
    let width = columns.len();
    let tuples = (0..rows)
        .map(|r| {
            let params = (1..=width)
                .map(|c| format!("${}", r * width + c))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", params)
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        relation,
        column_list(columns),
        tuples
    )
}

/// Upsert from the staging table into the target table
///
/// Matched rows are only rewritten when a declared non-key column differs, unless
/// `refresh_unchanged` is set. Each affected row is returned with a boolean telling
/// inserts (`true`) from updates (`false`).
pub fn upsert(spec: &DatasetSpec, refresh_unchanged: bool) -> String {
    let columns = spec.table_columns();
    let compare = spec.non_key_columns();

    let mut set_columns: Vec<&str> = compare.clone();
    set_columns.push(LAST_UPDATED);
    let set_clause = set_columns
        .iter()
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");

    let action = if compare.is_empty() && !refresh_unchanged {
        "DO NOTHING".to_string()
    } else if refresh_unchanged {
        format!("DO UPDATE SET {}", set_clause)
    } else {
        format!(
            "DO UPDATE SET {} WHERE ROW({}) IS DISTINCT FROM ROW({})",
            set_clause,
            qualified_list("t", &compare),
            qualified_list("EXCLUDED", &compare)
        )
    };

    format!(
        "INSERT INTO {target} AS t ({cols}) SELECT {cols} FROM {stage} ON CONFLICT ({key}) {action} RETURNING (t.xmax = 0) AS inserted",
        target = table_ref(&spec.table),
        cols = column_list(&columns),
        stage = staging_ref(spec),
        key = column_list(&spec.key_columns),
        action = action
    )
}

/// Delete target rows whose key is absent from the staging table
pub fn prune(spec: &DatasetSpec) -> String {
    format!(
        "DELETE FROM {} AS t WHERE NOT EXISTS (SELECT 1 FROM {} AS s WHERE {})",
        table_ref(&spec.table),
        staging_ref(spec),
        join_condition("s", &spec.key_columns, "t", &spec.key_columns)
    )
}

/// Count child rows whose non-NULL foreign key has no parent row
pub fn orphan_count(spec: &DatasetSpec, fk: &ForeignKey) -> String {
    let not_null = fk
        .columns
        .iter()
        .map(|c| format!("c.{} IS NOT NULL", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "SELECT COUNT(*) FROM {} AS c WHERE {} AND NOT EXISTS (SELECT 1 FROM {} AS p WHERE {})",
        table_ref(&spec.table),
        not_null,
        table_ref(&fk.ref_table),
        join_condition("p", &fk.ref_columns, "c", &fk.columns)
    )
}

pub fn count_rows(relation: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", relation)
}
