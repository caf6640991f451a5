//! Rewrites stored filesystem paths after a directory moves.

use dbrelay_db::{is_identifier, is_qualified_identifier, DbError, Record, Session};

/// Replaces `old` with `new` in `column` of every `table` row that holds
/// `old`, in one transaction. Rows are addressed by the table's primary key,
/// or by `rowid` when it has none. Returns the number of rows changed.
pub fn rewrite_path(
    session: &mut Session,
    table: &str,
    column: &str,
    old: &str,
    new: &str,
) -> Result<usize, DbError> {
    if !is_qualified_identifier(table) || !is_identifier(column) {
        return Err(DbError::InvalidRecord(format!(
            "cannot rewrite {table}.{column}: not a plain identifier"
        )));
    }

    let mut key = session.table_primary_key(table)?;
    if key.is_empty() {
        key.push("rowid".to_string());
    }

    let select = format!(
        "SELECT {} FROM {table} WHERE {column} = :old",
        key.join(", ")
    );
    let rows = session.execute_with(&select, &[(":old", &old)])?;
    if rows.is_empty() {
        tracing::debug!(table, old, "no rows hold the old path");
        return Ok(0);
    }

    session.begin_transaction()?;
    let mut changed = 0;
    for row in &rows {
        let mut record = Record::new().with_value(column, new.to_string());
        for (name, value) in key.iter().zip(row.values()) {
            record.insert_key(name.clone(), value.clone());
        }
        match session.update(&record, table) {
            Ok(n) => changed += n,
            Err(e) => {
                if let Err(rollback) = session.cancel_transaction() {
                    tracing::warn!(table, error = %rollback, "rollback of path rewrite failed");
                }
                return Err(e);
            }
        }
    }
    session.end_transaction()?;

    tracing::info!(table, old, new, changed, "path rewritten");
    Ok(changed)
}
