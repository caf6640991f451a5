//! Statement synthesis from a [`Record`].
//!
//! Every value is bound through a named parameter (`:field`), never through
//! its position, so reordering the fields of a record cannot shift values
//! into the wrong columns. Table and field names are spliced into the SQL
//! text and must therefore be plain identifiers; anything else is rejected
//! with [`DbError::InvalidRecord`] before a statement is built.

use rusqlite::types::{ToSql, Value};

use crate::error::DbError;
use crate::record::{Field, Record};

/// SQL text plus its named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    text: String,
    params: Vec<(String, Value)>,
}

impl SqlStatement {
    pub(crate) fn new(text: String, params: Vec<(String, Value)>) -> Self {
        Self { text, params }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parameter names (with the leading `:`) and values, in binding order.
    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(name, _)| name.as_str())
    }

    /// Parameters in the form rusqlite binds by name.
    pub fn named_params(&self) -> Vec<(&str, &dyn ToSql)> {
        self.params
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect()
    }
}

/// `INSERT INTO table (a, b) VALUES (:a, :b)`, optionally with
/// `RETURNING *`.
pub fn insert(record: &Record, table: &str, returning: bool) -> Result<SqlStatement, DbError> {
    check_table(table)?;
    if record.is_empty() {
        return Err(DbError::InvalidRecord(format!(
            "insert into {table} needs at least one field"
        )));
    }
    check_fields(record)?;

    let columns: Vec<&str> = record.fields().iter().map(Field::name).collect();
    let placeholders: Vec<String> = columns.iter().map(|c| placeholder(c)).collect();

    let mut text = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    if returning {
        text.push_str(" RETURNING *");
    }

    Ok(SqlStatement::new(text, bind_all(record.fields().iter())))
}

/// `UPDATE table SET a = :a WHERE id = :id`. Key fields form the WHERE
/// clause, every other field the SET list.
pub fn update(record: &Record, table: &str) -> Result<SqlStatement, DbError> {
    check_table(table)?;
    check_fields(record)?;
    if record.keys().next().is_none() {
        return Err(DbError::InvalidRecord(format!(
            "update of {table} needs at least one key field"
        )));
    }
    if record.non_keys().next().is_none() {
        return Err(DbError::InvalidRecord(format!(
            "update of {table} has no fields to set"
        )));
    }

    let set = equality_list(record.non_keys(), ", ");
    let filter = equality_list(record.keys(), " AND ");
    let text = format!("UPDATE {table} SET {set} WHERE {filter}");

    let params = bind_all(record.non_keys().chain(record.keys()));
    Ok(SqlStatement::new(text, params))
}

/// `DELETE FROM table WHERE id = :id`. Only key fields are used.
pub fn delete(record: &Record, table: &str) -> Result<SqlStatement, DbError> {
    check_table(table)?;
    check_fields(record)?;
    if record.keys().next().is_none() {
        return Err(DbError::InvalidRecord(format!(
            "delete from {table} needs at least one key field"
        )));
    }

    let filter = equality_list(record.keys(), " AND ");
    let text = format!("DELETE FROM {table} WHERE {filter}");
    Ok(SqlStatement::new(text, bind_all(record.keys())))
}

pub(crate) fn placeholder(name: &str) -> String {
    format!(":{name}")
}

fn equality_list<'a>(fields: impl Iterator<Item = &'a Field>, separator: &str) -> String {
    fields
        .map(|f| format!("{} = {}", f.name(), placeholder(f.name())))
        .collect::<Vec<_>>()
        .join(separator)
}

fn bind_all<'a>(fields: impl Iterator<Item = &'a Field>) -> Vec<(String, Value)> {
    fields
        .map(|f| (placeholder(f.name()), f.value().clone()))
        .collect()
}

fn check_fields(record: &Record) -> Result<(), DbError> {
    match record.fields().iter().find(|f| !is_identifier(f.name())) {
        Some(bad) => Err(DbError::InvalidRecord(format!(
            "field name '{}' is not a plain identifier",
            bad.name()
        ))),
        None => Ok(()),
    }
}

pub(crate) fn check_table(table: &str) -> Result<(), DbError> {
    if is_qualified_identifier(table) {
        Ok(())
    } else {
        Err(DbError::InvalidRecord(format!(
            "table name '{table}' is not a plain identifier"
        )))
    }
}

pub(crate) fn check_identifier(name: &str) -> Result<(), DbError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(DbError::InvalidRecord(format!(
            "'{name}' is not a plain identifier"
        )))
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// An identifier optionally prefixed by a schema: `schema.table`.
pub fn is_qualified_identifier(name: &str) -> bool {
    match name.split_once('.') {
        Some((schema, table)) => is_identifier(schema) && is_identifier(table),
        None => is_identifier(name),
    }
}
