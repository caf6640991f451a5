//! Catalog queries and relation-driven lookups.
//!
//! Catalog helpers read SQLite's `pragma_table_info` and
//! `pragma_foreign_key_list` table-valued functions, so they see exactly
//! what the backend enforces. Names may be schema-qualified (`aux.orders`);
//! an unqualified name is looked up in `main`.

use rusqlite::types::{ToSql, Value};

use crate::error::DbError;
use crate::result::value_to_text;
use crate::session::Session;
use crate::statement::{self, SqlStatement};

const DEFAULT_SCHEMA: &str = "main";

/// One input of [`Session::value_by_relation`]: read `field` of the row
/// whose foreign key points at the `related_table` row where
/// `related_column = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationLookup {
    pub value: Value,
    pub related_table: String,
    pub related_column: String,
    pub field: String,
}

impl RelationLookup {
    pub fn new(
        value: impl Into<Value>,
        related_table: impl Into<String>,
        related_column: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            value: value.into(),
            related_table: related_table.into(),
            related_column: related_column.into(),
            field: field.into(),
        }
    }

    fn same_target(&self, other: &Self) -> bool {
        self.related_table == other.related_table && self.related_column == other.related_column
    }
}

fn split_qualified(name: &str) -> (&str, &str) {
    name.split_once('.').unwrap_or((DEFAULT_SCHEMA, name))
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn text(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(v) => Some(value_to_text(v)),
    }
}

impl Session {
    /// Primary key columns of `table`, in key order. Empty when the table
    /// has no declared primary key or does not exist.
    pub fn table_primary_key(&mut self, table: &str) -> Result<Vec<String>, DbError> {
        statement::check_table(table)?;
        let (schema, name) = split_qualified(table);
        let rows = self.execute_with(
            "SELECT name FROM pragma_table_info(:table, :schema) WHERE pk > 0 ORDER BY pk",
            &[(":table", &name as &dyn ToSql), (":schema", &schema)],
        )?;
        Ok(rows.iter().filter_map(|row| text(row.value(0))).collect())
    }

    /// Column names of `schema.table` in declaration order. An empty
    /// `schema` means `main`.
    pub fn table_column_names(
        &mut self,
        table: &str,
        schema: &str,
    ) -> Result<Vec<String>, DbError> {
        statement::check_identifier(table)?;
        let schema = if schema.is_empty() {
            DEFAULT_SCHEMA
        } else {
            statement::check_identifier(schema)?;
            schema
        };
        let rows = self.execute_with(
            "SELECT name FROM pragma_table_info(:table, :schema) ORDER BY cid",
            &[(":table", &table as &dyn ToSql), (":schema", &schema)],
        )?;
        Ok(rows.iter().filter_map(|row| text(row.value(0))).collect())
    }

    /// Foreign-key column pairs `(child_column, parent_column)` by which
    /// `child` references `parent`, ordered by the child column's position.
    ///
    /// A foreign key declared without parent columns refers to the parent's
    /// primary key; those pairs are resolved against it.
    pub fn tables_relation(
        &mut self,
        child: &str,
        parent: &str,
    ) -> Result<Vec<(String, String)>, DbError> {
        statement::check_table(child)?;
        statement::check_table(parent)?;
        let (schema, child_name) = split_qualified(child);
        let (_, parent_name) = split_qualified(parent);

        let rows = self.execute_with(
            "SELECT fk.\"from\", fk.\"to\", fk.\"seq\" \
             FROM pragma_foreign_key_list(:table, :schema) AS fk \
             JOIN pragma_table_info(:table, :schema) AS col ON col.name = fk.\"from\" \
             WHERE fk.\"table\" = :parent COLLATE NOCASE \
             ORDER BY col.cid, fk.\"seq\"",
            &[
                (":table", &child_name as &dyn ToSql),
                (":schema", &schema),
                (":parent", &parent_name),
            ],
        )?;

        let mut parent_key: Option<Vec<String>> = None;
        let mut pairs = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(from) = text(row.value(0)) else {
                continue;
            };
            let to = match text(row.value(1)) {
                Some(to) => to,
                None => {
                    let seq = match row.value(2) {
                        Some(Value::Integer(seq)) => usize::try_from(*seq).unwrap_or(0),
                        _ => 0,
                    };
                    if parent_key.is_none() {
                        let qualified = format!("{schema}.{parent_name}");
                        parent_key = Some(self.table_primary_key(&qualified)?);
                    }
                    match parent_key.as_ref().and_then(|key| key.get(seq)) {
                        Some(to) => to.clone(),
                        None => continue,
                    }
                }
            };
            pairs.push((from, to));
        }

        tracing::debug!(child, parent, pairs = pairs.len(), "relation resolved");
        Ok(pairs)
    }

    /// Reads fields of one `table` row selected through its foreign keys.
    ///
    /// Each lookup joins the related table through the first column pair of
    /// the relation and filters it on `related_column = value`. The values
    /// come back in lookup order. When exactly two lookups name the same
    /// related table and column (a link table referencing one table twice),
    /// the relation must have at least two pairs and each lookup value
    /// resolves one of them; the two link columns are returned.
    ///
    /// Returns an empty vector when a relation is missing or no row matches.
    pub fn value_by_relation(
        &mut self,
        table: &str,
        lookups: &[RelationLookup],
    ) -> Result<Vec<Value>, DbError> {
        statement::check_table(table)?;
        for lookup in lookups {
            statement::check_table(&lookup.related_table)?;
            statement::check_identifier(&lookup.related_column)?;
            statement::check_identifier(&lookup.field)?;
        }

        match lookups {
            [] => Ok(Vec::new()),
            [a, b] if a.same_target(b) => self.value_by_link_table(table, a, b),
            _ => self.value_by_joins(table, lookups),
        }
    }

    fn value_by_joins(
        &mut self,
        table: &str,
        lookups: &[RelationLookup],
    ) -> Result<Vec<Value>, DbError> {
        let mut fields = Vec::with_capacity(lookups.len());
        let mut joins = String::new();
        let mut filters = Vec::with_capacity(lookups.len());
        let mut params = Vec::with_capacity(lookups.len());

        for (i, lookup) in lookups.iter().enumerate() {
            let relation = self.tables_relation(table, &lookup.related_table)?;
            let Some((child, parent)) = relation.into_iter().next() else {
                tracing::debug!(
                    table,
                    related = %lookup.related_table,
                    "no relation between tables"
                );
                return Ok(Vec::new());
            };

            let alias = format!("r{i}");
            fields.push(format!("{table}.{}", lookup.field));
            joins.push_str(&format!(
                " INNER JOIN {} AS {alias} ON ({table}.{} = {alias}.{})",
                lookup.related_table,
                quote(&child),
                quote(&parent),
            ));
            let name = statement::placeholder(&format!("v{i}"));
            filters.push(format!("{alias}.{} = {name}", lookup.related_column));
            params.push((name, lookup.value.clone()));
        }

        let sql = format!(
            "SELECT {} FROM {table}{joins} WHERE {} LIMIT 1",
            fields.join(", "),
            filters.join(" AND "),
        );
        self.first_row(&SqlStatement::new(sql, params))
    }

    fn value_by_link_table(
        &mut self,
        table: &str,
        first: &RelationLookup,
        second: &RelationLookup,
    ) -> Result<Vec<Value>, DbError> {
        let related = &first.related_table;
        let pairs = self.tables_relation(table, related)?;
        let [(c0, p0), (c1, p1), ..] = pairs.as_slice() else {
            tracing::debug!(table, related = %related, "link table needs two references");
            return Ok(Vec::new());
        };

        let (c0, p0, c1, p1) = (quote(c0), quote(p0), quote(c1), quote(p1));
        let column = &first.related_column;
        let sql = format!(
            "SELECT {c0}, {c1} FROM {table} \
             WHERE {c0} = (SELECT {p0} FROM {related} WHERE {column} = :v0) \
             AND {c1} = (SELECT {p1} FROM {related} WHERE {column} = :v1) LIMIT 1"
        );
        let params = vec![
            (":v0".to_string(), first.value.clone()),
            (":v1".to_string(), second.value.clone()),
        ];
        self.first_row(&SqlStatement::new(sql, params))
    }

    fn first_row(&mut self, stmt: &SqlStatement) -> Result<Vec<Value>, DbError> {
        let rows = self.execute_with(stmt.text(), &stmt.named_params())?;
        Ok(rows
            .into_rows()
            .into_iter()
            .next()
            .map(|row| row.into_values())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unqualified_names_default_to_main() {
        assert_eq!(split_qualified("orders"), ("main", "orders"));
        assert_eq!(split_qualified("aux.orders"), ("aux", "orders"));
    }

    #[test]
    fn catalog_names_are_quoted() {
        assert_eq!(quote("from"), "\"from\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}
