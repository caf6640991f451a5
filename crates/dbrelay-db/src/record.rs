//! Ordered field set used to synthesize INSERT, UPDATE and DELETE statements.

use rusqlite::types::Value;

/// One field of a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    value: Value,
    is_key: bool,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Key fields form the WHERE clause of updates and deletes.
    pub fn is_key(&self) -> bool {
        self.is_key
    }
}

/// Ordered `(name, value, is_key)` triples.
///
/// Names are unique: inserting an existing name replaces its value in place
/// and keeps its position and key marker. Insertion order is the column
/// order of generated statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<Field>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a non-key field, or replaces the value of an existing one.
    pub fn insert_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.fields[i].value = value,
            None => self.fields.push(Field {
                name,
                value,
                is_key: false,
            }),
        }
    }

    /// Appends (or replaces) a field and marks it as a key.
    pub fn insert_key(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        self.insert_value(name.clone(), value);
        self.set_key(&name, true);
    }

    /// Builder form of [`Record::insert_value`].
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert_value(name, value);
        self
    }

    /// Builder form of [`Record::insert_key`].
    pub fn with_key(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert_key(name, value);
        self
    }

    /// Sets the key marker of `name`. Returns `false` if there is no such field.
    pub fn set_key(&mut self, name: &str, is_key: bool) -> bool {
        match self.position(name) {
            Some(i) => {
                self.fields[i].is_key = is_key;
                true
            }
            None => false,
        }
    }

    /// Returns the key marker of `name`, or `None` if there is no such field.
    pub fn is_key(&self, name: &str) -> Option<bool> {
        self.position(name).map(|i| self.fields[i].is_key)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|i| &self.fields[i].value)
    }

    /// Removes `name` and returns its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.position(name).map(|i| self.fields.remove(i).value)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn keys(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_key)
    }

    pub fn non_keys(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| !f.is_key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_is_kept() {
        let record = Record::new()
            .with_value("name", "x".to_string())
            .with_key("id", 7)
            .with_value("size", 1.5);

        let names: Vec<&str> = record.fields().iter().map(Field::name).collect();
        assert_eq!(names, ["name", "id", "size"]);
        assert_eq!(record.is_key("id"), Some(true));
        assert_eq!(record.is_key("name"), Some(false));
        assert_eq!(record.is_key("missing"), None);
    }

    #[test]
    fn reinserting_a_name_replaces_in_place() {
        let mut record = Record::new()
            .with_key("id", 1)
            .with_value("path", "/a".to_string());
        record.insert_value("id", 2);

        assert_eq!(record.len(), 2);
        assert_eq!(record.value("id"), Some(&Value::Integer(2)));
        assert_eq!(record.is_key("id"), Some(true), "key marker survives");
        assert_eq!(record.fields()[0].name(), "id");
    }

    #[test]
    fn key_markers_can_be_toggled() {
        let mut record = Record::new().with_value("id", 1);
        assert!(record.set_key("id", true));
        assert_eq!(record.keys().count(), 1);
        assert_eq!(record.non_keys().count(), 0);
        assert!(!record.set_key("absent", true));

        assert_eq!(record.remove("id"), Some(Value::Integer(1)));
        assert!(record.is_empty());
    }
}
