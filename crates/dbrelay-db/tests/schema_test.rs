use std::sync::Arc;

use dbrelay_db::{DbError, RelationLookup, Registry, Session, Value};
use dbrelay_types::IN_MEMORY_DB;
use dbrelay_types::ConnectionData;

fn open_catalog() -> Session {
    let mut session = Session::new(Arc::new(Registry::new()));
    session
        .open(&ConnectionData::new(IN_MEMORY_DB))
        .expect("failed to open database");

    let ddl = [
        "CREATE TABLE department (id INTEGER PRIMARY KEY, code TEXT UNIQUE NOT NULL)",
        "CREATE TABLE city (
            name TEXT NOT NULL,
            country TEXT NOT NULL,
            PRIMARY KEY (country, name)
        )",
        "CREATE TABLE employee (
            id INTEGER PRIMARY KEY,
            login TEXT NOT NULL,
            dept_id INTEGER REFERENCES department (id),
            city_country TEXT,
            city_name TEXT,
            FOREIGN KEY (city_country, city_name) REFERENCES city
        )",
        "CREATE TABLE person (id INTEGER PRIMARY KEY, nick TEXT UNIQUE NOT NULL)",
        "CREATE TABLE friendship (
            person_a INTEGER NOT NULL REFERENCES person (id),
            person_b INTEGER NOT NULL REFERENCES person (id),
            since TEXT
        )",
        "INSERT INTO department (id, code) VALUES (10, 'ops'), (20, 'dev')",
        "INSERT INTO city (name, country) VALUES ('Kazan', 'RU')",
        "INSERT INTO employee VALUES (1, 'anna', 20, 'RU', 'Kazan')",
        "INSERT INTO person (id, nick) VALUES (1, 'alice'), (2, 'bob'), (3, 'carol')",
        "INSERT INTO friendship VALUES (1, 2, '2020'), (3, 1, '2021')",
    ];
    for sql in ddl {
        session.execute(sql).expect("failed to set up catalog");
    }
    session
}

#[test]
fn primary_key_columns_in_key_order() {
    let mut session = open_catalog();
    assert_eq!(session.table_primary_key("employee").expect("pk"), ["id"]);
    let city_key = session.table_primary_key("city").expect("pk");
    assert_eq!(city_key, ["country", "name"]);
    let link_key = session.table_primary_key("friendship").expect("pk");
    assert!(link_key.is_empty(), "{link_key:?}");
    let missing = session.table_primary_key("no_such_table").expect("pk");
    assert!(missing.is_empty());
}

#[test]
fn column_names_in_declaration_order() {
    let mut session = open_catalog();
    assert_eq!(
        session.table_column_names("employee", "").expect("columns"),
        ["id", "login", "dept_id", "city_country", "city_name"]
    );
    let columns = session
        .table_column_names("person", "main")
        .expect("columns");
    assert_eq!(columns, ["id", "nick"]);
}

#[test]
fn relation_pairs_resolve_implicit_parent_key() {
    let mut session = open_catalog();
    let to_department = session
        .tables_relation("employee", "department")
        .expect("relation");
    assert_eq!(to_department, [("dept_id".to_string(), "id".to_string())]);

    let to_city = session
        .tables_relation("employee", "city")
        .expect("relation");
    assert_eq!(
        to_city,
        [
            ("city_country".to_string(), "country".to_string()),
            ("city_name".to_string(), "name".to_string()),
        ]
    );
    let reverse = session
        .tables_relation("department", "employee")
        .expect("relation");
    assert!(reverse.is_empty(), "relations point from child to parent");
}

#[test]
fn lookup_through_foreign_key() {
    let mut session = open_catalog();
    let values = session
        .value_by_relation(
            "employee",
            &[RelationLookup::new("dev".to_string(), "department", "code", "login")],
        )
        .expect("lookup");
    assert_eq!(values, [Value::Text("anna".to_string())]);

    let none = session
        .value_by_relation(
            "employee",
            &[RelationLookup::new("ops".to_string(), "department", "code", "login")],
        )
        .expect("lookup");
    assert!(none.is_empty());
}

#[test]
fn lookup_through_two_relations() {
    let mut session = open_catalog();
    let values = session
        .value_by_relation(
            "employee",
            &[
                RelationLookup::new("dev".to_string(), "department", "code", "login"),
                RelationLookup::new("RU".to_string(), "city", "country", "id"),
            ],
        )
        .expect("lookup");
    assert_eq!(values, [Value::Text("anna".to_string()), Value::Integer(1)]);
}

#[test]
fn link_table_resolves_both_references() {
    let mut session = open_catalog();
    let lookup = |nick: &str| RelationLookup::new(nick.to_string(), "person", "nick", "since");

    let values = session
        .value_by_relation("friendship", &[lookup("alice"), lookup("bob")])
        .expect("lookup");
    assert_eq!(values, [Value::Integer(1), Value::Integer(2)]);

    let reversed = session
        .value_by_relation("friendship", &[lookup("bob"), lookup("alice")])
        .expect("lookup");
    assert!(reversed.is_empty(), "link columns keep their order");
}

#[test]
fn lookup_without_relation_is_empty() {
    let mut session = open_catalog();
    let values = session
        .value_by_relation(
            "department",
            &[RelationLookup::new(1, "person", "id", "code")],
        )
        .expect("lookup");
    assert!(values.is_empty());
}

#[test]
fn unsafe_names_are_rejected() {
    let mut session = open_catalog();
    let err = session
        .value_by_relation(
            "employee",
            &[RelationLookup::new(1, "department", "code = 1 OR 1", "login")],
        )
        .expect_err("column is not an identifier");
    assert!(matches!(err, DbError::InvalidRecord(_)));
    let injected = session.table_primary_key("employee; DROP TABLE city");
    assert!(injected.is_err());
}
