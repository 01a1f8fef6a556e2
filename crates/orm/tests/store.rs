//! Integration tests for entity writes.

#![allow(missing_docs)]

mod common;

use common::{ManualKey, Person, Reading, Recorder, Tag, memory, seed_readings};
use ember_orm::{DriverErrorKind, EntityStore, Error, Filter, Query};

fn tag(code: &str, label: &str) -> Tag {
    Tag {
        code: code.to_string(),
        label: label.to_string(),
    }
}

#[test]
fn insert_writes_generated_key_back() {
    let conn = memory();
    let mut ann = Person {
        id: 0,
        name: "Ann".to_string(),
        nickname: None,
        age: 41,
    };
    conn.insert(&mut ann).unwrap();
    assert_eq!(ann.id, 1);

    let mut ben = Person {
        id: 0,
        name: "Ben".to_string(),
        nickname: Some("B".to_string()),
        age: 7,
    };
    conn.insert(&mut ben).unwrap();
    assert_eq!(ben.id, 2);

    assert_eq!(conn.find::<Person>(2_i64).unwrap(), Some(ben));
    assert_eq!(conn.find::<Person>(99_i64).unwrap(), None);
}

#[test]
fn explicit_keys_are_written_as_given() {
    let conn = memory();
    let mut manual = ManualKey {
        id: 42,
        note: "answer".to_string(),
    };
    conn.insert(&mut manual).unwrap();
    assert_eq!(manual.id, 42);

    let mut first = tag("rs", "Rust");
    conn.insert(&mut first).unwrap();
    assert_eq!(conn.find::<Tag>("rs").unwrap(), Some(first));

    let err = conn.insert(&mut tag("rs", "again")).unwrap_err();
    assert_eq!(err.driver_kind(), Some(DriverErrorKind::Constraint));
}

#[test]
fn update_overwrites_non_key_columns() {
    let conn = memory();
    seed_readings(&conn);

    let mut b = conn.find::<Reading>(2_i64).unwrap().unwrap();
    b.value = 25;
    b.name = "B2".to_string();
    assert_eq!(conn.update(&b).unwrap(), 1);
    assert_eq!(conn.find::<Reading>(2_i64).unwrap(), Some(b));

    let ghost = Reading {
        id: 99,
        name: "ghost".to_string(),
        value: 0,
    };
    assert_eq!(conn.update(&ghost).unwrap(), 0);
}

#[test]
fn deletes() {
    let conn = memory();
    seed_readings(&conn);

    let a = conn.find::<Reading>(1_i64).unwrap().unwrap();
    assert_eq!(conn.delete(&a).unwrap(), 1);
    assert_eq!(conn.delete(&a).unwrap(), 0);
    assert_eq!(conn.delete_by_key::<Reading>(3_i64).unwrap(), 1);

    let remaining = Query::<Reading>::new().unwrap().to_list(&conn).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "B");
}

#[test]
fn delete_many_requires_a_predicate() {
    let conn = memory();
    let recorder = Recorder::new();
    conn.subscribe(recorder.clone());

    assert_eq!(conn.delete_many::<Reading>(None).unwrap_err(), Error::MissingPredicate);
    assert!(recorder.statements().is_empty());

    assert_eq!(conn.delete_many::<Reading>(Some(Filter::gt("value", 0))).unwrap(), 0);

    seed_readings(&conn);
    assert_eq!(conn.delete_many::<Reading>(Some(Filter::gte("value", 20))).unwrap(), 2);
    assert_eq!(Query::<Reading>::new().unwrap().count(&conn).unwrap(), 1);
}

#[test]
fn upsert_inserts_then_overwrites() {
    let conn = memory();
    assert_eq!(conn.upsert(&tag("go", "Go")).unwrap(), 1);
    assert_eq!(conn.upsert(&tag("go", "Golang")).unwrap(), 1);

    let all = Query::<Tag>::new().unwrap().to_list(&conn).unwrap();
    assert_eq!(all, [tag("go", "Golang")]);
}

#[test]
fn insert_or_ignore_skips_existing_keys() {
    let conn = memory();
    assert_eq!(conn.insert_or_ignore(&tag("c", "C")).unwrap(), 1);
    assert_eq!(conn.insert_or_ignore(&tag("c", "changed")).unwrap(), 0);
    assert_eq!(conn.find::<Tag>("c").unwrap(), Some(tag("c", "C")));
}

#[test]
fn insert_all_is_atomic() {
    let conn = memory();
    let mut batch = vec![
        ManualKey {
            id: 1,
            note: "one".to_string(),
        },
        ManualKey {
            id: 1,
            note: "duplicate".to_string(),
        },
    ];
    let err = conn.insert_all(&mut batch).unwrap_err();
    assert!(err.is_driver());
    assert!(conn.is_autocommit());
    assert_eq!(Query::<ManualKey>::new().unwrap().count(&conn).unwrap(), 0);

    let mut readings: Vec<_> = (0..3)
        .map(|i| Reading {
            id: 0,
            name: format!("r{i}"),
            value: i,
        })
        .collect();
    assert_eq!(conn.insert_all(&mut readings).unwrap(), 3);
    assert_eq!(readings.iter().map(|r| r.id).collect::<Vec<_>>(), [1, 2, 3]);
}

#[test]
fn writes_join_the_callers_transaction() {
    let conn = memory();

    let tx = conn.begin().unwrap();
    tx.insert(&mut tag("a", "A")).unwrap();
    tx.insert_all(&mut [tag("b", "B"), tag("c", "C")]).unwrap();
    assert_eq!(Query::<Tag>::new().unwrap().count(&tx).unwrap(), 3);
    tx.rollback().unwrap();
    assert_eq!(Query::<Tag>::new().unwrap().count(&conn).unwrap(), 0);

    let tx = conn.begin().unwrap();
    tx.upsert(&tag("d", "D")).unwrap();
    tx.commit().unwrap();
    assert_eq!(Query::<Tag>::new().unwrap().count(&conn).unwrap(), 1);
}

#[test]
fn validation_fails_before_any_sql() {
    let conn = memory();
    let recorder = Recorder::new();
    conn.subscribe(recorder.clone());

    let mut long = Reading {
        id: 0,
        name: "é".repeat(9),
        value: 1,
    };
    let err = conn.insert(&mut long).unwrap_err();
    assert_eq!(
        err,
        Error::LengthExceeded {
            column: "name".to_string(),
            max: 16,
            actual: 18
        }
    );
    assert!(err.is_validation());
    assert!(recorder.statements().is_empty());

    long.name = "é".repeat(8);
    conn.insert(&mut long).unwrap();
    assert_eq!(recorder.statements().len(), 1);
}

#[test]
fn entities_without_keys_cannot_be_addressed() {
    ember_orm::entity! {
        table = "log_lines",
        #[derive(Debug, Clone)]
        pub struct LogLine {
            pub line: String,
        }
    }

    let conn = memory();
    conn.execute_batch("CREATE TABLE log_lines (line TEXT NOT NULL)").unwrap();
    let mut line = LogLine {
        line: "started".to_string(),
    };
    conn.insert(&mut line).unwrap();

    assert!(matches!(conn.update(&line), Err(Error::Mapping { .. })));
    assert!(matches!(conn.delete(&line), Err(Error::Mapping { .. })));
    assert!(matches!(conn.upsert(&line), Err(Error::Mapping { .. })));
    assert!(matches!(conn.find::<LogLine>("started"), Err(Error::Mapping { .. })));
    assert_eq!(conn.delete_many::<LogLine>(Some(Filter::eq("line", "started"))).unwrap(), 1);
}
