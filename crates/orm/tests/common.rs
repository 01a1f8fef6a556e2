//! Common test helpers shared across integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use ember_orm::{
    AfterExecute, BeforeExecute, Connection, EntityStore, ExecutionObserver, entity, sql_enum,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

// Common test entities used across multiple test files

entity! {
    table = "readings",
    #[derive(Debug, Clone, PartialEq)]
    pub struct Reading {
        pub id: i64,
        pub name: String [max_length = 16],
        pub value: i32,
    }
}

entity! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Person {
        pub id: i64,
        pub name: String [max_length = 32],
        pub nickname: Option<String>,
        pub age: i32,
    }
}

entity! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Tag {
        pub code: String [key],
        pub label: String,
    }
}

entity! {
    table = "manual_keys",
    #[derive(Debug, Clone, PartialEq)]
    pub struct ManualKey {
        pub id: i64 [auto_increment = false],
        pub note: String,
    }
}

sql_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Priority {
        Low = 1,
        High = 2,
    }
}

entity! {
    table = "samples",
    #[derive(Debug, Clone, PartialEq)]
    pub struct Sample {
        pub id: i64,
        pub flag: bool,
        pub tiny: u8,
        pub big: i64,
        pub ratio: f64,
        pub amount: Decimal [decimal = (12, 2)],
        pub guid: Uuid,
        pub day: NaiveDate,
        pub at: NaiveTime,
        pub stamp: DateTime<Utc>,
        pub span: TimeDelta,
        pub text: Option<String>,
        pub bytes: Vec<u8>,
        pub priority: Priority;
        ignore {
            pub scratch: String,
        }
    }
}

const SCHEMA: &str = "
    CREATE TABLE readings (id INTEGER PRIMARY KEY, name TEXT NOT NULL, value INTEGER NOT NULL);
    CREATE TABLE persons (
        id INTEGER PRIMARY KEY, name TEXT NOT NULL, nickname TEXT, age INTEGER NOT NULL
    );
    CREATE TABLE tags (code TEXT PRIMARY KEY, label TEXT NOT NULL);
    CREATE TABLE manual_keys (id INTEGER PRIMARY KEY, note TEXT NOT NULL);
    CREATE TABLE samples (
        id INTEGER PRIMARY KEY, flag INTEGER NOT NULL, tiny INTEGER NOT NULL,
        big INTEGER NOT NULL, ratio REAL NOT NULL, amount INTEGER NOT NULL,
        guid BLOB NOT NULL, day INTEGER NOT NULL, at INTEGER NOT NULL,
        stamp INTEGER NOT NULL, span INTEGER NOT NULL, text TEXT, bytes BLOB NOT NULL,
        priority INTEGER NOT NULL
    );
";

/// Creates every test table on `conn`.
#[allow(clippy::missing_panics_doc)]
pub fn create_tables(conn: &Connection) {
    conn.execute_batch(SCHEMA).expect("should create tables");
}

/// An in-memory connection with every test table created.
#[allow(clippy::missing_panics_doc)]
pub fn memory() -> Connection {
    let conn = Connection::open_in_memory().expect("should open in-memory database");
    create_tables(&conn);
    conn
}

/// Seeds `readings` with `(1, A, 10)`, `(2, B, 20)`, `(3, C, 30)`.
#[allow(clippy::missing_panics_doc)]
pub fn seed_readings(conn: &Connection) {
    for (name, value) in [("A", 10), ("B", 20), ("C", 30)] {
        let mut reading = Reading {
            id: 0,
            name: name.to_string(),
            value,
        };
        conn.insert(&mut reading).expect("should insert reading");
    }
}

#[must_use]
pub fn sample() -> Sample {
    Sample {
        id: 0,
        flag: true,
        tiny: 255,
        big: i64::MIN,
        ratio: -0.125,
        amount: Decimal::new(-123_456, 2),
        guid: Uuid::from_u128(0x0123_4567_89ab_cdef_0011_2233_4455_6677),
        day: NaiveDate::from_ymd_opt(2024, 2, 29).expect("valid date"),
        at: NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).expect("valid time"),
        stamp: DateTime::from_timestamp(1_700_000_000, 123_000_000).expect("valid instant"),
        span: TimeDelta::milliseconds(-90_061_001),
        text: Some("grüße".to_string()),
        bytes: vec![0, 1, 254, 255],
        priority: Priority::High,
        scratch: String::new(),
    }
}

/// Records the SQL of every statement it observes.
#[derive(Default)]
pub struct Recorder {
    pub before: Mutex<Vec<String>>,
    pub after: Mutex<Vec<(String, bool)>>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.before.lock().clone()
    }
}

impl ExecutionObserver for Recorder {
    fn before_execute(&self, event: &BeforeExecute<'_>) -> anyhow::Result<()> {
        self.before.lock().push(event.sql.to_string());
        Ok(())
    }

    fn after_execute(&self, event: &AfterExecute<'_>) -> anyhow::Result<()> {
        self.after.lock().push((event.sql.to_string(), event.error.is_none()));
        Ok(())
    }
}

/// Normalize SQL by collapsing whitespace.
fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonicalize SQL for comparison by removing identifier quotes and normalizing whitespace.
/// Preserves quotes inside string literals.
fn canonicalize_sql(sql: &str) -> String {
    let mut in_literal = false;
    let cleaned: String = sql
        .chars()
        .filter(|&ch| {
            if ch == '\'' {
                in_literal = !in_literal;
            }
            ch != '"' || in_literal
        })
        .collect();
    normalize_sql(&cleaned)
}

/// Assert that SQL contains all expected fragments in order, ignoring
/// identifier quotes and whitespace.
#[allow(clippy::missing_panics_doc)]
pub fn assert_sql_contains(actual: &str, fragments: &[&str]) {
    let actual_canonical = canonicalize_sql(actual);
    let mut search_start = 0usize;

    for fragment in fragments {
        let fragment_canonical = canonicalize_sql(fragment);
        match actual_canonical[search_start..].find(&fragment_canonical) {
            Some(pos) => search_start += pos + fragment_canonical.len(),
            None => panic!(
                "expected SQL fragment `{fragment_canonical}` not found in `{actual_canonical}`"
            ),
        }
    }
}
