//! Integration tests for the fluent query surface.

#![allow(missing_docs)]

mod common;

use common::{Person, Reading, assert_sql_contains, memory, seed_readings};
use ember_orm::{EntityStore, Error, Filter, Query};

fn person(name: &str, nickname: Option<&str>, age: i32) -> Person {
    Person {
        id: 0,
        name: name.to_string(),
        nickname: nickname.map(str::to_string),
        age,
    }
}

#[test]
fn filter_order_and_page() {
    let conn = memory();
    seed_readings(&conn);

    let rows = Query::<Reading>::new()
        .unwrap()
        .filter(Filter::gte("value", 20))
        .order_by("id")
        .skip(0)
        .unwrap()
        .take(1)
        .unwrap()
        .to_list(&conn)
        .unwrap();

    assert_eq!(
        rows,
        [Reading {
            id: 2,
            name: "B".to_string(),
            value: 20
        }]
    );
}

#[test]
fn generated_sql_is_parameterized() {
    let statement = Query::<Reading>::new()
        .unwrap()
        .filter(Filter::eq("name", "x' OR 1=1 --"))
        .order_by_desc("value")
        .take(5)
        .unwrap()
        .statement()
        .unwrap();

    assert_sql_contains(
        &statement.sql,
        &["SELECT id, name, value FROM readings", "WHERE name = ?", "ORDER BY value DESC", "LIMIT ?"],
    );
    assert!(!statement.sql.contains("OR 1=1"));
    assert_eq!(statement.params.len(), 2);
}

#[test]
fn chained_filters_conjoin() {
    let conn = memory();
    seed_readings(&conn);
    let base = Query::<Reading>::new().unwrap();

    let chained = base.filter(Filter::gt("value", 10)).filter(Filter::lt("value", 30));
    let combined = base.filter(Filter::and([Filter::gt("value", 10), Filter::lt("value", 30)]));

    let chained = chained.to_list(&conn).unwrap();
    assert_eq!(chained, combined.to_list(&conn).unwrap());
    assert_eq!(chained.len(), 1);
    assert_eq!(chained[0].name, "B");
}

#[test]
fn builders_leave_the_receiver_untouched() {
    let conn = memory();
    seed_readings(&conn);
    let base = Query::<Reading>::new().unwrap().order_by("id");

    let high = base.filter(Filter::gt("value", 15));
    assert_eq!(high.count(&conn).unwrap(), 2);
    assert_eq!(base.count(&conn).unwrap(), 3);
    assert_eq!(base.to_list(&conn).unwrap().len(), 3);
}

#[test]
fn secondary_ordering_breaks_ties() {
    let conn = memory();
    for (name, age) in [("Cy", 30), ("Al", 40), ("Bo", 30), ("Di", 40)] {
        conn.insert(&mut person(name, None, age)).unwrap();
    }

    let names: Vec<String> = Query::<Person>::new()
        .unwrap()
        .order_by_desc("age")
        .then_by("name")
        .select("name")
        .unwrap()
        .to_list(&conn)
        .unwrap();
    assert_eq!(names, ["Al", "Di", "Bo", "Cy"]);
}

#[test]
fn skip_and_take_bound_results() {
    let conn = memory();
    for i in 0..10 {
        conn.insert(&mut Reading {
            id: 0,
            name: format!("r{i}"),
            value: i,
        })
        .unwrap();
    }
    let query = Query::<Reading>::new().unwrap().order_by("id");

    for (skip, take, expected) in [(0, 3, 3), (8, 5, 2), (10, 1, 0), (3, 0, 0)] {
        let page = query.skip(skip).unwrap().take(take).unwrap();
        assert_eq!(page.to_list(&conn).unwrap().len(), expected, "skip {skip} take {take}");
        assert_eq!(page.count(&conn).unwrap(), expected as u64, "count skip {skip} take {take}");
    }

    let tail = query.skip(7).unwrap().to_list(&conn).unwrap();
    assert_eq!(tail.iter().map(|r| r.value).collect::<Vec<_>>(), [7, 8, 9]);
}

#[test]
fn take_zero_is_empty() {
    let conn = memory();
    seed_readings(&conn);
    let none = Query::<Reading>::new().unwrap().take(0).unwrap();
    assert!(none.to_list(&conn).unwrap().is_empty());
    assert!(!none.any(&conn).unwrap());
    assert_eq!(none.first_or_default(&conn).unwrap(), None);
}

#[test]
fn negative_counts_are_rejected() {
    let query = Query::<Reading>::new().unwrap();
    assert_eq!(
        query.skip(-1).unwrap_err(),
        Error::NegativeCount {
            operation: "skip",
            count: -1
        }
    );
    assert!(matches!(query.take(-5), Err(Error::NegativeCount { operation: "take", .. })));
}

#[test]
fn cardinality_terminals() {
    let conn = memory();
    seed_readings(&conn);
    let all = Query::<Reading>::new().unwrap().order_by("id");
    let missing = all.filter(Filter::eq("name", "Z"));
    let one = all.filter(Filter::eq("name", "C"));

    assert_eq!(all.first(&conn).unwrap().name, "A");
    assert_eq!(missing.first(&conn).unwrap_err(), Error::NoRows);
    assert_eq!(missing.first_or_default(&conn).unwrap(), None);

    assert_eq!(one.single(&conn).unwrap().value, 30);
    assert_eq!(all.single(&conn).unwrap_err(), Error::MultipleRows);
    assert_eq!(all.single_or_default(&conn).unwrap_err(), Error::MultipleRows);
    assert_eq!(missing.single(&conn).unwrap_err(), Error::NoRows);
    assert_eq!(missing.single_or_default(&conn).unwrap(), None);

    assert!(all.any(&conn).unwrap());
    assert!(!missing.any(&conn).unwrap());
}

#[test]
fn null_comparisons_use_is_null() {
    let conn = memory();
    conn.insert(&mut person("Ann", Some("Annie"), 30)).unwrap();
    conn.insert(&mut person("Ben", None, 31)).unwrap();
    let people = Query::<Person>::new().unwrap();

    let unnamed = people.filter(Filter::eq("nickname", None::<String>)).single(&conn).unwrap();
    assert_eq!(unnamed.name, "Ben");
    let named = people.filter(Filter::is_not_null("nickname")).single(&conn).unwrap();
    assert_eq!(named.name, "Ann");
    let not_ann = people.filter(Filter::ne("nickname", "Annie")).to_list(&conn).unwrap();
    assert!(not_ann.is_empty(), "SQL three-valued logic excludes NULL from <>");

    let err = people.filter(Filter::gt("nickname", None::<String>)).to_list(&conn).unwrap_err();
    assert!(matches!(err, Error::InvalidPredicate(_)));
}

#[test]
fn in_lists() {
    let conn = memory();
    seed_readings(&conn);
    let readings = Query::<Reading>::new().unwrap();

    assert_eq!(readings.filter(Filter::r#in("value", [10, 30, 99])).count(&conn).unwrap(), 2);
    assert_eq!(readings.filter(Filter::r#in("value", Vec::<i32>::new())).count(&conn).unwrap(), 0);
    assert_eq!(
        readings.filter(Filter::not(Filter::r#in("value", Vec::<i32>::new()))).count(&conn).unwrap(),
        3
    );
}

#[test]
fn like_patterns_escape_wildcards() {
    let conn = memory();
    for name in ["50% off", "500 off", "a_b", "axb", "x!y"] {
        conn.insert(&mut Reading {
            id: 0,
            name: name.to_string(),
            value: 0,
        })
        .unwrap();
    }
    let names = |filter: Filter| -> Vec<String> {
        Query::<Reading>::new()
            .unwrap()
            .filter(filter)
            .order_by("id")
            .select("name")
            .unwrap()
            .to_list(&conn)
            .unwrap()
    };

    assert_eq!(names(Filter::contains("name", "0%")), ["50% off"]);
    assert_eq!(names(Filter::starts_with("name", "a_")), ["a_b"]);
    assert_eq!(names(Filter::ends_with("name", "!y")), ["x!y"]);
    assert_eq!(names(Filter::contains("name", "off")), ["50% off", "500 off"]);

    let err = Query::<Reading>::new()
        .unwrap()
        .filter(Filter::contains("value", "1"))
        .statement()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPredicate(_)));
}

#[test]
fn like_patterns_fold_ascii_case_only() {
    let conn = memory();
    for name in ["Alpha", "ÉCLAIR", "éclair"] {
        conn.insert(&mut Reading {
            id: 0,
            name: name.to_string(),
            value: 0,
        })
        .unwrap();
    }
    let names = |filter: Filter| -> Vec<String> {
        Query::<Reading>::new()
            .unwrap()
            .filter(filter)
            .order_by("id")
            .select("name")
            .unwrap()
            .to_list(&conn)
            .unwrap()
    };

    assert_eq!(names(Filter::contains("name", "a")), ["Alpha"]);
    assert_eq!(names(Filter::starts_with("name", "ALP")), ["Alpha"]);
    assert_eq!(names(Filter::ends_with("name", "HA")), ["Alpha"]);
    assert_eq!(names(Filter::starts_with("name", "é")), ["éclair"]);
    assert_eq!(names(Filter::contains("name", "CLAIR")), ["ÉCLAIR", "éclair"]);
}

#[test]
fn unknown_properties_fail_before_sql() {
    let query = Query::<Reading>::new().unwrap();
    let err = query.filter(Filter::eq("colour", "red")).statement().unwrap_err();
    assert!(matches!(err, Error::UnknownProperty { .. }));
    let err = query.order_by("colour").statement().unwrap_err();
    assert!(matches!(err, Error::UnknownProperty { .. }));
}

#[test]
fn parameter_limit_is_enforced() {
    let mut conn = memory();
    seed_readings(&conn);
    conn.set_max_parameters(100);
    let query = Query::<Reading>::new().unwrap();

    let err = query.filter(Filter::r#in("value", 0..101)).to_list(&conn).unwrap_err();
    assert_eq!(err, Error::TooManyParameters { count: 101, limit: 100 });
    assert_eq!(query.filter(Filter::r#in("value", 0..100)).count(&conn).unwrap(), 3);
}

#[test]
fn projections_decode_one_column() {
    let conn = memory();
    seed_readings(&conn);
    let query = Query::<Reading>::new().unwrap().order_by_desc("value");

    let values: Vec<i32> = query.select("value").unwrap().to_list(&conn).unwrap();
    assert_eq!(values, [30, 20, 10]);
    let top: String = query.select("name").unwrap().first(&conn).unwrap();
    assert_eq!(top, "C");

    let projection = query.select::<String>("name").unwrap();
    assert_sql_contains(&projection.statement().unwrap().sql, &["SELECT name FROM readings"]);
    assert!(matches!(query.select::<String>("colour"), Err(Error::UnknownProperty { .. })));
}

#[test]
fn cursor_iterates_lazily() {
    let conn = memory();
    seed_readings(&conn);
    let query = Query::<Reading>::new().unwrap().order_by("id");

    let mut cursor = query.cursor(&conn).unwrap();
    let mut iter = cursor.iter().unwrap();
    assert_eq!(iter.next().unwrap().unwrap().name, "A");
    assert_eq!(iter.next().unwrap().unwrap().name, "B");
    drop(iter);
    drop(cursor);

    let all: Vec<_> =
        query.cursor(&conn).unwrap().iter().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(all.len(), 3);
}
