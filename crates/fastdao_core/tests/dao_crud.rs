mod common;

use chrono::{NaiveDate, NaiveTime};
use common::{memory_source, Book, Event, Reading, Status, Tag, Token};
use fastdao_core::db::ConnectionGuard;
use fastdao_core::{Dao, DaoError, FieldKind, FieldValue, Operation, QueryArg, StorageCause};
use uuid::Uuid;

#[test]
fn insert_writes_back_generated_key_and_round_trips() {
    let source = memory_source();
    let dao = Dao::<Book>::with_source(source).unwrap();

    let mut book = Book::new("Dune", 412);
    book.status = Status::Published;
    book.published = NaiveDate::from_ymd_opt(1965, 8, 1);
    book.summary = Some("desert planet".to_string());
    book.cover = Some(vec![0x89, 0x50, 0x4e, 0x47]);
    book.author = Some(7);

    let key = dao.insert(&mut book).unwrap();
    assert_eq!(key, FieldValue::Integer(1));
    assert_eq!(book.id, Some(1));

    let loaded = dao.get_by_pk(1_i64).unwrap().unwrap();
    assert_eq!(loaded, book);
}

#[test]
fn insert_keeps_a_caller_supplied_key() {
    let dao = Dao::<Book>::with_source(memory_source()).unwrap();

    let mut book = Book::new("Solaris", 204);
    book.id = Some(42);
    assert_eq!(dao.insert(&mut book).unwrap(), FieldValue::Integer(42));

    let mut token = Token {
        id: Some(Uuid::new_v4()),
        owner: "ops".to_string(),
    };
    let tokens = Dao::<Token>::with_source(memory_source()).unwrap();
    let key = tokens.insert(&mut token).unwrap();
    assert_eq!(key, FieldValue::Uuid(token.id.unwrap()));
    assert_eq!(
        tokens.get_by_pk(token.id.unwrap()).unwrap().unwrap().owner,
        "ops"
    );
}

#[test]
fn update_and_delete_by_record() {
    let dao = Dao::<Book>::with_source(memory_source()).unwrap();
    let mut book = Book::new("Draft title", 10);
    dao.insert(&mut book).unwrap();

    book.title = "Final title".to_string();
    book.status = Status::Retired;
    assert_eq!(dao.update(&book).unwrap(), 1);
    let loaded = dao.get_by_pk(book.id.unwrap()).unwrap().unwrap();
    assert_eq!(loaded.title, "Final title");
    assert_eq!(loaded.status, Status::Retired);

    assert_eq!(dao.delete(&book).unwrap(), 1);
    assert!(dao.get_by_pk(book.id.unwrap()).unwrap().is_none());
    assert!(dao.get_all().unwrap().is_empty());
}

#[test]
fn update_query_is_stable_and_skips_the_key() {
    let dao = Dao::<Book>::with_source(memory_source()).unwrap();
    let first = dao.update_query();
    assert_eq!(
        first,
        "UPDATE books SET title=?,page_count=?,status=?,published=?,summary=?,cover=?,author=? WHERE id=?"
    );
    assert!(std::ptr::eq(first, dao.update_query()));
}

#[test]
fn select_expands_list_arguments() {
    let dao = Dao::<Book>::with_source(memory_source()).unwrap();
    for (title, pages) in [("a", 10), ("b", 20), ("c", 30), ("d", 40)] {
        dao.insert(&mut Book::new(title, pages)).unwrap();
    }

    let found = dao
        .select(
            "SELECT * FROM books WHERE page_count IN (?) AND title <> ? ORDER BY id",
            &[QueryArg::list([10_i64, 30, 40]), "d".into()],
        )
        .unwrap();
    let titles: Vec<_> = found.iter().map(|book| book.title.as_str()).collect();
    assert_eq!(titles, vec!["a", "c"]);
}

#[test]
fn select_reports_argument_mismatch_before_touching_storage() {
    let dao = Dao::<Book>::with_source(memory_source()).unwrap();
    let err = dao
        .select(
            "SELECT * FROM books WHERE id=? AND title=?",
            &[QueryArg::from(1_i64)],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        DaoError::ArgumentMismatch {
            placeholders: 2,
            arguments: 1
        }
    ));
}

#[test]
fn select_ignores_columns_without_a_field() {
    let dao = Dao::<Book>::with_source(memory_source()).unwrap();
    dao.insert(&mut Book::new("Ubik", 202)).unwrap();

    let found = dao
        .select(
            "SELECT title, page_count, 'extra' AS shelf FROM books WHERE title=?",
            &["Ubik".into()],
        )
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].pages, 202);
    assert_eq!(found[0].id, None);
}

#[test]
fn malformed_sql_is_a_tagged_storage_error() {
    let dao = Dao::<Book>::with_source(memory_source()).unwrap();
    let err = dao.select("SELECT * FROM nowhere", &[]).unwrap_err();
    assert!(matches!(
        err,
        DaoError::Storage {
            operation: Operation::Select,
            cause: StorageCause::Db(_)
        }
    ));
    assert!(err.to_string().starts_with("select: "));
}

#[test]
fn get_by_pk_needs_exactly_one_row() {
    let source = memory_source();
    let dao = Dao::<Book>::with_source(source.clone()).unwrap();
    assert!(dao.get_by_pk(99_i64).unwrap().is_none());
    assert!(dao.get_by_pk(FieldValue::Null).unwrap().is_none());

    let events = Dao::<Event>::with_source(source.clone()).unwrap();
    let at = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    events
        .insert(&mut Event {
            name: "standup".to_string(),
            at,
        })
        .unwrap();
    {
        // Two rows sharing one synthesized key value cannot be told apart.
        let conn = ConnectionGuard::acquire(&*source).unwrap();
        conn.execute_batch("ALTER TABLE events RENAME TO events_old;
             CREATE TABLE events (events_id INTEGER, name TEXT, at TEXT);
             INSERT INTO events SELECT * FROM events_old;
             INSERT INTO events SELECT * FROM events_old;")
            .unwrap();
    }
    assert!(events.get_by_pk(1_i64).unwrap().is_none());
}

#[test]
fn delete_by_pk_checks_the_key_type_first() {
    let dao = Dao::<Book>::with_source(memory_source()).unwrap();
    let err = dao.delete_by_pk("12").unwrap_err();
    match err {
        DaoError::KeyTypeMismatch { expected, actual } => {
            assert_eq!(expected, FieldKind::Integer);
            assert_eq!(actual, "text");
        }
        other => panic!("unexpected error: {other}"),
    }

    let tokens = Dao::<Token>::with_source(memory_source()).unwrap();
    let err = tokens.delete_by_pk(5_i64).unwrap_err();
    assert_eq!(
        err.to_string(),
        "unexpected primary key type: expected uuid but passed integer"
    );

    let mut book = Book::new("Kept", 1);
    dao.insert(&mut book).unwrap();
    assert_eq!(dao.delete_by_pk(book.id.unwrap()).unwrap(), 1);
    assert_eq!(dao.delete_by_pk(book.id.unwrap()).unwrap(), 0);
}

#[test]
fn converters_run_in_both_directions() {
    let source = memory_source();
    let dao = Dao::<Tag>::with_source(source.clone()).unwrap();
    let mut tag = Tag {
        id: None,
        labels: vec!["sci-fi".to_string(), "classic".to_string()],
    };
    dao.insert(&mut tag).unwrap();

    let conn = ConnectionGuard::acquire(&*source).unwrap();
    let stored: String = conn
        .query_row("SELECT labels FROM tags WHERE id = ?1", [tag.id], |row| {
            row.get(0)
        })
        .unwrap();
    drop(conn);
    assert_eq!(stored, "sci-fi,classic");

    let loaded = dao.get_all().unwrap();
    assert_eq!(loaded, vec![tag]);
}

#[test]
fn keyless_entities_insert_but_cannot_update_by_record() {
    let dao = Dao::<Event>::with_source(memory_source()).unwrap();
    assert_eq!(dao.mapping().pk_column(), "events_id");

    let mut event = Event {
        name: "deploy".to_string(),
        at: NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_milli_opt(3, 4, 5, 600)
            .unwrap(),
    };
    assert_eq!(dao.insert(&mut event).unwrap(), FieldValue::Integer(1));
    assert_eq!(dao.get_all().unwrap(), vec![event.clone()]);

    assert!(matches!(
        dao.update(&event).unwrap_err(),
        DaoError::MissingKey {
            operation: Operation::UpdateSingle
        }
    ));
    assert_eq!(dao.delete_by_pk(1_i64).unwrap(), 1);
}

#[test]
fn stored_enum_names_must_be_known() {
    let source = memory_source();
    let dao = Dao::<Book>::with_source(source.clone()).unwrap();
    {
        let conn = ConnectionGuard::acquire(&*source).unwrap();
        conn.execute(
            "INSERT INTO books (title, page_count, status) VALUES ('x', 1, 'Lost')",
            [],
        )
        .unwrap();
    }

    let err = dao.get_all().unwrap_err();
    assert!(matches!(
        err,
        DaoError::Storage {
            operation: Operation::Select,
            cause: StorageCause::Field(_)
        }
    ));
}

#[test]
fn real_bool_and_time_fields_round_trip_through_storage() {
    let source = memory_source();
    let books = Dao::<Book>::with_source(source.clone()).unwrap();
    let mut book = Book::new("Gateway", 313);
    books.insert(&mut book).unwrap();

    let readings = Dao::<Reading>::with_source(source).unwrap();
    let mut reading = Reading {
        id: None,
        book: book.id,
        rating: 4.25,
        finished: true,
        started: NaiveTime::from_hms_milli_opt(21, 30, 15, 250),
    };
    readings.insert(&mut reading).unwrap();
    let loaded = readings.get_by_pk(reading.id.unwrap()).unwrap().unwrap();
    assert_eq!(loaded, reading);

    let mut unfinished = Reading {
        rating: 3.0,
        ..Reading::default()
    };
    readings.insert(&mut unfinished).unwrap();
    let loaded = readings.get_by_pk(unfinished.id.unwrap()).unwrap().unwrap();
    assert_eq!(loaded, unfinished);
    assert!(!loaded.finished);
    assert_eq!(loaded.started, None);
}

#[test]
fn byte_arguments_match_blob_columns() {
    let dao = Dao::<Book>::with_source(memory_source()).unwrap();
    let mut book = Book::new("Blindsight", 384);
    book.cover = Some(vec![0xff, 0xd8, 0xff]);
    dao.insert(&mut book).unwrap();
    dao.insert(&mut Book::new("No cover", 1)).unwrap();

    let found = dao
        .select(
            "SELECT * FROM books WHERE cover = ?",
            &[QueryArg::bytes(vec![0xff, 0xd8, 0xff])],
        )
        .unwrap();
    assert_eq!(found, vec![book]);
}
