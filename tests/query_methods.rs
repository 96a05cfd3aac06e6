use parking_lot::Mutex;
use sqlx_named_query::prelude::*;
use sqlx_named_query::{BoundStatement, BoxError, ExecutionOutcome, Executor, StatementKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Song {
    id: i64,
    name: &'static str,
    release_year: i64,
}

/// A tiny in-memory song table that understands the statements used below.
struct Library {
    songs: Mutex<Vec<Song>>,
    calls: AtomicUsize,
}

impl Library {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            songs: Mutex::new(vec![
                Song { id: 1, name: "Wonderwall", release_year: 1995 },
                Song { id: 2, name: "Champagne Supernova", release_year: 1995 },
                Song { id: 3, name: "Some Might Say", release_year: 1995 },
                Song { id: 4, name: "Supersonic", release_year: 1994 },
            ]),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Executor for Library {
    fn execute(&self, statement: &BoundStatement) -> Result<ExecutionOutcome, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut songs = self.songs.lock();
        let sql = statement.sql.as_str();
        let ints: Vec<i64> = statement.values.iter().filter_map(Value::as_i64).collect();

        if sql.starts_with("SELECT id, name, release_year AS year FROM song WHERE release_year = ?") {
            let mut rows = RowSet::new(["id", "name", "year"]);
            for song in songs.iter().filter(|s| s.release_year == ints[0]) {
                rows = rows.with_row([
                    Value::from(song.id),
                    Value::from(song.name),
                    Value::from(song.release_year),
                ]);
            }
            Ok(ExecutionOutcome::Rows(rows))
        } else if sql.starts_with("SELECT name FROM song WHERE id IN(") {
            let mut rows = RowSet::new(["name"]);
            for song in songs.iter().filter(|s| ints.contains(&s.id)) {
                rows = rows.with_row([song.name]);
            }
            Ok(ExecutionOutcome::Rows(rows))
        } else if sql.starts_with("SELECT MAX(release_year) AS latest FROM song WHERE name = ?") {
            let name = statement.values[0].as_str().unwrap_or_default();
            let mut rows = RowSet::new(["latest"]);
            for song in songs.iter().filter(|s| s.name == name) {
                rows = rows.with_row([song.release_year]);
            }
            Ok(ExecutionOutcome::Rows(rows))
        } else if sql.starts_with("SELECT COUNT(*) AS total FROM song") {
            Ok(ExecutionOutcome::Rows(
                RowSet::new(["total"]).with_row([songs.len() as i64]),
            ))
        } else if statement.kind == StatementKind::Insert {
            let id = songs.iter().map(|s| s.id).max().unwrap_or(0) + 1;
            songs.push(Song { id, name: "Untitled", release_year: ints[0] });
            Ok(ExecutionOutcome::RowId(id))
        } else if sql.starts_with("DELETE FROM song WHERE release_year = ?") {
            let before = songs.len();
            songs.retain(|s| s.release_year != ints[0]);
            Ok(ExecutionOutcome::RowsAffected((before - songs.len()) as u64))
        } else {
            Err(format!("unexpected statement: {sql}").into())
        }
    }
}

fn schema() -> SchemaSnapshot {
    SchemaSnapshot::new()
        .with_table("song", ["id", "name", "release_year"])
        .with_table("album", ["id", "title"])
}

fn compile(definition: QueryDefinition) -> Result<PreparedQuery> {
    PreparedQuery::compile(definition, &schema(), &BinderConfig::default())
}

fn names(output: &QueryOutput) -> Vec<String> {
    match output {
        QueryOutput::List(items) => items
            .iter()
            .map(|item| match item {
                Mapped::Scalar(value) => value.as_str().unwrap().to_owned(),
                Mapped::Record(record) => record.get("name").unwrap().as_str().unwrap().to_owned(),
            })
            .collect(),
        other => panic!("expected a list, got {other:?}"),
    }
}

#[test]
fn test_find_songs_by_release_year() {
    let query = compile(
        QueryDefinition::new(
            "findSongsByReleaseYear",
            "SELECT id, name, release_year AS year FROM song WHERE release_year = :year",
            ReturnShape::collection(ReturnShape::record(
                RecordShape::new("Song")
                    .field("id", ValueType::Integer)
                    .field("name", ValueType::Text)
                    .renamed_field("releaseYear", "year", ValueType::Integer),
            )),
        )
        .param("year", ValueType::Integer),
    )
    .unwrap();
    assert!(query.column_mapping().unwrap().warning().is_none());

    let library = Library::new();
    let output = query
        .execute(&*library, &Arguments::new().with("year", 1995))
        .unwrap();
    assert_eq!(
        names(&output),
        vec!["Wonderwall", "Champagne Supernova", "Some Might Say"]
    );

    let QueryOutput::List(items) = output else {
        panic!("expected a list");
    };
    let Mapped::Record(first) = &items[0] else {
        panic!("expected a record");
    };
    assert_eq!(first.get("releaseYear"), Some(&Value::Integer(1995)));
}

#[test]
fn test_collection_parameter_expands_per_call() {
    let query = compile(
        QueryDefinition::new(
            "findNames",
            "SELECT name FROM song WHERE id IN(:songIds)",
            ReturnShape::collection(ReturnShape::Scalar(ValueType::Text)),
        )
        .collection_param("songIds", ValueType::Integer),
    )
    .unwrap();

    let statement = query
        .bind(&Arguments::new().with_list("songIds", [1, 2, 3]))
        .unwrap();
    assert_eq!(statement.sql, "SELECT name FROM song WHERE id IN(?, ?, ?)");
    assert_eq!(statement.values.len(), 3);

    let library = Library::new();
    let output = query
        .execute(&*library, &Arguments::new().with_list("songIds", [4]))
        .unwrap();
    assert_eq!(names(&output), vec!["Supersonic"]);

    let at_limit = Arguments::new().with_list("songIds", 0..999);
    assert_eq!(query.bind(&at_limit).unwrap().values.len(), 999);

    let over_limit = Arguments::new().with_list("songIds", 0..1000);
    let calls = library.calls();
    let err = query.execute(&*library, &over_limit).unwrap_err();
    assert!(matches!(
        err,
        Error::TooManyBindParameters {
            required: 1000,
            limit: 999,
            from_collection: true,
        }
    ));
    assert!(!err.is_definition_time());
    assert_eq!(library.calls(), calls);
}

#[test]
fn test_single_value_shapes_on_empty_results() {
    let sql = "SELECT MAX(release_year) AS latest FROM song WHERE name = :name";
    let strict = compile(
        QueryDefinition::new("latest", sql, ReturnShape::Scalar(ValueType::Integer))
            .param("name", ValueType::Text),
    )
    .unwrap();
    let optional = compile(
        QueryDefinition::new("latest", sql, ReturnShape::OptionalScalar(ValueType::Integer))
            .param("name", ValueType::Text),
    )
    .unwrap();

    let library = Library::new();
    let found = Arguments::new().with("name", "Supersonic");
    let missing = Arguments::new().with("name", "Live Forever");

    assert_eq!(
        strict.execute(&*library, &found).unwrap(),
        QueryOutput::Value(Mapped::Scalar(Value::Integer(1994)))
    );
    assert!(matches!(
        strict.execute(&*library, &missing),
        Err(Error::EmptyResult)
    ));
    assert_eq!(
        optional.execute(&*library, &missing).unwrap(),
        QueryOutput::Absent
    );
}

#[test]
fn test_write_statements() {
    let library = Library::new();
    let insert = compile(
        QueryDefinition::new(
            "insertSong",
            "INSERT INTO song (release_year) VALUES (:year)",
            ReturnShape::RowId,
        )
        .param("year", ValueType::Integer),
    )
    .unwrap();
    let delete = compile(
        QueryDefinition::new(
            "deleteByYear",
            "DELETE FROM song WHERE release_year = :year",
            ReturnShape::RowCount,
        )
        .param("year", ValueType::Integer),
    )
    .unwrap();

    assert_eq!(
        insert
            .execute(&*library, &Arguments::new().with("year", 2008))
            .unwrap(),
        QueryOutput::RowId(5)
    );
    assert_eq!(
        delete
            .execute(&*library, &Arguments::new().with("year", 1995))
            .unwrap(),
        QueryOutput::RowCount(3)
    );
}

#[test]
fn test_definition_errors_are_reported_before_any_call() {
    let err = compile(
        QueryDefinition::new(
            "findByYear",
            "SELECT name FROM song WHERE release_year = :releaseYear",
            ReturnShape::collection(ReturnShape::Scalar(ValueType::Text)),
        )
        .param("year", ValueType::Integer),
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnresolvedParameter(ref p) if p == "releaseYear"));
    assert!(err.is_definition_time());

    let err = compile(QueryDefinition::new(
        "titles",
        "SELECT title FROM song",
        ReturnShape::collection(ReturnShape::Scalar(ValueType::Text)),
    ))
    .unwrap_err();
    assert!(matches!(err, Error::UnknownColumn { .. }));

    let err = compile(QueryDefinition::new(
        "lookup",
        "SELECT name FROM song WHERE name = ':name'",
        ReturnShape::collection(ReturnShape::Scalar(ValueType::Text)),
    ));
    // quoted text is not a placeholder, so nothing needs resolving
    assert!(err.is_ok());
}

#[test]
fn test_partial_record_mapping_warns() {
    let query = compile(QueryDefinition::new(
        "songTitles",
        "SELECT id, name FROM song",
        ReturnShape::collection(ReturnShape::record(
            RecordShape::new("SongTitle")
                .field("name", ValueType::Text)
                .field("subtitle", ValueType::Text),
        )),
    ))
    .unwrap();

    let warning = query.column_mapping().unwrap().warning().unwrap();
    assert_eq!(warning.record, "SongTitle");
    assert_eq!(warning.unused_columns, vec!["id"]);
    assert_eq!(warning.unset_fields, vec!["subtitle"]);
}

#[test]
fn test_observed_count_follows_song_changes() {
    let library = Library::new();
    let tracker = Arc::new(InvalidationTracker::new());
    let query = Arc::new(
        compile(QueryDefinition::new(
            "countSongs",
            "SELECT COUNT(*) AS total FROM song",
            ReturnShape::reactive(ReturnShape::Scalar(ValueType::Integer)),
        ))
        .unwrap(),
    );
    let insert = compile(
        QueryDefinition::new(
            "insertSong",
            "INSERT INTO song (release_year) VALUES (:year)",
            ReturnShape::RowId,
        )
        .param("year", ValueType::Integer),
    )
    .unwrap();

    let totals = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let totals = Arc::clone(&totals);
        move |item: Result<QueryOutput>| {
            if let Ok(QueryOutput::Value(Mapped::Scalar(Value::Integer(n)))) = item {
                totals.lock().push(n);
            }
        }
    };
    let subscription = query
        .observe(&Arguments::new(), library.clone(), tracker.clone(), sink)
        .unwrap();
    assert_eq!(*totals.lock(), vec![4]);

    insert
        .execute(&*library, &Arguments::new().with("year", 2008))
        .unwrap();
    tracker.notify(insert.tables().iter().cloned());
    assert_eq!(*totals.lock(), vec![4, 5]);

    // changes to tables the query does not read are ignored
    tracker.notify(["album"]);
    assert_eq!(*totals.lock(), vec![4, 5]);

    subscription.unsubscribe();
    tracker.notify(["song"]);
    assert_eq!(*totals.lock(), vec![4, 5]);
}

#[test]
fn test_registry_with_configured_ceiling() {
    let config = BinderConfig::from_toml_str("max_bind_parameters = 2").unwrap();
    let registry = QueryRegistry::new(Arc::new(schema()), config);

    let query = registry
        .register(
            QueryDefinition::new(
                "findNames",
                "SELECT name FROM song WHERE id IN(:songIds)",
                ReturnShape::collection(ReturnShape::Scalar(ValueType::Text)),
            )
            .collection_param("songIds", ValueType::Integer),
        )
        .unwrap();

    assert!(query
        .bind(&Arguments::new().with_list("songIds", [1, 2]))
        .is_ok());
    assert!(matches!(
        query.bind(&Arguments::new().with_list("songIds", [1, 2, 3])),
        Err(Error::TooManyBindParameters { limit: 2, .. })
    ));
    assert!(Arc::ptr_eq(&query, &registry.get("findNames").unwrap()));
}
