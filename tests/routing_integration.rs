use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use shardbridge::gateway::memory::MemoryConnector;
use shardbridge::gateway::parse_select;
use shardbridge::router::ShardRouter;
use shardbridge::value::ColumnValues;
use shardbridge::{CoordError, Coordinator, Response, RowIdCodec, Scalar, SelectResult};

fn open(shards: usize, parallelism: usize) -> Result<(Arc<MemoryConnector>, Coordinator)> {
    let connector = Arc::new(MemoryConnector::new(shards));
    let db = Coordinator::builder(connector.clone())
        .shards(shards)
        .parallelism(parallelism)
        .routing_seed(42)
        .build()?;
    Ok((connector, db))
}

fn create_docs(db: &Coordinator) -> Result<()> {
    db.execute("table_create Docs TABLE_NO_KEY")?;
    db.execute("column_create Docs title COLUMN_SCALAR ShortText")?;
    Ok(())
}

fn select(db: &Coordinator, line: &str) -> Result<SelectResult> {
    match db.execute(line)? {
        Response::Select(result) => Ok(result),
        other => anyhow::bail!("expected a select response, got {other:?}"),
    }
}

fn ids(result: &SelectResult) -> Vec<i64> {
    let column = result.column("_id").expect("_id column");
    (0..column.len())
        .map(|i| column.values.as_i64(i).expect("integer _id"))
        .collect()
}

/// Four rows loaded by `_id` into three shards land at `(id-1)%3` with
/// rewritten local IDs, and come back with their global IDs.
#[test]
fn explicit_ids_split_and_merge_back() -> Result<()> {
    let (connector, db) = open(3, 3)?;
    create_docs(&db)?;

    let loaded = db.execute(
        r#"load --table Docs --columns _id,title --values '[[1,"a"],[2,"b"],[3,"c"],[4,"d"]]'"#,
    )?;
    assert_eq!(loaded, Response::Count(4));

    let counts: Vec<_> = connector
        .engines()
        .iter()
        .map(|engine| engine.row_count("Docs"))
        .collect();
    assert_eq!(counts, vec![Some(2), Some(1), Some(1)]);

    // Shard 0 holds globals 1 and 4 as locals 1 and 2.
    let raw = db.shard_query(0, "select Docs --output_columns _id,title")?;
    let local = parse_select(&raw)?;
    assert_eq!(local.columns[0].values, ColumnValues::UInt32(vec![1, 2]));
    assert_eq!(
        local.columns[1].values,
        ColumnValues::Text(vec!["a".into(), "d".into()])
    );

    let merged = select(&db, "select Docs --output_columns _id,title")?;
    assert_eq!(merged.total_hits, 4);
    assert_eq!(ids(&merged), vec![1, 4, 2, 3]);
    assert_eq!(
        merged.column("title").map(|c| c.values.clone()),
        Some(ColumnValues::Text(vec![
            "a".into(),
            "d".into(),
            "b".into(),
            "c".into()
        ]))
    );
    let unique: BTreeSet<i64> = ids(&merged).into_iter().collect();
    assert_eq!(unique, (1..=4).collect());

    db.close()?;
    Ok(())
}

/// Rows without identity get fresh local IDs, which still merge into one
/// duplicate-free global ID space.
#[test]
fn keyless_rows_get_unique_global_ids() -> Result<()> {
    let (connector, db) = open(4, 1)?;
    create_docs(&db)?;

    let values: Vec<_> = (0..40).map(|i| json!([format!("doc-{i}")])).collect();
    let line = format!(
        "load --table Docs --columns title --values '{}'",
        serde_json::to_string(&values)?
    );
    assert_eq!(db.execute(&line)?, Response::Count(40));

    let total: usize = connector
        .engines()
        .iter()
        .filter_map(|engine| engine.row_count("Docs"))
        .sum();
    assert_eq!(total, 40);

    let merged = select(&db, "select Docs --output_columns _id --limit -1")?;
    let unique: BTreeSet<i64> = ids(&merged).into_iter().collect();
    assert_eq!(unique.len(), 40);
    let codec = db.codec();
    for id in &unique {
        let (shard, local) = codec.from_global(*id)?;
        assert!(shard < 4 && local >= 1);
    }
    Ok(())
}

/// `_key` placement is a pure function of the key: reloading the same keys
/// upserts on the same shards.
#[test]
fn keyed_rows_route_deterministically() -> Result<()> {
    let (connector, db) = open(3, 3)?;
    db.execute("table_create Users TABLE_HASH_KEY ShortText")?;
    db.execute("column_create Users age COLUMN_SCALAR Int32")?;

    let names = ["alice", "bob", "carol", "dave", "erin", "frank", "grace"];
    let records: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(i, name)| json!({ "_key": name, "age": i }))
        .collect();
    let line = format!(
        "load --table Users --values '{}'",
        serde_json::to_string(&records)?
    );
    assert_eq!(db.execute(&line)?, Response::Count(7));
    assert_eq!(db.execute(&line)?, Response::Count(7));

    let router = ShardRouter::new(RowIdCodec::new(3)?, None);
    let mut expected = vec![0usize; 3];
    for name in names {
        expected[router.shard_for_key(&json!(name))?] += 1;
    }
    let actual: Vec<usize> = connector
        .engines()
        .iter()
        .map(|engine| engine.row_count("Users").unwrap_or(0))
        .collect();
    assert_eq!(actual, expected);
    Ok(())
}

#[test]
fn typed_loads_route_like_command_loads() -> Result<()> {
    let (connector, db) = open(2, 2)?;
    create_docs(&db)?;

    let inserted = db.load_rows(
        "Docs",
        &["_id", "title"],
        vec![
            vec![Scalar::Int(1), Scalar::from("one")],
            vec![Scalar::Int(2), Scalar::from("two")],
            vec![Scalar::Int(3), Scalar::from("three")],
        ],
    )?;
    assert_eq!(inserted, 3);
    assert_eq!(connector.engine(0).and_then(|e| e.row_count("Docs")), Some(2));

    let mut record = BTreeMap::new();
    record.insert("_id".to_string(), Scalar::Int(6));
    record.insert("title".to_string(), Scalar::from("six"));
    assert_eq!(db.load_maps("Docs", vec![record])?, 1);
    assert_eq!(connector.engine(1).and_then(|e| e.row_count("Docs")), Some(2));

    db.set_value("Docs", "title", 3, Scalar::from("THREE"))?;
    let merged = select(&db, "select Docs --output_columns _id,title")?;
    assert_eq!(ids(&merged), vec![1, 3, 2, 6]);
    assert_eq!(
        merged.columns[1].values,
        ColumnValues::Text(vec![
            "one".into(),
            "THREE".into(),
            "two".into(),
            "six".into()
        ])
    );
    Ok(())
}

#[test]
fn columnar_loads_route_per_record() -> Result<()> {
    let (connector, db) = open(2, 2)?;
    create_docs(&db)?;

    let inserted = db.load_columnar(
        "Docs",
        &["_id", "title"],
        vec![
            vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)],
            vec![Scalar::from("a"), Scalar::from("b"), Scalar::from("c")],
        ],
    )?;
    assert_eq!(inserted, 3);
    let merged = select(&db, "select Docs --output_columns _id,title")?;
    assert_eq!(ids(&merged), vec![1, 3, 2]);
    assert_eq!(
        merged.columns[1].values,
        ColumnValues::Text(vec!["a".into(), "c".into(), "b".into()])
    );

    assert!(db
        .load_columnar("Docs", &["_id", "title"], vec![vec![Scalar::Int(4)], vec![]])
        .is_err());
    assert!(db.load_columnar("Docs", &["title"], Vec::new()).is_err());

    let mut columns = BTreeMap::new();
    columns.insert("_id".to_string(), vec![Scalar::Int(4)]);
    columns.insert("title".to_string(), vec![Scalar::from("d")]);
    assert_eq!(db.load_columnar_map("Docs", columns)?, 1);
    assert_eq!(connector.engine(1).and_then(|e| e.row_count("Docs")), Some(2));
    Ok(())
}

/// Single-row inserts land on the key's shard and report global IDs; a
/// repeated key finds the existing row.
#[test]
fn insert_row_returns_global_ids() -> Result<()> {
    let (connector, db) = open(3, 3)?;
    db.execute("table_create Users TABLE_HASH_KEY ShortText")?;

    let router = ShardRouter::new(RowIdCodec::new(3)?, None);
    let codec = db.codec();
    let mut seen = BTreeSet::new();
    for name in ["ann", "bob", "cid", "dee"] {
        let (inserted, id) = db.insert_row("Users", Some(Scalar::from(name)))?;
        assert!(inserted);
        assert_eq!(codec.from_global(id)?.0, router.shard_for_key(&json!(name))?);
        assert!(seen.insert(id));
        assert_eq!(db.insert_row("Users", Some(Scalar::from(name)))?, (false, id));
    }
    let total: usize = connector
        .engines()
        .iter()
        .filter_map(|engine| engine.row_count("Users"))
        .sum();
    assert_eq!(total, 4);

    assert!(db.insert_row("Users", None).is_err());
    assert!(matches!(
        db.insert_row("Users", Some(Scalar::Bool(true))),
        Err(CoordError::Routing(_))
    ));

    create_docs(&db)?;
    let (inserted, id) = db.insert_row("Docs", None)?;
    assert!(inserted);
    db.set_value("Docs", "title", id, Scalar::from("fresh"))?;
    let merged = select(&db, "select Docs --output_columns _id,title")?;
    assert_eq!(ids(&merged), vec![id]);
    assert_eq!(
        merged.columns[1].values,
        ColumnValues::Text(vec!["fresh".into()])
    );
    Ok(())
}

#[test]
fn ambiguous_identity_is_rejected_before_dispatch() -> Result<()> {
    let (connector, db) = open(2, 2)?;
    create_docs(&db)?;

    let err = db
        .execute(r#"load --table Docs --columns _id,_key,title --values '[[1,"k","x"]]'"#)
        .unwrap_err();
    assert!(err.to_string().contains("ambiguous row identity"));

    let err = db
        .execute(r#"load --table Docs --values '[{"_id":1,"_key":"k"}]'"#)
        .unwrap_err();
    assert!(err.to_string().contains("ambiguous row identity"));

    assert!(connector
        .engines()
        .iter()
        .all(|engine| engine.row_count("Docs") == Some(0)));
    Ok(())
}

#[test]
fn comments_and_blank_lines_dispatch_nothing() -> Result<()> {
    let (_connector, db) = open(2, 2)?;
    assert_eq!(db.execute("#comment")?, Response::Empty);
    assert_eq!(db.execute("   ")?, Response::Empty);
    assert!(db.query("  # table_create Docs")?.is_empty());
    Ok(())
}
