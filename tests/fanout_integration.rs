use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use shardbridge::gateway::memory::MemoryConnector;
use shardbridge::{
    CoordError, Coordinator, EngineGateway, Response, SelectResult, ShardConnector,
};

/// Wraps a memory shard: records every command sent, sleeps before each
/// one, records completion order, and fails commands with a configured
/// prefix.
struct TestGateway {
    shard: usize,
    inner: Box<dyn EngineGateway>,
    delay: Duration,
    fail_prefix: Option<&'static str>,
    completed: Arc<Mutex<Vec<usize>>>,
    sent: Arc<Mutex<Vec<(usize, String)>>>,
    failing: bool,
}

impl EngineGateway for TestGateway {
    fn send(&mut self, command: &str) -> Result<()> {
        self.sent.lock().push((self.shard, command.to_string()));
        thread::sleep(self.delay);
        self.failing = self
            .fail_prefix
            .map_or(false, |prefix| command.starts_with(prefix));
        if self.failing {
            return Ok(());
        }
        self.inner.send(command)
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        self.completed.lock().push(self.shard);
        if self.failing {
            return Err(anyhow!("injected failure on shard {}", self.shard));
        }
        self.inner.recv()
    }
}

struct TestConnector {
    inner: MemoryConnector,
    delays: Vec<Duration>,
    failing: Vec<usize>,
    fail_prefix: &'static str,
    completed: Arc<Mutex<Vec<usize>>>,
    sent: Arc<Mutex<Vec<(usize, String)>>>,
}

impl TestConnector {
    fn new(shards: usize) -> Self {
        Self {
            inner: MemoryConnector::new(shards),
            delays: vec![Duration::ZERO; shards],
            failing: Vec::new(),
            fail_prefix: "",
            completed: Arc::new(Mutex::new(Vec::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Later shards answer first.
    fn reversed_latency(mut self) -> Self {
        let shards = self.delays.len();
        self.delays = (0..shards)
            .map(|shard| Duration::from_millis(50 * (shards - shard) as u64))
            .collect();
        self
    }

    fn failing(mut self, prefix: &'static str, shards: &[usize]) -> Self {
        self.fail_prefix = prefix;
        self.failing = shards.to_vec();
        self
    }
}

impl ShardConnector for TestConnector {
    fn connect(&self, shard: usize) -> Result<Box<dyn EngineGateway>> {
        Ok(Box::new(TestGateway {
            shard,
            inner: self.inner.connect(shard)?,
            delay: self.delays[shard],
            fail_prefix: self.failing.contains(&shard).then_some(self.fail_prefix),
            completed: self.completed.clone(),
            sent: self.sent.clone(),
            failing: false,
        }))
    }
}

fn open(connector: Arc<TestConnector>, parallelism: usize) -> Result<Coordinator> {
    let shards = connector.delays.len();
    let db = Coordinator::builder(connector)
        .shards(shards)
        .parallelism(parallelism)
        .build()?;
    db.execute("table_create Docs TABLE_NO_KEY")?;
    db.execute("column_create Docs title COLUMN_SCALAR ShortText")?;
    Ok(db)
}

const SIX_ROWS: &str = r#"load --table Docs --columns _id,title --values '[[1,"a"],[2,"b"],[3,"c"],[4,"d"],[5,"e"],[6,"f"]]'"#;

fn merged_ids(db: &Coordinator) -> Result<Vec<i64>> {
    let result: SelectResult = match db.execute("select Docs --output_columns _id")? {
        Response::Select(result) => result,
        other => anyhow::bail!("expected a select response, got {other:?}"),
    };
    Ok((0..result.row_count())
        .filter_map(|i| result.columns[0].values.as_i64(i))
        .collect())
}

/// Shard 2 answers first and shard 0 last, yet rows come back in shard
/// order.
#[test]
fn concurrent_merge_follows_shard_order() -> Result<()> {
    let connector = Arc::new(TestConnector::new(3).reversed_latency());
    let db = open(connector.clone(), 3)?;
    assert_eq!(db.execute(SIX_ROWS)?, Response::Count(6));

    connector.completed.lock().clear();
    let ids = merged_ids(&db)?;
    assert_eq!(ids, vec![1, 4, 2, 5, 3, 6]);
    assert_eq!(*connector.completed.lock(), vec![2, 1, 0]);

    let sequential = open(Arc::new(TestConnector::new(3)), 1)?;
    sequential.execute(SIX_ROWS)?;
    assert_eq!(merged_ids(&sequential)?, ids);
    Ok(())
}

/// A concurrent load reaches every shard and reports the count of the
/// shards that succeeded along with the failure.
#[test]
fn concurrent_load_reports_partial_count() -> Result<()> {
    let connector = Arc::new(TestConnector::new(3).failing("load", &[1]));
    let db = open(connector.clone(), 3)?;

    let err = db.execute(SIX_ROWS).unwrap_err();
    assert!(matches!(err, CoordError::PartialLoad { .. }));
    assert_eq!(err.inserted(), Some(4));
    let failed: Vec<usize> = err.shard_failures().iter().map(|f| f.shard).collect();
    assert_eq!(failed, vec![1]);
    assert!(err.to_string().contains("injected failure on shard 1"));

    assert_eq!(connector.inner.engine(0).and_then(|e| e.row_count("Docs")), Some(2));
    assert_eq!(connector.inner.engine(2).and_then(|e| e.row_count("Docs")), Some(2));
    Ok(())
}

/// A sequential load stops at the failing shard without undoing the shards
/// before it.
#[test]
fn sequential_load_stops_at_first_failure() -> Result<()> {
    let connector = Arc::new(TestConnector::new(3).failing("load", &[1]));
    let db = open(connector.clone(), 1)?;

    let err = db.execute(SIX_ROWS).unwrap_err();
    assert_eq!(err.inserted(), Some(2));
    assert_eq!(connector.inner.engine(0).and_then(|e| e.row_count("Docs")), Some(2));
    assert_eq!(connector.inner.engine(2).and_then(|e| e.row_count("Docs")), Some(0));
    Ok(())
}

/// Every failing shard is named, even when other shards succeed.
#[test]
fn broadcast_failures_are_all_visible() -> Result<()> {
    let connector = Arc::new(TestConnector::new(4).failing("select", &[0, 2]));
    let db = open(connector, 4)?;

    let err = db.execute("select Docs").unwrap_err();
    match &err {
        CoordError::Shards(failures) => {
            let shards: Vec<usize> = failures.iter().map(|f| f.shard).collect();
            assert_eq!(shards, vec![0, 2]);
        }
        other => panic!("expected several shard failures, got {other:?}"),
    }

    let connector = Arc::new(TestConnector::new(2).failing("status", &[1]));
    let db = open(connector, 2)?;
    let err = db.execute("status").unwrap_err();
    assert!(matches!(err, CoordError::Shard { shard: 1, .. }));
    Ok(())
}

/// Commands the coordinator does not interpret reach every shard verbatim,
/// positional arguments included.
#[test]
fn passthrough_forwards_the_command_line() -> Result<()> {
    let connector = Arc::new(TestConnector::new(2));
    let db = open(connector.clone(), 2)?;
    connector.sent.lock().clear();

    // The memory engine has no `register`; both shards still see the full line.
    let err = db.execute("register functions/vector").unwrap_err();
    assert_eq!(err.shard_failures().len(), 2);
    db.execute("  table_create Tags TABLE_HASH_KEY ShortText  ")?;

    let mut sent = connector.sent.lock().clone();
    sent.sort();
    let expected: Vec<(usize, String)> = [0, 1]
        .into_iter()
        .flat_map(|shard| {
            [
                (shard, "register functions/vector".to_string()),
                (shard, "table_create Tags TABLE_HASH_KEY ShortText".to_string()),
            ]
        })
        .collect();
    assert_eq!(sent, expected);

    let loaded = db.execute(r#"load --table Tags --columns _key --values '[["a"],["b"],["a"]]'"#)?;
    assert_eq!(loaded, Response::Count(3));
    let rows: usize = (0..2)
        .filter_map(|shard| connector.inner.engine(shard).and_then(|e| e.row_count("Tags")))
        .sum();
    assert_eq!(rows, 2);
    Ok(())
}
