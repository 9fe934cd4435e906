use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use shardbridge::gateway::memory::MemoryConnector;
use shardbridge::{
    CoordError, Coordinator, EngineGateway, EngineRuntime, RuntimeHooks, ShardConnector,
};

#[derive(Clone, Default)]
struct CountingHooks {
    inits: Arc<AtomicUsize>,
    fins: Arc<AtomicUsize>,
    fail_init: bool,
}

impl RuntimeHooks for CountingHooks {
    fn init(&self) -> Result<()> {
        if self.fail_init {
            return Err(anyhow!("engine library unavailable"));
        }
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn fin(&self) {
        self.fins.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connects shards in order and refuses the one at `fail_at`.
struct FlakyConnector {
    inner: MemoryConnector,
    fail_at: usize,
    connected: AtomicUsize,
}

impl ShardConnector for FlakyConnector {
    fn connect(&self, shard: usize) -> Result<Box<dyn EngineGateway>> {
        if shard == self.fail_at {
            return Err(anyhow!("connection refused"));
        }
        self.connected.fetch_add(1, Ordering::SeqCst);
        self.inner.connect(shard)
    }
}

/// Coordinator::builder with 0 shards should fail.
#[test]
fn open_with_zero_shards_fails() {
    let result = Coordinator::builder(Arc::new(MemoryConnector::new(1)))
        .shards(0)
        .build();
    assert!(matches!(result, Err(CoordError::InvalidArgument(_))));
}

/// A shard that cannot connect fails the whole open and releases the
/// shards opened before it.
#[test]
fn open_is_all_or_nothing() -> Result<()> {
    let hooks = CountingHooks::default();
    let runtime = EngineRuntime::new(hooks.clone());
    let connector = Arc::new(FlakyConnector {
        inner: MemoryConnector::new(4),
        fail_at: 2,
        connected: AtomicUsize::new(0),
    });

    let result = Coordinator::builder(connector.clone())
        .shards(4)
        .runtime(runtime.clone())
        .build();
    let err = match result {
        Ok(_) => panic!("open should fail"),
        Err(err) => err,
    };
    assert!(matches!(err, CoordError::Shard { shard: 2, .. }));
    assert!(err.to_string().contains("connection refused"));
    assert_eq!(connector.connected.load(Ordering::SeqCst), 2);
    assert_eq!(runtime.active_leases(), 0);
    assert_eq!(hooks.inits.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.fins.load(Ordering::SeqCst), 1);
    Ok(())
}

/// The engine runtime is initialized once for the first shard and finalized
/// after the last shard closes.
#[test]
fn runtime_brackets_the_shard_set() -> Result<()> {
    let hooks = CountingHooks::default();
    let runtime = EngineRuntime::new(hooks.clone());

    let first = Coordinator::builder(Arc::new(MemoryConnector::new(3)))
        .shards(3)
        .runtime(runtime.clone())
        .build()?;
    let second = Coordinator::builder(Arc::new(MemoryConnector::new(2)))
        .shards(2)
        .runtime(runtime.clone())
        .build()?;
    assert_eq!(runtime.active_leases(), 5);
    assert_eq!(hooks.inits.load(Ordering::SeqCst), 1);

    first.close()?;
    assert_eq!(runtime.active_leases(), 2);
    assert_eq!(hooks.fins.load(Ordering::SeqCst), 0);

    drop(second); // closes best-effort
    assert_eq!(runtime.active_leases(), 0);
    assert_eq!(hooks.fins.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn failed_runtime_init_fails_open() {
    let hooks = CountingHooks {
        fail_init: true,
        ..CountingHooks::default()
    };
    let runtime = EngineRuntime::new(hooks);
    let result = Coordinator::builder(Arc::new(MemoryConnector::new(2)))
        .shards(2)
        .runtime(runtime.clone())
        .build();
    let err = match result {
        Ok(_) => panic!("open should fail"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("engine library unavailable"));
    assert_eq!(runtime.active_leases(), 0);
}

#[test]
fn closed_coordinator_shards_stop_serving() -> Result<()> {
    let connector = Arc::new(MemoryConnector::new(2));
    let db = Coordinator::builder(connector.clone()).shards(2).build()?;
    db.execute("table_create Docs TABLE_NO_KEY")?;
    assert_eq!(db.num_shards(), 2);
    db.close()?;

    // Engine state outlives the coordinator.
    assert_eq!(connector.engine(1).and_then(|e| e.row_count("Docs")), Some(0));
    Ok(())
}
