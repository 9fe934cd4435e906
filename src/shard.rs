use std::thread;

use anyhow::anyhow;
use crossbeam_channel::{unbounded, Receiver, Sender};
use futures::channel::oneshot;
use futures::executor::block_on;
use log::{debug, info, warn};

use crate::error::{CoordError, Result, ShardFailure};
use crate::gateway::{EngineGateway, ShardConnector};
use crate::runtime::{EngineRuntime, RuntimeLease};

pub type ShardReply = anyhow::Result<Vec<u8>>;

pub enum ShardMessage {
    Query {
        command: String,
        respond_to: oneshot::Sender<ShardReply>,
    },
    Shutdown {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
}

struct ShardWorker {
    sender: Sender<ShardMessage>,
    handle: Option<thread::JoinHandle<()>>,
}

fn run_shard_worker(
    index: usize,
    mut gateway: Box<dyn EngineGateway>,
    lease: RuntimeLease,
    rx: Receiver<ShardMessage>,
) {
    info!("Shard {} worker started.", index);
    let mut lease = Some(lease);
    for msg in rx.iter() {
        match msg {
            ShardMessage::Query {
                command,
                respond_to,
            } => {
                let _ = respond_to.send(gateway.query(&command));
            }
            ShardMessage::Shutdown { respond_to } => {
                let res = gateway.close();
                lease.take();
                let _ = respond_to.send(res);
                info!("Shard {} worker stopped.", index);
                return;
            }
        }
    }
    // Every sender dropped without a shutdown request.
    if let Err(e) = gateway.close() {
        warn!("Shard {} close failed: {:?}", index, e);
    }
}

fn spawn_shard_worker(
    index: usize,
    gateway: Box<dyn EngineGateway>,
    lease: RuntimeLease,
) -> anyhow::Result<ShardWorker> {
    let (sender, receiver) = unbounded();
    let handle = thread::Builder::new()
        .name(format!("shard-{index}"))
        .spawn(move || run_shard_worker(index, gateway, lease, receiver))?;
    Ok(ShardWorker {
        sender,
        handle: Some(handle),
    })
}

/// Fixed, ordered set of shard workers. Each worker thread owns its shard's
/// gateway and serves one command at a time.
pub struct ShardSet {
    workers: Vec<ShardWorker>,
    closed: bool,
}

impl ShardSet {
    /// Opens every shard or none: on failure the shards already opened are
    /// closed again before the error is returned.
    pub fn open(
        connector: &dyn ShardConnector,
        shards: usize,
        runtime: &EngineRuntime,
    ) -> Result<Self> {
        if shards == 0 {
            return Err(CoordError::InvalidArgument("shards must be > 0".into()));
        }
        let mut set = ShardSet {
            workers: Vec::with_capacity(shards),
            closed: false,
        };
        for index in 0..shards {
            let opened = runtime
                .acquire()
                .and_then(|lease| Ok((lease, connector.connect(index)?)))
                .and_then(|(lease, gateway)| spawn_shard_worker(index, gateway, lease));
            match opened {
                Ok(worker) => set.workers.push(worker),
                Err(e) => {
                    warn!("Opening shard {} failed: {:#}", index, e);
                    if let Err(close_err) = set.close() {
                        warn!("Closing partially opened shard set: {}", close_err);
                    }
                    let failure = ShardFailure::new(index, &e);
                    return Err(CoordError::Shard {
                        shard: failure.shard,
                        message: failure.message,
                    });
                }
            }
        }
        info!("Opened {} shard(s)", shards);
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Queues `command` on a shard's worker; the receiver resolves with the
    /// engine's response.
    pub fn submit(
        &self,
        shard: usize,
        command: String,
    ) -> anyhow::Result<oneshot::Receiver<ShardReply>> {
        let worker = self
            .workers
            .get(shard)
            .ok_or_else(|| anyhow!("shard {shard} out of range"))?;
        let (tx, rx) = oneshot::channel();
        worker
            .sender
            .send(ShardMessage::Query {
                command,
                respond_to: tx,
            })
            .map_err(|_| anyhow!("shard {shard} worker not running"))?;
        Ok(rx)
    }

    /// Blocking single-shard query.
    pub fn query(&self, shard: usize, command: String) -> ShardReply {
        let rx = self.submit(shard, command)?;
        block_on(rx).map_err(|e| anyhow!("shard {shard} query canceled: {:?}", e))?
    }

    /// Shuts down every worker, attempting all of them before reporting the
    /// failures. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut waiters = Vec::with_capacity(self.workers.len());
        for (index, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            let sent = worker
                .sender
                .send(ShardMessage::Shutdown { respond_to: tx })
                .is_ok();
            waiters.push((index, sent.then_some(rx)));
        }

        let mut failures = Vec::new();
        for (index, rx) in waiters {
            let res = match rx {
                Some(rx) => block_on(rx)
                    .map_err(|e| anyhow!("shutdown canceled: {:?}", e))
                    .and_then(|res| res),
                None => Err(anyhow!("worker not running")),
            };
            if let Err(e) = res {
                warn!("Closing shard {} failed: {:#}", index, e);
                failures.push(ShardFailure::new(index, &e));
            }
        }

        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
        debug!("Closed {} shard(s)", self.workers.len());

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoordError::from_failures(failures))
        }
    }
}

impl Drop for ShardSet {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Dropping shard set: {}", e);
        }
    }
}
