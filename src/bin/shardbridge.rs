use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use log::{error, info};

use shardbridge::gateway::memory::{MemoryConnector, MemoryEngine};
use shardbridge::gateway::tcp::{spawn_engine_server, TcpConnector};
use shardbridge::{Coordinator, CoordinatorConfig, ShardConnector};

#[derive(Parser)]
#[command(name = "shardbridge", about = "Sharded search engine coordinator")]
struct Args {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Read command lines from stdin and print merged responses
    Console {
        /// Number of in-process shards (ignored when addresses are given)
        #[arg(short, long, default_value_t = 2)]
        shards: usize,

        /// Fan-out parallelism (defaults to logical cores)
        #[arg(short, long)]
        parallelism: Option<usize>,

        /// Seed for keyless record placement
        #[arg(long)]
        seed: Option<u64>,

        /// Engine addresses, one per shard, in shard order
        addrs: Vec<String>,
    },
    /// Serve one in-memory engine over the framed TCP protocol
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:10041")]
        listen: String,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    match Args::parse().command {
        Mode::Console {
            shards,
            parallelism,
            seed,
            addrs,
        } => {
            let (connector, shards): (Arc<dyn ShardConnector>, usize) = if addrs.is_empty() {
                (Arc::new(MemoryConnector::new(shards)), shards)
            } else {
                let shards = addrs.len();
                (Arc::new(TcpConnector::new(addrs)), shards)
            };
            let mut config = CoordinatorConfig::new(connector, shards);
            if let Some(parallelism) = parallelism {
                config.parallelism = parallelism;
            }
            config.routing_seed = seed;
            run_console(Coordinator::open(config)?)
        }
        Mode::Serve { listen } => {
            let (addr, handle) = spawn_engine_server(listen.as_str(), MemoryEngine::new())?;
            info!("Engine serving on {}", addr);
            handle
                .join()
                .map_err(|_| anyhow!("engine server thread panicked"))
        }
    }
}

fn run_console(coordinator: Coordinator) -> anyhow::Result<()> {
    info!("Console ready ({} shard(s))", coordinator.num_shards());
    let stdout = io::stdout();
    for line in io::stdin().lock().lines() {
        let line = line?;
        match coordinator.query(&line) {
            Ok(response) if response.is_empty() => {}
            Ok(response) => {
                let mut out = stdout.lock();
                out.write_all(&response)?;
                out.write_all(b"\n")?;
                out.flush()?;
            }
            Err(e) => error!("{}", e),
        }
    }
    coordinator.close()?;
    Ok(())
}
