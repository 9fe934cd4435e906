use anyhow::anyhow;
use futures::executor::block_on;
use futures::future::join_all;
use log::debug;

use crate::error::{CoordError, Result, ShardFailure};
use crate::shard::{ShardReply, ShardSet};

/// How a fan-out dispatches its per-shard commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    /// One shard at a time, in index order.
    Sequential,
    /// Every shard at once, joined before returning.
    Concurrent,
}

impl ExecMode {
    pub fn from_parallelism(parallelism: usize) -> Self {
        if parallelism <= 1 {
            ExecMode::Sequential
        } else {
            ExecMode::Concurrent
        }
    }
}

/// Result slot of one shard. `None` when the shard was given nothing to do
/// or was not reached after a sequential stop.
pub type ShardOutcome = Option<ShardReply>;

pub struct FanOut<'a> {
    shards: &'a ShardSet,
    mode: ExecMode,
}

impl<'a> FanOut<'a> {
    pub fn new(shards: &'a ShardSet, mode: ExecMode) -> Self {
        Self { shards, mode }
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// Runs `commands[i]` on shard `i`, skipping `None` entries.
    ///
    /// The returned slots are indexed by shard regardless of completion
    /// order. With `stop_on_error`, sequential mode stops at the first
    /// failure; concurrent mode always awaits every dispatched shard.
    pub fn execute(&self, commands: Vec<Option<String>>, stop_on_error: bool) -> Vec<ShardOutcome> {
        let dispatched = commands.iter().filter(|c| c.is_some()).count();
        debug!(
            "fan-out: {} of {} shard(s), {:?}",
            dispatched,
            commands.len(),
            self.mode
        );
        match self.mode {
            ExecMode::Sequential => self.execute_sequential(commands, stop_on_error),
            ExecMode::Concurrent => self.execute_concurrent(commands),
        }
    }

    /// Sends the same command to every shard.
    pub fn broadcast(&self, command: &str) -> Vec<ShardOutcome> {
        let commands = vec![Some(command.to_string()); self.shards.len()];
        self.execute(commands, false)
    }

    fn execute_sequential(
        &self,
        commands: Vec<Option<String>>,
        stop_on_error: bool,
    ) -> Vec<ShardOutcome> {
        let mut slots: Vec<ShardOutcome> = Vec::with_capacity(commands.len());
        let mut stopped = false;
        for (shard, command) in commands.into_iter().enumerate() {
            let outcome = match command {
                Some(command) if !stopped => {
                    let reply = self.shards.query(shard, command);
                    stopped = stop_on_error && reply.is_err();
                    Some(reply)
                }
                _ => None,
            };
            slots.push(outcome);
        }
        slots
    }

    fn execute_concurrent(&self, commands: Vec<Option<String>>) -> Vec<ShardOutcome> {
        let mut slots: Vec<ShardOutcome> = Vec::with_capacity(commands.len());
        let mut pending = Vec::new();
        let mut pending_slots = Vec::new();
        for (shard, command) in commands.into_iter().enumerate() {
            slots.push(None);
            let Some(command) = command else { continue };
            match self.shards.submit(shard, command) {
                Ok(rx) => {
                    pending.push(rx);
                    pending_slots.push(shard);
                }
                Err(e) => slots[shard] = Some(Err(e)),
            }
        }

        let responses = block_on(join_all(pending));
        for (shard, response) in pending_slots.into_iter().zip(responses) {
            let reply = response
                .map_err(|e| anyhow!("shard {shard} query canceled: {:?}", e))
                .and_then(|reply| reply);
            slots[shard] = Some(reply);
        }
        slots
    }
}

/// Every failed slot, in shard order.
pub fn failures(outcomes: &[ShardOutcome]) -> Vec<ShardFailure> {
    outcomes
        .iter()
        .enumerate()
        .filter_map(|(shard, outcome)| match outcome {
            Some(Err(e)) => Some(ShardFailure::new(shard, e)),
            _ => None,
        })
        .collect()
}

/// Successful responses in shard order, or every failure as one error.
pub fn into_responses(outcomes: Vec<ShardOutcome>) -> Result<Vec<(usize, Vec<u8>)>> {
    let failed = failures(&outcomes);
    if !failed.is_empty() {
        return Err(CoordError::from_failures(failed));
    }
    Ok(outcomes
        .into_iter()
        .enumerate()
        .filter_map(|(shard, outcome)| match outcome {
            Some(Ok(bytes)) => Some((shard, bytes)),
            _ => None,
        })
        .collect())
}
