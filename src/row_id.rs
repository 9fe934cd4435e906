use crate::error::{CoordError, Result};

/// Maps shard-local row IDs to one global ID space and back.
///
/// `global = (local - 1) * shards + shard + 1`. Local and global IDs are
/// 1-based; with one shard the mapping is the identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowIdCodec {
    shards: usize,
}

impl RowIdCodec {
    pub fn new(shards: usize) -> Result<Self> {
        if shards == 0 || i64::try_from(shards).is_err() {
            return Err(CoordError::InvalidArgument(format!(
                "shard count must be in 1..=i64::MAX, got {shards}"
            )));
        }
        Ok(Self { shards })
    }

    pub fn shards(&self) -> usize {
        self.shards
    }

    pub fn to_global(&self, shard: usize, local: i64) -> Result<i64> {
        if shard >= self.shards {
            return Err(CoordError::InvalidId(format!(
                "shard index {shard} out of range for {} shard(s)",
                self.shards
            )));
        }
        if local <= 0 {
            return Err(CoordError::InvalidId(format!(
                "local row ID must be positive, got {local}"
            )));
        }
        let n = self.shards as i64;
        (local - 1)
            .checked_mul(n)
            .and_then(|v| v.checked_add(shard as i64 + 1))
            .ok_or_else(|| {
                CoordError::InvalidId(format!(
                    "local row ID {local} on shard {shard} overflows the global ID space"
                ))
            })
    }

    /// Returns `(shard, local)` for a global row ID.
    pub fn from_global(&self, global: i64) -> Result<(usize, i64)> {
        if global <= 0 {
            return Err(CoordError::InvalidId(format!(
                "global row ID must be positive, got {global}"
            )));
        }
        let n = self.shards as i64;
        let shard = ((global - 1) % n) as usize;
        let local = (global - 1) / n + 1;
        Ok((shard, local))
    }
}
