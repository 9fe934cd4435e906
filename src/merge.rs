//! Combines per-shard responses into one client-visible result.

use log::warn;

use crate::analytics::Record;
use crate::error::{CoordError, Result, ShardFailure};
use crate::executor::ShardOutcome;
use crate::gateway::parse_count;
use crate::row_id::RowIdCodec;
use crate::router::ID_COLUMN;
use crate::value::{SelectResult, TypedColumn};

pub const SCORE_COLUMN: &str = "_score";

/// Outcome of a routed load across all shards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows inserted by the shards that succeeded.
    pub inserted: u64,
    pub failures: Vec<ShardFailure>,
}

impl LoadReport {
    /// The inserted count, or a `PartialLoad` carrying it with the failures.
    pub fn into_result(self) -> Result<u64> {
        if self.failures.is_empty() {
            Ok(self.inserted)
        } else {
            Err(CoordError::PartialLoad {
                inserted: self.inserted,
                failures: self.failures,
            })
        }
    }
}

/// Sums per-shard inserted-row counts. A response that is not a count is
/// reported as that shard's failure.
pub fn merge_load(outcomes: Vec<ShardOutcome>) -> LoadReport {
    let mut report = LoadReport::default();
    for (shard, outcome) in outcomes.into_iter().enumerate() {
        let failure = match outcome {
            None => continue,
            Some(Ok(bytes)) => match parse_count(&bytes) {
                Ok(count) => {
                    report.inserted += count;
                    continue;
                }
                Err(e) => ShardFailure {
                    shard,
                    message: e.to_string(),
                },
            },
            Some(Err(e)) => ShardFailure::new(shard, &e),
        };
        warn!("Load on shard {} failed: {}", shard, failure.message);
        report.failures.push(failure);
    }
    report
}

/// Rewrites a shard's `_id` values to global row IDs.
pub fn remap_id_column(codec: &RowIdCodec, shard: usize, column: &mut TypedColumn) -> Result<()> {
    column
        .values
        .map_integers(|local| codec.to_global(shard, local))
}

/// Concatenates per-shard select results in shard order.
///
/// The first result's columns are authoritative; every other result must
/// have the same number of columns with the same types. `_id` columns are
/// remapped to global IDs. Rows are not re-sorted or re-limited.
pub fn merge_select(codec: &RowIdCodec, results: Vec<(usize, SelectResult)>) -> Result<SelectResult> {
    let mut results = results.into_iter();
    let (first_shard, mut merged) = match results.next() {
        Some(first) => first,
        None => return Ok(SelectResult::default()),
    };
    for column in &mut merged.columns {
        if column.name == ID_COLUMN {
            remap_id_column(codec, first_shard, column)?;
        }
    }

    for (shard, result) in results {
        if result.columns.len() != merged.columns.len() {
            return Err(CoordError::SchemaMismatch(format!(
                "shard {shard} returned {} column(s), shard {first_shard} returned {}",
                result.columns.len(),
                merged.columns.len()
            )));
        }
        merged.total_hits += result.total_hits;
        for (target, mut column) in merged.columns.iter_mut().zip(result.columns) {
            if column.data_type != target.data_type {
                return Err(CoordError::SchemaMismatch(format!(
                    "column {} is {} on shard {shard} but {} on shard {first_shard}",
                    target.name, column.data_type, target.data_type
                )));
            }
            if target.name == ID_COLUMN {
                remap_id_column(codec, shard, &mut column)?;
            }
            target.values.append(column.values)?;
        }
    }
    Ok(merged)
}

/// Turns per-shard `_id,_score` results into globally identified records,
/// in shard order.
pub fn scored_records(codec: &RowIdCodec, results: Vec<(usize, SelectResult)>) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for (shard, result) in results {
        let column = |name: &str| {
            result.column(name).ok_or_else(|| {
                CoordError::SchemaMismatch(format!("shard {shard} returned no {name} column"))
            })
        };
        let ids = column(ID_COLUMN)?;
        let scores = column(SCORE_COLUMN)?;
        if ids.len() != scores.len() {
            return Err(CoordError::SchemaMismatch(format!(
                "shard {shard} returned {} ID(s) for {} score(s)",
                ids.len(),
                scores.len()
            )));
        }
        records.reserve(ids.len());
        for index in 0..ids.len() {
            let local = ids.values.as_i64(index).ok_or_else(|| {
                CoordError::InvalidId(format!("shard {shard} returned a non-integer _id"))
            })?;
            let score = scores.values.as_f64(index).ok_or_else(|| {
                CoordError::SchemaMismatch(format!("shard {shard} returned a non-numeric _score"))
            })?;
            records.push(Record::new(codec.to_global(shard, local)?, score));
        }
    }
    Ok(records)
}
