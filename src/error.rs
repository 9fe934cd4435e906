use std::fmt;
use thiserror::Error;

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordError>;

/// One shard's failed gateway call, as seen by the fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
    pub shard: usize,
    pub message: String,
}

impl ShardFailure {
    pub fn new(shard: usize, error: &anyhow::Error) -> Self {
        Self {
            shard,
            message: format!("{error:#}"),
        }
    }
}

impl fmt::Display for ShardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard {}: {}", self.shard, self.message)
    }
}

/// Errors surfaced by the coordinator to its immediate caller.
///
/// Nothing is retried and nothing is swallowed: when several shards fail in
/// one fan-out, every failure is carried in the error.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("routing error: {0}")]
    Routing(String),
    #[error("invalid row ID: {0}")]
    InvalidId(String),
    #[error("shard {shard} failed: {message}")]
    Shard { shard: usize, message: String },
    #[error("{} shards failed: {}", .0.len(), join_failures(.0))]
    Shards(Vec<ShardFailure>),
    #[error(
        "load failed after inserting {inserted} row(s): {}",
        join_failures(.failures)
    )]
    PartialLoad {
        inserted: u64,
        failures: Vec<ShardFailure>,
    },
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl CoordError {
    /// Collapses a non-empty failure list into a single error.
    pub fn from_failures(mut failures: Vec<ShardFailure>) -> Self {
        if failures.len() == 1 {
            let ShardFailure { shard, message } = failures.remove(0);
            CoordError::Shard { shard, message }
        } else {
            CoordError::Shards(failures)
        }
    }

    /// Rows already applied before the failure, for load errors.
    pub fn inserted(&self) -> Option<u64> {
        match self {
            CoordError::PartialLoad { inserted, .. } => Some(*inserted),
            _ => None,
        }
    }

    /// Shard failures carried by this error, if any.
    pub fn shard_failures(&self) -> Vec<ShardFailure> {
        match self {
            CoordError::Shard { shard, message } => vec![ShardFailure {
                shard: *shard,
                message: message.clone(),
            }],
            CoordError::Shards(failures) | CoordError::PartialLoad { failures, .. } => {
                failures.clone()
            }
            _ => Vec::new(),
        }
    }
}

fn join_failures(failures: &[ShardFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for CoordError {
    fn from(e: serde_json::Error) -> Self {
        CoordError::InvalidArgument(format!("invalid JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_failure_collapses_to_shard_error() {
        let err = CoordError::from_failures(vec![ShardFailure {
            shard: 2,
            message: "boom".into(),
        }]);
        assert!(matches!(err, CoordError::Shard { shard: 2, .. }));
        assert_eq!(err.to_string(), "shard 2 failed: boom");
    }

    #[test]
    fn partial_load_lists_every_failure() {
        let err = CoordError::PartialLoad {
            inserted: 7,
            failures: vec![
                ShardFailure {
                    shard: 0,
                    message: "a".into(),
                },
                ShardFailure {
                    shard: 3,
                    message: "b".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("7 row(s)"));
        assert!(text.contains("shard 0: a"));
        assert!(text.contains("shard 3: b"));
        assert_eq!(err.inserted(), Some(7));
        assert_eq!(err.shard_failures().len(), 2);
    }
}
