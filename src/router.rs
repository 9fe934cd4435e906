//! Per-record shard assignment for load batches.
//!
//! Priority: an `_id` column decodes to its owning shard (and the value is
//! rewritten to the shard-local ID), a `_key` column hashes to a shard, and
//! anything else goes to a random shard.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};

use crate::error::{CoordError, Result};
use crate::row_id::RowIdCodec;

pub const ID_COLUMN: &str = "_id";
pub const KEY_COLUMN: &str = "_key";

const AMBIGUOUS: &str = "ambiguous row identity";

/// Which column, if any, identifies a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowIdentity {
    /// Position of the `_id` column.
    Id(usize),
    /// Position of the `_key` column.
    Key(usize),
    Keyless,
}

/// Column list of an array-style load batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadColumns {
    names: Vec<String>,
    identity: RowIdentity,
}

impl LoadColumns {
    /// Parses a `columns` option: comma separated, blanks dropped.
    pub fn parse(option: &str) -> Result<Self> {
        Self::from_names(
            option
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty()),
        )
    }

    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut id_pos = None;
        let mut key_pos = None;
        for (pos, name) in names.iter().enumerate() {
            let slot = match name.as_str() {
                ID_COLUMN => &mut id_pos,
                KEY_COLUMN => &mut key_pos,
                _ => continue,
            };
            if slot.replace(pos).is_some() {
                return Err(CoordError::Routing(format!(
                    "{name} appears more than once"
                )));
            }
        }
        let identity = match (id_pos, key_pos) {
            (Some(_), Some(_)) => return Err(CoordError::Routing(AMBIGUOUS.into())),
            (Some(pos), None) => RowIdentity::Id(pos),
            (None, Some(pos)) => RowIdentity::Key(pos),
            (None, None) => RowIdentity::Keyless,
        };
        Ok(Self { names, identity })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn identity(&self) -> RowIdentity {
        self.identity
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The list in `columns` option form.
    pub fn to_option(&self) -> String {
        self.names.join(",")
    }
}

/// 32-bit FNV-1a.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    bytes.iter().fold(OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(PRIME)
    })
}

/// Bytes hashed for a `_key` value: integers as i64 LE, other numbers as
/// f64 LE, text as its raw bytes.
///
/// Integer and float keys hash differently, so `7` and `7.0` may land on
/// different shards. Keep a key column's JSON representation consistent.
fn key_bytes(key: &Value) -> Result<Vec<u8>> {
    match key {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i.to_le_bytes().to_vec())
            } else if let Some(f) = n.as_f64() {
                Ok(f.to_le_bytes().to_vec())
            } else {
                Err(CoordError::Routing(format!("unsupported key value {n}")))
            }
        }
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        other => Err(CoordError::Routing(format!(
            "unsupported key type: {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reads a global row ID out of a record value.
fn global_id(value: &Value) -> Result<i64> {
    let id = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        _ => None,
    };
    id.ok_or_else(|| CoordError::InvalidId(format!("{value} is not an integer row ID")))
}

pub struct ShardRouter {
    codec: RowIdCodec,
    rng: Mutex<StdRng>,
}

impl ShardRouter {
    /// `seed` fixes keyless placement; `None` seeds from entropy.
    pub fn new(codec: RowIdCodec, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            codec,
            rng: Mutex::new(rng),
        }
    }

    pub fn codec(&self) -> RowIdCodec {
        self.codec
    }

    pub fn shards(&self) -> usize {
        self.codec.shards()
    }

    pub fn shard_for_key(&self, key: &Value) -> Result<usize> {
        let hash = fnv1a_32(&key_bytes(key)?);
        Ok(hash as usize % self.shards())
    }

    fn random_shard(&self) -> usize {
        self.rng.lock().gen_range(0..self.shards())
    }

    /// Shard for a single row: hashed when keyed, random otherwise.
    pub fn shard_for(&self, key: Option<&Value>) -> Result<usize> {
        match key {
            Some(key) => self.shard_for_key(key),
            None => Ok(self.random_shard()),
        }
    }

    /// Decodes a global `_id` value and returns `(shard, local)`.
    fn decode_id(&self, value: &Value) -> Result<(usize, i64)> {
        self.codec.from_global(global_id(value)?)
    }

    /// Splits array-style records into per-shard batches, preserving the
    /// input order within each batch.
    pub fn route_rows(&self, columns: &LoadColumns, rows: Vec<Value>) -> Result<Vec<Vec<Value>>> {
        let mut batches = vec![Vec::new(); self.shards()];
        for (index, row) in rows.into_iter().enumerate() {
            let mut fields = match row {
                Value::Array(fields) => fields,
                other => {
                    return Err(CoordError::InvalidArgument(format!(
                        "record {index} must be an array, got {}",
                        json_kind(&other)
                    )))
                }
            };
            let shard = match columns.identity() {
                RowIdentity::Id(pos) => {
                    let field = fields.get_mut(pos).ok_or_else(|| missing_field(index, ID_COLUMN))?;
                    let (shard, local) = self.decode_id(field)?;
                    *field = Value::from(local);
                    shard
                }
                RowIdentity::Key(pos) => {
                    let field = fields.get(pos).ok_or_else(|| missing_field(index, KEY_COLUMN))?;
                    self.shard_for_key(field)?
                }
                RowIdentity::Keyless => self.random_shard(),
            };
            batches[shard].push(Value::Array(fields));
        }
        Ok(batches)
    }

    /// Splits object-style records into per-shard batches.
    pub fn route_maps(&self, rows: Vec<Map<String, Value>>) -> Result<Vec<Vec<Value>>> {
        let mut batches = vec![Vec::new(); self.shards()];
        for mut row in rows {
            if row.contains_key(ID_COLUMN) && row.contains_key(KEY_COLUMN) {
                return Err(CoordError::Routing(AMBIGUOUS.into()));
            }
            let shard = if let Some(field) = row.get_mut(ID_COLUMN) {
                let (shard, local) = self.decode_id(field)?;
                *field = Value::from(local);
                shard
            } else if let Some(key) = row.get(KEY_COLUMN) {
                self.shard_for_key(key)?
            } else {
                self.random_shard()
            };
            batches[shard].push(Value::Object(row));
        }
        Ok(batches)
    }
}

fn missing_field(index: usize, column: &str) -> CoordError {
    CoordError::InvalidArgument(format!("record {index} has no {column} field"))
}
