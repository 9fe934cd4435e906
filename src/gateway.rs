//! Per-shard engine handles and decoding of their typed tabular responses.

use anyhow::Result as AnyResult;
use serde_json::Value;

use crate::error::{CoordError, Result};
use crate::value::{ColumnValues, DataType, SelectResult, TypedColumn};

pub mod memory;
pub mod tcp;

/// Request/response handle to one search engine instance.
///
/// Each shard worker owns exactly one gateway; calls on it are never
/// concurrent.
pub trait EngineGateway: Send {
    fn send(&mut self, command: &str) -> AnyResult<()>;

    fn recv(&mut self) -> AnyResult<Vec<u8>>;

    fn query(&mut self, command: &str) -> AnyResult<Vec<u8>> {
        self.send(command)?;
        self.recv()
    }

    fn close(&mut self) -> AnyResult<()> {
        Ok(())
    }
}

/// Opens the gateway for a shard index.
pub trait ShardConnector: Send + Sync {
    fn connect(&self, shard: usize) -> AnyResult<Box<dyn EngineGateway>>;
}

fn malformed(detail: impl std::fmt::Display) -> CoordError {
    CoordError::InvalidArgument(format!("malformed engine response: {detail}"))
}

/// Decodes a load response: a decimal row count.
pub fn parse_count(bytes: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(bytes).map_err(malformed)?;
    text.trim()
        .parse()
        .map_err(|_| malformed(format!("expected a row count, got {:?}", text.trim())))
}

/// Decodes a select response.
///
/// The payload is `[[[hits], [[name, type], ...], row...], drilldown...]`;
/// drilldown results are ignored.
pub fn parse_select(bytes: &[u8]) -> Result<SelectResult> {
    let payload: Value = serde_json::from_slice(bytes).map_err(malformed)?;
    let result = payload
        .as_array()
        .and_then(|outer| outer.first())
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("expected an outer array holding the result set"))?;

    let total_hits = result
        .first()
        .and_then(Value::as_array)
        .and_then(|hits| hits.first())
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("missing hit count"))?;

    let header = match result.get(1) {
        Some(Value::Array(header)) => header.as_slice(),
        Some(_) => return Err(malformed("column header must be an array")),
        None => &[][..],
    };
    let rows = result.get(2..).unwrap_or(&[]);

    let mut columns = Vec::with_capacity(header.len());
    for entry in header {
        let (name, type_name) = match entry.as_array().map(Vec::as_slice) {
            Some([Value::String(name), Value::String(type_name), ..]) => (name, type_name),
            _ => return Err(malformed(format!("bad column header {entry}"))),
        };
        let data_type = DataType::from_name(type_name)?;
        columns.push(TypedColumn {
            name: name.clone(),
            data_type,
            values: ColumnValues::with_capacity(data_type, rows.len()),
        });
    }

    for (index, row) in rows.iter().enumerate() {
        let fields = row
            .as_array()
            .ok_or_else(|| malformed(format!("row {index} is not an array")))?;
        if fields.len() != columns.len() {
            return Err(malformed(format!(
                "row {index} has {} field(s) for {} column(s)",
                fields.len(),
                columns.len()
            )));
        }
        for (column, field) in columns.iter_mut().zip(fields) {
            column.values.push_json(column.data_type, field)?;
        }
    }

    Ok(SelectResult {
        total_hits,
        columns,
    })
}
