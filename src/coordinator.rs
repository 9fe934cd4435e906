//! The coordinator: one logical database over a fixed set of engine shards.
//!
//! Every command line is parsed and dispatched by name:
//! - `load` splits its record batch per shard and sums the inserted counts,
//! - `select` is broadcast and merged in shard order, optionally followed by
//!   a filter/sort stage on the in-memory analytical database,
//! - `snapshot` copies one column from every shard into that database,
//! - anything else is sent unchanged to every shard.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{RwLock, RwLockReadGuard};
use serde_json::{Map, Value};

use crate::analytics::{
    CursorOptions, DataKind, Datum, Db, Expression, OutputColumn, PipelineBuilder, Record, Sorter,
};
use crate::command::{format_command, parse, CommandOptions};
use crate::config::{CoordinatorBuilder, CoordinatorConfig};
use crate::error::{CoordError, Result, ShardFailure};
use crate::executor::{into_responses, ExecMode, FanOut};
use crate::gateway::{parse_select, ShardConnector};
use crate::merge::{merge_load, merge_select, scored_records};
use crate::router::{LoadColumns, ShardRouter, ID_COLUMN};
use crate::row_id::RowIdCodec;
use crate::shard::ShardSet;
use crate::value::{ColumnValues, DataType, Scalar, SelectResult};

/// Options with this prefix are evaluated by the analytical database.
pub const ANALYTICS_PREFIX: &str = "analytics_";

const ANALYTICS_FILTER: &str = "analytics_filter";
const ANALYTICS_SORTBY: &str = "analytics_sortby";
const ANALYTICS_OUTPUT_COLUMNS: &str = "analytics_output_columns";
const ANALYTICS_OFFSET: &str = "analytics_offset";
const ANALYTICS_LIMIT: &str = "analytics_limit";

/// Rows returned by a hybrid select when no `analytics_limit` is given.
const HYBRID_DEFAULT_LIMIT: usize = 10;

/// Client-visible outcome of one command.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    /// Blank line or comment.
    Empty,
    /// Rows inserted by a load.
    Count(u64),
    /// Merged engine select.
    Select(SelectResult),
    /// Select answered by the analytical database.
    Analytics(Vec<OutputColumn>),
    /// Command with no result beyond success.
    Done,
    /// Raw per-shard responses, in shard order.
    Passthrough(Vec<Vec<u8>>),
}

impl Response {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Response::Empty => Vec::new(),
            Response::Count(count) => count.to_string().into_bytes(),
            Response::Select(result) => serde_json::to_vec(&result.columns)?,
            Response::Analytics(columns) => serde_json::to_vec(columns)?,
            Response::Done => b"true".to_vec(),
            Response::Passthrough(responses) => {
                let mut out = vec![b'['];
                for (i, response) in responses.iter().enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    out.extend_from_slice(response);
                }
                out.push(b']');
                out
            }
        })
    }
}

pub struct Coordinator {
    shards: ShardSet,
    router: ShardRouter,
    codec: RowIdCodec,
    mode: ExecMode,
    analytics: RwLock<Db>,
}

impl Coordinator {
    /// Opens every shard of `config`, or none of them.
    pub fn open(config: CoordinatorConfig) -> Result<Self> {
        let codec = RowIdCodec::new(config.shards)?;
        let mode = config.exec_mode();
        let shards = ShardSet::open(config.connector.as_ref(), config.shards, &config.runtime)?;
        info!(
            "Coordinator open: {} shard(s), {:?} fan-out",
            config.shards, mode
        );
        Ok(Self {
            shards,
            router: ShardRouter::new(codec, config.routing_seed),
            codec,
            mode,
            analytics: RwLock::new(Db::new()),
        })
    }

    pub fn builder(connector: Arc<dyn ShardConnector>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(connector)
    }

    /// Closes every shard; failures are reported after all were attempted.
    pub fn close(mut self) -> Result<()> {
        self.shards.close()
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn codec(&self) -> RowIdCodec {
        self.codec
    }

    pub fn exec_mode(&self) -> ExecMode {
        self.mode
    }

    /// Read access to the analytical database that snapshots land in.
    ///
    /// The lock is not reentrant: drop the guard before running `snapshot`
    /// or an analytics `select` on the same thread.
    pub fn analytics(&self) -> RwLockReadGuard<'_, Db> {
        self.analytics.read()
    }

    fn fan_out(&self) -> FanOut<'_> {
        FanOut::new(&self.shards, self.mode)
    }

    /// Parses and runs one command line.
    pub fn execute(&self, line: &str) -> Result<Response> {
        let Some(command) = parse(line)? else {
            return Ok(Response::Empty);
        };
        match command.name.as_str() {
            "load" => self.load(command.options).map(Response::Count),
            "select" => self.select(command.options),
            "snapshot" => {
                let table = command.options.require("table")?;
                let column = command.options.require("column")?;
                self.snapshot(table, column)?;
                Ok(Response::Done)
            }
            _ => self.passthrough(line.trim()).map(Response::Passthrough),
        }
    }

    /// [`execute`](Self::execute), serialized.
    pub fn query(&self, line: &str) -> Result<Vec<u8>> {
        self.execute(line)?.to_bytes()
    }

    fn load(&self, mut options: CommandOptions) -> Result<u64> {
        let values = options
            .remove("values")
            .ok_or_else(|| CoordError::InvalidArgument("load requires values".into()))?;
        let records: Vec<Value> = serde_json::from_str(&values)?;
        if records.is_empty() {
            return Ok(0);
        }

        let batches = if records.iter().all(Value::is_object) {
            let maps = records
                .into_iter()
                .filter_map(|record| match record {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect();
            self.router.route_maps(maps)?
        } else {
            let columns = LoadColumns::parse(options.require("columns")?)?;
            options.set("columns", columns.to_option());
            self.router.route_rows(&columns, records)?
        };
        self.dispatch_load(&options, batches)
    }

    /// Sends each non-empty batch to its shard as a `load` and merges the
    /// counts. A sequential fan-out stops at the first failing shard.
    fn dispatch_load(&self, options: &CommandOptions, batches: Vec<Vec<Value>>) -> Result<u64> {
        let commands = batches
            .into_iter()
            .map(|batch| -> Result<Option<String>> {
                if batch.is_empty() {
                    return Ok(None);
                }
                let mut shard_options = options.clone();
                shard_options.set("values", serde_json::to_string(&batch)?);
                format_command("load", &shard_options).map(Some)
            })
            .collect::<Result<Vec<_>>>()?;
        let report = merge_load(self.fan_out().execute(commands, true));
        debug!(
            "load: {} row(s), {} shard failure(s)",
            report.inserted,
            report.failures.len()
        );
        report.into_result()
    }

    fn select(&self, options: CommandOptions) -> Result<Response> {
        let table = options.require("table")?.to_string();
        let (analytics, engine) = options.split_prefix(ANALYTICS_PREFIX);
        if analytics.is_empty() {
            return self.select_merged(engine).map(Response::Select);
        }
        if engine.len() == 1 {
            debug!("select on {}: analytics only", table);
            return self
                .select_analytics(&table, &analytics, None, usize::MAX)
                .map(Response::Analytics);
        }

        debug!("select on {}: hybrid", table);
        let mut engine = engine;
        engine.set("output_columns", format!("{ID_COLUMN},_score"));
        engine.set("limit", "-1");
        let results = self.broadcast_select(engine)?;
        let records = scored_records(&self.codec, results)?;
        self.select_analytics(&table, &analytics, Some(records), HYBRID_DEFAULT_LIMIT)
            .map(Response::Analytics)
    }

    fn broadcast_select(&self, mut options: CommandOptions) -> Result<Vec<(usize, SelectResult)>> {
        options.set("cache", "no");
        let command = format_command("select", &options)?;
        into_responses(self.fan_out().broadcast(&command))?
            .into_iter()
            .map(|(shard, bytes)| -> Result<_> { Ok((shard, parse_select(&bytes)?)) })
            .collect()
    }

    fn select_merged(&self, options: CommandOptions) -> Result<SelectResult> {
        merge_select(&self.codec, self.broadcast_select(options)?)
    }

    /// Runs the analytics stage over `records`, or over the whole snapshot
    /// table when `records` is `None`.
    fn select_analytics(
        &self,
        table: &str,
        options: &CommandOptions,
        records: Option<Vec<Record>>,
        default_limit: usize,
    ) -> Result<Vec<OutputColumn>> {
        let db = self.analytics.read();
        let offset = parse_offset(options)?;
        let limit = parse_limit(options, default_limit)?;

        let mut builder = PipelineBuilder::new();
        match records {
            Some(records) => builder.push_records(records),
            None => builder.push_cursor(db.table(table)?.create_cursor(CursorOptions::default())),
        }
        let filter = Expression::parse(&db, table, options.get(ANALYTICS_FILTER).unwrap_or("TRUE"))?;
        match options.get(ANALYTICS_SORTBY) {
            Some(keys) => {
                builder.push_filter(filter, 0, usize::MAX)?;
                builder.push_sorter(Sorter::parse(&db, table, keys, offset, limit)?)?;
            }
            None => builder.push_filter(filter, offset, limit)?,
        }
        let records = builder.release()?.flush();

        let names: Vec<String> = match options.get(ANALYTICS_OUTPUT_COLUMNS) {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            None => std::iter::once(ID_COLUMN.to_string())
                .chain(db.table(table)?.columns().iter().map(|c| c.name().to_string()))
                .collect(),
        };
        names
            .into_iter()
            .map(|name| -> Result<OutputColumn> {
                let expression = Expression::parse(&db, table, &name)?;
                Ok(OutputColumn {
                    kind: expression.kind(),
                    values: expression.evaluate_all(&records),
                    name,
                })
            })
            .collect()
    }

    /// Copies `column` of `table` from every shard into the analytical
    /// database, keyed by global row ID.
    pub fn snapshot(&self, table: &str, column: &str) -> Result<()> {
        let options: CommandOptions = [
            ("table", table.to_string()),
            ("output_columns", format!("{ID_COLUMN},{column}")),
            ("limit", "-1".to_string()),
        ]
        .into_iter()
        .collect();
        let results = self.broadcast_select(options)?;

        // Every shard is checked and decoded before the database is touched.
        let mut kind: Option<(usize, DataKind)> = None;
        let mut staged = Vec::new();
        for (shard, result) in results {
            let [ids, values] = result.columns.as_slice() else {
                return Err(CoordError::SchemaMismatch(format!(
                    "shard {shard} returned {} column(s) for a snapshot, expected 2",
                    result.columns.len()
                )));
            };
            if ids.name != ID_COLUMN || values.name != column {
                return Err(CoordError::SchemaMismatch(format!(
                    "shard {shard} returned columns {},{} for a snapshot of {column}",
                    ids.name, values.name
                )));
            }
            let shard_kind = analytics_kind(values.data_type)?;
            match kind {
                Some((first, first_kind)) if first_kind != shard_kind => {
                    return Err(CoordError::SchemaMismatch(format!(
                        "{table}.{column} is {first_kind} on shard {first} but {shard_kind} on shard {shard}"
                    )))
                }
                Some(_) => {}
                None => kind = Some((shard, shard_kind)),
            }
            staged.reserve(ids.len());
            for index in 0..ids.len() {
                let local = ids.values.as_i64(index).ok_or_else(|| {
                    CoordError::InvalidId(format!("shard {shard} returned a non-integer _id"))
                })?;
                let global = self.codec.to_global(shard, local)?;
                staged.push((global, datum_at(&values.values, index)?));
            }
        }
        let Some((_, kind)) = kind else {
            return Ok(());
        };

        let mut db = self.analytics.write();
        ensure_column(&mut db, table, column, kind)?;
        let target = db.table_mut(table)?;
        let copied = staged.len();
        for (global, datum) in staged {
            if !target.test_row(global) {
                target.insert_row_at(global)?;
            }
            target.set(global, column, datum)?;
        }
        info!("Snapshot of {}.{}: {} row(s)", table, column, copied);
        Ok(())
    }

    /// Sends a command line unchanged to every shard.
    fn passthrough(&self, line: &str) -> Result<Vec<Vec<u8>>> {
        let responses = into_responses(self.fan_out().broadcast(line))?;
        Ok(responses.into_iter().map(|(_, bytes)| bytes).collect())
    }

    /// Loads positional records aligned with `columns`.
    pub fn load_rows(&self, table: &str, columns: &[&str], rows: Vec<Vec<Scalar>>) -> Result<u64> {
        validate_name(table)?;
        for column in columns {
            validate_name(column)?;
        }
        if rows.is_empty() {
            return Err(CoordError::InvalidArgument("no records to load".into()));
        }
        if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(CoordError::InvalidArgument(format!(
                "record {index} has {} value(s) for {} column(s)",
                row.len(),
                columns.len()
            )));
        }

        let columns = LoadColumns::from_names(columns.iter().copied())?;
        let records = rows
            .iter()
            .map(|row| Value::Array(row.iter().map(Scalar::to_json).collect()))
            .collect();
        let batches = self.router.route_rows(&columns, records)?;
        let options: CommandOptions = [("table", table.to_string()), ("columns", columns.to_option())]
            .into_iter()
            .collect();
        self.dispatch_load(&options, batches)
    }

    /// Loads column-oriented values: `values[i]` holds column `columns[i]`
    /// for every record.
    pub fn load_columnar(
        &self,
        table: &str,
        columns: &[&str],
        values: Vec<Vec<Scalar>>,
    ) -> Result<u64> {
        if columns.is_empty() {
            return Err(CoordError::InvalidArgument("no columns to load".into()));
        }
        if columns.len() != values.len() {
            return Err(CoordError::InvalidArgument(format!(
                "{} column name(s) for {} value column(s)",
                columns.len(),
                values.len()
            )));
        }
        let num_records = values[0].len();
        if let Some((index, column)) = values.iter().enumerate().find(|(_, v)| v.len() != num_records) {
            return Err(CoordError::InvalidArgument(format!(
                "column {} has {} value(s), column {} has {num_records}",
                columns[index],
                column.len(),
                columns[0]
            )));
        }
        let mut rows: Vec<Vec<Scalar>> = (0..num_records)
            .map(|_| Vec::with_capacity(columns.len()))
            .collect();
        for column in values {
            for (row, value) in rows.iter_mut().zip(column) {
                row.push(value);
            }
        }
        self.load_rows(table, columns, rows)
    }

    /// [`load_columnar`](Self::load_columnar) with columns keyed by name.
    pub fn load_columnar_map(&self, table: &str, columns: BTreeMap<String, Vec<Scalar>>) -> Result<u64> {
        let (names, values): (Vec<String>, Vec<Vec<Scalar>>) = columns.into_iter().unzip();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.load_columnar(table, &names, values)
    }

    /// Inserts one row by key, or finds the existing row with that key.
    /// Keyless tables take `None` and always get a new row.
    ///
    /// Returns whether a row was created and its global ID.
    pub fn insert_row(&self, table: &str, key: Option<Scalar>) -> Result<(bool, i64)> {
        validate_name(table)?;
        let key = key.map(|key| key.to_json());
        let shard = self.router.shard_for(key.as_ref())?;
        let mut options: CommandOptions = [("table", table.to_string())].into_iter().collect();
        if let Some(key) = &key {
            options.set("key", key.to_string());
        }
        let raw = self.shard_query(shard, &format_command("insert_row", &options)?)?;
        let (inserted, local): (bool, i64) = serde_json::from_slice(&raw).map_err(|e| {
            CoordError::InvalidArgument(format!("malformed insert_row response from shard {shard}: {e}"))
        })?;
        Ok((inserted, self.codec.to_global(shard, local)?))
    }

    /// Loads records given as column-name maps.
    pub fn load_maps(&self, table: &str, rows: Vec<BTreeMap<String, Scalar>>) -> Result<u64> {
        validate_name(table)?;
        if rows.is_empty() {
            return Err(CoordError::InvalidArgument("no records to load".into()));
        }
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = Map::new();
            for (name, value) in row {
                validate_name(&name)?;
                record.insert(name, value.to_json());
            }
            records.push(record);
        }
        let batches = self.router.route_maps(records)?;
        let options: CommandOptions = [("table", table.to_string())].into_iter().collect();
        self.dispatch_load(&options, batches)
    }

    /// Sets one cell of the row with global ID `global_id`.
    pub fn set_value(&self, table: &str, column: &str, global_id: i64, value: Scalar) -> Result<()> {
        validate_name(table)?;
        validate_name(column)?;
        let (shard, local) = self.codec.from_global(global_id)?;
        let options: CommandOptions = [
            ("table", table.to_string()),
            ("columns", format!("{ID_COLUMN},{column}")),
            (
                "values",
                Value::Array(vec![Value::Array(vec![Value::from(local), value.to_json()])]).to_string(),
            ),
        ]
        .into_iter()
        .collect();
        let mut commands = vec![None; self.num_shards()];
        commands[shard] = Some(format_command("load", &options)?);
        merge_load(self.fan_out().execute(commands, true)).into_result()?;
        Ok(())
    }

    /// Raw access to a single shard.
    pub fn shard_query(&self, shard: usize, command: &str) -> Result<Vec<u8>> {
        if shard >= self.num_shards() {
            return Err(CoordError::InvalidArgument(format!(
                "shard {shard} out of range (0..{})",
                self.num_shards()
            )));
        }
        self.shards.query(shard, command.to_string()).map_err(|e| {
            let failure = ShardFailure::new(shard, &e);
            CoordError::Shard {
                shard: failure.shard,
                message: failure.message,
            }
        })
    }
}

fn validate_name(name: &str) -> Result<()> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(CoordError::InvalidArgument(format!("invalid name: {name:?}")))
    }
}

fn parse_int(options: &CommandOptions, key: &str) -> Result<Option<i64>> {
    options
        .get(key)
        .map(|raw| {
            raw.trim().parse::<i64>().map_err(|_| {
                CoordError::InvalidArgument(format!("{key} must be an integer, got {raw:?}"))
            })
        })
        .transpose()
}

fn parse_offset(options: &CommandOptions) -> Result<usize> {
    match parse_int(options, ANALYTICS_OFFSET)? {
        None => Ok(0),
        Some(offset) => usize::try_from(offset).map_err(|_| {
            CoordError::InvalidArgument(format!("{ANALYTICS_OFFSET} must not be negative"))
        }),
    }
}

/// A negative limit means no limit.
fn parse_limit(options: &CommandOptions, default: usize) -> Result<usize> {
    Ok(match parse_int(options, ANALYTICS_LIMIT)? {
        None => default,
        Some(limit) => usize::try_from(limit).unwrap_or(usize::MAX),
    })
}

/// Analytical kind holding values of an engine type.
fn analytics_kind(data_type: DataType) -> Result<DataKind> {
    Ok(match data_type {
        DataType::Bool => DataKind::Bool,
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Time => DataKind::Int,
        DataType::Float => DataKind::Float,
        DataType::ShortText | DataType::Text | DataType::LongText => DataKind::Text,
        DataType::TokyoGeoPoint | DataType::Wgs84GeoPoint => {
            return Err(CoordError::UnsupportedType(format!(
                "{data_type} cannot be copied into the analytical database"
            )))
        }
    })
}

fn datum_at(values: &ColumnValues, index: usize) -> Result<Datum> {
    let datum = match values {
        ColumnValues::Bool(v) => v.get(index).map(|&b| Datum::Bool(b)),
        ColumnValues::Float(v) => v.get(index).map(|&f| Datum::Float(f)),
        ColumnValues::Text(v) => v.get(index).map(|s| Datum::Text(s.clone())),
        ColumnValues::GeoPoint(_) => {
            return Err(CoordError::UnsupportedType(
                "geo points cannot be copied into the analytical database".into(),
            ))
        }
        ints => ints.as_i64(index).map(Datum::Int),
    };
    datum.ok_or_else(|| CoordError::InvalidArgument(format!("no integer value at row {index}")))
}

/// Creates the snapshot table and column on first use. A table created
/// here is removed again when its column cannot be added.
fn ensure_column(db: &mut Db, table: &str, column: &str, kind: DataKind) -> Result<()> {
    let created = db.find_table(table).is_none();
    if created {
        db.create_table(table)?;
    }
    let result = match db.table(table)?.find_column(column).map(|c| c.kind()) {
        Some(existing) if existing != kind => Err(CoordError::SchemaMismatch(format!(
            "{table}.{column} is {existing} in the analytical database, shard data is {kind}"
        ))),
        Some(_) => Ok(()),
        None => db.create_column(table, column, kind, None),
    };
    if result.is_err() && created {
        db.remove_table(table)?;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryConnector;

    fn open(shards: usize) -> (Arc<MemoryConnector>, Coordinator) {
        let connector = Arc::new(MemoryConnector::new(shards));
        let coordinator = Coordinator::builder(connector.clone())
            .shards(shards)
            .parallelism(shards)
            .routing_seed(11)
            .build()
            .unwrap();
        (connector, coordinator)
    }

    fn setup(coordinator: &Coordinator) {
        coordinator
            .execute("table_create Docs TABLE_NO_KEY")
            .unwrap();
        coordinator
            .execute("column_create Docs title COLUMN_SCALAR ShortText")
            .unwrap();
        coordinator
            .execute("column_create Docs views COLUMN_SCALAR Int32")
            .unwrap();
    }

    #[test]
    fn blank_and_comment_lines_do_nothing() {
        let (_connector, coordinator) = open(2);
        assert_eq!(coordinator.execute("   ").unwrap(), Response::Empty);
        assert_eq!(coordinator.execute("# note").unwrap(), Response::Empty);
        assert!(coordinator.query("").unwrap().is_empty());
    }

    #[test]
    fn passthrough_concatenates_shard_responses() {
        let (connector, coordinator) = open(3);
        let bytes = coordinator.query("table_create Docs TABLE_NO_KEY").unwrap();
        let parsed: Vec<Value> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(connector.engines().iter().all(|e| e.row_count("Docs") == Some(0)));
    }

    #[test]
    fn load_requires_values_and_columns() {
        let (_connector, coordinator) = open(2);
        setup(&coordinator);
        assert!(matches!(
            coordinator.execute("load --table Docs"),
            Err(CoordError::InvalidArgument(_))
        ));
        assert!(matches!(
            coordinator.execute("load --table Docs --values '[[\"a\", 1]]'"),
            Err(CoordError::InvalidArgument(_))
        ));
        assert_eq!(
            coordinator.execute("load --table Docs --values '[]'").unwrap(),
            Response::Count(0)
        );
    }

    #[test]
    fn analytics_only_select_needs_a_snapshot() {
        let (_connector, coordinator) = open(2);
        setup(&coordinator);
        let err = coordinator
            .execute("select Docs --analytics_filter 'views > 1'")
            .unwrap_err();
        assert!(matches!(err, CoordError::NotFound(_)));
    }

    #[test]
    fn select_requires_table() {
        let (_connector, coordinator) = open(1);
        assert!(matches!(
            coordinator.execute("select --query x"),
            Err(CoordError::InvalidArgument(_))
        ));
    }

    #[test]
    fn typed_loads_validate_input() {
        let (_connector, coordinator) = open(2);
        setup(&coordinator);
        assert!(coordinator.load_rows("Docs", &["title"], Vec::new()).is_err());
        assert!(coordinator
            .load_rows("Do cs", &["title"], vec![vec![Scalar::from("x")]])
            .is_err());
        let err = coordinator
            .load_rows("Docs", &["title", "views"], vec![vec![Scalar::from("x")]])
            .unwrap_err();
        assert!(matches!(err, CoordError::InvalidArgument(_)));
        assert_eq!(
            coordinator
                .load_rows(
                    "Docs",
                    &["title", "views"],
                    vec![vec![Scalar::from("x"), Scalar::Int(3)]]
                )
                .unwrap(),
            1
        );
    }

    #[test]
    fn set_value_targets_the_owning_shard() {
        let (connector, coordinator) = open(3);
        setup(&coordinator);
        coordinator.set_value("Docs", "views", 5, Scalar::Int(9)).unwrap();
        assert_eq!(connector.engine(1).unwrap().row_count("Docs"), Some(1));
        assert_eq!(connector.engine(0).unwrap().row_count("Docs"), Some(0));

        let result = match coordinator
            .execute("select Docs --output_columns _id,views")
            .unwrap()
        {
            Response::Select(result) => result,
            other => panic!("unexpected response {other:?}"),
        };
        assert_eq!(result.columns[0].values.as_i64(0), Some(5));
        assert_eq!(result.columns[1].values.as_i64(0), Some(9));
    }

    #[test]
    fn shard_query_checks_bounds() {
        let (_connector, coordinator) = open(2);
        assert!(coordinator.shard_query(1, "status").is_ok());
        assert!(matches!(
            coordinator.shard_query(2, "status"),
            Err(CoordError::InvalidArgument(_))
        ));
        assert!(matches!(
            coordinator.shard_query(0, "bogus"),
            Err(CoordError::Shard { shard: 0, .. })
        ));
    }

    #[test]
    fn snapshot_maps_engine_types() {
        assert_eq!(analytics_kind(DataType::UInt8).unwrap(), DataKind::Int);
        assert_eq!(analytics_kind(DataType::Time).unwrap(), DataKind::Int);
        assert_eq!(analytics_kind(DataType::LongText).unwrap(), DataKind::Text);
        assert!(matches!(
            analytics_kind(DataType::TokyoGeoPoint),
            Err(CoordError::UnsupportedType(_))
        ));
    }

    #[test]
    fn response_bytes() {
        assert_eq!(Response::Count(12).to_bytes().unwrap(), b"12");
        assert_eq!(Response::Done.to_bytes().unwrap(), b"true");
        assert_eq!(
            Response::Passthrough(vec![b"true".to_vec(), b"1".to_vec()])
                .to_bytes()
                .unwrap(),
            b"[true,1]"
        );
    }
}
