//! In-process single-node engine speaking a subset of the command protocol.
//!
//! Supported commands: `table_create`, `column_create`, `load`,
//! `insert_row`, `select`, `table_list` and `status`. Rows are kept in local-ID order; `select`
//! scores rows by term occurrences when `query` is given.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::{EngineGateway, ShardConnector};
use crate::command::{self, CommandOptions};
use crate::value::{ColumnValues, DataType};

const DEFAULT_LIMIT: i64 = 10;

#[derive(Debug)]
struct MemTable {
    key_type: Option<DataType>,
    columns: Vec<(String, DataType)>,
    rows: BTreeMap<u32, Map<String, Value>>,
    keys: HashMap<String, u32>,
    next_id: u32,
}

impl MemTable {
    fn column_type(&self, name: &str) -> Option<DataType> {
        match name {
            "_id" => Some(DataType::UInt32),
            "_key" => self.key_type,
            "_score" => Some(DataType::Int32),
            _ => self
                .columns
                .iter()
                .find(|(column, _)| column == name)
                .map(|(_, data_type)| *data_type),
        }
    }

    fn insert(&mut self, record: Map<String, Value>) -> Result<()> {
        let mut fields = Map::new();
        for (name, value) in &record {
            if name == "_id" || name == "_key" {
                continue;
            }
            let data_type = self
                .column_type(name)
                .ok_or_else(|| anyhow!("unknown column: {name}"))?;
            if !value.is_null() {
                ColumnValues::with_capacity(data_type, 1)
                    .push_json(data_type, value)
                    .with_context(|| format!("column {name}"))?;
            }
            fields.insert(name.clone(), value.clone());
        }

        let id = match (record.get("_id"), record.get("_key")) {
            (Some(_), Some(_)) => bail!("both _id and _key given"),
            (Some(id), None) => {
                let id = id
                    .as_u64()
                    .and_then(|id| u32::try_from(id).ok())
                    .filter(|&id| id > 0)
                    .ok_or_else(|| anyhow!("invalid _id: {id}"))?;
                if self.key_type.is_some() && !self.rows.contains_key(&id) {
                    bail!("cannot create keyed record by _id: {id}");
                }
                id
            }
            (None, Some(key)) => self.find_or_insert_key(key)?.1,
            (None, None) => {
                if self.key_type.is_some() {
                    bail!("_key missing for keyed table");
                }
                self.next_id
            }
        };

        self.next_id = self.next_id.max(id.saturating_add(1));
        self.rows.entry(id).or_default().extend(fields);
        Ok(())
    }

    /// Row ID for `key`, creating an empty keyed row when absent.
    fn find_or_insert_key(&mut self, key: &Value) -> Result<(bool, u32)> {
        let key_type = self
            .key_type
            .ok_or_else(|| anyhow!("table has no key, _key given"))?;
        ColumnValues::with_capacity(key_type, 1).push_json(key_type, key)?;
        let key_text = key.to_string();
        if let Some(&id) = self.keys.get(&key_text) {
            return Ok((false, id));
        }
        let id = self.next_id;
        self.keys.insert(key_text, id);
        let mut fields = Map::new();
        fields.insert("_key".into(), key.clone());
        self.rows.insert(id, fields);
        self.next_id = id.saturating_add(1);
        Ok((true, id))
    }

    fn insert_keyless(&mut self) -> Result<u32> {
        if self.key_type.is_some() {
            bail!("_key missing for keyed table");
        }
        let id = self.next_id;
        self.rows.insert(id, Map::new());
        self.next_id = id.saturating_add(1);
        Ok(id)
    }
}

#[derive(Debug, Default)]
struct EngineState {
    tables: BTreeMap<String, MemTable>,
}

/// In-memory engine. Clones share the same tables.
#[derive(Clone, Debug, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<EngineState>>,
    pending: VecDeque<Result<Vec<u8>, String>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle on the same tables with its own response queue.
    pub fn handle(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            pending: VecDeque::new(),
        }
    }

    /// Number of rows currently stored in `table`.
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.state.lock().tables.get(table).map(|t| t.rows.len())
    }

    /// Runs one command and returns its response payload.
    pub fn execute(&self, line: &str) -> Result<Vec<u8>> {
        let command = match command::parse(line)? {
            Some(command) => command,
            None => return Ok(Vec::new()),
        };
        debug!("memory engine: {}", command.name);
        let options = &command.options;
        let mut state = self.state.lock();
        let body = match command.name.as_str() {
            "table_create" => state.table_create(options)?,
            "column_create" => state.column_create(options)?,
            "load" => state.load(options)?,
            "insert_row" => state.insert_row(options)?,
            "select" => state.select(options)?,
            "table_list" => Value::from(state.tables.keys().cloned().collect::<Vec<_>>()),
            "status" => json!({ "tables": state.tables.len() }),
            other => bail!("unknown command: {other}"),
        };
        Ok(serde_json::to_vec(&body)?)
    }
}

fn required<'a>(options: &'a CommandOptions, key: &str) -> Result<&'a str> {
    options.get(key).ok_or_else(|| anyhow!("{key} option missing"))
}

fn int_option(options: &CommandOptions, key: &str, default: i64) -> Result<i64> {
    match options.get(key) {
        Some(text) => text
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}: {text:?}")),
        None => Ok(default),
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn default_value(data_type: DataType) -> Value {
    match data_type {
        DataType::Bool => Value::Bool(false),
        DataType::Float | DataType::Time => json!(0.0),
        DataType::ShortText | DataType::Text | DataType::LongText => Value::from(""),
        DataType::TokyoGeoPoint | DataType::Wgs84GeoPoint => Value::from("0x0"),
        _ => json!(0),
    }
}

impl EngineState {
    fn table(&self, name: &str) -> Result<&MemTable> {
        self.tables
            .get(name)
            .ok_or_else(|| anyhow!("table not found: {name}"))
    }

    fn table_create(&mut self, options: &CommandOptions) -> Result<Value> {
        let name = required(options, "name")?;
        if self.tables.contains_key(name) {
            bail!("table already exists: {name}");
        }
        let flags = options.get("flags").unwrap_or("TABLE_NO_KEY");
        let key_type = if flags.contains("TABLE_NO_KEY") {
            None
        } else {
            Some(DataType::from_name(
                options.get("key_type").unwrap_or("ShortText"),
            )?)
        };
        self.tables.insert(
            name.to_string(),
            MemTable {
                key_type,
                columns: Vec::new(),
                rows: BTreeMap::new(),
                keys: HashMap::new(),
                next_id: 1,
            },
        );
        Ok(Value::Bool(true))
    }

    fn column_create(&mut self, options: &CommandOptions) -> Result<Value> {
        let table_name = required(options, "table")?;
        let name = required(options, "name")?;
        let data_type = DataType::from_name(required(options, "type")?)?;
        let table = self
            .tables
            .get_mut(table_name)
            .ok_or_else(|| anyhow!("table not found: {table_name}"))?;
        if table.column_type(name).is_some() {
            bail!("column already exists: {table_name}.{name}");
        }
        table.columns.push((name.to_string(), data_type));
        Ok(Value::Bool(true))
    }

    fn load(&mut self, options: &CommandOptions) -> Result<Value> {
        let table_name = required(options, "table")?;
        let values: Vec<Value> =
            serde_json::from_str(required(options, "values")?).context("invalid values")?;
        let columns = options.get("columns").map(split_list);
        let table = self
            .tables
            .get_mut(table_name)
            .ok_or_else(|| anyhow!("table not found: {table_name}"))?;

        let mut count = 0u64;
        for value in values {
            let record = match value {
                Value::Object(record) => record,
                Value::Array(fields) => {
                    let columns = columns
                        .as_ref()
                        .ok_or_else(|| anyhow!("columns option missing"))?;
                    if fields.len() != columns.len() {
                        bail!(
                            "record has {} value(s) for {} column(s)",
                            fields.len(),
                            columns.len()
                        );
                    }
                    columns.iter().cloned().zip(fields).collect()
                }
                other => bail!("invalid record: {other}"),
            };
            table.insert(record)?;
            count += 1;
        }
        Ok(Value::from(count))
    }

    /// `insert_row --table T [--key JSON]` answers `[inserted, id]`.
    fn insert_row(&mut self, options: &CommandOptions) -> Result<Value> {
        let table_name = required(options, "table")?;
        let key: Option<Value> = options
            .get("key")
            .map(serde_json::from_str)
            .transpose()
            .context("invalid key")?;
        let table = self
            .tables
            .get_mut(table_name)
            .ok_or_else(|| anyhow!("table not found: {table_name}"))?;
        let (inserted, id) = match key {
            Some(key) => table.find_or_insert_key(&key)?,
            None => (true, table.insert_keyless()?),
        };
        Ok(json!([inserted, id]))
    }

    fn select(&self, options: &CommandOptions) -> Result<Value> {
        let table = self.table(required(options, "table")?)?;

        let match_columns = match options.get("match_columns") {
            Some(list) => split_list(list),
            None => table
                .columns
                .iter()
                .filter(|(_, data_type)| data_type.is_text())
                .map(|(name, _)| name.clone())
                .collect(),
        };
        let terms: Vec<String> = options
            .get("query")
            .map(|q| q.split_whitespace().map(str::to_lowercase).collect())
            .unwrap_or_default();

        let mut hits: Vec<(u32, i64)> = Vec::new();
        for (&id, row) in &table.rows {
            if terms.is_empty() {
                hits.push((id, 0));
                continue;
            }
            let text: Vec<String> = match_columns
                .iter()
                .filter_map(|c| row.get(c).and_then(Value::as_str))
                .map(str::to_lowercase)
                .collect();
            let counts: Vec<usize> = terms
                .iter()
                .map(|term| text.iter().map(|t| t.matches(term.as_str()).count()).sum())
                .collect();
            if counts.iter().all(|&c| c > 0) {
                hits.push((id, counts.iter().sum::<usize>() as i64));
            }
        }

        let cell = |id: u32, score: i64, name: &str| -> Value {
            match name {
                "_id" => Value::from(id),
                "_score" => Value::from(score),
                _ => table
                    .rows
                    .get(&id)
                    .and_then(|row| row.get(name))
                    .filter(|v| !v.is_null())
                    .cloned()
                    .unwrap_or_else(|| {
                        table
                            .column_type(name)
                            .map(default_value)
                            .unwrap_or(Value::Null)
                    }),
            }
        };

        if let Some(sortby) = options.get("sortby") {
            let keys: Vec<(bool, String)> = split_list(sortby)
                .into_iter()
                .map(|k| match k.strip_prefix('-') {
                    Some(name) => (true, name.to_string()),
                    None => (false, k),
                })
                .collect();
            hits.sort_by(|a, b| {
                for (descending, key) in &keys {
                    let order = compare_json(&cell(a.0, a.1, key), &cell(b.0, b.1, key));
                    let order = if *descending { order.reverse() } else { order };
                    if order != Ordering::Equal {
                        return order;
                    }
                }
                Ordering::Equal
            });
        }

        let output_columns = match options.get("output_columns") {
            Some(list) => split_list(list),
            None => {
                let mut names = vec!["_id".to_string()];
                if table.key_type.is_some() {
                    names.push("_key".to_string());
                }
                names.extend(table.columns.iter().map(|(name, _)| name.clone()));
                names
            }
        };
        let mut header = Vec::with_capacity(output_columns.len());
        for name in &output_columns {
            let data_type = table
                .column_type(name)
                .ok_or_else(|| anyhow!("unknown output column: {name}"))?;
            header.push(json!([name, data_type.name()]));
        }

        let total = hits.len();
        let offset = int_option(options, "offset", 0)?.max(0) as usize;
        let limit = int_option(options, "limit", DEFAULT_LIMIT)?;
        let take = if limit < 0 { usize::MAX } else { limit as usize };

        let mut result = vec![json!([total]), Value::Array(header)];
        for &(id, score) in hits.iter().skip(offset).take(take) {
            let row: Vec<Value> = output_columns
                .iter()
                .map(|name| cell(id, score, name))
                .collect();
            result.push(Value::Array(row));
        }
        Ok(json!([result]))
    }
}

impl EngineGateway for MemoryEngine {
    fn send(&mut self, command: &str) -> Result<()> {
        let response = self.execute(command).map_err(|e| format!("{e:#}"));
        self.pending.push_back(response);
        Ok(())
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        match self.pending.pop_front() {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(message)) => Err(anyhow!(message)),
            None => bail!("no pending response"),
        }
    }
}

/// Connects shard `i` to the `i`-th in-memory engine.
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    engines: Vec<MemoryEngine>,
}

impl MemoryConnector {
    pub fn new(shards: usize) -> Self {
        Self {
            engines: (0..shards).map(|_| MemoryEngine::new()).collect(),
        }
    }

    pub fn engines(&self) -> &[MemoryEngine] {
        &self.engines
    }

    pub fn engine(&self, shard: usize) -> Option<&MemoryEngine> {
        self.engines.get(shard)
    }
}

impl ShardConnector for MemoryConnector {
    fn connect(&self, shard: usize) -> Result<Box<dyn EngineGateway>> {
        let engine = self
            .engines
            .get(shard)
            .ok_or_else(|| anyhow!("no memory engine for shard {shard}"))?;
        Ok(Box::new(engine.handle()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_docs() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine.execute("table_create Docs TABLE_NO_KEY").unwrap();
        engine
            .execute("column_create Docs body COLUMN_SCALAR Text")
            .unwrap();
        engine
            .execute("column_create Docs n COLUMN_SCALAR Int32")
            .unwrap();
        engine
    }

    fn select(engine: &MemoryEngine, line: &str) -> Value {
        serde_json::from_slice(&engine.execute(line).unwrap()).unwrap()
    }

    #[test]
    fn load_counts_and_assigns_ids() {
        let engine = engine_with_docs();
        let out = engine
            .execute(r#"load --table Docs --columns body,n --values '[["a b", 1], ["b", 2]]'"#)
            .unwrap();
        assert_eq!(out, b"2");
        let result = select(&engine, "select Docs --output_columns _id,n");
        assert_eq!(
            result,
            json!([[[2], [["_id", "UInt32"], ["n", "Int32"]], [1, 1], [2, 2]]])
        );
    }

    #[test]
    fn load_at_explicit_id_overwrites() {
        let engine = engine_with_docs();
        engine
            .execute(r#"load --table Docs --values '[{"_id": 5, "n": 1}]'"#)
            .unwrap();
        engine
            .execute(r#"load --table Docs --values '[{"_id": 5, "n": 9}, {"n": 3}]'"#)
            .unwrap();
        let result = select(&engine, "select Docs --output_columns _id,n");
        assert_eq!(result[0][2], json!([5, 9]));
        assert_eq!(result[0][3], json!([6, 3]));
        assert_eq!(engine.row_count("Docs"), Some(2));
    }

    #[test]
    fn keyed_tables_upsert_by_key() {
        let engine = MemoryEngine::new();
        engine
            .execute("table_create Users TABLE_HASH_KEY ShortText")
            .unwrap();
        engine
            .execute("column_create Users age COLUMN_SCALAR UInt8")
            .unwrap();
        engine
            .execute(r#"load --table Users --columns _key,age --values '[["ann", 30], ["bob", 40], ["ann", 31]]'"#)
            .unwrap();
        let result = select(&engine, "select Users");
        assert_eq!(result[0][0], json!([2]));
        assert_eq!(result[0][2], json!([1, "ann", 31]));
        assert_eq!(result[0][3], json!([2, "bob", 40]));
    }

    #[test]
    fn insert_row_finds_or_creates() {
        let engine = MemoryEngine::new();
        engine
            .execute("table_create Users TABLE_HASH_KEY ShortText")
            .unwrap();
        engine.execute("table_create Logs TABLE_NO_KEY").unwrap();

        let out = engine.execute(r#"insert_row Users '"ann"'"#).unwrap();
        assert_eq!(out, b"[true,1]");
        let out = engine.execute(r#"insert_row Users '"bob"'"#).unwrap();
        assert_eq!(out, b"[true,2]");
        let out = engine.execute(r#"insert_row Users '"ann"'"#).unwrap();
        assert_eq!(out, b"[false,1]");
        assert!(engine.execute("insert_row Users").is_err());
        assert!(engine.execute("insert_row Users 7").is_err());

        assert_eq!(engine.execute("insert_row Logs").unwrap(), b"[true,1]");
        assert_eq!(engine.execute("insert_row Logs").unwrap(), b"[true,2]");
        assert!(engine.execute(r#"insert_row Logs '"x"'"#).is_err());
        assert_eq!(engine.row_count("Logs"), Some(2));
    }

    #[test]
    fn query_scores_and_limits() {
        let engine = engine_with_docs();
        engine
            .execute(r#"load --table Docs --columns body --values '[["red fox"], ["red red"], ["blue"]]'"#)
            .unwrap();
        let result = select(
            &engine,
            "select Docs --query red --output_columns _id,_score --sortby -_score --limit 1",
        );
        assert_eq!(result[0][0], json!([2]));
        assert_eq!(result[0][1], json!([["_id", "UInt32"], ["_score", "Int32"]]));
        assert_eq!(result[0][2], json!([2, 2]));
        assert_eq!(result[0].as_array().unwrap().len(), 3);
    }

    #[test]
    fn negative_limit_returns_everything() {
        let engine = engine_with_docs();
        let values: Vec<Value> = (0..15).map(|i| json!([i])).collect();
        let line = format!(
            "load --table Docs --columns n --values '{}'",
            Value::Array(values)
        );
        engine.execute(&line).unwrap();
        let all = select(&engine, "select Docs --limit -1");
        assert_eq!(all[0].as_array().unwrap().len(), 2 + 15);
        let default = select(&engine, "select Docs");
        assert_eq!(default[0].as_array().unwrap().len(), 2 + 10);
    }

    #[test]
    fn errors_come_back_through_recv() {
        let mut engine = MemoryEngine::new();
        engine.send("select Missing").unwrap();
        engine.send("table_list").unwrap();
        assert!(engine.recv().is_err());
        assert_eq!(engine.recv().unwrap(), b"[]");
        assert!(engine.recv().is_err());
    }

    #[test]
    fn rejects_values_of_the_wrong_type() {
        let engine = engine_with_docs();
        assert!(engine
            .execute(r#"load --table Docs --columns n --values '[["x"]]'"#)
            .is_err());
        assert!(engine.execute("frobnicate").is_err());
    }

    #[test]
    fn connector_shares_engine_state() {
        let connector = MemoryConnector::new(2);
        let mut gateway = connector.connect(1).unwrap();
        gateway.query("table_create T").unwrap();
        assert_eq!(connector.engine(1).unwrap().row_count("T"), Some(0));
        assert_eq!(connector.engine(0).unwrap().row_count("T"), None);
        assert!(connector.connect(2).is_err());
    }
}
