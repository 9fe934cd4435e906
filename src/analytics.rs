//! In-memory analytical table store.
//!
//! Rows are identified by positive integer IDs which may be sparse: a row
//! can be inserted at any free ID. Cells that were never set read as
//! [`Datum::Na`]. Columns may reference another table, in which case their
//! integer values are row IDs of that table and expressions can follow them
//! (`ref_column.target_column`).

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::{CoordError, Result};

pub mod expression;
pub mod pipeline;

pub use expression::Expression;
pub use pipeline::{
    Cursor, CursorOptions, LogicalOp, Merger, MergerOptions, Pipeline, PipelineBuilder, ScoreOp,
    SortOrder, Sorter, SorterOrder,
};

/// Scalar kinds of the analytical engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataKind {
    Bool,
    Int,
    Float,
    Text,
}

impl DataKind {
    pub fn name(self) -> &'static str {
        match self {
            DataKind::Bool => "Bool",
            DataKind::Int => "Int",
            DataKind::Float => "Float",
            DataKind::Text => "Text",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataKind::Int | DataKind::Float)
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for DataKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// One cell value. `Na` marks an unset cell.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Datum {
    #[default]
    Na,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Datum {
    pub fn kind(&self) -> Option<DataKind> {
        match self {
            Datum::Na => None,
            Datum::Bool(_) => Some(DataKind::Bool),
            Datum::Int(_) => Some(DataKind::Int),
            Datum::Float(_) => Some(DataKind::Float),
            Datum::Text(_) => Some(DataKind::Text),
        }
    }

    pub fn is_na(&self) -> bool {
        matches!(self, Datum::Na)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int(i) => Some(*i as f64),
            Datum::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Total order used by sorters: NA sorts after every value.
    pub fn sort_cmp(&self, other: &Datum) -> Ordering {
        match (self, other) {
            (Datum::Na, Datum::Na) => Ordering::Equal,
            (Datum::Na, _) => Ordering::Greater,
            (_, Datum::Na) => Ordering::Less,
            (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
            (Datum::Int(a), Datum::Int(b)) => a.cmp(b),
            (Datum::Text(a), Datum::Text(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => Ordering::Equal,
            },
        }
    }
}

impl Serialize for Datum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Datum::Na => serializer.serialize_none(),
            Datum::Bool(b) => serializer.serialize_bool(*b),
            Datum::Int(i) => serializer.serialize_i64(*i),
            Datum::Float(f) => serializer.serialize_f64(*f),
            Datum::Text(s) => serializer.serialize_str(s),
        }
    }
}

/// A row reference flowing through a pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Record {
    pub row_id: i64,
    pub score: f64,
}

impl Record {
    pub fn new(row_id: i64, score: f64) -> Self {
        Self { row_id, score }
    }
}

#[derive(Debug)]
pub struct Column {
    name: String,
    kind: DataKind,
    reference: Option<String>,
    values: HashMap<i64, Datum>,
}

impl Column {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    /// Name of the referenced table, for reference columns.
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn get(&self, row_id: i64) -> Datum {
        self.values.get(&row_id).cloned().unwrap_or_default()
    }

    fn set(&mut self, row_id: i64, datum: Datum) -> Result<()> {
        let datum = match (self.kind, datum) {
            (_, Datum::Na) => {
                self.values.remove(&row_id);
                return Ok(());
            }
            (DataKind::Float, Datum::Int(i)) => Datum::Float(i as f64),
            (kind, datum) if datum.kind() == Some(kind) => datum,
            (kind, datum) => {
                return Err(CoordError::SchemaMismatch(format!(
                    "column {} holds {kind} values, got {datum:?}",
                    self.name
                )))
            }
        };
        self.values.insert(row_id, datum);
        Ok(())
    }
}

#[derive(Debug)]
pub struct Table {
    name: String,
    rows: BTreeSet<i64>,
    columns: Vec<Column>,
}

impl Table {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: BTreeSet::new(),
            columns: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn max_row_id(&self) -> Option<i64> {
        self.rows.iter().next_back().copied()
    }

    pub fn row_ids(&self) -> impl DoubleEndedIterator<Item = i64> + '_ {
        self.rows.iter().copied()
    }

    pub fn test_row(&self, row_id: i64) -> bool {
        self.rows.contains(&row_id)
    }

    /// Appends a row after the current maximum ID.
    pub fn insert_row(&mut self) -> i64 {
        let row_id = self.max_row_id().map_or(1, |max| max + 1);
        self.rows.insert(row_id);
        row_id
    }

    pub fn insert_row_at(&mut self, row_id: i64) -> Result<()> {
        if row_id <= 0 {
            return Err(CoordError::InvalidId(format!(
                "row ID must be positive, got {row_id}"
            )));
        }
        if !self.rows.insert(row_id) {
            return Err(CoordError::InvalidArgument(format!(
                "row {row_id} already exists in {}",
                self.name
            )));
        }
        Ok(())
    }

    pub fn remove_row(&mut self, row_id: i64) -> Result<()> {
        if !self.rows.remove(&row_id) {
            return Err(CoordError::NotFound(format!("row {row_id} in {}", self.name)));
        }
        for column in &mut self.columns {
            column.values.remove(&row_id);
        }
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn get(&self, row_id: i64, column: &str) -> Result<Datum> {
        let column = self
            .find_column(column)
            .ok_or_else(|| CoordError::NotFound(format!("column {}.{column}", self.name)))?;
        Ok(column.get(row_id))
    }

    pub fn set(&mut self, row_id: i64, column: &str, datum: Datum) -> Result<()> {
        if !self.rows.contains(&row_id) {
            return Err(CoordError::NotFound(format!("row {row_id} in {}", self.name)));
        }
        let table = &self.name;
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.name == column)
            .ok_or_else(|| CoordError::NotFound(format!("column {table}.{column}")))?;
        column.set(row_id, datum)
    }

    /// All rows in ID order, bounded by `options`.
    pub fn create_cursor(&self, options: CursorOptions) -> Cursor {
        let ids: Box<dyn Iterator<Item = i64> + '_> = match options.order {
            SortOrder::Regular => Box::new(self.row_ids()),
            SortOrder::Reverse => Box::new(self.row_ids().rev()),
        };
        let records = ids
            .skip(options.offset)
            .take(options.limit)
            .map(|row_id| Record::new(row_id, 0.0))
            .collect();
        Cursor::new(records)
    }
}

/// Named tables of the analytical engine.
#[derive(Debug, Default)]
pub struct Db {
    tables: Vec<Table>,
}

impl Db {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn create_table(&mut self, name: &str) -> Result<&mut Table> {
        validate_name(name)?;
        if self.find_table(name).is_some() {
            return Err(CoordError::InvalidArgument(format!(
                "table already exists: {name}"
            )));
        }
        self.tables.push(Table::new(name));
        let last = self.tables.len() - 1;
        Ok(&mut self.tables[last])
    }

    pub fn find_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn find_table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.find_table(name)
            .ok_or_else(|| CoordError::NotFound(format!("table {name}")))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.find_table_mut(name)
            .ok_or_else(|| CoordError::NotFound(format!("table {name}")))
    }

    pub fn remove_table(&mut self, name: &str) -> Result<()> {
        let referenced = self.tables.iter().any(|t| {
            t.name != name && t.columns.iter().any(|c| c.reference() == Some(name))
        });
        if referenced {
            return Err(CoordError::InvalidArgument(format!(
                "table {name} is referenced by another table"
            )));
        }
        let before = self.tables.len();
        self.tables.retain(|t| t.name != name);
        if self.tables.len() == before {
            return Err(CoordError::NotFound(format!("table {name}")));
        }
        Ok(())
    }

    /// Adds a column. A reference column must be `Int` and name an
    /// existing table.
    pub fn create_column(
        &mut self,
        table: &str,
        name: &str,
        kind: DataKind,
        reference: Option<&str>,
    ) -> Result<()> {
        validate_name(name)?;
        if let Some(target) = reference {
            if kind != DataKind::Int {
                return Err(CoordError::InvalidArgument(format!(
                    "reference column {name} must be Int, got {kind}"
                )));
            }
            self.table(target)?;
        }
        let table = self.table_mut(table)?;
        if table.find_column(name).is_some() {
            return Err(CoordError::InvalidArgument(format!(
                "column already exists: {}.{name}",
                table.name
            )));
        }
        table.columns.push(Column {
            name: name.to_string(),
            kind,
            reference: reference.map(str::to_string),
            values: HashMap::new(),
        });
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CoordError::InvalidArgument(format!("invalid name: {name:?}")))
    }
}

/// A typed result column produced by evaluating an output expression.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputColumn {
    pub name: String,
    pub kind: DataKind,
    pub values: Vec<Datum>,
}

impl Serialize for OutputColumn {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("OutputColumn", 3)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("type", &self.kind)?;
        s.serialize_field("values", &self.values)?;
        s.end()
    }
}
