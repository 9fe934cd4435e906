//! Record pipelines: cursor, filter, adjuster, sorter and merger stages
//! assembled on a stack and flushed to `(row_id, score)` records.

use std::collections::HashMap;

use super::{Db, Expression, Record};
use crate::error::{CoordError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Regular,
    Reverse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorOptions {
    pub offset: usize,
    pub limit: usize,
    pub order: SortOrder,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: usize::MAX,
            order: SortOrder::Regular,
        }
    }
}

/// Rows selected from a table, read in batches.
#[derive(Debug)]
pub struct Cursor {
    records: std::vec::IntoIter<Record>,
}

impl Cursor {
    pub(crate) fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }

    /// Reads up to `max` records.
    pub fn read(&mut self, max: usize) -> Vec<Record> {
        self.records.by_ref().take(max).collect()
    }

    pub fn read_all(self) -> Vec<Record> {
        self.records.collect()
    }
}

pub struct SorterOrder<'a> {
    pub expression: Expression<'a>,
    pub order: SortOrder,
}

/// Multi-key stable sort followed by offset/limit.
pub struct Sorter<'a> {
    orders: Vec<SorterOrder<'a>>,
    offset: usize,
    limit: usize,
}

impl<'a> Sorter<'a> {
    pub fn new(orders: Vec<SorterOrder<'a>>, offset: usize, limit: usize) -> Result<Self> {
        if orders.is_empty() {
            return Err(CoordError::InvalidArgument(
                "sorter needs at least one order".into(),
            ));
        }
        Ok(Self {
            orders,
            offset,
            limit,
        })
    }

    /// Builds a sorter from a comma-separated key list; a leading `-`
    /// sorts that key in reverse.
    pub fn parse(db: &'a Db, table: &str, keys: &str, offset: usize, limit: usize) -> Result<Self> {
        let mut orders = Vec::new();
        for key in keys.split(',').map(str::trim).filter(|k| !k.is_empty()) {
            let (order, text) = match key.strip_prefix('-') {
                Some(text) => (SortOrder::Reverse, text),
                None => (SortOrder::Regular, key),
            };
            orders.push(SorterOrder {
                expression: Expression::parse(db, table, text)?,
                order,
            });
        }
        Self::new(orders, offset, limit)
    }

    pub fn sort(&self, records: &mut Vec<Record>) {
        let mut keyed: Vec<(Vec<_>, Record)> = records
            .iter()
            .map(|r| {
                let keys = self.orders.iter().map(|o| o.expression.evaluate(r)).collect();
                (keys, *r)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), order) in a.iter().zip(b).zip(&self.orders) {
                let ordering = match order.order {
                    SortOrder::Regular => x.sort_cmp(y),
                    SortOrder::Reverse => y.sort_cmp(x),
                };
                if ordering.is_ne() {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
        *records = keyed
            .into_iter()
            .map(|(_, r)| r)
            .skip(self.offset)
            .take(self.limit)
            .collect();
    }
}

/// Which row IDs survive a merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogicalOp {
    #[default]
    And,
    Or,
    Xor,
    Minus,
    Left,
    Right,
}

/// How the surviving records' scores are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScoreOp {
    #[default]
    Plus,
    Minus,
    Multiplication,
    Left,
    Right,
    Zero,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MergerOptions {
    pub logical: LogicalOp,
    pub score: ScoreOp,
    /// Score used for a side that lacks the row.
    pub missing_score: f64,
    pub offset: usize,
    pub limit: usize,
}

impl Default for MergerOptions {
    fn default() -> Self {
        Self {
            logical: LogicalOp::And,
            score: ScoreOp::Plus,
            missing_score: 0.0,
            offset: 0,
            limit: usize::MAX,
        }
    }
}

pub struct Merger;

impl Merger {
    /// Merges two record sets. Output order is left's order followed by
    /// right-only records in right's order.
    pub fn merge(options: &MergerOptions, left: Vec<Record>, right: Vec<Record>) -> Vec<Record> {
        let combine = |l: f64, r: f64| match options.score {
            ScoreOp::Plus => l + r,
            ScoreOp::Minus => l - r,
            ScoreOp::Multiplication => l * r,
            ScoreOp::Left => l,
            ScoreOp::Right => r,
            ScoreOp::Zero => 0.0,
        };
        let missing = options.missing_score;
        let left_scores: HashMap<i64, f64> = left.iter().map(|r| (r.row_id, r.score)).collect();
        let right_scores: HashMap<i64, f64> = right.iter().map(|r| (r.row_id, r.score)).collect();

        let keep_left = |in_right: bool| match options.logical {
            LogicalOp::And => in_right,
            LogicalOp::Or | LogicalOp::Left => true,
            LogicalOp::Xor | LogicalOp::Minus => !in_right,
            LogicalOp::Right => in_right,
        };
        let keep_right_only = matches!(
            options.logical,
            LogicalOp::Or | LogicalOp::Xor | LogicalOp::Right
        );

        let mut merged = Vec::new();
        for record in &left {
            let right_score = right_scores.get(&record.row_id).copied();
            if keep_left(right_score.is_some()) {
                let score = combine(record.score, right_score.unwrap_or(missing));
                merged.push(Record::new(record.row_id, score));
            }
        }
        if keep_right_only {
            for record in &right {
                if !left_scores.contains_key(&record.row_id) {
                    merged.push(Record::new(record.row_id, combine(missing, record.score)));
                }
            }
        }
        merged
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .collect()
    }
}

enum Stage<'a> {
    Records(Vec<Record>),
    Filter {
        input: Box<Stage<'a>>,
        expression: Expression<'a>,
        offset: usize,
        limit: usize,
    },
    Adjuster {
        input: Box<Stage<'a>>,
        expression: Expression<'a>,
    },
    Sorter {
        input: Box<Stage<'a>>,
        sorter: Sorter<'a>,
    },
    Merger {
        left: Box<Stage<'a>>,
        right: Box<Stage<'a>>,
        options: MergerOptions,
    },
}

impl Stage<'_> {
    fn flush(self) -> Vec<Record> {
        match self {
            Stage::Records(records) => records,
            Stage::Filter {
                input,
                expression,
                offset,
                limit,
            } => {
                let mut records = input.flush();
                expression.filter(&mut records, offset, limit);
                records
            }
            Stage::Adjuster { input, expression } => {
                let mut records = input.flush();
                expression.adjust(&mut records);
                records
            }
            Stage::Sorter { input, sorter } => {
                let mut records = input.flush();
                sorter.sort(&mut records);
                records
            }
            Stage::Merger {
                left,
                right,
                options,
            } => Merger::merge(&options, left.flush(), right.flush()),
        }
    }
}

/// Builds a pipeline as a stack: sources push an entry, unary stages
/// replace the top entry, mergers combine the top two.
#[derive(Default)]
pub struct PipelineBuilder<'a> {
    stack: Vec<Stage<'a>>,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    pub fn push_cursor(&mut self, cursor: Cursor) {
        self.stack.push(Stage::Records(cursor.read_all()));
    }

    pub fn push_records(&mut self, records: Vec<Record>) {
        self.stack.push(Stage::Records(records));
    }

    fn pop(&mut self, stage: &str) -> Result<Box<Stage<'a>>> {
        self.stack.pop().map(Box::new).ok_or_else(|| {
            CoordError::InvalidArgument(format!("{stage} needs an input on the pipeline stack"))
        })
    }

    pub fn push_filter(&mut self, expression: Expression<'a>, offset: usize, limit: usize) -> Result<()> {
        if expression.kind() != super::DataKind::Bool {
            return Err(CoordError::InvalidArgument(format!(
                "filter must be Bool, got {}",
                expression.kind()
            )));
        }
        let input = self.pop("filter")?;
        self.stack.push(Stage::Filter {
            input,
            expression,
            offset,
            limit,
        });
        Ok(())
    }

    pub fn push_adjuster(&mut self, expression: Expression<'a>) -> Result<()> {
        if !expression.kind().is_numeric() {
            return Err(CoordError::InvalidArgument(format!(
                "adjuster must be numeric, got {}",
                expression.kind()
            )));
        }
        let input = self.pop("adjuster")?;
        self.stack.push(Stage::Adjuster { input, expression });
        Ok(())
    }

    pub fn push_sorter(&mut self, sorter: Sorter<'a>) -> Result<()> {
        let input = self.pop("sorter")?;
        self.stack.push(Stage::Sorter { input, sorter });
        Ok(())
    }

    pub fn push_merger(&mut self, options: MergerOptions) -> Result<()> {
        if self.stack.len() < 2 {
            return Err(CoordError::InvalidArgument(
                "merger needs two inputs on the pipeline stack".into(),
            ));
        }
        let right = self.pop("merger")?;
        let left = self.pop("merger")?;
        self.stack.push(Stage::Merger {
            left,
            right,
            options,
        });
        Ok(())
    }

    /// Finishes the pipeline. Exactly one entry must remain on the stack.
    pub fn release(mut self) -> Result<Pipeline<'a>> {
        if self.stack.len() != 1 {
            return Err(CoordError::InvalidArgument(format!(
                "pipeline stack holds {} entries, expected 1",
                self.stack.len()
            )));
        }
        let root = *self.pop("pipeline")?;
        Ok(Pipeline { root })
    }
}

pub struct Pipeline<'a> {
    root: Stage<'a>,
}

impl Pipeline<'_> {
    pub fn flush(self) -> Vec<Record> {
        self.root.flush()
    }
}
