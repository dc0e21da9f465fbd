//! Turns a header-first cell grid into [`TrialRow`]s.
//!
//! The header is resolved once per read into a [`TableSchema`]: every column
//! position gets its label and the occurrence number of that label, so
//! repeated labels (two `D7` columns) can be exposed as `D7_1` / `D7_2`
//! alongside the label-keyed cells, where the last occurrence wins.

use std::{borrow::Cow, fmt};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub type Grid = Vec<Vec<String>>;

pub const SHEET_KEY: &str = "_sheet";
pub const ROW_KEY: &str = "_row";
pub const ID_KEY: &str = "_id";
pub const META_KEY: &str = "_meta";

/// `table:row_number` handle of one sheet row. Row 1 is the header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowId {
    pub table: String,
    pub row: u32,
}

impl RowId {
    pub fn new(table: impl Into<String>, row: u32) -> Self {
        Self {
            table: table.into(),
            row,
        }
    }

    /// Splits on the first colon. The table part must be non-empty and the
    /// row part a positive integer.
    pub fn parse(id: &str) -> AppResult<Self> {
        let invalid = || AppError::InvalidIdentifier(id.to_string());
        let (table, row) = id.split_once(':').ok_or_else(invalid)?;
        if table.is_empty() {
            return Err(invalid());
        }
        let row = row.trim().parse::<u32>().map_err(|_| invalid())?;
        if row == 0 {
            return Err(invalid());
        }
        Ok(Self::new(table, row))
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowMeta {
    Noise,
}

/// One materialized sheet row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialRow {
    #[serde(flatten)]
    pub fields: IndexMap<String, String>,
    #[serde(rename = "_sheet")]
    pub source_table: String,
    #[serde(rename = "_row")]
    pub source_row: u32,
    #[serde(rename = "_id")]
    pub row_id: String,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<RowMeta>,
}

impl TrialRow {
    pub fn new(id: &RowId, fields: IndexMap<String, String>) -> Self {
        Self {
            fields,
            source_table: id.table.clone(),
            source_row: id.row,
            row_id: id.to_string(),
            meta: None,
        }
    }

    /// Cell or derived value, empty when the label is absent.
    pub fn value(&self, label: &str) -> &str {
        self.fields.get(label).map(String::as_str).unwrap_or_default()
    }

    /// Like [`TrialRow::value`] but also resolves the synthetic `_` keys.
    pub fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        match key {
            SHEET_KEY => Some(Cow::Borrowed(&self.source_table)),
            ROW_KEY => Some(Cow::Owned(self.source_row.to_string())),
            ID_KEY => Some(Cow::Borrowed(&self.row_id)),
            META_KEY => self.meta.map(|_| Cow::Borrowed("noise")),
            _ => self.fields.get(key).map(|v| Cow::Borrowed(v.as_str())),
        }
    }

    pub fn is_noise(&self) -> bool {
        self.meta == Some(RowMeta::Noise)
    }
}

/// Copy `source` into `target` when `target` is absent or empty.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnFallback {
    pub target: String,
    pub source: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaRules {
    /// Labels that may appear more than once in a header.
    pub repeated_labels: Vec<String>,
    pub fallbacks: Vec<ColumnFallback>,
}

impl Default for SchemaRules {
    fn default() -> Self {
        Self {
            repeated_labels: vec!["D7".to_string(), "M1".to_string()],
            fallbacks: vec![ColumnFallback {
                target: "2차 컨택".to_string(),
                source: "2차 컨택 (종료일)".to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Column {
    label: String,
    occurrence: usize,
    repeatable: bool,
}

impl Column {
    fn derived(&self) -> Option<String> {
        self.repeatable
            .then(|| format!("{}_{}", self.label, self.occurrence))
    }
}

/// Header resolved into ordered `(label, occurrence)` pairs.
#[derive(Debug, Clone)]
pub struct TableSchema<'a> {
    columns: Vec<Column>,
    rules: &'a SchemaRules,
}

impl<'a> TableSchema<'a> {
    pub fn resolve(header: &[String], rules: &'a SchemaRules) -> Self {
        let mut seen: IndexMap<&str, usize> = IndexMap::new();
        let columns = header
            .iter()
            .map(|label| {
                let occurrence = seen.entry(label.as_str()).or_default();
                *occurrence += 1;
                Column {
                    label: label.clone(),
                    occurrence: *occurrence,
                    repeatable: rules.repeated_labels.iter().any(|r| r == label),
                }
            })
            .collect();

        Self { columns, rules }
    }

    /// Every key a row built from this schema can carry.
    pub fn labels(&self) -> IndexSet<String> {
        let mut labels = self
            .columns
            .iter()
            .map(|c| c.label.clone())
            .collect::<IndexSet<_>>();
        labels.extend(self.columns.iter().filter_map(Column::derived));
        labels.extend(self.rules.fallbacks.iter().map(|f| f.target.clone()));
        labels
    }

    pub fn materialize_row(&self, table: &str, row: u32, cells: &[String]) -> TrialRow {
        let cell = |i: usize| cells.get(i).cloned().unwrap_or_default();

        let mut fields = IndexMap::with_capacity(self.columns.len());
        for (i, column) in self.columns.iter().enumerate() {
            fields.insert(column.label.clone(), cell(i));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if let Some(derived) = column.derived() {
                fields.insert(derived, cell(i));
            }
        }

        for fallback in &self.rules.fallbacks {
            let target_empty = fields
                .get(&fallback.target)
                .map_or(true, |v| v.trim().is_empty());
            let source = fields
                .get(&fallback.source)
                .filter(|v| !v.trim().is_empty())
                .cloned();
            if let (true, Some(value)) = (target_empty, source) {
                fields.insert(fallback.target.clone(), value);
            }
        }

        TrialRow::new(&RowId::new(table, row), fields)
    }

    #[cfg(test)]
    fn occurrences(&self) -> Vec<(&str, usize)> {
        self.columns
            .iter()
            .map(|c| (c.label.as_str(), c.occurrence))
            .collect()
    }
}

/// Materialized rows of one table plus the labels its header defines.
#[derive(Debug, Clone, Default)]
pub struct MaterializedTable {
    pub rows: Vec<TrialRow>,
    pub labels: IndexSet<String>,
}

/// Row 0 of `grid` is the header; data rows are numbered from 2.
pub fn materialize(table: &str, grid: &[Vec<String>], rules: &SchemaRules) -> MaterializedTable {
    let Some((header, rows)) = grid.split_first() else {
        return MaterializedTable::default();
    };

    let schema = TableSchema::resolve(header, rules);
    let rows = rows
        .iter()
        .zip(2u32..)
        .map(|(cells, row)| schema.materialize_row(table, row, cells))
        .collect();

    MaterializedTable {
        rows,
        labels: schema.labels(),
    }
}
