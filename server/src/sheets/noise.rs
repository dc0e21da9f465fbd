//! Best-effort detection of rows that are not customer records (section
//! headers, subtotals, percentage summaries).
//!
//! The rules are heuristics and will misjudge some rows. Every threshold and
//! field name comes from [`NoiseRules`] / [`Columns`] so they can be tuned in
//! `config.toml` without touching the code.

use serde::Deserialize;

use super::{
    columns::Columns,
    materialize::{RowMeta, TrialRow},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NoiseRules {
    /// Substrings of the inflow month that mark a separator row.
    pub ignore_keywords: Vec<String>,
    /// A row without company/manager/email and at most this many non-empty
    /// string values, `_sheet` and `_id` included, is structural.
    pub max_sparse_fields: usize,
    /// Marker of computed summary values.
    pub summary_marker: String,
    /// Fields scanned for the summary marker.
    pub metric_fields: Vec<String>,
}

impl Default for NoiseRules {
    fn default() -> Self {
        Self {
            ignore_keywords: vec!["종료".into(), "합계".into(), "요약".into()],
            max_sparse_fields: 3,
            summary_marker: "%".to_string(),
            metric_fields: vec![
                "D7_1".into(),
                "M1_1".into(),
                "8/28".into(),
                "D7_2".into(),
                "M1_2".into(),
            ],
        }
    }
}

impl NoiseRules {
    /// Parses a comma separated keyword list, dropping blanks.
    pub fn parse_keywords(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoiseClassifier<'a> {
    columns: &'a Columns,
    rules: &'a NoiseRules,
}

impl<'a> NoiseClassifier<'a> {
    pub fn new(columns: &'a Columns, rules: &'a NoiseRules) -> Self {
        Self { columns, rules }
    }

    pub fn is_noise(&self, row: &TrialRow) -> bool {
        let inflow = row.value(&self.columns.inflow_month).trim();
        if !inflow.is_empty() && self.rules.ignore_keywords.iter().any(|k| inflow.contains(k.as_str()))
        {
            return true;
        }

        let has_identity = self
            .columns
            .identity()
            .iter()
            .any(|label| !row.value(label).trim().is_empty());
        if has_identity {
            return false;
        }

        // the table name and row id count as values too
        let non_empty = row
            .fields
            .values()
            .chain([&row.source_table, &row.row_id])
            .filter(|v| !v.trim().is_empty())
            .count();
        if non_empty <= self.rules.max_sparse_fields {
            return true;
        }

        let metrics = self
            .rules
            .metric_fields
            .iter()
            .map(|f| row.value(f))
            .collect::<Vec<_>>()
            .join(" ");
        !self.rules.summary_marker.is_empty() && metrics.contains(&self.rules.summary_marker)
    }

    /// Sets or clears the noise marker.
    pub fn classify(&self, row: &mut TrialRow) {
        row.meta = self.is_noise(row).then_some(RowMeta::Noise);
    }
}
