//! Merging of materialized tables and the list query applied on top.

use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexSet;
use strum::EnumString;

use super::{
    materialize::{materialize, Grid, SchemaRules, TrialRow, ID_KEY, META_KEY, ROW_KEY, SHEET_KEY},
    noise::NoiseClassifier,
};
use crate::error::{AppError, AppResult};

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 1] = ["%Y-%m-%d %H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum RowMode {
    #[default]
    #[strum(serialize = "exclude", serialize = "data")]
    Data,
    #[strum(serialize = "only", serialize = "meta", serialize = "noise")]
    Noise,
    #[strum(serialize = "include", serialize = "all")]
    All,
}

impl RowMode {
    fn keeps(&self, row: &TrialRow) -> bool {
        match self {
            RowMode::Data => !row.is_noise(),
            RowMode::Noise => row.is_noise(),
            RowMode::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub dir: SortDir,
}

/// Which configured tables a list request reads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TableFilter {
    #[default]
    All,
    Only(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialQuery {
    pub mode: RowMode,
    pub table: TableFilter,
    pub text: Option<String>,
    pub filters: Vec<(String, String)>,
    pub sort: Option<SortSpec>,
}

impl TrialQuery {
    /// Builds a query from raw request parameters. `q`, `sheet`, `sortBy`,
    /// `sortDir` and `meta` are reserved; any other non-empty parameter is an
    /// exact-match field filter. `resolve_table` maps the `sheet` parameter (`ALL`, `Y`, `N`, or a table name) to a filter.
    pub fn from_params(
        params: Vec<(String, String)>,
        resolve_table: impl Fn(&str) -> Option<TableFilter>,
    ) -> AppResult<Self> {
        let mut query = TrialQuery::default();
        let mut sort_by = None;
        let mut sort_dir = SortDir::default();

        for (key, value) in params {
            match key.as_str() {
                "meta" => {
                    query.mode = value
                        .parse()
                        .map_err(|_| AppError::BadRequest(format!("unknown meta mode: {value}")))?;
                }
                "sheet" => {
                    query.table = resolve_table(&value)
                        .ok_or_else(|| AppError::BadRequest(format!("unknown sheet: {value}")))?;
                }
                "q" => {
                    let text = value.trim().to_lowercase();
                    query.text = (!text.is_empty()).then_some(text);
                }
                "sortBy" => sort_by = (!value.is_empty()).then_some(value),
                "sortDir" => {
                    sort_dir = value.parse().map_err(|_| {
                        AppError::BadRequest(format!("unknown sort direction: {value}"))
                    })?;
                }
                _ if value.is_empty() => {}
                _ => query.filters.push((key, value)),
            }
        }

        query.sort = sort_by.map(|field| SortSpec {
            field,
            dir: sort_dir,
        });
        Ok(query)
    }
}

/// Rows of several tables concatenated in read order.
#[derive(Debug, Clone, Default)]
pub struct MergedRows {
    pub rows: Vec<TrialRow>,
    pub labels: IndexSet<String>,
}

/// Materializes and classifies each table, then keeps the rows `mode` asks for.
pub fn merge_tables(
    tables: Vec<(String, Grid)>,
    rules: &SchemaRules,
    classifier: &NoiseClassifier<'_>,
    mode: RowMode,
) -> MergedRows {
    let mut merged = MergedRows::default();
    merged
        .labels
        .extend([SHEET_KEY, ROW_KEY, ID_KEY, META_KEY].map(str::to_string));

    for (table, grid) in tables {
        let materialized = materialize(&table, &grid, rules);
        merged.labels.extend(materialized.labels);
        merged.rows.extend(
            materialized
                .rows
                .into_iter()
                .map(|mut row| {
                    classifier.classify(&mut row);
                    row
                })
                .filter(|row| mode.keeps(row)),
        );
    }

    merged
}

/// Applies table, text, field filters and sort. Filter keys must name a
/// label of the merged tables.
pub fn apply_query(
    merged: MergedRows,
    query: &TrialQuery,
    search_fields: &[String],
) -> AppResult<Vec<TrialRow>> {
    if let Some((unknown, _)) = query
        .filters
        .iter()
        .find(|(key, _)| !merged.labels.contains(key))
    {
        return Err(AppError::BadRequest(format!(
            "unknown filter field: {unknown}"
        )));
    }

    let mut rows = merged
        .rows
        .into_iter()
        .filter(|row| match &query.table {
            TableFilter::All => true,
            TableFilter::Only(table) => &row.source_table == table,
        })
        .filter(|row| match &query.text {
            Some(text) => haystack(row, search_fields).contains(text.as_str()),
            None => true,
        })
        .filter(|row| {
            query
                .filters
                .iter()
                .all(|(key, value)| row.get(key).unwrap_or_default() == value.as_str())
        })
        .collect::<Vec<_>>();

    if let Some(sort) = &query.sort {
        sort_rows(&mut rows, sort);
    }

    Ok(rows)
}

fn haystack(row: &TrialRow, search_fields: &[String]) -> String {
    search_fields
        .iter()
        .map(|f| row.value(f))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Row(u32),
    Date(NaiveDateTime),
    Text(String),
}

impl SortKey {
    fn of(value: &str) -> Self {
        match parse_date(value) {
            Some(date) => SortKey::Date(date),
            None => SortKey::Text(value.to_string()),
        }
    }
}

/// Stable ascending sort where parseable dates precede everything else;
/// descending reverses the ascending result.
pub fn sort_rows(rows: &mut Vec<TrialRow>, sort: &SortSpec) {
    let mut keyed = std::mem::take(rows)
        .into_iter()
        .map(|row| {
            let key = if sort.field == ROW_KEY {
                SortKey::Row(row.source_row)
            } else {
                SortKey::of(row.get(&sort.field).as_deref().unwrap_or_default())
            };
            (key, row)
        })
        .collect::<Vec<_>>();

    keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
    if sort.dir == SortDir::Desc {
        keyed.reverse();
    }

    rows.extend(keyed.into_iter().map(|(_, row)| row));
}

/// First format that parses wins. Date-only values sort as midnight.
pub fn parse_date(value: &str) -> Option<NaiveDateTime> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        })
}
