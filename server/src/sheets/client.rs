use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use lib_email_clients::gmail::AccessTokenSource;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::materialize::Grid;

const SHEETS_ENDPOINT: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const LAST_COLUMN: &str = "Z";

/// A1 range over one table, bounded to columns `A..=Z`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRange {
    pub table: String,
    pub rows: RowSpan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSpan {
    Open,
    Single(u32),
}

impl SheetRange {
    /// Header plus every data row.
    pub fn whole(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: RowSpan::Open,
        }
    }

    pub fn row(table: impl Into<String>, row: u32) -> Self {
        Self {
            table: table.into(),
            rows: RowSpan::Single(row),
        }
    }

    pub fn header(table: impl Into<String>) -> Self {
        Self::row(table, 1)
    }

    /// `'name'!A1:Z`, with quotes in the name doubled.
    pub fn a1(&self) -> String {
        let name = self.table.replace('\'', "''");
        match self.rows {
            RowSpan::Open => format!("'{name}'!A1:{LAST_COLUMN}"),
            RowSpan::Single(n) => format!("'{name}'!A{n}:{LAST_COLUMN}{n}"),
        }
    }
}

/// Read-only access to header-first cell grids.
#[async_trait]
pub trait TabularSource: Send + Sync {
    /// Rows of `range`, trailing empty cells trimmed by the source. A range
    /// with no values yields an empty grid.
    async fn read(&self, range: &SheetRange) -> anyhow::Result<Grid>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SheetsApiError {
    error: SheetsApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct SheetsApiErrorDetail {
    code: u16,
    message: String,
}

/// [`TabularSource`] over the Sheets `values.get` endpoint.
#[derive(Clone)]
pub struct GoogleSheetsClient {
    http_client: reqwest::Client,
    spreadsheet_id: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl GoogleSheetsClient {
    pub fn new(
        http_client: reqwest::Client,
        spreadsheet_id: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Self {
        Self {
            http_client,
            spreadsheet_id: spreadsheet_id.into(),
            tokens,
        }
    }

    fn values_url(&self, range: &SheetRange) -> anyhow::Result<Url> {
        let mut url = Url::parse(SHEETS_ENDPOINT)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("{SHEETS_ENDPOINT} cannot be a base url"))?
            .push(&self.spreadsheet_id)
            .push("values")
            .push(&range.a1());
        Ok(url)
    }
}

#[async_trait]
impl TabularSource for GoogleSheetsClient {
    async fn read(&self, range: &SheetRange) -> anyhow::Result<Grid> {
        let url = self.values_url(range)?;
        let token = self.tokens.access_token().await?;

        let resp = self
            .http_client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Sheets request for {} failed", range.a1()))?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<SheetsApiError>(&body)
                .map(|e| format!("{} {}", e.error.code, e.error.message))
                .unwrap_or(body);
            return Err(anyhow!("Sheets API error for {}: {}", range.a1(), message));
        }

        let values = serde_json::from_str::<ValueRange>(&body)
            .context("Unexpected Sheets API response")?
            .values;
        tracing::debug!("Read {} rows from {}", values.len(), range.a1());

        Ok(values
            .into_iter()
            .map(|row| row.into_iter().map(stringify_cell).collect())
            .collect())
    }
}

fn stringify_cell(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
