use futures::future::{try_join, try_join_all};

use crate::{
    auth::CredentialError,
    error::{AppError, AppResult},
    server_config::ServerConfig,
    sheets::{
        materialize::TableSchema,
        query::{apply_query, merge_tables},
        NoiseClassifier, RowId, RowMode, SheetRange, TableFilter, TabularSource, TrialQuery,
        TrialRow,
    },
};

pub struct TrialCtrl;

impl TrialCtrl {
    /// Reads the requested tables in configured order and applies `query`.
    pub async fn list(
        source: &dyn TabularSource,
        config: &ServerConfig,
        query: &TrialQuery,
    ) -> AppResult<Vec<TrialRow>> {
        let tables = match &query.table {
            TableFilter::All => config
                .sheets
                .tables()
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>(),
            TableFilter::Only(table) => vec![table.clone()],
        };

        let ranges = tables
            .iter()
            .map(|table| SheetRange::whole(table.as_str()))
            .collect::<Vec<_>>();
        let grids = try_join_all(ranges.iter().map(|range| source.read(range)))
            .await
            .map_err(sheet_error)?;

        let classifier = NoiseClassifier::new(&config.columns, &config.noise);
        let merged = merge_tables(
            tables.into_iter().zip(grids).collect(),
            &config.schema,
            &classifier,
            query.mode,
        );

        apply_query(merged, query, &config.search.fields)
    }

    /// Noise rows of every table, unfiltered.
    pub async fn list_noise(
        source: &dyn TabularSource,
        config: &ServerConfig,
    ) -> AppResult<Vec<TrialRow>> {
        let query = TrialQuery {
            mode: RowMode::Noise,
            ..TrialQuery::default()
        };
        Self::list(source, config, &query).await
    }

    /// Fetches only the header and the addressed row.
    pub async fn get(
        source: &dyn TabularSource,
        config: &ServerConfig,
        id: &str,
    ) -> AppResult<TrialRow> {
        let id = RowId::parse(id)?;

        let header_range = SheetRange::header(id.table.as_str());
        let row_range = SheetRange::row(id.table.as_str(), id.row);
        let (header, row) = try_join(source.read(&header_range), source.read(&row_range))
            .await
            .map_err(sheet_error)?;

        let header = header
            .into_iter()
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AppError::NotFound(format!("table {} has no header", id.table)))?;
        // blank rows and rows past the end come back as an empty range
        let cells = row.into_iter().next().unwrap_or_default();

        let schema = TableSchema::resolve(&header, &config.schema);
        let mut row = schema.materialize_row(&id.table, id.row, &cells);
        NoiseClassifier::new(&config.columns, &config.noise).classify(&mut row);

        Ok(row)
    }
}

/// Credential problems surface as authorization errors, anything else from
/// the sheet reader as an upstream failure.
fn sheet_error(error: anyhow::Error) -> AppError {
    match error.downcast_ref::<CredentialError>() {
        Some(e) => AppError::GoogleAuth(e.to_string()),
        None => AppError::Upstream(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::common::{test_config, InMemorySheets};

    fn sheets() -> InMemorySheets {
        InMemorySheets::new()
            .with_table(
                "트라이얼(Y)",
                &[
                    &["유입월", "회사명", "담당자", "이메일", "D7", "M1", "D7", "M1", "2차 컨택", "2차 컨택 (종료일)"],
                    &["8월", "가나상사", "김철수", "kim@ga.na", "10%", "5%", "20%", "", "", "2024-09-01"],
                    &["8월 합계", "", "", "", "12%", "", "", "", "", ""],
                    &["8월", "다라물산", "이영희", "lee@da.ra"],
                ],
            )
            .with_table(
                "트라이얼(N)",
                &[
                    &["유입월", "회사명", "담당자", "이메일"],
                    &["7월", "마바건설", "박민수", "park@ma.ba"],
                    &[],
                    &["", "", "", "", "", "%"],
                ],
            )
    }

    #[tokio::test]
    async fn test_list_merges_both_tables() {
        let config = test_config();
        let rows = TrialCtrl::list(&sheets(), &config, &TrialQuery::default())
            .await
            .unwrap();
        let ids = rows.iter().map(|r| r.row_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["트라이얼(Y):2", "트라이얼(Y):4", "트라이얼(N):2"]);
    }

    #[tokio::test]
    async fn test_list_single_table_reads_only_that_table() {
        let config = test_config();
        let source = sheets();
        let query = TrialQuery {
            table: TableFilter::Only("트라이얼(N)".into()),
            ..TrialQuery::default()
        };
        let rows = TrialCtrl::list(&source, &config, &query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(source.reads(), vec!["'트라이얼(N)'!A1:Z"]);
    }

    #[tokio::test]
    async fn test_list_noise() {
        let config = test_config();
        let rows = TrialCtrl::list_noise(&sheets(), &config).await.unwrap();
        let ids = rows.iter().map(|r| r.row_id.as_str()).collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec!["트라이얼(Y):3", "트라이얼(N):3", "트라이얼(N):4"]
        );
        assert!(rows.iter().all(TrialRow::is_noise));
    }

    #[tokio::test]
    async fn test_get_rebuilds_the_row() {
        let config = test_config();
        let source = sheets();
        let row = TrialCtrl::get(&source, &config, "트라이얼(Y):2").await.unwrap();

        assert_eq!(row.value("회사명"), "가나상사");
        assert_eq!(row.value("D7"), "20%");
        assert_eq!(row.value("D7_1"), "10%");
        assert_eq!(row.value("D7_2"), "20%");
        assert_eq!(row.value("2차 컨택"), "2024-09-01");
        assert!(!row.is_noise());
        assert_eq!(
            source.reads(),
            vec!["'트라이얼(Y)'!A1:Z1", "'트라이얼(Y)'!A2:Z2"]
        );

        let noise = TrialCtrl::get(&source, &config, "트라이얼(Y):3").await.unwrap();
        assert!(noise.is_noise());
    }

    #[tokio::test]
    async fn test_get_blank_row_is_noise() {
        let config = test_config();
        let source = sheets();

        for id in ["트라이얼(N):3", "트라이얼(N):40"] {
            let row = TrialCtrl::get(&source, &config, id).await.unwrap();
            assert_eq!(row.row_id, id);
            assert_eq!(row.value("회사명"), "");
            assert_eq!(row.fields.len(), 4);
            assert!(row.is_noise());
        }
    }

    #[tokio::test]
    async fn test_get_errors() {
        let config = test_config();
        let source = sheets();

        let err = TrialCtrl::get(&source, &config, "no-colon").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidIdentifier(_)));
        let err = TrialCtrl::get(&source, &config, "트라이얼(Y):abc").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidIdentifier(_)));

        let err = TrialCtrl::get(&source, &config, "없는시트:2").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_credential_errors_are_google_auth() {
        let config = test_config();
        let source = InMemorySheets::failing(|| CredentialError::Revoked.into());
        let err = TrialCtrl::list(&source, &config, &TrialQuery::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "google_auth");

        let source = InMemorySheets::failing(|| anyhow::anyhow!("quota exceeded"));
        let err = TrialCtrl::get(&source, &config, "트라이얼(Y):2").await.unwrap_err();
        assert_eq!(err.kind(), "upstream");
    }
}
