use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;

use crate::{
    error::AppJsonResult,
    model::TrialCtrl,
    sheets::{TrialQuery, TrialRow},
    ServerConfigRef, SheetSource,
};

#[derive(Debug, Serialize)]
pub struct TrialList {
    pub count: usize,
    pub items: Vec<TrialRow>,
}

impl From<Vec<TrialRow>> for TrialList {
    fn from(items: Vec<TrialRow>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

/// # GET /api/trials
///
/// `meta`, `sheet`, `q`, `sortBy` and `sortDir` shape the query, every other
/// parameter is an exact match on a field.
pub async fn list(
    State(config): State<ServerConfigRef>,
    State(sheets): State<SheetSource>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppJsonResult<TrialList> {
    let query = TrialQuery::from_params(params, |sheet| config.sheets.resolve_table(sheet))?;
    let rows = TrialCtrl::list(sheets.as_ref(), &config, &query).await?;

    Ok(Json(rows.into()))
}

/// # GET /api/trials/meta
pub async fn list_noise(
    State(config): State<ServerConfigRef>,
    State(sheets): State<SheetSource>,
) -> AppJsonResult<TrialList> {
    let rows = TrialCtrl::list_noise(sheets.as_ref(), &config).await?;

    Ok(Json(rows.into()))
}

/// # GET /api/trials/:id
pub async fn get_one(
    State(config): State<ServerConfigRef>,
    State(sheets): State<SheetSource>,
    Path(id): Path<String>,
) -> AppJsonResult<TrialRow> {
    let row = TrialCtrl::get(sheets.as_ref(), &config, &id).await?;

    Ok(Json(row))
}
