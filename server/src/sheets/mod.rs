//! Sheet reading and the row pipeline: materialize, classify, merge, query.

pub mod client;
pub mod columns;
pub mod materialize;
pub mod noise;
pub mod query;

pub use client::{GoogleSheetsClient, SheetRange, TabularSource};
pub use columns::{Columns, SearchConfig};
pub use materialize::{Grid, RowId, SchemaRules, TrialRow};
pub use noise::{NoiseClassifier, NoiseRules};
pub use query::{RowMode, TableFilter, TrialQuery};
