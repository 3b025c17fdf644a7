//! Converts raw engine results into [`QueryResult`]s.

use tracing::warn;

use super::{postgres, sqlite, sqlserver, QueryResult, RawResult, Row, RowSet};
use crate::error::{BridgeError, Result};

/// Default cap on the rows returned from one query.
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Maps engine rows to [`Value`](super::Value)s and applies the row cap.
#[derive(Debug, Clone, Copy)]
pub struct ResultNormalizer {
    max_rows: usize,
}

impl Default for ResultNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ROWS)
    }
}

impl ResultNormalizer {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }

    /// Normalizes one raw result.
    ///
    /// Fails if any row does not have exactly one value per column.
    pub fn normalize(&self, raw: RawResult) -> Result<QueryResult> {
        match raw {
            RawResult::Postgres(set) => self.convert(set, |row| postgres::convert_row(&row)),
            RawResult::Sqlite(set) => self.convert(set, |row| sqlite::convert_row(&row)),
            RawResult::SqlServer(set) => self.convert(set, |row| sqlserver::convert_row(&row)),
            RawResult::Materialized(set) => self.convert(set, |row| row),
            RawResult::Affected {
                rows_affected,
                elapsed,
            } => Ok(QueryResult::affected(rows_affected).with_execution_time(elapsed)),
        }
    }

    fn convert<R>(&self, set: RowSet<R>, convert: impl Fn(R) -> Row) -> Result<QueryResult> {
        let RowSet {
            columns,
            rows,
            elapsed,
        } = set;

        let total_rows = rows.len();
        let was_truncated = total_rows > self.max_rows;
        if was_truncated {
            warn!(
                "Query returned {} rows, truncating to {} rows",
                total_rows, self.max_rows
            );
        }

        let rows: Vec<Row> = rows
            .into_iter()
            .take(self.max_rows)
            .map(convert)
            .collect();

        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(BridgeError::internal(format!(
                "Row {index} has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }

        let row_count = rows.len();
        Ok(QueryResult {
            columns,
            rows,
            execution_time: elapsed,
            row_count,
            rows_affected: None,
            total_rows: Some(total_rows),
            was_truncated,
        })
    }
}
