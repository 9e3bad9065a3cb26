//! Result handlers.

use crate::error::{Error, Result};
use crate::protocol::backend::query::{CommandComplete, DataRow};
use crate::result::NULL_MARKER;

/// Receives the rows of an executing statement.
///
/// Callback pattern: `row*` → `result_end`. A statement that returns no
/// rows only gets `result_end` (with the affected row count in its tag).
pub trait RowHandler {
    /// Called for each data row.
    fn row(&mut self, row: DataRow<'_>) -> Result<()>;

    /// Called when the result set ends.
    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }
}

/// Collects every row as text, rendering SQL NULL as [`NULL_MARKER`].
#[derive(Debug, Default)]
pub struct TextCollector {
    rows: Vec<Vec<String>>,
    rows_received: usize,
    rows_affected: Option<u64>,
}

impl TextCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows delivered by the server so far, including one that failed to convert.
    pub fn rows_received(&self) -> usize {
        self.rows_received
    }

    /// Row count from the CommandComplete tag, if the command reports one.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }
}

impl RowHandler for TextCollector {
    fn row(&mut self, row: DataRow<'_>) -> Result<()> {
        self.rows_received += 1;

        let mut values = Vec::with_capacity(row.len());
        for (index, value) in row.values().enumerate() {
            let text = match value? {
                None => NULL_MARKER.to_string(),
                Some(bytes) => simdutf8::basic::from_utf8(bytes)
                    .map_err(|_| {
                        Error::Protocol(format!(
                            "row {} column {}: value is not valid UTF-8",
                            self.rows_received, index
                        ))
                    })?
                    .to_string(),
            };
            values.push(text);
        }

        self.rows.push(values);
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_text_and_null() {
        let mut payload = 3_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&1_i32.to_be_bytes());
        payload.extend_from_slice(b"7");
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_i32.to_be_bytes());

        let mut collector = TextCollector::new();
        collector.row(DataRow::parse(&payload).unwrap()).unwrap();
        collector
            .result_end(CommandComplete::parse(b"SELECT 1\0").unwrap())
            .unwrap();

        assert_eq!(collector.rows_affected(), Some(1));
        assert_eq!(
            collector.into_rows(),
            vec![vec!["7".to_string(), "\\N".to_string(), String::new()]]
        );
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&1_i32.to_be_bytes());
        payload.push(0xc3);

        let mut collector = TextCollector::new();
        assert!(collector.row(DataRow::parse(&payload).unwrap()).is_err());
        assert_eq!(collector.rows_received(), 1);
        assert!(collector.into_rows().is_empty());
    }
}
