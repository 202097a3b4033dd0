use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Rows returned by the execution collaborator. Cells keep column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,

    #[serde(default)]
    pub truncated: bool,
}

impl ResultSet {
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows keyed by column name, for envelope previews.
    #[must_use]
    pub fn records(&self, limit: usize) -> Vec<Value> {
        self.rows
            .iter()
            .take(limit)
            .map(|row| {
                let mut record = Map::new();
                for (column, cell) in self.columns.iter().zip(row) {
                    record.insert(column.clone(), cell.clone());
                }
                Value::Object(record)
            })
            .collect()
    }
}
