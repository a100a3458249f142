use serde::{Deserialize, Serialize};

/// A recommended item and its relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredItem {
    #[serde(alias = "recommendedItemId")]
    pub item_id: String,
    pub score: f64,
}

/// Raw per-subject result, in the rank order the service returned
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRow {
    pub subject: Option<String>,
    pub recommendations: Vec<ScoredItem>,
}

/// A single table value
///
/// Absent slots are `Text(None)` and `Score(NaN)`; NaN serializes to JSON
/// `null`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Text(Option<String>),
    Score(f64),
}

impl Cell {
    pub fn is_absent(&self) -> bool {
        match self {
            Cell::Text(v) => v.is_none(),
            Cell::Score(v) => v.is_nan(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(v) => v.as_deref(),
            Cell::Score(_) => None,
        }
    }

    pub fn as_score(&self) -> Option<f64> {
        match self {
            Cell::Score(v) => Some(*v),
            Cell::Text(_) => None,
        }
    }
}

/// Fixed-width recommendation table
///
/// Every row has exactly `columns.len()` cells: an optional subject column
/// followed by `rec1, score1, ..., recK, scoreK`.
#[derive(Debug, Clone, Serialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl ResultTable {
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}
