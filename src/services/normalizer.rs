use crate::models::{Cell, RecommendationRow, ResultTable};

/// Column names for `k` identifier/score pairs, optionally led by a subject column
pub fn column_names(k: usize, subject_key: Option<&str>) -> Vec<String> {
    let mut columns = Vec::with_capacity(2 * k + 1);
    if let Some(key) = subject_key {
        columns.push(key.to_string());
    }
    for i in 1..=k {
        columns.push(format!("rec{}", i));
        columns.push(format!("score{}", i));
    }
    columns
}

/// Reshape per-subject results into a fixed-width table
///
/// Row `i` of the output is row `i` of the input. Each row gets exactly `k`
/// pairs laid out as `rec1, score1, ..., recK, scoreK`; short rows are padded
/// with absent cells and long ones cut at `k`. Service rank order is kept.
pub fn normalize(rows: &[RecommendationRow], k: usize, subject_key: Option<&str>) -> ResultTable {
    let columns = column_names(k, subject_key);

    let rows = rows
        .iter()
        .map(|row| {
            let mut cells = Vec::with_capacity(columns.len());
            if subject_key.is_some() {
                cells.push(Cell::Text(row.subject.clone()));
            }

            for slot in 0..k {
                match row.recommendations.get(slot) {
                    Some(item) => {
                        cells.push(Cell::Text(Some(item.item_id.clone())));
                        cells.push(Cell::Score(item.score));
                    }
                    None => {
                        cells.push(Cell::Text(None));
                        cells.push(Cell::Score(f64::NAN));
                    }
                }
            }

            cells
        })
        .collect();

    ResultTable { columns, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoredItem;

    fn row(subject: Option<&str>, items: &[(&str, f64)]) -> RecommendationRow {
        RecommendationRow {
            subject: subject.map(String::from),
            recommendations: items
                .iter()
                .map(|(id, score)| ScoredItem {
                    item_id: id.to_string(),
                    score: *score,
                })
                .collect(),
        }
    }

    #[test]
    fn test_column_names() {
        assert_eq!(
            column_names(2, Some("user")),
            vec!["user", "rec1", "score1", "rec2", "score2"]
        );
        assert_eq!(column_names(1, None), vec!["rec1", "score1"]);
    }

    #[test]
    fn test_pads_every_length_up_to_k() {
        let k = 4;
        let pool = [("a", 0.9), ("b", 0.8), ("c", 0.7), ("d", 0.6)];

        for n in 0..=k {
            let table = normalize(&[row(None, &pool[..n])], k, None);
            let cells = &table.rows[0];
            assert_eq!(cells.len(), 2 * k);

            for slot in 0..k {
                let id = &cells[2 * slot];
                let score = &cells[2 * slot + 1];
                if slot < n {
                    assert_eq!(id.as_text(), Some(pool[slot].0));
                    assert_eq!(score.as_score(), Some(pool[slot].1));
                } else {
                    assert!(id.is_absent());
                    assert!(score.is_absent());
                }
            }
        }
    }

    #[test]
    fn test_preserves_row_order_and_subjects() {
        let rows = vec![
            row(Some("u2"), &[("x", 0.5)]),
            row(Some("u1"), &[]),
            row(Some("u3"), &[("y", 0.4)]),
        ];

        let table = normalize(&rows, 1, Some("user"));
        let subjects: Vec<_> = table.rows.iter().map(|r| r[0].as_text()).collect();
        assert_eq!(subjects, vec![Some("u2"), Some("u1"), Some("u3")]);
    }

    #[test]
    fn test_users_scenario() {
        let rows = vec![
            row(Some("u1"), &[("id_a", 0.9), ("id_b", 0.7)]),
            row(Some("u2"), &[]),
        ];

        let table = normalize(&rows, 3, Some("user"));
        assert_eq!(table.len(), 2);
        assert_eq!(table.width(), 7);

        let u1 = &table.rows[0];
        assert_eq!(u1[0].as_text(), Some("u1"));
        assert_eq!(u1[1].as_text(), Some("id_a"));
        assert_eq!(u1[2].as_score(), Some(0.9));
        assert_eq!(u1[3].as_text(), Some("id_b"));
        assert_eq!(u1[4].as_score(), Some(0.7));
        assert!(u1[5].is_absent());
        assert!(u1[6].is_absent());

        let u2 = &table.rows[1];
        assert_eq!(u2[0].as_text(), Some("u2"));
        assert!(u2[1..].iter().all(Cell::is_absent));
    }

    #[test]
    fn test_truncates_to_k() {
        let table = normalize(&[row(None, &[("a", 0.9), ("b", 0.8), ("c", 0.7)])], 2, None);
        assert_eq!(table.width(), 4);
        assert_eq!(table.rows[0].len(), 4);
        assert_eq!(table.rows[0][2].as_text(), Some("b"));
    }

    #[test]
    fn test_does_not_resort() {
        let table = normalize(&[row(None, &[("low", 0.1), ("high", 0.9)])], 2, None);
        assert_eq!(table.get(0, "rec1").and_then(Cell::as_text), Some("low"));
        assert_eq!(table.get(0, "rec2").and_then(Cell::as_text), Some("high"));
    }

    #[test]
    fn test_deterministic() {
        let rows = vec![row(Some("u1"), &[("a", 0.3)])];
        let first = serde_json::to_string(&normalize(&rows, 2, Some("user"))).unwrap();
        let second = serde_json::to_string(&normalize(&rows, 2, Some("user"))).unwrap();
        assert_eq!(first, second);
    }
}
