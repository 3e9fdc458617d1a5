// Score combiner: reduces the ensemble's raw predictions to one value, and a
// player's recent fixtures to one expected score.

use std::collections::HashMap;

use serde::Deserialize;

use crate::player::ScoredRow;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot combine an empty prediction set")]
pub struct InsufficientPredictionsError;

/// Unweighted arithmetic mean of the raw predictions.
///
/// Negative predictions are kept as negative contributions; any floor or
/// ceiling is applied afterwards by [`PostProcess`].
pub fn combine(predictions: &[f64]) -> Result<f64, InsufficientPredictionsError> {
    if predictions.is_empty() {
        return Err(InsufficientPredictionsError);
    }
    let sum: f64 = predictions.iter().sum();
    Ok(sum / predictions.len() as f64)
}

/// Optional clamp applied to combined scores before they are published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PostProcess {
    #[serde(default)]
    pub floor: Option<f64>,
    #[serde(default)]
    pub ceiling: Option<f64>,
}

impl PostProcess {
    pub fn apply(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(floor) = self.floor {
            v = v.max(floor);
        }
        if let Some(ceiling) = self.ceiling {
            v = v.min(ceiling);
        }
        v
    }
}

/// Collapse each player's scored recent fixtures into one row.
///
/// Each player keeps their first row (the most recent fixture, as uploads are
/// ordered), scored with the mean over the rows that scored. A player whose
/// rows all failed keeps the first failure. Players stay in first-appearance
/// order.
pub fn average_by_player(scored: Vec<ScoredRow>) -> Vec<ScoredRow> {
    struct Window {
        first: ScoredRow,
        sum: f64,
        count: usize,
    }

    let mut index: HashMap<u32, usize> = HashMap::new();
    let mut windows: Vec<Window> = Vec::new();
    for row in scored {
        let points = row.expected_points();
        let i = match index.get(&row.row.player_id) {
            Some(&i) => i,
            None => {
                index.insert(row.row.player_id, windows.len());
                windows.push(Window {
                    first: row,
                    sum: 0.0,
                    count: 0,
                });
                windows.len() - 1
            }
        };
        if let Some(points) = points {
            windows[i].sum += points;
            windows[i].count += 1;
        }
    }

    windows
        .into_iter()
        .map(|w| match w.count {
            0 => w.first,
            n => ScoredRow::scored(w.first.row, w.sum / n as f64),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::ScoringError;
    use crate::player::tests::row;
    use crate::player::Position;

    #[test]
    fn mean_of_predictions() {
        let mean = combine(&[2.0, 4.0, 9.0]).unwrap();
        assert!((mean - 5.0).abs() < 1e-9);
    }

    #[test]
    fn single_prediction_is_identity() {
        assert_eq!(combine(&[3.25]).unwrap(), 3.25);
    }

    #[test]
    fn negative_predictions_are_not_clamped() {
        let mean = combine(&[-1.0, -0.5, 0.3]).unwrap();
        assert!((mean - (-0.4)).abs() < 1e-9);
    }

    #[test]
    fn empty_predictions_fail() {
        assert_eq!(combine(&[]), Err(InsufficientPredictionsError));
    }

    #[test]
    fn post_process_clamps_both_ends() {
        let post = PostProcess {
            floor: Some(0.0),
            ceiling: Some(15.0),
        };
        assert_eq!(post.apply(-0.7), 0.0);
        assert_eq!(post.apply(4.2), 4.2);
        assert_eq!(post.apply(22.0), 15.0);
        assert_eq!(PostProcess::default().apply(-0.7), -0.7);
    }

    #[test]
    fn player_history_is_averaged_onto_latest_row() {
        let mut latest = row(7, Position::Midfielder, 80);
        latest.opponent_team_name = "Spurs".into();
        let scored = vec![
            ScoredRow::scored(latest, 6.0),
            ScoredRow::scored(row(9, Position::Forward, 70), 2.0),
            ScoredRow::scored(row(7, Position::Midfielder, 80), 4.0),
            ScoredRow::failed(
                row(7, Position::Midfielder, 80),
                ScoringError::MissingFeature {
                    feature: "form".into(),
                },
            ),
            ScoredRow::scored(row(7, Position::Midfielder, 80), 2.0),
        ];

        let averaged = average_by_player(scored);
        assert_eq!(averaged.len(), 2);
        assert_eq!(averaged[0].row.player_id, 7);
        assert_eq!(averaged[0].row.opponent_team_name, "Spurs");
        assert!((averaged[0].expected_points().unwrap() - 4.0).abs() < 1e-9);
        assert_eq!(averaged[1].expected_points(), Some(2.0));
    }

    #[test]
    fn player_with_only_failures_stays_failed() {
        let error = ScoringError::MissingFeature {
            feature: "minutes".into(),
        };
        let scored = vec![
            ScoredRow::failed(row(3, Position::Defender, 45), error.clone()),
            ScoredRow::failed(row(3, Position::Defender, 45), error.clone()),
        ];
        let averaged = average_by_player(scored);
        assert_eq!(averaged.len(), 1);
        assert_eq!(averaged[0].failure(), Some(&error));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn combine_is_the_arithmetic_mean(values in prop::collection::vec(-20.0f64..20.0, 1..12)) {
                let expected = values.iter().sum::<f64>() / values.len() as f64;
                let got = combine(&values).unwrap();
                prop_assert!((got - expected).abs() < 1e-9);
            }
        }
    }
}
