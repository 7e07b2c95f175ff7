// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! End-of-day cost prediction for today
//!
//! First-order linear extrapolation: the remaining plan is scaled by the
//! actual/planned ratio observed so far. It is not a statistical model.

use serde::{Deserialize, Serialize};

use crate::interval::IntervalStore;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EodPrediction {
    pub predicted_total: f32,
    pub planned_total: f32,
    pub drift_ratio: f32,
}

pub fn predict_end_of_day(store: &IntervalStore) -> EodPrediction {
    let mut historical_planned = 0.0_f32;
    let mut historical_actual = 0.0_f32;
    for interval in store.elapsed() {
        historical_planned += interval.planned.net_cost.unwrap_or(0.0);
        historical_actual += interval
            .actual
            .as_ref()
            .and_then(|a| a.net_cost)
            .unwrap_or(0.0);
    }

    let future_planned: f32 = store
        .future()
        .map(|i| i.planned.net_cost.unwrap_or(0.0))
        .sum();

    let drift_ratio = if historical_planned > 0.0 {
        historical_actual / historical_planned
    } else {
        1.0
    };

    EodPrediction {
        predicted_total: historical_actual + future_planned * drift_ratio,
        planned_total: historical_planned + future_planned,
        drift_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::test_support::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_drift_scales_remaining_plan() {
        let store = IntervalStore::new(vec![
            historical(0, record("HOME I", 4.0), Some(record("HOME I", 5.0))),
            historical(1, record("HOME I", 6.0), Some(record("HOME I", 7.0))),
            planned(2, "HOME I", 3.0),
            planned(3, "HOME I", 5.0),
        ])
        .unwrap();
        let prediction = predict_end_of_day(&store);

        assert!(approx(prediction.drift_ratio, 1.2));
        assert!(approx(prediction.predicted_total, 21.6));
        assert!(approx(prediction.planned_total, 18.0));
    }

    #[test]
    fn test_no_history_predicts_plan() {
        let store =
            IntervalStore::new(vec![planned(0, "HOME I", 3.0), planned(1, "HOME I", 5.5)]).unwrap();
        let prediction = predict_end_of_day(&store);

        assert_eq!(prediction.drift_ratio, 1.0);
        assert_eq!(prediction.predicted_total, 8.5);
        assert_eq!(prediction.predicted_total, prediction.planned_total);
    }

    #[test]
    fn test_zero_historical_plan_keeps_unit_drift() {
        let store = IntervalStore::new(vec![
            historical(0, record("HOME I", 0.0), None),
            planned(1, "HOME I", 2.5),
        ])
        .unwrap();
        let prediction = predict_end_of_day(&store);

        assert_eq!(prediction.drift_ratio, 1.0);
        assert_eq!(prediction.predicted_total, 2.5);
    }
}
