//! Chart data handed to the rendering layer.
//!
//! Nothing here draws; the model lists the lines, axis bounds and the marker
//! position at the end of each athlete's line.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::{cumulative_series_for, ChallengeData, Params};

pub const X_AXIS_TITLE: &str = "Day of Month";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub alias: String,
    pub label: String,
    pub data: Vec<f64>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

/// Marker position at the last point of a non-empty series.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OverlayAnchor {
    pub alias: String,
    /// 1-based day of month of the last sample.
    pub day: usize,
    pub distance: f64,
    pub profile: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChartModel {
    pub x_title: String,
    pub y_title: String,
    pub labels: Vec<usize>,
    pub datasets: Vec<Dataset>,
    pub y_axis: AxisRange,
    pub overlays: Vec<OverlayAnchor>,
}

impl ChartModel {
    pub fn is_empty(&self) -> bool {
        self.datasets.iter().all(|d| d.data.is_empty())
    }
}

pub fn build_chart_model(data: &ChallengeData, month_index: i64, params: &Params) -> ChartModel {
    let datasets: Vec<Dataset> = data
        .athletes
        .iter()
        .map(|(alias, athlete)| Dataset {
            alias: alias.clone(),
            label: athlete.resolved_display_name(alias),
            data: cumulative_series_for(athlete, month_index, params),
        })
        .collect();

    let days = datasets.iter().map(|d| d.data.len()).max().unwrap_or(0);
    let labels = (1..=days).collect();

    let overlays = datasets
        .iter()
        .filter_map(|dataset| {
            let last = *dataset.data.last()?;
            let profile = data.athletes[&dataset.alias]
                .profile_source()
                .map(str::to_string);
            Some(OverlayAnchor {
                alias: dataset.alias.clone(),
                day: dataset.data.len(),
                distance: last,
                profile,
            })
        })
        .collect();

    let y_axis = AxisRange {
        min: 0.0,
        max: y_axis_max(&datasets, params),
    };

    ChartModel {
        x_title: X_AXIS_TITLE.to_string(),
        y_title: format!("Cumulative Distance ({})", params.unit.label()),
        labels,
        datasets,
        y_axis,
        overlays,
    }
}

fn y_axis_max(datasets: &[Dataset], params: &Params) -> f64 {
    let peak = datasets
        .iter()
        .flat_map(|d| d.data.iter().copied())
        .filter(|v| v.is_finite())
        .map(OrderedFloat)
        .max()
        .map(|v| v.into_inner())
        .filter(|&v| v != 0.0)
        .unwrap_or(params.y_fallback_max);
    peak + params.y_headroom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DistanceUnit;

    fn sample() -> ChallengeData {
        ChallengeData::from_json_str(
            r#"{
                "athletes": {
                    "amy": {"display_name": "Amy", "profile": "amy.png",
                            "daily_distance_km": {"0": [5.0, 5.0, 0.0, 10.0]}},
                    "bo": {"firstname": "Bo", "lastname": "Li",
                           "daily_distance_km": {"0": [10.0]}},
                    "cy": {"display_name": "Cy", "profile": "cy.png"}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_datasets_and_labels() {
        let model = build_chart_model(&sample(), 0, &Params::default());
        assert_eq!(model.x_title, "Day of Month");
        assert_eq!(model.y_title, "Cumulative Distance (mi)");
        assert_eq!(model.labels, vec![1, 2, 3, 4]);
        let labels: Vec<&str> = model.datasets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["Amy", "Bo Li", "Cy"]);
        assert_eq!(model.datasets[0].data, vec![3.11, 6.21, 6.21, 12.43]);
        assert!(model.datasets[2].data.is_empty());
    }

    #[test]
    fn test_overlays_sit_on_last_point() {
        let model = build_chart_model(&sample(), 0, &Params::default());
        assert_eq!(
            model.overlays,
            vec![
                OverlayAnchor {
                    alias: "amy".into(),
                    day: 4,
                    distance: 12.43,
                    profile: Some("amy.png".into()),
                },
                OverlayAnchor {
                    alias: "bo".into(),
                    day: 1,
                    distance: 6.21,
                    profile: None,
                },
            ]
        );
    }

    #[test]
    fn test_y_axis_headroom() {
        let model = build_chart_model(&sample(), 0, &Params::default());
        assert_eq!(model.y_axis.min, 0.0);
        assert!((model.y_axis.max - 17.43).abs() < 1e-9);
    }

    #[test]
    fn test_empty_month_uses_fallback_axis() {
        let model = build_chart_model(&sample(), 5, &Params::default());
        assert!(model.is_empty());
        assert!(model.labels.is_empty());
        assert!(model.overlays.is_empty());
        assert_eq!(model.y_axis.max, 15.0);
    }

    #[test]
    fn test_kilometer_titles() {
        let params = Params::for_unit(DistanceUnit::Kilometers);
        let model = build_chart_model(&sample(), 0, &params);
        assert_eq!(model.y_title, "Cumulative Distance (km)");
        assert_eq!(model.datasets[0].data, vec![5.0, 10.0, 10.0, 20.0]);
    }
}
