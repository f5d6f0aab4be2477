//! Cumulative distance series for monthly fitness challenges.
//!
//! The library turns per-athlete daily distances into running totals for a
//! line chart, describes where each athlete's marker sits, and owns the
//! lifecycle of the chart a host application draws.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
pub mod athletes;
pub mod chart;
pub mod view;

pub use aggregate::{build_challenge_data, ActivityType, AthleteExport, MonthWindow};
pub use athletes::{load_challenge_data, AthleteRecord, ChallengeData};
pub use chart::{build_chart_model, AxisRange, ChartModel, Dataset, OverlayAnchor};
pub use view::{
    CancelToken, ChallengeToggle, ChallengeView, ChartBackend, Dashboard, ImageLoader,
    OverlayCompletion, PlacedOverlay, ViewMode,
};

/// Miles per kilometer.
pub const KM_TO_MI: f64 = 0.621371;

/// Months are indexed from 0 (January) to 11 (December).
pub const MONTHS_PER_YEAR: i64 = 12;

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid challenge data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("chart backend failed: {0}")]
    Backend(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    /// Multiplier applied to kilometers.
    pub fn factor(self) -> f64 {
        match self {
            DistanceUnit::Miles => KM_TO_MI,
            DistanceUnit::Kilometers => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DistanceUnit::Miles => "mi",
            DistanceUnit::Kilometers => "km",
        }
    }
}

impl Default for DistanceUnit {
    fn default() -> Self {
        DistanceUnit::Miles
    }
}

/// Most decimal places a cumulative value may keep.
pub const MAX_DECIMALS: u32 = 12;

/// Series and chart settings. The km conversion factor always follows `unit`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Params {
    pub unit: DistanceUnit,
    pub decimals: u32,
    pub y_headroom: f64,
    pub y_fallback_max: f64,
    pub activity_type: Option<String>,
}

impl Params {
    pub fn for_unit(unit: DistanceUnit) -> Self {
        Self {
            unit,
            ..Self::default()
        }
    }

    pub fn unit_factor(&self) -> f64 {
        self.unit.factor()
    }

    pub fn validate(&self) -> Result<(), ChallengeError> {
        if self.decimals > MAX_DECIMALS {
            return Err(ChallengeError::InvalidParameter(format!(
                "decimals must be at most {}, got {}",
                MAX_DECIMALS, self.decimals
            )));
        }
        if !self.y_headroom.is_finite() || self.y_headroom < 0.0 {
            return Err(ChallengeError::InvalidParameter(format!(
                "y headroom must be a non-negative number, got {}",
                self.y_headroom
            )));
        }
        if !self.y_fallback_max.is_finite() || self.y_fallback_max <= 0.0 {
            return Err(ChallengeError::InvalidParameter(format!(
                "fallback axis maximum must be positive, got {}",
                self.y_fallback_max
            )));
        }
        Ok(())
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            unit: DistanceUnit::Miles,
            decimals: 2,
            y_headroom: 5.0,
            y_fallback_max: 10.0,
            activity_type: None,
        }
    }
}

/// Round to `decimals` places on the exact decimal value of `value`; exact
/// ties go away from zero.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    const EXTRA: usize = 30;
    if !value.is_finite() {
        return value;
    }
    let magnitude = value.abs();
    let digits = decimals as usize;
    let expanded = format!("{:.*}", digits + EXTRA, magnitude);
    let tail = &expanded[expanded.len() - EXTRA..];
    let is_tie = tail.starts_with('5') && tail[1..].bytes().all(|b| b == b'0');
    let rounded = if is_tie {
        let scale = 10f64.powi(decimals as i32);
        (magnitude * scale).ceil() / scale
    } else {
        format!("{:.*}", digits, magnitude)
            .parse()
            .unwrap_or(magnitude)
    };
    rounded.copysign(value)
}

/// Running totals of `daily` converted by `unit_factor`, rounded to two places.
///
/// Rounding is applied to the cumulative total at each step while the
/// unrounded total is carried forward. Missing data yields an empty series and
/// values are not validated, so negative input propagates into the output.
pub fn build_cumulative_series(daily: Option<&[f64]>, unit_factor: f64) -> Vec<f64> {
    accumulate(daily.unwrap_or_default(), unit_factor, 2)
}

fn accumulate(daily: &[f64], unit_factor: f64, decimals: u32) -> Vec<f64> {
    let mut total = 0.0;
    daily
        .iter()
        .map(|&distance| {
            total += distance * unit_factor;
            round_to(total, decimals)
        })
        .collect()
}

/// Month index in `0..12`, or `None` for anything else.
pub fn checked_month(month_index: i64) -> Option<u32> {
    if (0..MONTHS_PER_YEAR).contains(&month_index) {
        Some(month_index as u32)
    } else {
        None
    }
}

/// Cumulative series for one athlete in the given month.
pub fn cumulative_series_for(athlete: &AthleteRecord, month_index: i64, params: &Params) -> Vec<f64> {
    let daily = athlete.daily_for_month(month_index, params.activity_type.as_deref());
    accumulate(daily.unwrap_or_default(), params.unit_factor(), params.decimals)
}

/// Series for every athlete keyed by alias; athletes without data map to an
/// empty series.
pub fn build_month_series(
    data: &ChallengeData,
    month_index: i64,
    params: &Params,
) -> BTreeMap<String, Vec<f64>> {
    data.athletes
        .iter()
        .map(|(alias, athlete)| {
            (
                alias.clone(),
                cumulative_series_for(athlete, month_index, params),
            )
        })
        .collect()
}
