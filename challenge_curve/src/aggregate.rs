//! Bucketing of exported activities into per-athlete challenge records.
//!
//! Each export holds one athlete's activity list as returned by the activity
//! API. Only the previous and current calendar month are kept; entries with an
//! untracked type, an unreadable date or an unexpected shape are skipped.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::athletes::ALL_ACTIVITIES;
use crate::{round_to, AthleteRecord, ChallengeData, ChallengeError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActivityType {
    Run,
    TrailRun,
    Walk,
    Hike,
    Ride,
    VirtualRide,
}

impl ActivityType {
    pub const TRACKED: [ActivityType; 6] = [
        ActivityType::Run,
        ActivityType::TrailRun,
        ActivityType::Walk,
        ActivityType::Hike,
        ActivityType::Ride,
        ActivityType::VirtualRide,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ActivityType::Run => "Run",
            ActivityType::TrailRun => "Trail Run",
            ActivityType::Walk => "Walk",
            ActivityType::Hike => "Hike",
            ActivityType::Ride => "Ride",
            ActivityType::VirtualRide => "Virtual Ride",
        }
    }

    /// Accepts both the display key and the API spelling ("TrailRun").
    pub fn parse(raw: &str) -> Option<Self> {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        match compact.as_str() {
            "Run" => Some(ActivityType::Run),
            "TrailRun" => Some(ActivityType::TrailRun),
            "Walk" => Some(ActivityType::Walk),
            "Hike" => Some(ActivityType::Hike),
            "Ride" => Some(ActivityType::Ride),
            "VirtualRide" => Some(ActivityType::VirtualRide),
            _ => None,
        }
    }
}

/// "All" followed by every tracked type.
pub fn activity_type_keys() -> Vec<String> {
    std::iter::once(ALL_ACTIVITIES)
        .chain(ActivityType::TRACKED.iter().map(|t| t.key()))
        .map(str::to_string)
        .collect()
}

/// Previous and current calendar month, each as its first day.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonthWindow {
    pub previous: NaiveDate,
    pub current: NaiveDate,
}

impl MonthWindow {
    pub fn ending_at(date: NaiveDate) -> Self {
        let current = date.with_day(1).unwrap_or(date);
        let previous = current
            .checked_sub_months(Months::new(1))
            .unwrap_or(current);
        Self { previous, current }
    }

    pub fn months(&self) -> [NaiveDate; 2] {
        [self.previous, self.current]
    }

    /// 0 for the previous month, 1 for the current one.
    pub fn slot_of(&self, date: NaiveDate) -> Option<usize> {
        self.months()
            .iter()
            .position(|m| m.year() == date.year() && m.month() == date.month())
    }

    pub fn month_names(&self) -> Vec<String> {
        self.months()
            .iter()
            .map(|m| m.format("%B %Y").to_string())
            .collect()
    }
}

pub fn days_in_month(date: NaiveDate) -> usize {
    let first = date.with_day(1).unwrap_or(date);
    first
        .checked_add_months(Months::new(1))
        .map(|next| (next - first).num_days() as usize)
        .unwrap_or(31)
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AthleteProfile {
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub profile_medium: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExportFile {
    Bare(Vec<JsonValue>),
    Full {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        athlete: Option<AthleteProfile>,
        #[serde(default)]
        activities: Vec<JsonValue>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct AthleteExport {
    pub username: String,
    pub athlete: AthleteProfile,
    pub activities: Vec<JsonValue>,
}

impl AthleteExport {
    /// Parse an export; `fallback_username` is used when the file names none.
    pub fn from_json_str(fallback_username: &str, text: &str) -> Result<Self, ChallengeError> {
        let export = match serde_json::from_str(text)? {
            ExportFile::Bare(activities) => Self {
                username: fallback_username.to_string(),
                athlete: AthleteProfile::default(),
                activities,
            },
            ExportFile::Full {
                username,
                athlete,
                activities,
            } => Self {
                username: username
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| fallback_username.to_string()),
                athlete: athlete.unwrap_or_default(),
                activities,
            },
        };
        Ok(export)
    }
}

#[derive(Deserialize)]
struct RawActivity {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    sport_type: Option<String>,
    #[serde(default)]
    distance: JsonValue,
    #[serde(default)]
    start_date_local: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Bucketed {
    kind: ActivityType,
    date: NaiveDate,
    distance_km: f64,
}

fn bucket_activity(value: &JsonValue) -> Option<Bucketed> {
    let raw = RawActivity::deserialize(value).ok()?;
    let kind = raw
        .kind
        .as_deref()
        .and_then(ActivityType::parse)
        .or_else(|| raw.sport_type.as_deref().and_then(ActivityType::parse))?;
    let date = parse_local_date(raw.start_date_local.as_deref()?)?;
    Some(Bucketed {
        kind,
        date,
        distance_km: distance_meters(&raw.distance) / 1000.0,
    })
}

fn distance_meters(value: &JsonValue) -> f64 {
    match value {
        JsonValue::Number(n) => n.as_f64().unwrap_or(0.0),
        JsonValue::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Wall-clock date of a local start time, with or without an offset.
pub fn parse_local_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local().date());
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.naive_local().date());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.date())
}

struct Buckets {
    monthly: BTreeMap<&'static str, [f64; 2]>,
    daily: BTreeMap<&'static str, [Vec<f64>; 2]>,
}

impl Buckets {
    fn new(window: &MonthWindow) -> Self {
        let keys = std::iter::once(ALL_ACTIVITIES).chain(ActivityType::TRACKED.iter().map(|t| t.key()));
        let mut monthly = BTreeMap::new();
        let mut daily = BTreeMap::new();
        for key in keys {
            monthly.insert(key, [0.0; 2]);
            daily.insert(
                key,
                [
                    vec![0.0; days_in_month(window.previous)],
                    vec![0.0; days_in_month(window.current)],
                ],
            );
        }
        Self { monthly, daily }
    }

    fn add(&mut self, key: &'static str, slot: usize, day0: usize, distance_km: f64) {
        if let Some(totals) = self.monthly.get_mut(key) {
            totals[slot] += distance_km;
        }
        if let Some(day) = self
            .daily
            .get_mut(key)
            .and_then(|months| months[slot].get_mut(day0))
        {
            *day += distance_km;
        }
    }
}

/// Build one athlete's record from an export for the given window.
pub fn aggregate_athlete(export: &AthleteExport, window: &MonthWindow) -> AthleteRecord {
    let mut buckets = Buckets::new(window);
    let mut kept = 0usize;
    for value in &export.activities {
        let Some(activity) = bucket_activity(value) else {
            continue;
        };
        let Some(slot) = window.slot_of(activity.date) else {
            continue;
        };
        let day0 = activity.date.day0() as usize;
        buckets.add(activity.kind.key(), slot, day0, activity.distance_km);
        buckets.add(ALL_ACTIVITIES, slot, day0, activity.distance_km);
        kept += 1;
    }
    debug!(
        "{}: {} of {} activities in window",
        export.username,
        kept,
        export.activities.len()
    );

    let month_keys = window.months().map(|m| m.month0().to_string());
    let rounded_months = |months: &[Vec<f64>; 2]| -> BTreeMap<String, Vec<f64>> {
        month_keys
            .iter()
            .zip(months.iter())
            .map(|(key, days)| {
                (
                    key.clone(),
                    days.iter().map(|&d| round_to(d, 2)).collect(),
                )
            })
            .collect()
    };

    let monthly_distances: BTreeMap<String, Vec<f64>> = buckets
        .monthly
        .iter()
        .map(|(key, totals)| (key.to_string(), totals.iter().map(|&t| round_to(t, 2)).collect()))
        .collect();
    let daily_distance_km = buckets
        .daily
        .get(ALL_ACTIVITIES)
        .map(&rounded_months)
        .unwrap_or_default();
    let daily_distance_km_by_type: BTreeMap<String, BTreeMap<String, Vec<f64>>> = buckets
        .daily
        .iter()
        .filter(|(key, _)| **key != ALL_ACTIVITIES)
        .map(|(key, months)| (key.to_string(), rounded_months(months)))
        .collect();

    let profile = &export.athlete;
    AthleteRecord {
        display_name: None,
        firstname: profile.firstname.clone().unwrap_or_default(),
        lastname: profile.lastname.clone().unwrap_or_default(),
        username: export.username.clone(),
        profile: profile
            .profile_medium
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| profile.profile.clone())
            .unwrap_or_default(),
        monthly_distances,
        daily_distance_km,
        daily_distance_km_by_type,
    }
}

pub fn build_challenge_data(exports: &[AthleteExport], window: &MonthWindow) -> ChallengeData {
    let mut athletes = BTreeMap::new();
    for export in exports {
        let record = aggregate_athlete(export, window);
        if athletes.insert(export.username.clone(), record).is_some() {
            warn!("Duplicate export for {}; keeping the last one", export.username);
        }
    }
    ChallengeData {
        athletes,
        month_names: window.month_names(),
        activity_types: activity_type_keys(),
    }
}
