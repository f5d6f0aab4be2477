use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{checked_month, ChallengeError};

/// Key used for the combined total of every tracked activity type.
pub const ALL_ACTIVITIES: &str = "All";

/// Per-athlete data bundle supplied by the hosting dashboard.
///
/// Every collection defaults to empty so partially populated files still load.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AthleteRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub profile: String,
    /// Activity type to `[previous month, current month]` kilometers.
    #[serde(default)]
    pub monthly_distances: BTreeMap<String, Vec<f64>>,
    /// Month index ("0".."11") to daily kilometers.
    #[serde(default)]
    pub daily_distance_km: BTreeMap<String, Vec<f64>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub daily_distance_km_by_type: BTreeMap<String, BTreeMap<String, Vec<f64>>>,
}

impl AthleteRecord {
    /// Daily kilometers for a month, optionally restricted to one activity type.
    ///
    /// `None` or "All" reads the combined series. Out-of-range months and
    /// unknown types have no data.
    pub fn daily_for_month(&self, month_index: i64, activity_type: Option<&str>) -> Option<&[f64]> {
        let month = checked_month(month_index)?.to_string();
        let daily = match activity_type {
            None | Some(ALL_ACTIVITIES) => self.daily_distance_km.get(&month),
            Some(kind) => self.daily_distance_km_by_type.get(kind)?.get(&month),
        };
        daily.map(Vec::as_slice)
    }

    pub fn resolved_display_name(&self, alias: &str) -> String {
        if let Some(name) = self.display_name.as_deref().map(str::trim) {
            if !name.is_empty() {
                return name.to_string();
            }
        }
        let full = format!("{} {}", self.firstname.trim(), self.lastname.trim());
        let full = full.trim();
        if !full.is_empty() {
            full.to_string()
        } else if !self.username.trim().is_empty() {
            self.username.trim().to_string()
        } else {
            alias.to_string()
        }
    }

    /// Image reference for the chart marker, if any.
    pub fn profile_source(&self) -> Option<&str> {
        let profile = self.profile.trim();
        (!profile.is_empty()).then_some(profile)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ChallengeData {
    #[serde(default)]
    pub athletes: BTreeMap<String, AthleteRecord>,
    #[serde(default)]
    pub month_names: Vec<String>,
    #[serde(default)]
    pub activity_types: Vec<String>,
}

impl ChallengeData {
    pub fn from_json_str(text: &str) -> Result<Self, ChallengeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ChallengeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn load_challenge_data(path: &Path) -> Result<ChallengeData, ChallengeError> {
    let text = fs::read_to_string(path).map_err(|source| ChallengeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ChallengeData::from_json_str(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "athletes": {
            "jdoe": {
                "firstname": "Jane",
                "lastname": "Doe",
                "username": "jdoe",
                "profile": "https://img.example/jdoe.png",
                "monthly_distances": {"All": [42.0, 12.5]},
                "daily_distance_km": {"9": [1.0, 2.0, 3.0]},
                "daily_distance_km_by_type": {"Run": {"9": [1.0, 0.0, 3.0]}}
            },
            "anon": {}
        },
        "month_names": ["September 2026", "October 2026"],
        "activity_types": ["All", "Run"]
    }"#;

    #[test]
    fn test_parse_with_missing_fields() {
        let data = ChallengeData::from_json_str(SAMPLE).unwrap();
        assert_eq!(data.athletes.len(), 2);
        let anon = &data.athletes["anon"];
        assert!(anon.daily_distance_km.is_empty());
        assert_eq!(anon.profile_source(), None);
        assert_eq!(data.month_names.len(), 2);
    }

    #[test]
    fn test_daily_lookup_by_month_and_type() {
        let data = ChallengeData::from_json_str(SAMPLE).unwrap();
        let jdoe = &data.athletes["jdoe"];
        assert_eq!(jdoe.daily_for_month(9, None), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(jdoe.daily_for_month(9, Some("All")), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(jdoe.daily_for_month(9, Some("Run")), Some(&[1.0, 0.0, 3.0][..]));
        assert_eq!(jdoe.daily_for_month(9, Some("Hike")), None);
        assert_eq!(jdoe.daily_for_month(8, None), None);
        assert_eq!(jdoe.daily_for_month(21, None), None);
        assert_eq!(jdoe.daily_for_month(-3, None), None);
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut record = AthleteRecord {
            firstname: "Jane".into(),
            lastname: "Doe".into(),
            username: "jdoe".into(),
            ..AthleteRecord::default()
        };
        assert_eq!(record.resolved_display_name("alias"), "Jane Doe");
        record.display_name = Some("JD".into());
        assert_eq!(record.resolved_display_name("alias"), "JD");
        record.display_name = Some("  ".into());
        record.firstname.clear();
        record.lastname.clear();
        assert_eq!(record.resolved_display_name("alias"), "jdoe");
        record.username.clear();
        assert_eq!(record.resolved_display_name("alias"), "alias");
    }

    #[test]
    fn test_round_trip_keeps_records() {
        let data = ChallengeData::from_json_str(SAMPLE).unwrap();
        let text = data.to_json_pretty().unwrap();
        assert_eq!(ChallengeData::from_json_str(&text).unwrap(), data);
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let err = load_challenge_data(Path::new("/nonexistent/athletes.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/athletes.json"));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(matches!(
            ChallengeData::from_json_str("{not json"),
            Err(ChallengeError::Json(_))
        ));
    }
}
