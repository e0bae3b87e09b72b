//! Core data models used throughout Stepboard.
//!
//! A [`Reading`] is what one uploaded screenshot yields; it is consumed by
//! the reconciler straight away and never stored on its own. What is stored
//! is the [`DailyRecord`]: the best reading per person per calendar day.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::extract::ExtractionMode;

/// `day` column format.
pub const DAY_FORMAT: &str = "%Y-%m-%d";
/// `created_at` column format (local wall-clock time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One OCR-derived observation from a single uploaded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub person: String,
    pub steps: u32,
    /// Stored file name of the uploaded screenshot.
    pub source_image: String,
    pub observed_at: NaiveDateTime,
}

impl Reading {
    pub fn day(&self) -> NaiveDate {
        self.observed_at.date()
    }
}

/// Persisted best-known step count for one person on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyRecord {
    pub id: i64,
    pub person: String,
    pub day: NaiveDate,
    pub steps: u32,
    pub source_image: String,
    /// Time of the last accepted reading.
    pub created_at: NaiveDateTime,
}

/// A record about to be inserted (no id yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub person: String,
    pub day: NaiveDate,
    pub steps: u32,
    pub source_image: String,
    pub created_at: NaiveDateTime,
}

impl From<&Reading> for NewRecord {
    fn from(reading: &Reading) -> Self {
        Self {
            person: reading.person.clone(),
            day: reading.day(),
            steps: reading.steps,
            source_image: reading.source_image.clone(),
            created_at: reading.observed_at,
        }
    }
}

/// One row of the leaderboard: a person's steps summed over every day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub person: String,
    pub total_steps: i64,
    pub days: i64,
}

/// Where a screenshot came from. Decides extraction strategy and whether
/// the image is thresholded before OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadSource {
    /// Structured smartband companion app screen.
    Smartband,
    /// Free-form health app screenshot (Apple Health, vendor apps).
    #[serde(rename = "health")]
    HealthApp,
}

impl UploadSource {
    pub fn extraction_mode(self) -> ExtractionMode {
        match self {
            UploadSource::Smartband => ExtractionMode::Simple,
            UploadSource::HealthApp => ExtractionMode::Localized,
        }
    }

    pub fn wants_preprocessing(self) -> bool {
        matches!(self, UploadSource::HealthApp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadSource::Smartband => "smartband",
            UploadSource::HealthApp => "health",
        }
    }
}

impl fmt::Display for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smartband" | "band" => Ok(UploadSource::Smartband),
            "health" | "health-app" | "health_app" => Ok(UploadSource::HealthApp),
            other => Err(format!(
                "unknown upload source '{}': expected smartband or health",
                other
            )),
        }
    }
}
