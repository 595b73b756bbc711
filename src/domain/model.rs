use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 最早接受的車款年份
pub const MIN_MODEL_YEAR: i32 = 1990;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvType {
    #[serde(rename = "BEV")]
    BatteryElectric,
    #[serde(rename = "PHEV")]
    PluginHybrid,
}

impl EvType {
    pub fn code(&self) -> &'static str {
        match self {
            EvType::BatteryElectric => "BEV",
            EvType::PluginHybrid => "PHEV",
        }
    }

    /// Accepts the short codes, the kebab-case names and the feed's long labels
    /// such as `Battery Electric Vehicle (BEV)`.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let is_bev = |s: &str| {
            s == "bev"
                || s == "battery-electric"
                || s == "battery electric"
                || s.ends_with("(bev)")
                || s.starts_with("battery electric vehicle")
        };
        let is_phev = |s: &str| {
            s == "phev"
                || s == "plug-in-hybrid"
                || s == "plug-in hybrid"
                || s.ends_with("(phev)")
                || s.starts_with("plug-in hybrid electric vehicle")
        };

        if is_bev(&normalized) {
            Some(EvType::BatteryElectric)
        } else if is_phev(&normalized) {
            Some(EvType::PluginHybrid)
        } else {
            None
        }
    }
}

impl fmt::Display for EvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 一筆已驗證的電動車登記資料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// `dol_vehicle_id` from the feed when present. Not guaranteed unique.
    pub source_id: Option<String>,
    pub make: String,
    pub model: String,
    pub model_year: i32,
    pub ev_type: EvType,
    /// 0 means "not reported".
    pub electric_range: i32,
    pub city: String,
    pub state: String,
}

/// Inclusive model-year bounds, anchored on the extraction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearBounds {
    pub min: i32,
    pub max: i32,
}

impl YearBounds {
    pub fn anchored_at(at: DateTime<Utc>) -> Self {
        Self {
            min: MIN_MODEL_YEAR,
            max: at.year() + 1,
        }
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.min..=self.max).contains(&year)
    }
}

/// A source element that failed schema coercion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRejection {
    pub index: usize,
    pub field: String,
    pub reason: String,
}

impl fmt::Display for RecordRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record #{} field '{}': {}", self.index, self.field, self.reason)
    }
}

#[derive(Debug, Clone)]
pub struct TransformResult {
    pub records: Vec<RegistrationRecord>,
    pub rejections: Vec<RecordRejection>,
    pub extracted_at: DateTime<Utc>,
}

impl TransformResult {
    pub fn total(&self) -> usize {
        self.records.len() + self.rejections.len()
    }
}

/// Where an extraction run writes: a bucket plus the base object key.
///
/// The base key (e.g. `raw/ev_registrations.parquet`) is never written as-is;
/// every run derives its own timestamped key from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub bucket: String,
    pub key: String,
}

impl Destination {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub record_count: usize,
    pub dropped_count: usize,
    pub bucket: String,
    pub key: String,
    pub extracted_at: DateTime<Utc>,
    pub source_url: String,
}
