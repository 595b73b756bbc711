use crate::core::normalize::coerce_stored_record;
use crate::domain::model::{EvType, RegistrationRecord};
use crate::domain::ports::{RegistrationQuery, WarehouseConnection};
use crate::utils::error::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;

/// Only model years after this one appear in the adoption trend.
pub const TREND_AFTER_YEAR: i32 = 2010;
pub const TOP_MAKES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MakeCount {
    pub make: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct YearCount {
    pub year: i32,
    pub count: usize,
}

/// Scoreboard metrics plus the two chart series. Empty input yields `None`s and empty vectors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryView {
    pub total_records: usize,
    /// Mean over records that report a range (`electric_range > 0`).
    pub mean_electric_range: Option<f64>,
    pub top_make: Option<String>,
    pub top_ev_type: Option<EvType>,
    pub top_makes: Vec<MakeCount>,
    pub registrations_by_year: Vec<YearCount>,
}

/// 眾數；同票時取最先出現者
fn mode<T, I>(values: I) -> Option<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut counts: HashMap<T, (usize, usize)> = HashMap::new();
    for (position, value) in values.into_iter().enumerate() {
        counts.entry(value).or_insert((0, position)).0 += 1;
    }

    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(value, _)| value)
}

pub fn summarize(records: &[RegistrationRecord]) -> SummaryView {
    let ranges: Vec<i64> = records
        .iter()
        .filter(|r| r.electric_range > 0)
        .map(|r| i64::from(r.electric_range))
        .collect();
    let mean_electric_range =
        (!ranges.is_empty()).then(|| ranges.iter().sum::<i64>() as f64 / ranges.len() as f64);

    let mut make_counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        *make_counts.entry(record.make.as_str()).or_default() += 1;
    }
    let mut top_makes: Vec<MakeCount> = make_counts
        .into_iter()
        .map(|(make, count)| MakeCount {
            make: make.to_string(),
            count,
        })
        .collect();
    top_makes.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.make.cmp(&b.make)));
    top_makes.truncate(TOP_MAKES);

    let mut year_counts: HashMap<i32, usize> = HashMap::new();
    for record in records.iter().filter(|r| r.model_year > TREND_AFTER_YEAR) {
        *year_counts.entry(record.model_year).or_default() += 1;
    }
    let mut registrations_by_year: Vec<YearCount> = year_counts
        .into_iter()
        .map(|(year, count)| YearCount { year, count })
        .collect();
    registrations_by_year.sort_by_key(|entry| entry.year);

    SummaryView {
        total_records: records.len(),
        mean_electric_range,
        top_make: mode(records.iter().map(|r| r.make.clone())),
        top_ev_type: mode(records.iter().map(|r| r.ev_type)),
        top_makes,
        registrations_by_year,
    }
}

/// Runs the single bounded-column query and decodes the rows.
///
/// Rows lacking a make, model year or EV type are skipped with a warning.
pub async fn load_registrations<W: WarehouseConnection>(
    connection: &W,
) -> Result<Vec<RegistrationRecord>> {
    let query = RegistrationQuery::new(connection.table()).with_limit(connection.row_limit());
    let rows = connection.fetch_rows(&query).await?;

    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for (index, row) in rows.into_iter().enumerate() {
        let fields: HashMap<String, serde_json::Value> = row.into_iter().collect();
        match coerce_stored_record(&fields) {
            Ok(record) => records.push(record),
            Err((field, reason)) => {
                skipped += 1;
                tracing::warn!("⚠️ Skipping warehouse row {} ({}: {})", index, field, reason);
            }
        }
    }

    if skipped > 0 {
        tracing::warn!("⚠️ Skipped {} undecodable warehouse rows", skipped);
    }
    Ok(records)
}

pub async fn load_summary<W: WarehouseConnection>(connection: &W) -> Result<SummaryView> {
    let records = load_registrations(connection).await?;
    Ok(summarize(&records))
}
