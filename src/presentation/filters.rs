use crate::domain::model::RegistrationRecord;

/// The "no constraint" choice offered by both filters.
pub const ALL: &str = "All";

/// The two interactive dashboard filters. `None` means "All".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationFilter {
    pub make: Option<String>,
    pub year: Option<i32>,
}

impl RegistrationFilter {
    /// Parses raw selections; `"All"` (any case) or an empty string clears a filter.
    pub fn from_selection(make: Option<&str>, year: Option<&str>) -> Result<Self, String> {
        let is_all = |value: &str| value.trim().is_empty() || value.trim().eq_ignore_ascii_case(ALL);

        let make = make.filter(|m| !is_all(m)).map(|m| m.trim().to_string());
        let year = match year.filter(|y| !is_all(y)) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<i32>()
                    .map_err(|_| format!("'{}' is not a model year", raw))?,
            ),
            None => None,
        };

        Ok(Self { make, year })
    }

    pub fn matches(&self, record: &RegistrationRecord) -> bool {
        self.make.as_deref().map_or(true, |make| record.make == make)
            && self.year.map_or(true, |year| record.model_year == year)
    }

    pub fn describe(&self) -> String {
        format!(
            "make: {}, year: {}",
            self.make.as_deref().unwrap_or(ALL),
            self.year.map_or_else(|| ALL.to_string(), |y| y.to_string())
        )
    }
}

/// Keeps the records matching every provided filter, in input order.
pub fn apply_filters(
    records: &[RegistrationRecord],
    make: Option<&str>,
    year: Option<i32>,
) -> Vec<RegistrationRecord> {
    let filter = RegistrationFilter {
        make: make.filter(|m| *m != ALL).map(str::to_string),
        year,
    };
    records.iter().filter(|r| filter.matches(r)).cloned().collect()
}

/// "All" followed by every make in first-seen order.
pub fn make_options(records: &[RegistrationRecord]) -> Vec<String> {
    let mut options = vec![ALL.to_string()];
    for record in records {
        if !options[1..].contains(&record.make) {
            options.push(record.make.clone());
        }
    }
    options
}

/// "All" followed by every model year, newest first.
pub fn year_options(records: &[RegistrationRecord]) -> Vec<String> {
    let mut years: Vec<i32> = records.iter().map(|r| r.model_year).collect();
    years.sort_unstable_by(|a, b| b.cmp(a));
    years.dedup();

    std::iter::once(ALL.to_string())
        .chain(years.into_iter().map(|y| y.to_string()))
        .collect()
}
