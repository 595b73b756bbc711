use crate::domain::model::RegistrationRecord;
use crate::presentation::filters::RegistrationFilter;
use crate::presentation::summary::{summarize, SummaryView};
use crate::utils::error::{EtlError, Result};
use std::fmt::Write as _;

const BAR_WIDTH: usize = 30;
const NOT_AVAILABLE: &str = "N/A";

/// Columns of the detailed view, in display order.
pub const DETAIL_COLUMNS: [&str; 6] = [
    "model_year",
    "make",
    "model",
    "ev_type",
    "electric_range",
    "city",
];

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardView {
    Loaded {
        summary: SummaryView,
        filter: RegistrationFilter,
        detail: Vec<RegistrationRecord>,
        /// Maximum rows printed in the detailed table.
        row_cap: Option<usize>,
    },
    Error {
        message: String,
    },
}

impl DashboardView {
    /// Summary over every record; the filter only narrows the detailed view.
    pub fn build(
        records: &[RegistrationRecord],
        filter: RegistrationFilter,
        row_cap: Option<usize>,
    ) -> Self {
        let detail = records.iter().filter(|r| filter.matches(r)).cloned().collect();
        DashboardView::Loaded {
            summary: summarize(records),
            filter,
            detail,
            row_cap,
        }
    }

    pub fn from_load(
        loaded: Result<Vec<RegistrationRecord>>,
        filter: RegistrationFilter,
        row_cap: Option<usize>,
    ) -> Self {
        match loaded {
            Ok(records) => Self::build(&records, filter, row_cap),
            Err(e) => Self::error(&e),
        }
    }

    pub fn error(err: &EtlError) -> Self {
        DashboardView::Error {
            message: err.user_friendly_message(),
        }
    }
}

fn bar(count: usize, max: usize) -> String {
    let width = if max == 0 { 0 } else { (count * BAR_WIDTH).div_ceil(max) };
    "█".repeat(width)
}

fn render_scoreboard(out: &mut String, summary: &SummaryView) {
    let mean = summary
        .mean_electric_range
        .map(|mean| format!("{} miles", mean as i64))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let _ = writeln!(out, "Total vehicles:      {}", summary.total_records);
    let _ = writeln!(out, "Avg electric range:  {}", mean);
    let _ = writeln!(
        out,
        "Most popular make:   {}",
        summary.top_make.as_deref().unwrap_or(NOT_AVAILABLE)
    );
    let _ = writeln!(
        out,
        "Most common EV type: {}",
        summary
            .top_ev_type
            .map(|t| t.code())
            .unwrap_or(NOT_AVAILABLE)
    );
}

fn render_charts(out: &mut String, summary: &SummaryView) {
    let _ = writeln!(out, "\nMarket share (top {} makes)", summary.top_makes.len());
    if summary.top_makes.is_empty() {
        let _ = writeln!(out, "  {}", NOT_AVAILABLE);
    }
    let max = summary.top_makes.iter().map(|m| m.count).max().unwrap_or(0);
    let label_width = summary
        .top_makes
        .iter()
        .map(|m| m.make.chars().count())
        .max()
        .unwrap_or(0);
    for entry in &summary.top_makes {
        let _ = writeln!(
            out,
            "  {:<width$} {} {}",
            entry.make,
            bar(entry.count, max),
            entry.count,
            width = label_width
        );
    }

    let _ = writeln!(out, "\nAdoption trend (model years after 2010)");
    if summary.registrations_by_year.is_empty() {
        let _ = writeln!(out, "  {}", NOT_AVAILABLE);
    }
    let max = summary
        .registrations_by_year
        .iter()
        .map(|y| y.count)
        .max()
        .unwrap_or(0);
    for entry in &summary.registrations_by_year {
        let _ = writeln!(out, "  {} {} {}", entry.year, bar(entry.count, max), entry.count);
    }
}

fn detail_row(record: &RegistrationRecord) -> [String; 6] {
    [
        record.model_year.to_string(),
        record.make.clone(),
        record.model.clone(),
        record.ev_type.code().to_string(),
        record.electric_range.to_string(),
        record.city.clone(),
    ]
}

fn render_detail(
    out: &mut String,
    filter: &RegistrationFilter,
    detail: &[RegistrationRecord],
    row_cap: Option<usize>,
) {
    let _ = writeln!(out, "\nDetailed view ({})", filter.describe());
    if detail.is_empty() {
        let _ = writeln!(out, "  No registrations match the selected filters.");
        return;
    }

    let shown = row_cap.unwrap_or(detail.len()).min(detail.len());
    let rows: Vec<[String; 6]> = detail.iter().take(shown).map(detail_row).collect();

    let mut widths = DETAIL_COLUMNS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_row = |cells: &[&str]| {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let _ = writeln!(out, "  {}", format_row(&DETAIL_COLUMNS));
    let _ = writeln!(
        out,
        "  {}",
        widths.map(|w| "-".repeat(w)).join("-+-")
    );
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        let _ = writeln!(out, "  {}", format_row(&cells));
    }

    if shown < detail.len() {
        let _ = writeln!(out, "  ... {} more rows", detail.len() - shown);
    }
}

/// Renders the whole dashboard as text, or an inline error state.
pub fn render_dashboard(view: &DashboardView) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "EV Registrations Dashboard");
    let _ = writeln!(out, "==========================");

    match view {
        DashboardView::Error { message } => {
            let _ = writeln!(out, "⚠️  Data is currently unavailable.");
            let _ = writeln!(out, "{}", message);
        }
        DashboardView::Loaded {
            summary,
            filter,
            detail,
            row_cap,
        } => {
            render_scoreboard(&mut out, summary);
            render_charts(&mut out, summary);
            render_detail(&mut out, filter, detail, *row_cap);
        }
    }

    out
}

/// 匯出明細表（與畫面相同欄位）為 CSV
pub fn write_csv<W: std::io::Write>(records: &[RegistrationRecord], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(DETAIL_COLUMNS)?;
    for record in records {
        csv_writer.write_record(detail_row(record))?;
    }
    csv_writer.flush()?;
    Ok(())
}
