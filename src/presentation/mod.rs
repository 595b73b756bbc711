//! Read-only presentation layer: summary metrics, filters and the text dashboard.

pub mod filters;
pub mod render;
pub mod summary;

pub use filters::{apply_filters, make_options, year_options, RegistrationFilter, ALL};
pub use render::{render_dashboard, write_csv, DashboardView};
pub use summary::{load_registrations, load_summary, summarize, MakeCount, SummaryView, YearCount};
