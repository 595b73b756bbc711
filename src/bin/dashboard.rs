use clap::{Parser, ValueEnum};
use ev_elt::adapters::warehouse::{HttpWarehouse, ParquetWarehouse};
use ev_elt::config::toml_config::TomlConfig;
use ev_elt::config::warehouse::WarehouseConfig;
use ev_elt::domain::ports::WarehouseConnection;
use ev_elt::presentation::{
    load_registrations, make_options, render_dashboard, write_csv, year_options, DashboardView,
    RegistrationFilter,
};
use ev_elt::utils::error::EtlError;
use ev_elt::utils::{logger, validation::Validate};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "dashboard")]
#[command(about = "Summary and filtered view of EV registrations from the warehouse")]
struct Args {
    /// TOML file with a [warehouse] section
    #[arg(short, long)]
    config: Option<String>,

    /// Read a local directory of extractor artifacts instead of an HTTP warehouse
    #[arg(long)]
    parquet_dir: Option<String>,

    #[arg(long)]
    table: Option<String>,

    /// Bound the warehouse query with LIMIT
    #[arg(long)]
    limit: Option<usize>,

    /// Make filter ("All" for no filter)
    #[arg(long, default_value = "All")]
    make: String,

    /// Model year filter ("All" for no filter)
    #[arg(long, default_value = "All")]
    year: String,

    /// Maximum rows shown in the detailed table
    #[arg(long, default_value = "50")]
    rows: usize,

    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Write the filtered detailed view to a CSV file
    #[arg(long)]
    export_csv: Option<String>,

    /// List the selectable make and year values and exit
    #[arg(long)]
    list_options: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn warehouse_config(args: &Args) -> Result<WarehouseConfig, EtlError> {
    let from_args = WarehouseConfig {
        table: args.table.clone(),
        parquet_dir: args.parquet_dir.clone(),
        row_limit: args.limit,
        ..WarehouseConfig::default()
    };
    let from_file = match &args.config {
        Some(path) => TomlConfig::warehouse_from_file(path)?.unwrap_or_default(),
        None => WarehouseConfig::default(),
    };

    // 優先順序：命令列 > 環境變數 > 設定檔
    let mut config = from_args.or(WarehouseConfig::from_env()).or(from_file);
    if config.parquet_dir.is_some() && args.parquet_dir.is_some() {
        config.url = None;
    }
    Ok(config)
}

/// 依使用者輸入找出實際的車廠名稱（不分大小寫）
fn resolve_make(options: &[String], wanted: &str) -> String {
    options
        .iter()
        .find(|option| option.eq_ignore_ascii_case(wanted.trim()))
        .cloned()
        .unwrap_or_else(|| wanted.trim().to_string())
}

async fn show<W: WarehouseConnection>(connection: W, args: &Args) -> anyhow::Result<Option<EtlError>> {
    let records = match load_registrations(&connection).await {
        Ok(records) => records,
        Err(e) => {
            emit(&DashboardView::error(&e), args.format);
            return Ok(Some(e));
        }
    };
    drop(connection);

    let makes = make_options(&records);
    if args.list_options {
        println!("Makes: {}", makes.join(", "));
        println!("Years: {}", year_options(&records).join(", "));
        return Ok(None);
    }

    let mut filter = RegistrationFilter::from_selection(Some(&args.make), Some(&args.year))
        .map_err(anyhow::Error::msg)?;
    filter.make = filter.make.map(|make| resolve_make(&makes, &make));

    let view = DashboardView::build(&records, filter, Some(args.rows));

    if let (Some(path), DashboardView::Loaded { detail, .. }) = (&args.export_csv, &view) {
        let file = std::fs::File::create(path)?;
        write_csv(detail, file)?;
        tracing::info!("💾 Exported {} rows to {}", detail.len(), path);
    }

    emit(&view, args.format);
    Ok(None)
}

fn emit(view: &DashboardView, format: OutputFormat) {
    match format {
        OutputFormat::Text => print!("{}", render_dashboard(view)),
        OutputFormat::Json => {
            let value = match view {
                DashboardView::Loaded {
                    summary,
                    filter,
                    detail,
                    ..
                } => json!({
                    "summary": summary,
                    "filter": { "make": filter.make, "year": filter.year },
                    "matching_records": detail.len(),
                }),
                DashboardView::Error { message } => json!({ "error": message }),
            };
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    let config = match warehouse_config(&args).and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Warehouse configuration invalid: {}", e);
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };

    let failure = if config.parquet_dir.is_some() {
        match ParquetWarehouse::connect(&config).await {
            Ok(connection) => show(connection, &args).await?,
            Err(e) => {
                emit(&DashboardView::error(&e), args.format);
                Some(e)
            }
        }
    } else {
        match HttpWarehouse::connect(&config) {
            Ok(connection) => show(connection, &args).await?,
            Err(e) => {
                emit(&DashboardView::error(&e), args.format);
                Some(e)
            }
        }
    };

    if let Some(e) = failure {
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        std::process::exit(1);
    }

    Ok(())
}
