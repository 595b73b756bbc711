use clap::Parser;
use ev_elt::config::toml_config::TomlConfig;
use ev_elt::core::ConfigProvider;
use ev_elt::utils::error::ErrorSeverity;
use ev_elt::utils::{logger, validation::Validate};
use ev_elt::{run_with_config, LocalStorage};

#[derive(Parser)]
#[command(name = "toml-etl")]
#[command(about = "EV registration extraction driven by a TOML job file")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "etl-config.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Override monitoring setting from config
    #[arg(long)]
    monitor: Option<bool>,

    /// Dry run - validate and show what would be processed without executing
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init_cli_logger(args.verbose);

    tracing::info!("🚀 Starting TOML-based extraction");
    tracing::info!("📁 Loading configuration from: {}", args.config);

    let config = match TomlConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    tracing::info!("✅ Configuration loaded and validated successfully");
    display_config_summary(&config, &args);

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No request or upload will happen");
        return Ok(());
    }

    let monitor_enabled = args.monitor.unwrap_or_else(|| config.monitoring_enabled());
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let storage = LocalStorage::new(config.output_path(), config.destination.bucket.clone());

    match run_with_config(storage, config, monitor_enabled).await {
        Ok(result) => {
            println!("✅ Extraction completed successfully!");
            println!("📁 Uploaded {} to bucket {}", result.key, result.bucket);
            println!(
                "📊 Records written: {}, records dropped: {}",
                result.record_count, result.dropped_count
            );
        }
        Err(e) => {
            tracing::error!(
                "❌ Extraction failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            let exit_code = match e.severity() {
                ErrorSeverity::Low => 0,
                ErrorSeverity::Medium => 2,
                ErrorSeverity::High => 1,
                ErrorSeverity::Critical => 3,
            };
            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}

fn display_config_summary(config: &TomlConfig, args: &Args) {
    let retry = config.retry_policy();

    println!("📋 Configuration Summary:");
    println!(
        "  Pipeline: {} v{}",
        config.pipeline.name, config.pipeline.version
    );
    if let Some(description) = &config.pipeline.description {
        println!("  Description: {}", description);
    }
    println!("  Source: {}", config.api_endpoint());
    println!(
        "  Request timeout: {:?}, retries: {} (initial delay {:?})",
        config.request_timeout(),
        retry.max_attempts,
        retry.initial_delay
    );
    println!(
        "  Destination: {}/{} under {}",
        config.destination.bucket,
        config.destination.key,
        config.output_path()
    );
    println!("  Invalid records: {}", config.invalid_record_policy());
    match config.invocation_timeout() {
        Some(limit) => println!("  Invocation timeout: {:?}", limit),
        None => println!("  Invocation timeout: none"),
    }

    if args.dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }

    println!();
}
