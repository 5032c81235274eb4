use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ofxferry::clock::SystemClock;
use ofxferry::config::{default_config_path, Config};
use ofxferry::driver::ChromeDriver;
use ofxferry::model::{AccountType, DateRange, UI_DATE_FMT};
use ofxferry::orchestrator::{ExportStage, UploadStage};
use ofxferry::retry::RetryPolicy;

#[derive(Parser)]
#[command(name = "ofxferry")]
#[command(about = "Export bank transactions as OFX and ferry them into a ledger app")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in to the bank and export every account's transactions
    Export(ExportArgs),
    /// Upload exported files to the ledger app
    Upload(CommonArgs),
    /// Export, then upload when the ledger app is configured
    Run(ExportArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Override the retry attempt count
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Override the per-attempt timeout (e.g. "10s", "1m")
    #[arg(long, value_parser = ofxferry::duration::parse_duration)]
    timeout: Option<std::time::Duration>,

    /// Run the browser without a window
    #[arg(long)]
    headless: bool,
}

#[derive(Args)]
struct ExportArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Only export accounts of this type (home-loan, complete-access,
    /// credit-card, misa, unknown)
    #[arg(long)]
    filter: Option<AccountType>,

    /// Start of the export range as DD/MM/YYYY (default: a year ago)
    #[arg(long)]
    from: Option<String>,

    /// End of the export range as DD/MM/YYYY (default: today)
    #[arg(long)]
    to: Option<String>,

    /// On failure, skip logout and leave the browser open for inspection
    #[arg(long)]
    debug: bool,
}

fn parse_ui_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, UI_DATE_FMT)
        .with_context(|| format!("{raw:?} is not a DD/MM/YYYY date"))
}

fn resolve_range(args: &ExportArgs) -> Result<DateRange> {
    let default = DateRange::last_year(&SystemClock);
    let from = args
        .from
        .as_deref()
        .map(parse_ui_date)
        .transpose()?
        .unwrap_or_else(|| default.from_date());
    let to = args
        .to
        .as_deref()
        .map(parse_ui_date)
        .transpose()?
        .unwrap_or_else(|| default.to_date());
    Ok(DateRange::new(from, to)?)
}

fn resolve_policy(config: &Config, common: &CommonArgs) -> RetryPolicy {
    RetryPolicy {
        max_attempts: common.max_attempts.unwrap_or(config.retry.max_attempts),
        per_attempt_timeout: common.timeout.unwrap_or(config.retry.per_attempt_timeout),
    }
}

fn work_dir(config: &Config) -> Result<PathBuf> {
    match &config.driver.download_dir {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir().context("Failed to resolve the working directory"),
    }
}

async fn launch_driver(config: &Config, headless: bool, dir: &Path) -> Result<Arc<ChromeDriver>> {
    let mut driver_config = config.driver.clone();
    if headless {
        driver_config.headless = true;
    }
    Ok(Arc::new(ChromeDriver::launch(&driver_config, dir).await?))
}

async fn run_export(config: &Config, args: &ExportArgs) -> Result<bool> {
    let credentials = config.primary_credentials()?;
    let range = resolve_range(args)?;
    let policy = resolve_policy(config, &args.common);
    let dir = work_dir(config)?;

    let driver = launch_driver(config, args.common.headless, &dir).await?;
    let report = ExportStage::new(driver, credentials, range, dir)
        .with_policy(policy)
        .with_filter(args.filter)
        .with_debug(args.debug)
        .run()
        .await?;

    tracing::info!(
        exported = report.exported.len(),
        failed = report.failures.len(),
        "export stage finished"
    );
    Ok(report.is_success())
}

async fn run_upload(config: &Config, common: &CommonArgs) -> Result<bool> {
    let secondary = config
        .secondary
        .clone()
        .context("config has no [secondary] section; nothing to upload to")?;
    let policy = resolve_policy(config, common);
    let dir = work_dir(config)?;

    let driver = launch_driver(config, common.headless, &dir).await?;
    let report = UploadStage::new(driver, secondary, dir)
        .with_policy(policy)
        .run()
        .await?;

    tracing::info!(
        uploaded = report.uploaded.len(),
        failed = report.failures.len(),
        "upload stage finished"
    );
    Ok(report.is_success())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off",
            )
        }))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = Config::load_or_default(&config_path)?;

    let clean = match &cli.command {
        Command::Export(args) => run_export(&config, args).await?,
        Command::Upload(common) => run_upload(&config, common).await?,
        Command::Run(args) => {
            let exported = run_export(&config, args).await?;
            let uploaded = if config.has_secondary() {
                run_upload(&config, &args.common).await?
            } else {
                tracing::info!("no [secondary] config; skipping upload stage");
                true
            };
            exported && uploaded
        }
    };

    if !clean {
        anyhow::bail!("some accounts or files failed; see the log for details");
    }
    Ok(())
}
