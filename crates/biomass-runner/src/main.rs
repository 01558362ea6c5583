//! `biomass`: estimate parcel biomass for a county or a list of counties.

use biomass_runner::{
    open_coordinator, AppConfig, CountyRunOptions, Result, RunSummary, RunnerError,
};
use biomass_store::SpatialStore;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "biomass")]
#[command(about = "Estimate forest and crop biomass for land parcels")]
#[command(after_long_help = "\
EXIT STATUS:
    0  every parcel was handled
    2  partial: some parcels errored, a county failed, or the run was interrupted
    1  aborted: nothing could be processed

Ctrl-C finishes and checkpoints the current batch, then stops. Run the
same command again to resume.")]
struct Cli {
    /// YAML configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write the run summary as JSON to this file.
    #[arg(long, global = true)]
    summary_json: Option<PathBuf>,

    /// Serve Prometheus metrics on this address.
    #[cfg(feature = "prometheus")]
    #[arg(long, global = true)]
    metrics_addr: Option<std::net::SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::Args)]
struct RunArgs {
    /// Stop after this many parcels per county.
    #[arg(long)]
    parcel_limit: Option<u64>,

    /// Parcels per batch.
    #[arg(long)]
    batch_size: Option<u64>,

    /// Worker threads.
    #[arg(long)]
    workers: Option<usize>,

    /// Ignore checkpoints and run-state and start over.
    #[arg(long)]
    fresh: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Process one county.
    Process {
        /// Two-digit state FIPS code.
        #[arg(long)]
        state: String,
        /// Three-digit county FIPS code.
        #[arg(long)]
        county: String,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Process several counties of a state in order.
    ProcessState {
        #[arg(long)]
        state: String,
        /// Comma-separated three-digit county FIPS codes.
        #[arg(long, value_delimiter = ',', required = true)]
        counties: Vec<String>,
        /// Progress file for resuming the state run.
        #[arg(long, default_value = "biomass-run-state.json")]
        run_state: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Show a county's checkpoint and stored record count.
    Status {
        #[arg(long)]
        state: String,
        #[arg(long)]
        county: String,
    },
    /// Create missing tables and print row counts.
    InitDb,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = if verbose > 0 {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::default()),
    }
}

fn apply_overrides(config: &mut AppConfig, run: &RunArgs) -> CountyRunOptions {
    if let Some(batch_size) = run.batch_size {
        config.processing.batch_size = batch_size;
    }
    if let Some(workers) = run.workers {
        config.processing.max_workers = workers;
    }
    CountyRunOptions {
        parcel_limit: run.parcel_limit,
        fresh: run.fresh,
    }
}

fn install_stop_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            warn!("Second interrupt; exiting immediately");
            std::process::exit(130);
        }
        warn!("Interrupt received; finishing the current batch");
    })?;
    Ok(stop)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = load_config(cli.config.as_deref())?;
    biomass_metrics::describe_metrics();
    #[cfg(feature = "prometheus")]
    if let Some(addr) = cli.metrics_addr {
        match biomass_metrics::install_prometheus_exporter(addr) {
            Ok(()) => info!(%addr, "Prometheus exporter listening"),
            Err(e) => warn!(%addr, error = %e, "Prometheus exporter not started"),
        }
    }

    let summary = match cli.command {
        Command::Process { state, county, run } => {
            let options = apply_overrides(&mut config, &run);
            let coordinator = open_coordinator(&config, install_stop_handler()?)?;
            coordinator.process_county(&state, &county, options)
        }
        Command::ProcessState {
            state,
            counties,
            run_state,
            run,
        } => {
            let options = apply_overrides(&mut config, &run);
            let coordinator =
                open_coordinator(&config, install_stop_handler()?)?.with_run_state(run_state);
            coordinator.process_state(&state, &counties, options)?
        }
        Command::Status { state, county } => {
            print_status(&config, &state, &county)?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::InitDb => {
            let store = SpatialStore::open(&config.stores)?;
            store.initialize_schemas()?;
            println!("{}", serde_json::to_string_pretty(&store.database_stats()?)?);
            return Ok(ExitCode::SUCCESS);
        }
    };

    report(&summary, cli.summary_json.as_deref())?;
    Ok(summary.exit_code())
}

fn report(summary: &RunSummary, json_path: Option<&Path>) -> Result<()> {
    println!("{summary}");
    if let Some(path) = json_path {
        let json = serde_json::to_string_pretty(summary)?;
        std::fs::write(path, json).map_err(|source| RunnerError::File {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Summary written");
    }
    Ok(())
}

fn print_status(config: &AppConfig, state: &str, county: &str) -> Result<()> {
    let store = SpatialStore::open(&config.stores)?;
    store.initialize_schemas()?;
    let county_fips = format!("{state}{county}");
    let parcels = store.count_county_parcels(state, county, config.processing.min_parcel_acres)?;
    let records = store.count_biomass_results(&county_fips)?;
    println!("County {county_fips}: {parcels} parcels, {records} biomass records");
    match store.get_checkpoint(state, county)? {
        Some(c) => println!(
            "Checkpoint: {} at batch {} (offset {}), {} processed, {} skipped, {} errors, run {}",
            c.status.as_str(),
            c.batch_num,
            c.parcel_offset,
            c.parcels_processed,
            c.parcels_skipped,
            c.errors_count,
            c.processing_timestamp.to_rfc3339(),
        ),
        None => println!("Checkpoint: none"),
    }
    Ok(())
}
