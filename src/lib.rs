//! ECR tally station.
//!
//! Reads the journal an electronic cash register prints down its serial line,
//! tallies sales per business hour, and appends one CSV row per completed
//! hour for an external upload job to collect.

pub mod config;
pub mod diagnostics;
pub mod ecr;
pub mod error;
pub mod hours;
pub mod output;
pub mod shop;
pub mod station;
pub mod tally;
pub mod updater;

use anyhow::Context;
use std::time::Duration;
use tracing::{error, info, warn};

use config::Cli;
use output::CsvHourWriter;
use station::{Station, SystemClock};
use tally::{PluRegistry, TallyContext};
use updater::Updater;

/// Run the station until the process is stopped, a replay is exhausted, or
/// an update requires a restart.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone();
    let settings = cli.into_settings().context("failed to load settings")?;

    let _log_guard = diagnostics::init_logging(&settings.log_dir)
        .with_context(|| format!("failed to set up logging in {}", settings.log_dir.display()))?;

    let build = diagnostics::BuildInfo::current();
    info!(
        version = build.version,
        built = build.build_timestamp,
        git = build.git_sha,
        platform = build.platform,
        "Starting ECR tally"
    );
    match &settings.source {
        Some(path) => info!(config = %path.display(), "Settings file loaded"),
        None => warn!(
            config = %config_path.display(),
            "Config file not found, using defaults"
        ),
    }
    info!(
        debug = settings.debug,
        opening = settings.opening_hour,
        closing = settings.closing_hour,
        "Trading window configured"
    );

    let registry = PluRegistry::load(&settings.plu_file)?;
    let shop_id = shop::resolve_shop_id(&settings.shop)?;
    let sink = CsvHourWriter::new(&settings.output_dir, &shop_id, &registry);

    let mut transport = ecr::create_transport(&settings);
    transport
        .connect()
        .with_context(|| format!("failed to open {}", transport.description()))?;

    let updater = match Updater::from_settings(&settings.update) {
        Ok(updater) => updater,
        Err(e) => {
            error!(error = %e, "Self-update disabled");
            None
        }
    };

    let mut station = Station::new(
        TallyContext::new(registry),
        transport,
        Box::new(sink),
        SystemClock,
        &settings,
    )
    .with_updater(updater);

    let idle_sleep = Duration::from_millis(settings.poll_interval_ms);
    loop {
        let report = station.poll_once().context("journal feed failed")?;

        if report.exhausted {
            station.finish()?;
            info!("Replay complete");
            return Ok(());
        }
        if report.restart {
            station.finish()?;
            updater::restart_process().context("failed to restart after update")?;
            return Ok(());
        }
        if report.lines == 0 {
            std::thread::sleep(idle_sleep);
        }
    }
}
