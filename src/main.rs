//! # Weather Station Entry Point
//!
//! Wires the library components together and runs the station loop. On the
//! device the binary starts with no arguments and never returns; the flags
//! below exist for development:
//!
//! - `--stdout`: draw to the terminal instead of the e-paper panel
//! - `--once`: run a single cycle and exit
//! - `--config <path>`: read another configuration file
//! - `--verbose`: debug logging (`RUST_LOG` still wins)

#[cfg(test)]
mod tests;

use anyhow::{bail, Context};
use env_logger::Env;
use log::{info, warn};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use weather_station_lib::{
    clock::SystemClock,
    composer::DisplayComposer,
    config::{Config, CONFIG_FILE},
    controller::{ControllerSettings, CycleOutcome, StationController},
    display_driver::{ConsoleDisplay, DisplayDriver},
    forecast::{FetcherSettings, ForecastFetcher},
    http::ReqwestTransport,
    icons::IconSet,
    images::{HttpImageSource, ImageSource, NoImageSource},
};

/// Command line switches.
#[derive(Debug, Default, PartialEq)]
struct Options {
    stdout: bool,
    once: bool,
    verbose: bool,
    config: Option<PathBuf>,
}

impl Options {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Self> {
        let mut options = Options::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--stdout" => options.stdout = true,
                "--once" => options.once = true,
                "--verbose" | "-v" => options.verbose = true,
                "--config" => {
                    let path = args.next().context("--config needs a path")?;
                    options.config = Some(PathBuf::from(path));
                }
                other => bail!("unknown argument '{}'", other),
            }
        }
        Ok(options)
    }
}

fn main() -> anyhow::Result<()> {
    let options = Options::parse(env::args().skip(1))?;

    let default_filter = if options.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .init();

    let config_path = options
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let config = Config::load_from_path(&config_path)
        .with_context(|| format!("load {}", config_path.display()))?;
    config
        .validate()
        .with_context(|| format!("check {}", config_path.display()))?;
    if config.has_placeholder_identity() {
        warn!("client_identity is still the placeholder; the forecast service may reject requests");
    }

    // One logical task: the loop never runs two cycles at once
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    runtime.block_on(async {
        match config.service.image_url.clone() {
            Some(url) => {
                let transport = ReqwestTransport::new(request_timeout(&config));
                let images =
                    HttpImageSource::new(transport, url, config.station.client_identity.clone());
                start_with_images(&config, &options, images).await
            }
            None => {
                info!("No image service configured, using small icons only");
                start_with_images(&config, &options, NoImageSource).await
            }
        }
    })
}

fn request_timeout(config: &Config) -> Duration {
    Duration::from_secs(config.service.timeout_secs)
}

/// Pick the panel driver and run.
async fn start_with_images<I: ImageSource>(
    config: &Config,
    options: &Options,
    images: I,
) -> anyhow::Result<()> {
    if options.stdout {
        let driver = ConsoleDisplay::stdout(config.display.width, config.display.height);
        return run_station(config, options, images, driver).await;
    }

    #[cfg(all(target_os = "linux", feature = "hardware"))]
    {
        let driver = weather_station_lib::epaper::open(&config.display)
            .context("open e-paper panel")?;
        run_station(config, options, images, driver).await
    }

    #[cfg(not(all(target_os = "linux", feature = "hardware")))]
    {
        let _ = images;
        bail!("e-paper support not built; rebuild with --features hardware on Linux or use --stdout")
    }
}

async fn run_station<I: ImageSource, D: DisplayDriver>(
    config: &Config,
    options: &Options,
    images: I,
    driver: D,
) -> anyhow::Result<()> {
    let location = config.location()?;
    let clock = SystemClock;

    let fetcher = ForecastFetcher::new(
        ReqwestTransport::new(request_timeout(config)),
        clock,
        FetcherSettings::from_config(config),
    );
    let composer = DisplayComposer::new(
        IconSet::render(),
        images,
        config.station.utc_offset_minutes,
        config.station.labels.clone(),
    );
    let mut controller = StationController::new(
        fetcher,
        composer,
        driver,
        clock,
        location,
        ControllerSettings::from_config(config),
    );

    if options.once {
        let report = controller.run_cycle().await;
        info!("{:?}: {:?}", report.action, report.outcome);
        if let CycleOutcome::HardwareFault(e) = report.outcome {
            bail!(e);
        }
        return Ok(());
    }

    controller.run().await;
    Ok(())
}
