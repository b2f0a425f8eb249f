mod logging;
mod rumqttc_wrapper;
mod signals;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use log::{error, info};
use rumqttc_wrapper::RumqttcWrapper;
use solarman2mqtt::bus_publisher::BusPublisher;
use solarman2mqtt::installation_config::{self, InstallationConfig};
use solarman2mqtt::passhash::passhash;
use solarman2mqtt::poller::{self, Poller};
use solarman2mqtt::solarman_api::SolarmanApi;

const VALID_CONFIG: &str = "
The provided config file is valid. This check validates if:

  * The config file is a valid JSON file
  * The config file contains the required keys
  * The config file contains the correct types for the provided keys
  * Lengths and ranges of identifiers, credentials and ports are in bounds

Although that is not a guarantee that the contents are valid. If
you still have issues, please check all values and try again.
";

/// Collect PV data from the Solarman API and publish it to MQTT
#[derive(Parser)]
#[command(name = "solarman-mqtt", version, about)]
struct Cli {
    /// run as a service
    #[arg(short, long)]
    daemon: bool,

    /// single run and exit
    #[arg(short, long)]
    single: bool,

    /// run interval in seconds
    #[arg(short, long, default_value_t = poller::DEFAULT_INTERVAL_SECS.to_string())]
    interval: String,

    /// config file
    #[arg(short, long, default_value = "config.json")]
    file: PathBuf,

    /// validate config file and exit
    #[arg(long)]
    validate: bool,

    /// create passhash from provided password string and exit
    #[arg(long, value_name = "PASSWORD")]
    create_passhash: Option<String>,
}

fn connect(config: &InstallationConfig) -> anyhow::Result<BusPublisher<RumqttcWrapper>> {
    BusPublisher::new(&config.mqtt, &config.name)
}

fn single_run(path: &Path) -> anyhow::Result<()> {
    let configs = installation_config::load(path)?;
    let mut poller = Poller::new(SolarmanApi::new()?, connect);
    let summary = poller.run_once(&configs);
    info!(
        "{} of {} installations polled, {} messages published",
        summary.succeeded,
        configs.len(),
        summary.published
    );
    if summary.failed > 0 {
        anyhow::bail!("{} installation(s) could not be polled", summary.failed);
    }
    Ok(())
}

fn daemon(path: &Path, interval: &str) -> anyhow::Result<()> {
    let interval = poller::parse_interval(interval)?;
    // refuse a broken config before entering the loop
    installation_config::load(path)?;
    let shutdown = signals::install();
    let mut poller = Poller::new(SolarmanApi::new()?, connect);
    poller.run_daemon(path, interval, &shutdown)?;
    Ok(())
}

fn validate(path: &Path) -> ExitCode {
    match installation_config::validate(path) {
        Ok(_) => {
            println!("{VALID_CONFIG}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn exit_code(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logger();
    info!("Running revision: {}", env!("GIT_HASH"));

    if cli.single {
        exit_code(single_run(&cli.file))
    } else if cli.daemon {
        exit_code(daemon(&cli.file, &cli.interval))
    } else if cli.validate {
        validate(&cli.file)
    } else if let Some(password) = cli.create_passhash.filter(|p| !p.is_empty()) {
        println!("{}", passhash(&password));
        ExitCode::SUCCESS
    } else {
        let _ = Cli::command().write_help(&mut std::io::stderr());
        ExitCode::SUCCESS
    }
}
