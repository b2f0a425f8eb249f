use std::path::Path;
use std::time::Duration;

use log::{error, info, warn};

use crate::installation_config::{self, InstallationConfig};
use crate::metric_collector::MetricCollector;
use crate::publication::decide;
use crate::shutdown::Shutdown;
use crate::telemetry::{fetch_snapshot, TelemetrySource};
use crate::{Error, Result};

pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Parses the daemon interval; only positive whole seconds are accepted.
pub fn parse_interval(raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(Error::Config(format!(
            "interval must be a positive number of seconds, got {raw:?}"
        ))),
    }
}

/// Messages handed to the bus for one installation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstallationOutcome {
    pub published: usize,
    pub failed: usize,
}

/// Tally of one pass over all installations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub published: usize,
    pub publish_failures: usize,
}

/// Drives fetch, decide and publish for every configured installation.
///
/// `connect` opens a collector for an installation's broker; it is only
/// called when there is something to publish, and the collector is closed
/// once the installation's messages are handed over.
pub struct Poller<S, F> {
    source: S,
    connect: F,
}

impl<S, C, F> Poller<S, F>
where
    S: TelemetrySource,
    C: MetricCollector,
    F: FnMut(&InstallationConfig) -> anyhow::Result<C>,
{
    pub fn new(source: S, connect: F) -> Self {
        Self { source, connect }
    }

    pub fn run_installation(&mut self, config: &InstallationConfig) -> Result<InstallationOutcome> {
        let snapshot = fetch_snapshot(&self.source, config)?;
        let publications = decide(&config.mqtt.topic, &snapshot);
        if publications.is_empty() {
            return Ok(InstallationOutcome::default());
        }

        let mut collector = (self.connect)(config).map_err(|e| {
            Error::Bus(format!("{}:{}: {e:#}", config.mqtt.broker, config.mqtt.port))
        })?;
        let failed = collector.publish(&publications) + collector.close();
        let failed = failed.min(publications.len());

        Ok(InstallationOutcome {
            published: publications.len() - failed,
            failed,
        })
    }

    /// One pass over all installations in file order.
    ///
    /// A failing installation is logged and does not stop the others.
    pub fn run_once(&mut self, configs: &[InstallationConfig]) -> CycleSummary {
        let mut summary = CycleSummary::default();
        for (index, config) in configs.iter().enumerate() {
            info!(
                "Polling installation {} [{}/{}]",
                config.name,
                index + 1,
                configs.len()
            );
            match self.run_installation(config) {
                Ok(outcome) => {
                    summary.succeeded += 1;
                    summary.published += outcome.published;
                    summary.publish_failures += outcome.failed;
                    if outcome.failed > 0 {
                        warn!(
                            "{}: {} of {} messages could not be published",
                            config.name,
                            outcome.failed,
                            outcome.published + outcome.failed
                        );
                    } else {
                        info!("{}: published {} messages", config.name, outcome.published);
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    error!("{}: {e}", config.name);
                }
            }
        }
        summary
    }

    /// Polls every `interval` until `shutdown` is requested.
    ///
    /// The config file is re-read before each pass; failing to load it ends
    /// the loop with an error. The interval is slept after each pass.
    pub fn run_daemon(&mut self, path: &Path, interval: Duration, shutdown: &Shutdown) -> Result<()> {
        info!(
            "Starting daemonized with a {} seconds run interval",
            interval.as_secs()
        );
        loop {
            let configs = installation_config::load(path)?;
            self.run_once(&configs);
            if shutdown.sleep(interval) {
                info!("Exiting on interrupt");
                return Ok(());
            }
        }
    }
}
