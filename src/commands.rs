use std::io::IsTerminal;
use std::path::PathBuf;
use std::pin::pin;
use std::str::FromStr;

use argh::FromArgs;
use exitcode::ExitCode;
use redstat::config::{Config, ConfigError};
use redstat::cycle;
use redstat::dispatch::{self, Dispatch, JsonLines, Putval};
use redstat::trace;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Format {
    Putval,
    Json,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "putval" => Ok(Format::Putval),
            "json" => Ok(Format::Json),
            _ => Err(format!("unknown format {s:?}, expect putval or json")),
        }
    }
}

#[derive(FromArgs)]
#[argh(
    description = "Redstat collects redis INFO metrics and writes them as collectd PUTVAL lines or JSON",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'V', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level"
    )]
    log_level: String,

    #[argh(
        option,
        short = 'c',
        long = "config",
        description = "read configuration from a yaml file, the local redis is collected without it"
    )]
    config: Option<PathBuf>,

    #[argh(
        option,
        short = 'f',
        default = "Format::Putval",
        description = "output format, putval or json"
    )]
    format: Format,

    #[argh(switch, description = "run one collection cycle, then exit")]
    once: bool,

    #[argh(switch, description = "validate the configuration, then exit")]
    check: bool,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!("Redstat {PKG_VERSION}");
    }

    fn load_config(&self) -> Result<Config, ConfigError> {
        match &self.config {
            Some(path) => Config::load(path),
            None => Ok(Config::default()),
        }
    }

    fn check(&self) -> Result<(), ExitCode> {
        let config = match self.load_config() {
            Ok(config) => config,
            Err(err) => {
                println!("Failed to load config, {err}");
                return Err(exitcode::CONFIG);
            }
        };

        for warning in config.warnings() {
            println!("~ {warning}");
        }
        for target in config.targets() {
            println!("√ {} {}", target.label(), target.instance.endpoint);
        }

        println!("Validated");

        Ok(())
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        if self.check {
            return self.check();
        }

        let config = self.load_config();
        let verbose = config.as_ref().is_ok_and(Config::verbose);
        let color = std::io::stderr().is_terminal();
        trace::init(color, &trace::levels(&self.log_level, verbose));

        let config = config.map_err(handle_config_error)?;
        for warning in config.warnings() {
            warn!(message = "Configuration warning", %warning);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .map_err(|err| {
                error!(message = "Build runtime failed", %err);
                exitcode::OSERR
            })?;

        let host = dispatch::hostname(config.hostname.as_deref());
        let stdout = std::io::stdout().lock();
        let mut sink: Box<dyn Dispatch> = match self.format {
            Format::Putval => Box::new(Putval::new(stdout, host, config.interval)),
            Format::Json => Box::new(JsonLines::new(stdout, host, config.interval)),
        };

        runtime.block_on(async move {
            info!(
                message = "Start redstat",
                version = PKG_VERSION,
                instances = config.targets().len(),
                interval = ?config.interval
            );

            if self.once {
                return collect_once(&config, sink.as_mut()).await;
            }

            let mut shutdown = pin!(shutdown_signal());
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = &mut shutdown => {
                        info!(message = "Shutdown signal received");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                collect_once(&config, sink.as_mut()).await?;
            }

            Ok(())
        })
    }
}

async fn collect_once(config: &Config, sink: &mut dyn Dispatch) -> Result<(), ExitCode> {
    match cycle::run(config, sink).await {
        Ok(summary) => {
            debug!(
                message = "Collection finished",
                series = summary.series(),
                failed = summary.failed()
            );

            Ok(())
        }
        Err(err) => {
            // stdout is gone, nothing left to do
            error!(message = "Write values failed", %err);

            Err(exitcode::IOERR)
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }

                return;
            }
            Err(err) => {
                warn!(message = "Unable to listen for SIGTERM", %err);
            }
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(message = "Unable to listen for ctrl-c", %err);
        std::future::pending::<()>().await;
    }
}

pub fn handle_config_error(err: ConfigError) -> ExitCode {
    error!(message = "Configuration error", %err);

    exitcode::CONFIG
}
