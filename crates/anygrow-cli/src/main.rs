//! `anygrow`: bench tool for the AnyGrow controller board.
//!
//! ```text
//! anygrow ports
//! anygrow monitor --port /dev/ttyUSB0
//! anygrow send led on
//! anygrow send channels on:500:255 off on:1000:128 off
//! anygrow --verbose monitor --dry-run --raw
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anygrow_link::LinkConfig;
use anygrow_protocol::{ChannelSetting, LedMode};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod run;

use run::CliError;

#[derive(Debug, Parser)]
#[command(name = "anygrow", version, about = "AnyGrow controller bench tool", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List serial ports
    Ports,

    /// Print status and telemetry until Ctrl-C
    Monitor {
        #[command(flatten)]
        link: LinkArgs,

        /// Also print every chunk of raw bytes
        #[arg(long)]
        raw: bool,

        /// Do not send periodic telemetry requests
        #[arg(long)]
        no_poll: bool,

        /// Serve Prometheus metrics on this address
        #[cfg(feature = "prometheus")]
        #[arg(long, value_name = "ADDR")]
        metrics_addr: Option<std::net::SocketAddr>,
    },

    /// Send one command and exit
    Send {
        #[command(flatten)]
        link: LinkArgs,

        #[command(subcommand)]
        action: Action,
    },

    /// Print the effective configuration as YAML
    Config {
        #[command(flatten)]
        link: LinkArgs,
    },
}

/// Where and how to connect.
#[derive(Debug, Clone, Args)]
struct LinkArgs {
    /// YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial device (overrides the config file)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (overrides the config file)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Talk to a simulated board instead of a serial port
    #[arg(long)]
    dry_run: bool,
}

impl LinkArgs {
    fn load(&self) -> Result<LinkConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => LinkConfig::load(path)?,
            None => LinkConfig::default(),
        };
        if let Some(port) = &self.port {
            config = config.with_port(port.clone());
        }
        if let Some(baud) = self.baud {
            config = config.with_baud_rate(baud);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Action {
    /// Whole-board lighting mode
    Led {
        /// off, on or mood
        mode: LedMode,
    },
    /// Nutrient pump relay
    Pump { state: Switch },
    /// UV filter relay
    Uv { state: Switch },
    /// Set the board clock to the host's local time
    TimeSync,
    /// Per-channel LED settings, four entries of `off` or `on:HZ:BRIGHTNESS`
    Channels {
        #[arg(value_parser = parse_channel, num_args = 1..)]
        channels: Vec<ChannelSetting>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn is_on(self) -> bool {
        matches!(self, Switch::On)
    }
}

fn parse_channel(s: &str) -> Result<ChannelSetting, String> {
    if s.eq_ignore_ascii_case("off") {
        return Ok(ChannelSetting::off());
    }
    let parts: Vec<&str> = s.split(':').collect();
    match parts.as_slice() {
        [on, hz, brightness] => {
            let on = match on.to_ascii_lowercase().as_str() {
                "on" | "1" => true,
                "off" | "0" => false,
                other => return Err(format!("expected on or off, got '{}'", other)),
            };
            let hz = hz
                .parse::<u16>()
                .map_err(|e| format!("bad frequency '{}': {}", hz, e))?;
            let brightness = brightness
                .parse::<u8>()
                .map_err(|e| format!("bad brightness '{}': {}", brightness, e))?;
            Ok(ChannelSetting::new(on, hz, brightness))
        }
        _ => Err(format!("expected 'off' or 'on:HZ:BRIGHTNESS', got '{}'", s)),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Ports => run::ports(),
        #[cfg(feature = "prometheus")]
        Commands::Monitor {
            link,
            raw,
            no_poll,
            metrics_addr,
        } => run::monitor(&link, raw, no_poll, metrics_addr),
        #[cfg(not(feature = "prometheus"))]
        Commands::Monitor { link, raw, no_poll } => run::monitor(&link, raw, no_poll),
        Commands::Send { link, action } => run::send(&link, action),
        Commands::Config { link } => run::config(&link),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
