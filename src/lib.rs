pub mod clock;
pub mod commands;
pub mod config;
pub mod engine;
pub mod itemize;
pub mod probe;
pub mod state;
pub mod transfer;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::Registry;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "gs",
    version,
    about = "Mirror local directories against a remote host with rsync over SSH"
)]
pub struct Cli {
    /// Registry file (defaults to ~/.config/gs/gs.toml)
    #[arg(long, global = true, env = "GS_CONFIG")]
    pub config: Option<PathBuf>,

    /// rsync binary used for transfers
    #[arg(long, global = true, env = "GS_RSYNC", default_value = "rsync")]
    pub rsync: PathBuf,

    /// Log debug details to stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the registry with a remote: user@host:port:/path
    Init { remote: String },
    /// Track the current directory
    Track,
    /// Stop tracking the directory containing the current directory
    Untrack,
    /// List tracked directories and when they were last synced
    List,
    /// Send local changes to the remote (mirrors, deleting remote extras)
    Push,
    /// Fetch remote changes (mirrors, deleting local extras)
    Pull,
    /// Show pending changes in both directions without transferring
    Status,
    /// Wait for the remote, then pull every tracked directory
    Auto {
        /// Pause between reachability probes
        #[arg(long, default_value = "30s", value_parser = parse_duration)]
        interval: Duration,

        /// Give up after this long; 0 waits forever
        #[arg(long, default_value = "15m", value_parser = parse_duration)]
        timeout: Duration,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

pub fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(Registry::default_path);

    match cli.command {
        Commands::Init { remote } => commands::init(&config_path, &remote),
        Commands::Track => commands::track(&config_path),
        Commands::Untrack => commands::untrack(&config_path),
        Commands::List => commands::list(&config_path),
        Commands::Push => commands::push(&config_path, &cli.rsync),
        Commands::Pull => commands::pull(&config_path, &cli.rsync),
        Commands::Status => commands::status(&config_path, &cli.rsync),
        Commands::Auto { interval, timeout } => {
            commands::auto(&config_path, &cli.rsync, interval, timeout)
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "gs", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
    }
}

/// Install the stderr log subscriber.
///
/// `RUST_LOG` wins when set; otherwise only errors are shown, or everything
/// from this crate down to `debug` with `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "gs=debug" } else { "gs=error" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

/// Parse `0`, `90`, `30s`, `15m`, `2h`, `1h30m` or `500ms`.
///
/// A bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration '{input}'"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration '{input}'"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let step = match &rest[..unit_len] {
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "s" => Some(Duration::from_secs(value)),
            "ms" => Some(Duration::from_millis(value)),
            unit => return Err(format!("unknown unit '{unit}' in duration '{input}'")),
        };
        total = step
            .and_then(|step| total.checked_add(step))
            .ok_or_else(|| format!("duration '{input}' is too large"))?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}
