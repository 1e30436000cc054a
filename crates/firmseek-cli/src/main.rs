//! firmseek - probe a vendor firmware-lookup service for accepted versions
//!
//! Walks down from a device's last known-good firmware version, asking the
//! vendor's search endpoint about each candidate, and logs every version the
//! service recognizes.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use firmseek_core::config::DEFAULT_DATE_HORIZON_DAYS;
use firmseek_core::xor::DEFAULT_KEY_HEX;
use firmseek_core::{
    transform_file, CandidateGenerator, Config, HttpQueryClient, RotatingKey, RunCoordinator,
    VersionBuild,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Default log file for searches
const DEFAULT_LOG_FILE: &str = "firmseek.log";

/// Probe a vendor firmware-lookup service for accepted version identifiers
#[derive(Parser, Debug)]
#[command(name = "firmseek")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Append logs to this file (searches default to firmseek.log)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log to stderr instead of a file
    #[arg(long, global = true, conflicts_with = "log_file")]
    stderr: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search every configured device concurrently
    Search {
        /// YAML file listing devices and search tuning
        #[arg(short, long)]
        config: PathBuf,

        /// Only search these devices (by name); repeatable
        #[arg(short, long = "device")]
        devices: Vec<String>,
    },

    /// Print the candidate sequence for a version without contacting the service
    Candidates {
        /// Starting version, e.g. "V5.7.9 build 220520"
        #[arg(id = "start", value_name = "VERSION")]
        version: VersionBuild,

        /// Build dates per version triple
        #[arg(long, default_value_t = DEFAULT_DATE_HORIZON_DAYS)]
        horizon: u32,

        /// Maximum candidates to print (0 = all)
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Apply the rotating-key XOR transform to a firmware image
    Decrypt {
        /// Encrypted input file
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the result
        #[arg(short, long)]
        output: PathBuf,

        /// Initial key as hex; spaces are allowed
        #[arg(long, default_value = DEFAULT_KEY_HEX)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    match cli.command {
        Command::Search {
            ref config,
            ref devices,
        } => run_search(config, devices).await,
        Command::Candidates {
            ref version,
            horizon,
            limit,
        } => print_candidates(version, horizon, limit),
        Command::Decrypt {
            ref input,
            ref output,
            ref key,
        } => run_decrypt(input, output, key),
    }
}

/// Installs the log sink: an append-mode file for searches, stderr otherwise
fn init_tracing(cli: &Cli) -> Result<()> {
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let log_file = match (&cli.log_file, &cli.command) {
        _ if cli.stderr => None,
        (Some(path), _) => Some(path.clone()),
        (None, Command::Search { .. }) => Some(PathBuf::from(DEFAULT_LOG_FILE)),
        (None, _) => None,
    };

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

/// Runs the coordinator over the configured (or selected) devices
async fn run_search(config_path: &Path, devices: &[String]) -> Result<()> {
    let config = Config::from_path(config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
    let targets = config.select_devices(devices)?;

    info!(
        "Searching {} device(s) against {}",
        targets.len(),
        config.endpoint
    );

    let coordinator = RunCoordinator::new(targets, config.search.clone());
    let endpoint = config.endpoint.as_str();
    let summary = coordinator
        .run(|target| HttpQueryClient::new(endpoint, target))
        .await;

    for run in &summary.runs {
        match &run.result {
            Ok(report) => {
                println!(
                    "{}: {} candidates, {} requests, {} found",
                    run.device,
                    report.candidates,
                    report.requests,
                    report.found.len()
                );
                for hit in &report.found {
                    println!("  {}", hit.version);
                }
            }
            Err(e) => println!("{}: failed: {}", run.device, e),
        }
    }

    let failed = summary.failed().count();
    if failed > 0 {
        bail!(
            "{} of {} device searches failed",
            failed,
            summary.runs.len()
        );
    }

    Ok(())
}

/// Prints the candidate sequence with a fixed anchor
fn print_candidates(version: &VersionBuild, horizon: u32, limit: usize) -> Result<()> {
    let generator = CandidateGenerator::new(version.triple, horizon);
    info!(
        "{} yields at most {} candidates",
        version,
        generator.max_candidates()
    );

    let limit = if limit == 0 { usize::MAX } else { limit };
    let mut stdout = std::io::stdout().lock();
    for candidate in generator
        .with_fixed_anchor(version.build_date)
        .take(limit)
    {
        writeln!(stdout, "{}", candidate)?;
    }

    Ok(())
}

/// Applies the rotating-key transform to a file
fn run_decrypt(input: &Path, output: &Path, key_hex: &str) -> Result<()> {
    if !input.is_file() {
        bail!("Input file does not exist: {}", input.display());
    }

    let key = RotatingKey::from_hex(key_hex).context("Failed to parse key")?;
    info!("Key: {} bytes", key.len());

    let written = transform_file(input, output, key)
        .with_context(|| format!("Failed to transform {}", input.display()))?;

    println!("Wrote {} bytes to {}", written, output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_candidates() {
        let cli =
            Cli::try_parse_from(["firmseek", "candidates", "V5.7.9 build 220520", "--limit", "3"])
                .unwrap();
        match cli.command {
            Command::Candidates {
                version,
                horizon,
                limit,
            } => {
                assert_eq!(version.to_string(), "V5.7.9 build 220520");
                assert_eq!(horizon, DEFAULT_DATE_HORIZON_DAYS);
                assert_eq!(limit, 3);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_version() {
        assert!(Cli::try_parse_from(["firmseek", "candidates", "5.7.9"]).is_err());
    }

    #[test]
    fn test_parse_search_devices() {
        let cli = Cli::try_parse_from([
            "firmseek", "search", "-c", "d.yaml", "-d", "ball-ft", "-d", "gun-gd",
        ])
        .unwrap();
        match cli.command {
            Command::Search { config, devices } => {
                assert_eq!(config, PathBuf::from("d.yaml"));
                assert_eq!(devices, ["ball-ft", "gun-gd"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_decrypt_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let plain = temp_dir.path().join("plain.bin");
        let enc = temp_dir.path().join("enc.bin");
        let dec = temp_dir.path().join("dec.bin");
        let data: Vec<u8> = (0..100u8).collect();
        std::fs::write(&plain, &data).unwrap();

        run_decrypt(&plain, &enc, DEFAULT_KEY_HEX).unwrap();
        run_decrypt(&enc, &dec, DEFAULT_KEY_HEX).unwrap();

        assert_ne!(std::fs::read(&enc).unwrap(), data);
        assert_eq!(std::fs::read(&dec).unwrap(), data);
    }

    #[test]
    fn test_decrypt_missing_input() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.bin");
        assert!(run_decrypt(&missing, &temp_dir.path().join("out"), DEFAULT_KEY_HEX).is_err());
    }
}
