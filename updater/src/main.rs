//! LSR Updater - Entry Point
//!
//! Updates the firmware of LSR readers attached to a BKR concentrator.
//! Commands go to the concentrator over UDP; firmware images go to each
//! reader over TFTP.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use lsrupd::app::options::AppOptions;
use lsrupd::app::run::{run_rollback, run_update};
use lsrupd::logs::{init_logging, LogOptions};
use lsrupd::settings::Settings;
use lsrupd::utils::version_info;

use tracing::error;

const USAGE: &str = "\
Usage:
  lsrupd --update --firmware=<name> [--settings=<path>]
  lsrupd --rollback --device=<hex_id> [--settings=<path>]
  lsrupd --version";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        let version = version_info();
        println!("{}", serde_json::to_string_pretty(&version).unwrap());
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings file, falling back to defaults when absent
    let settings = match cli_args.get("settings") {
        Some(path) => match Settings::load(path).await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => Settings::default(),
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.json_logs,
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    let options = AppOptions::from_settings(&settings);

    if cli_args.contains_key("update") {
        let firmware = match cli_args.get("firmware") {
            Some(name) => name.clone(),
            None => {
                eprintln!("--update requires --firmware=<name>\n{}", USAGE);
                return ExitCode::FAILURE;
            }
        };
        return match run_update(options, &firmware).await {
            Ok(stats) if stats.failed == 0 && stats.errors.is_empty() => ExitCode::SUCCESS,
            Ok(_) => ExitCode::FAILURE,
            Err(e) => {
                error!("Update run failed: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    if cli_args.contains_key("rollback") {
        let device = match cli_args.get("device") {
            Some(token) => token.clone(),
            None => {
                eprintln!("--rollback requires --device=<hex_id>\n{}", USAGE);
                return ExitCode::FAILURE;
            }
        };
        return match run_rollback(options, &device).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Rollback failed: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    eprintln!("{}", USAGE);
    ExitCode::FAILURE
}
