//! modelseal CLI
//!
//! Entry point for the `modelseal` command-line tool. The only core
//! surface is the trusted-key expiry inspector.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use modelseal::{ExpiryStatus, TrustedKeyring, DAYS_WARNING_FOR_KEY_EXPIRY};

#[derive(Parser)]
#[command(name = "modelseal")]
#[command(about = "Signed containers for composite ML artifacts", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report when trusted keys expire; exits nonzero if any key is
    /// expired or expires within the warning window
    CheckKeys {
        /// Warning window in days (default: 30)
        days_before_warning: Option<i64>,

        /// Path to the trusted keys directory
        /// (default: $MODELSEAL_TRUSTED_KEYS_DIR)
        #[arg(long, short = 'k')]
        keys_dir: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::CheckKeys {
            days_before_warning,
            keys_dir,
            json,
        } => {
            let days = days_before_warning.unwrap_or(DAYS_WARNING_FOR_KEY_EXPIRY);
            process::exit(check_keys(days, keys_dir.as_deref(), json));
        }
    }
}

fn check_keys(days: i64, keys_dir: Option<&std::path::Path>, json: bool) -> i32 {
    let keyring = match TrustedKeyring::load_default(keys_dir) {
        Ok(keyring) => keyring,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };

    let reports = keyring.check_expiry(days, chrono::Utc::now());

    if json {
        match serde_json::to_string_pretty(&reports) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("error: {e}");
                return 2;
            }
        }
    } else {
        for report in &reports {
            let note = match report.status {
                ExpiryStatus::Expired => "KEY IS EXPIRED, fix now",
                ExpiryStatus::ExpiresSoon => "update key ASAP",
                ExpiryStatus::Ok => "ok",
            };
            match report.days_remaining {
                Some(days) => println!(
                    "{}  {}  expires in {} day(s)  [{}]",
                    report.name, report.fingerprint, days, note
                ),
                None => println!(
                    "{}  {}  never expires  [{}]",
                    report.name, report.fingerprint, note
                ),
            }
        }
    }

    let all_clear = reports.iter().all(|r| r.status == ExpiryStatus::Ok);
    if all_clear {
        0
    } else {
        1
    }
}
