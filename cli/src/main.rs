//! Interactive command loop driving the secure logging engine.
//!
//! Single-character commands read from stdin append, clear, or hex-dump the
//! encrypted log. The secure element is the in-process software
//! implementation, with its slot table persisted so provisioned keys survive
//! restarts.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use enclog_engine::element::soft::SoftElement;
use enclog_engine::{LoggerConfig, SecureLogger};

const DEFAULT_LOG_FILE: &str = "enc_log.bin";
const DEFAULT_STATE_FILE: &str = "soft_element.bin";

#[derive(Parser, Debug)]
#[command(author, version, about = "Append-only encrypted event logging demo")]
struct Cli {
    /// Path of the encrypted log file.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Path of the software secure element's persisted slot state.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_STATE_FILE)]
    element_state: PathBuf,

    /// Generate a fresh key on boot, overwriting the slot. Destructive:
    /// existing records become undecryptable.
    #[arg(long)]
    force_regenerate_key: bool,

    /// Deadline in milliseconds for a single secure-element operation.
    #[arg(long, value_name = "MILLIS", default_value_t = 2000)]
    op_timeout_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let driver = SoftElement::with_state_file(&cli.element_state)
        .context("loading software secure element state")?;

    let mut config = LoggerConfig::new(&cli.log_file);
    config.force_regenerate = cli.force_regenerate_key;
    config.wait_deadline = Duration::from_millis(cli.op_timeout_ms);

    let mut logger = SecureLogger::initialize(driver, config).context("engine startup failed")?;

    print_log(&logger);
    print_usage();
    command_loop(&mut logger)
}

fn command_loop(logger: &mut SecureLogger<SoftElement>) -> Result<()> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading command input")?;
        for command in line.chars() {
            match command {
                'a' | 'A' | '1' => {
                    if let Err(err) = logger.append_heartbeat() {
                        error!("append failed: {err}");
                    }
                }
                'c' | 'C' | '2' => {
                    if let Err(err) = logger.clear_log() {
                        error!("clear failed: {err}");
                    }
                }
                'p' | 'P' => print_log(logger),
                'q' | 'Q' => return Ok(()),
                ' ' | '\t' => {}
                other => {
                    warn!("unknown command: {other}");
                    print_usage();
                }
            }
        }
    }
    Ok(())
}

fn print_log(logger: &SecureLogger<SoftElement>) {
    let dump = match logger.dump_log() {
        Ok(dump) => dump,
        Err(err) => {
            error!("dump failed: {err}");
            return;
        }
    };

    let mut printed = false;
    for chunk in dump {
        match chunk {
            Ok(hex) => {
                if !printed {
                    println!("raw file content (hex):");
                    printed = true;
                }
                println!("  {hex}");
            }
            Err(err) => {
                error!("{err}");
                return;
            }
        }
    }
    if !printed {
        println!("no existing log data found.");
    }
}

fn print_usage() {
    println!("Commands:");
    println!("  a - append encrypted record");
    println!("  c - clear log file");
    println!("  p - print raw file (hex)");
    println!("  q - quit");
}
