//! db-backup - Main entry point
//!
//! Back up the given databases into one archive in the destination directory.

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use db_backup::config::{resolve_logfile, CliOptions, Config, RunContext};
use db_backup::daemon::shutdown::cancel_on_signal;
use db_backup::{notify, utils, BackupError, Coordinator};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

const USAGE_EXIT: i32 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database user
    #[arg(short, long)]
    user: Option<String>,

    /// Database password
    #[arg(short, long, env = "DB_BACKUP_PASSWORD", hide_env_values = true)]
    pass: Option<String>,

    /// IPv4 address of the database server (default 127.0.0.1)
    #[arg(long)]
    hostname: Option<String>,

    /// Databases to back up, space or comma separated
    #[arg(long, num_args = 1..)]
    databases: Vec<String>,

    /// Directory that receives the archive
    #[arg(short, long, value_name = "DIR")]
    dest: Option<PathBuf>,

    /// Log file
    #[arg(short, long, value_name = "FILE")]
    logfile: Option<PathBuf>,

    /// Also log to stderr, at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Text printed for a failed run setup. Usage errors come after the usage
/// text, like a command line parse error.
fn failure_message(err: &BackupError) -> String {
    match err {
        BackupError::Usage(_) => format!("{}\n{}", Args::command().render_help(), err),
        _ => err.to_string(),
    }
}

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => USAGE_EXIT,
            };
            let _ = e.print();
            return code;
        }
    };

    // Load configuration
    let config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                return e.exit_code();
            }
        },
        None => Config::default(),
    };

    // Initialize logging
    let logfile = resolve_logfile(args.logfile.as_deref());
    if let Err(e) = utils::logger::init(&logfile, args.verbose) {
        eprintln!("Cannot open log file {}: {}", logfile.display(), e);
        return BackupError::Io(std::io::Error::other(e.to_string())).exit_code();
    }

    tracing::info!("Starting db-backup v{}", env!("CARGO_PKG_VERSION"));

    let cli = CliOptions {
        user: args.user,
        password: args.pass,
        hostname: args.hostname,
        databases: args.databases,
        destination: args.dest,
    };
    let ctx = match RunContext::build(cli, &config) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("{}", failure_message(&e));
            return e.exit_code();
        }
    };

    let cancel = CancellationToken::new();
    let signals = cancel_on_signal(cancel.clone());

    let result = Coordinator::with_cancel(ctx, cancel.clone()).run().await;

    // Stop the signal listener
    cancel.cancel();
    let _ = signals.await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}", e);
            return e.exit_code();
        }
    };

    for line in report.to_string().lines() {
        tracing::info!("{}", line);
    }

    let hostname = notify::local_hostname();
    if let Err(e) = notify::send(&config.notify, &report, &hostname).await {
        tracing::warn!("Failed to send notification: {}", e);
    }

    report.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error_prints_usage_then_message() {
        let cli = CliOptions {
            user: Some("root".into()),
            password: Some("secret".into()),
            hostname: None,
            databases: Vec::new(),
            destination: None,
        };
        let err = RunContext::build(cli, &Config::default()).unwrap_err();
        let text = failure_message(&err);

        assert_eq!(err.exit_code(), USAGE_EXIT);
        let usage = text.find("Usage:").unwrap();
        let message = text.find("Need a database to backup.").unwrap();
        assert!(usage < message);
        assert!(text.contains("--databases"));
    }

    #[test]
    fn test_other_errors_print_message_only() {
        let err = BackupError::Io(std::io::Error::other("disk gone"));
        let text = failure_message(&err);
        assert!(!text.contains("Usage:"));
        assert!(text.contains("disk gone"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "db-backup", "-u", "root", "-p", "pw", "--databases", "a", "b", "-d", "/backup",
        ])
        .unwrap();
        assert_eq!(args.databases, vec!["a", "b"]);
        assert_eq!(args.dest, Some(PathBuf::from("/backup")));
    }
}
