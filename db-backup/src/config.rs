//! Configuration management for the backup runner.
//!
//! Tunables come from an optional TOML file; the targets, credentials and
//! destination come from the command line. Both are folded into one
//! immutable [`RunContext`] that is shared by every stage of a run.

use crate::executor::codec::{parse_preferences, Codec};
use crate::executor::target::{BackupTarget, Credentials};
use crate::utils::BackupError;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_LOGFILE: &str = "/tmp/backup-mysql.log";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backup: BackupConfig,
    pub dump: DumpConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory for raw dumps, compressed artifacts and the staging archive
    pub scratch_dir: PathBuf,

    /// Single-instance lock file
    pub lock_file: PathBuf,

    /// Upper bound on concurrent dump / compress workers
    pub max_parallelism: usize,

    /// Limit for each external dump and each compression
    pub command_timeout_secs: u64,

    /// Codec preference order (zstd, gzip)
    pub codecs: Vec<String>,

    /// Compression level (clamped per codec)
    pub compression_level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Dump utility; bare names are looked up on PATH
    pub program: PathBuf,

    /// Arguments placed before the connection arguments
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,

    /// sendmail-compatible program, used when no SMTP host is set
    pub program: PathBuf,

    /// SMTP relay, `host` or `host:port`
    pub smtp_host: Option<String>,

    pub smtp_port: Option<u16>,

    pub smtp_username: Option<String>,

    pub smtp_password: Option<String>,

    /// Require STARTTLS on the SMTP connection
    pub use_tls: bool,

    /// Sender address; defaults to `backup@<hostname>`
    pub from: Option<String>,

    pub to: Vec<String>,

    pub subject_prefix: String,

    /// Attach the archive to the mail
    pub attach_archive: bool,
}

// Default values
impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("/tmp"),
            lock_file: PathBuf::from("/var/run/backup_mysql.pid"),
            max_parallelism: 20,
            command_timeout_secs: 3600,
            codecs: vec!["zstd".to_string(), "gzip".to_string()],
            compression_level: 6,
        }
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/usr/bin/mysqldump"),
            extra_args: Vec::new(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            program: PathBuf::from(backup_mailer::transport::DEFAULT_SENDMAIL),
            smtp_host: None,
            smtp_port: None,
            smtp_username: None,
            smtp_password: None,
            use_tls: false,
            from: None,
            to: Vec::new(),
            subject_prefix: "[db-backup]".to_string(),
            attach_archive: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, BackupError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BackupError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| BackupError::Config(format!("invalid {}: {}", path.display(), e)))
    }
}

/// Command-line input before validation.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub user: Option<String>,
    pub password: Option<String>,
    pub hostname: Option<String>,
    pub databases: Vec<String>,
    pub destination: Option<PathBuf>,
}

/// Immutable description of one run, shared read-only by every stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub targets: Vec<BackupTarget>,
    pub host: String,
    pub destination: PathBuf,
    pub scratch_dir: PathBuf,
    pub lock_file: PathBuf,
    pub max_parallelism: usize,
    pub command_timeout: Duration,
    pub codec_preference: Vec<Codec>,
    pub compression_level: i32,
    pub dump: DumpConfig,
}

impl RunContext {
    pub fn build(cli: CliOptions, config: &Config) -> Result<Self, BackupError> {
        let (user, password) = match (cli.user, cli.password) {
            (Some(u), Some(p)) if !u.is_empty() => (u, p),
            _ => return Err(BackupError::Usage("Need user and password.".to_string())),
        };

        let names = split_databases(&cli.databases);
        if names.is_empty() {
            return Err(BackupError::Usage("Need a database to backup.".to_string()));
        }

        let destination = match cli.destination {
            Some(dest) if dest.is_dir() => dest,
            _ => return Err(BackupError::Usage("Destination must be a valid directory.".to_string())),
        };

        let host = resolve_host(cli.hostname.as_deref());
        let credentials = Arc::new(Credentials::new(user, password));
        let targets = names
            .into_iter()
            .map(|name| BackupTarget::new(name, host.clone(), Arc::clone(&credentials)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            targets,
            host,
            destination,
            scratch_dir: config.backup.scratch_dir.clone(),
            lock_file: config.backup.lock_file.clone(),
            max_parallelism: config.backup.max_parallelism.max(1),
            command_timeout: Duration::from_secs(config.backup.command_timeout_secs.max(1)),
            codec_preference: parse_preferences(&config.backup.codecs),
            compression_level: config.backup.compression_level,
            dump: config.dump.clone(),
        })
    }
}

/// A syntactically valid IPv4 address, or the documented default.
pub fn resolve_host(hostname: Option<&str>) -> String {
    match hostname.map(str::trim) {
        Some(h) if h.parse::<Ipv4Addr>().is_ok() => h.to_string(),
        Some(h) => {
            warn!("Invalid IPv4 hostname {:?}, using {}", h, DEFAULT_HOST);
            DEFAULT_HOST.to_string()
        }
        None => DEFAULT_HOST.to_string(),
    }
}

/// The requested log file when its directory exists, the default otherwise.
pub fn resolve_logfile(logfile: Option<&Path>) -> PathBuf {
    match logfile {
        Some(path) => {
            let parent_ok = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.is_dir(),
                _ => true,
            };
            if parent_ok {
                path.to_path_buf()
            } else {
                PathBuf::from(DEFAULT_LOGFILE)
            }
        }
        None => PathBuf::from(DEFAULT_LOGFILE),
    }
}

/// Accept both `--databases a b` and `--databases a,b`; duplicates are dropped.
fn split_databases(raw: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in raw.iter().flat_map(|r| r.split(',')).map(str::trim) {
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}
