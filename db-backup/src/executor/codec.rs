//! Compression codec selection and the startup dependency check.
//!
//! Codecs are tried in the configured preference order and the first
//! available one is used for the whole run, both for per-target artifacts
//! and for the outer tar archive.

use crate::utils::BackupError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Zstd,
    Gzip,
}

impl Codec {
    /// Every codec this build knows about, strongest first.
    pub const ALL: [Codec; 2] = [Codec::Zstd, Codec::Gzip];

    pub fn extension(self) -> &'static str {
        match self {
            Codec::Zstd => "zst",
            Codec::Gzip => "gz",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::Zstd => "zstd",
            Codec::Gzip => "gzip",
        }
    }

    /// Both encoders are linked in, so availability is decided by configuration.
    pub fn is_available(self) -> bool {
        match self {
            Codec::Zstd | Codec::Gzip => true,
        }
    }

    /// Clamp a generic 0-9 style level into this codec's valid range.
    pub fn level(self, requested: i32) -> i32 {
        match self {
            Codec::Zstd => requested.clamp(1, 22),
            Codec::Gzip => requested.clamp(0, 9),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zstd" | "zst" => Ok(Codec::Zstd),
            "gzip" | "gz" => Ok(Codec::Gzip),
            other => Err(format!("unknown codec {:?}", other)),
        }
    }
}

/// Parse configured codec names, dropping unknown ones with a warning.
pub fn parse_preferences(names: &[String]) -> Vec<Codec> {
    let mut codecs = Vec::with_capacity(names.len());
    for name in names {
        match name.parse::<Codec>() {
            Ok(codec) if !codecs.contains(&codec) => codecs.push(codec),
            Ok(_) => {}
            Err(e) => warn!("Ignoring codec entry: {}", e),
        }
    }
    codecs
}

/// First available codec in preference order.
pub fn select_codec(preferences: &[Codec], is_available: impl Fn(Codec) -> bool) -> Option<Codec> {
    preferences.iter().copied().find(|c| is_available(*c))
}

/// Resolve the dump utility: absolute or relative paths must exist, bare
/// names are looked up on `PATH`.
pub fn locate_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Run-gating dependency check. Returns the codec selected for this run.
pub fn check_dependencies(preferences: &[Codec], dump_program: &Path) -> Result<Codec, BackupError> {
    let codec = select_codec(preferences, Codec::is_available);

    let dumper = locate_program(dump_program);
    match &dumper {
        Some(path) => info!("Dump utility found at {}", path.display()),
        None => warn!("Dump utility {} is not installed", dump_program.display()),
    }

    match (codec, dumper) {
        (Some(codec), Some(_)) => {
            info!("Using {}", codec);
            Ok(codec)
        }
        (None, _) => Err(BackupError::DependencyMissing(format!(
            "no usable compression codec (configured: {})",
            preferences
                .iter()
                .map(|c| c.name())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
        (Some(_), None) => Err(BackupError::DependencyMissing(format!(
            "dump utility {} not found",
            dump_program.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_preserves_preference_order() {
        let all = |_: Codec| true;
        assert_eq!(select_codec(&[Codec::Zstd, Codec::Gzip], all), Some(Codec::Zstd));
        assert_eq!(select_codec(&[Codec::Gzip, Codec::Zstd], all), Some(Codec::Gzip));

        let only_gzip = |c: Codec| c == Codec::Gzip;
        assert_eq!(select_codec(&[Codec::Zstd, Codec::Gzip], only_gzip), Some(Codec::Gzip));
        assert_eq!(select_codec(&[], all), None);
        assert_eq!(select_codec(&[Codec::Zstd], |_| false), None);
    }

    #[test]
    fn test_parse_preferences_skips_unknown_and_duplicates() {
        let names = vec!["zstd".to_string(), "bzip2".to_string(), "GZ".to_string(), "zst".to_string()];
        assert_eq!(parse_preferences(&names), vec![Codec::Zstd, Codec::Gzip]);
    }

    #[test]
    fn test_locate_program() {
        assert!(locate_program(Path::new("/bin/sh")).is_some());
        assert!(locate_program(Path::new("sh")).is_some());
        assert!(locate_program(Path::new("/nonexistent/mysqldump")).is_none());
        assert!(locate_program(Path::new("definitely-not-a-real-dump-tool")).is_none());
    }

    #[test]
    fn test_check_dependencies() {
        let sh = Path::new("/bin/sh");
        assert_eq!(check_dependencies(&[Codec::Gzip], sh).unwrap(), Codec::Gzip);

        let err = check_dependencies(&[], sh).unwrap_err();
        assert!(matches!(err, BackupError::DependencyMissing(_)));

        let err = check_dependencies(&Codec::ALL, Path::new("/nonexistent/mysqldump")).unwrap_err();
        assert!(matches!(err, BackupError::DependencyMissing(_)));
    }
}
