//! Error types for mail composition and delivery.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("Invalid header {name}: line breaks are not allowed")]
    InvalidHeader { name: &'static str },

    #[error("Cannot read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Mail transport failed: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
