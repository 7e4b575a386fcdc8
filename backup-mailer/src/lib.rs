//! Backup Mailer Library
//!
//! Composes a notification mail, optionally carrying a file attachment, and
//! delivers it through a local sendmail-compatible program or an SMTP relay.

pub mod error;
pub mod message;
pub mod smtp;
pub mod transport;

pub use error::MailError;
pub use message::Mail;
pub use smtp::Smtp;
pub use transport::{Sendmail, Transport};
pub type Result<T> = std::result::Result<T, MailError>;
