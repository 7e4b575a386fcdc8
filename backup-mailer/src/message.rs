//! RFC 5322 message composition.
//!
//! Messages without an attachment are sent as a single `text/plain` part.
//! With an attachment the message becomes `multipart/mixed`: the body first,
//! then the file as a base64 `application/octet-stream` part.

use crate::{MailError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};

/// Maximum encoded line length allowed by RFC 2045.
const BASE64_LINE: usize = 76;

/// A mail ready to be composed and delivered.
#[derive(Debug, Clone)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: Option<String>,
    pub attachment: Option<PathBuf>,
}

impl Mail {
    pub fn new(from: impl Into<String>, to: Vec<String>, subject: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to,
            subject: subject.into(),
            body: None,
            attachment: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment = Some(path.into());
        self
    }

    /// Reject empty recipient lists, malformed addresses and header injection.
    pub fn validate(&self) -> Result<()> {
        check_address(&self.from)?;
        if self.to.is_empty() {
            return Err(MailError::InvalidAddress(String::new()));
        }
        for addr in &self.to {
            check_address(addr)?;
        }
        if self.subject.contains(['\r', '\n']) {
            return Err(MailError::InvalidHeader { name: "Subject" });
        }
        Ok(())
    }

    /// Render the full message with the current local time and a random boundary.
    pub fn compose(&self) -> Result<String> {
        let date = chrono::Local::now().to_rfc2822();
        let boundary = format!("=_backup_{}", uuid::Uuid::new_v4().simple());
        self.compose_with(&date, &boundary)
    }

    pub(crate) fn compose_with(&self, date: &str, boundary: &str) -> Result<String> {
        self.validate()?;

        let mut out = String::new();
        push_line(&mut out, &format!("From: {}", self.from));
        push_line(&mut out, &format!("To: {}", self.to.join(", ")));
        push_line(&mut out, &format!("Subject: {}", encode_header(&self.subject)));
        push_line(&mut out, &format!("Date: {}", date));
        push_line(&mut out, "MIME-Version: 1.0");

        let body = self.body.as_deref().unwrap_or("");

        let Some(path) = &self.attachment else {
            push_line(&mut out, "Content-Type: text/plain; charset=utf-8");
            push_line(&mut out, "Content-Transfer-Encoding: 8bit");
            push_line(&mut out, "");
            push_body(&mut out, body);
            return Ok(out);
        };

        let data = std::fs::read(path).map_err(|source| MailError::Attachment {
            path: path.clone(),
            source,
        })?;

        push_line(
            &mut out,
            &format!("Content-Type: multipart/mixed; boundary=\"{}\"", boundary),
        );
        push_line(&mut out, "");

        if self.body.is_some() {
            push_line(&mut out, &format!("--{}", boundary));
            push_line(&mut out, "Content-Type: text/plain; charset=utf-8");
            push_line(&mut out, "Content-Transfer-Encoding: 8bit");
            push_line(&mut out, "");
            push_body(&mut out, body);
        }

        push_line(&mut out, &format!("--{}", boundary));
        push_line(&mut out, "Content-Type: application/octet-stream");
        push_line(&mut out, "Content-Transfer-Encoding: base64");
        push_line(
            &mut out,
            &format!(
                "Content-Disposition: attachment; filename=\"{}\"",
                attachment_name(path)
            ),
        );
        push_line(&mut out, "");

        let encoded = STANDARD.encode(&data);
        for chunk in encoded.as_bytes().chunks(BASE64_LINE) {
            // base64 output is pure ASCII
            push_line(&mut out, std::str::from_utf8(chunk).unwrap_or_default());
        }

        push_line(&mut out, &format!("--{}--", boundary));
        Ok(out)
    }
}

fn check_address(addr: &str) -> Result<()> {
    let trimmed = addr.trim();
    let valid = !trimmed.is_empty()
        && trimmed.contains('@')
        && !trimmed.contains(['\r', '\n', ',', ' ']);
    if valid {
        Ok(())
    } else {
        Err(MailError::InvalidAddress(addr.to_string()))
    }
}

/// RFC 2047 encoded-word for non-ASCII subjects.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

fn attachment_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().replace('"', "_"))
        .unwrap_or_else(|| "attachment".to_string())
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push_str("\r\n");
}

fn push_body(out: &mut String, body: &str) {
    for line in body.lines() {
        push_line(out, line);
    }
}
