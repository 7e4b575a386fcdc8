//! Delivery through a local sendmail-compatible program.

use crate::{Mail, MailError, Result, Smtp};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

pub const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";

/// Pipes composed messages into `sendmail -i -f <from> -- <to>...`.
#[derive(Debug, Clone)]
pub struct Sendmail {
    program: PathBuf,
    args: Vec<String>,
}

impl Sendmail {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the envelope arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub async fn send(&self, mail: &Mail) -> Result<()> {
        let message = mail.compose()?;
        self.send_raw(mail, &message).await
    }

    async fn send_raw(&self, mail: &Mail, message: &str) -> Result<()> {
        debug!(program = %self.program.display(), bytes = message.len(), "Handing message to sendmail");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("-i")
            .arg("-f")
            .arg(&mail.from)
            .arg("--")
            .args(&mail.to)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MailError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MailError::Transport(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        info!(to = %mail.to.join(", "), subject = %mail.subject, "Mail sent");
        Ok(())
    }
}

impl Default for Sendmail {
    fn default() -> Self {
        Self::new(DEFAULT_SENDMAIL)
    }
}

/// Where a composed mail is handed off.
#[derive(Debug, Clone)]
pub enum Transport {
    Sendmail(Sendmail),
    Smtp(Smtp),
}

impl Transport {
    pub async fn send(&self, mail: &Mail) -> Result<()> {
        match self {
            Transport::Sendmail(sendmail) => sendmail.send(mail).await,
            Transport::Smtp(smtp) => smtp.send(mail).await,
        }
    }
}

impl From<Sendmail> for Transport {
    fn from(sendmail: Sendmail) -> Self {
        Transport::Sendmail(sendmail)
    }
}

impl From<Smtp> for Transport {
    fn from(smtp: Smtp) -> Self {
        Transport::Smtp(smtp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn capture_to(path: &std::path::Path) -> Sendmail {
        Sendmail::new("/bin/sh").with_args(vec![
            "-c".to_string(),
            "cat > \"$0\"".to_string(),
            path.display().to_string(),
        ])
    }

    #[tokio::test]
    async fn test_send_pipes_message_to_program() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("captured.eml");

        let mail = Mail::new("a@example.com", vec!["b@example.com".into()], "Run report")
            .with_body("all good");
        capture_to(&out).send(&mail).await.unwrap();

        let captured = std::fs::read_to_string(&out).unwrap();
        assert!(captured.contains("Subject: Run report\r\n"));
        assert!(captured.contains("all good\r\n"));
    }

    #[tokio::test]
    async fn test_failing_program_is_transport_error() {
        let sendmail = Sendmail::new("/bin/sh").with_args(vec![
            "-c".to_string(),
            "cat > /dev/null; echo 'relay denied' >&2; exit 75".to_string(),
        ]);
        let mail = Mail::new("a@example.com", vec!["b@example.com".into()], "x");

        match sendmail.send(&mail).await {
            Err(MailError::Transport(msg)) => assert!(msg.contains("relay denied")),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let mail = Mail::new("a@example.com", vec!["b@example.com".into()], "x");
        let err = Sendmail::new("/nonexistent/sendmail").send(&mail).await.unwrap_err();
        assert!(matches!(err, MailError::Spawn { .. }));
    }
}
