//! Delivery through an SMTP relay, with optional STARTTLS and login.

use crate::{Mail, MailError, Result};
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_SMTP_PORT: u16 = 25;
pub const DEFAULT_STARTTLS_PORT: u16 = 587;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Smtp {
    host: String,
    port: Option<u16>,
    login: Option<(String, String)>,
    use_tls: bool,
    timeout: Duration,
}

impl fmt::Debug for Smtp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Smtp")
            .field("host", &self.host)
            .field("port", &self.port())
            .field("user", &self.login.as_ref().map(|(user, _)| user))
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

impl Smtp {
    /// Relay at `host`, which may carry a port as `host:port`.
    pub fn new(host: impl AsRef<str>) -> Self {
        let host = host.as_ref().trim();
        let (host, port) = match host.rsplit_once(':') {
            Some((name, port)) if !name.is_empty() => match port.parse::<u16>() {
                Ok(port) => (name, Some(port)),
                Err(_) => (host, None),
            },
            _ => (host, None),
        };
        Self {
            host: host.to_string(),
            port,
            login: None,
            use_tls: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_login(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.login = Some((user.into(), password.into()));
        self
    }

    /// Require STARTTLS before authenticating.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        match (self.port, self.use_tls) {
            (Some(port), _) => port,
            (None, true) => DEFAULT_STARTTLS_PORT,
            (None, false) => DEFAULT_SMTP_PORT,
        }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = if self.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
        };
        builder = builder.port(self.port()).timeout(Some(self.timeout));
        if let Some((user, password)) = &self.login {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }
        Ok(builder.build())
    }

    pub async fn send(&self, mail: &Mail) -> Result<()> {
        let message = mail.compose()?;
        let envelope = envelope(mail)?;

        debug!(
            host = %self.host,
            port = self.port(),
            tls = self.use_tls,
            bytes = message.len(),
            "Handing message to SMTP relay"
        );
        let response = self.transport()?.send_raw(&envelope, message.as_bytes()).await?;
        debug!(code = %response.code(), "Relay accepted message");

        info!(to = %mail.to.join(", "), subject = %mail.subject, "Mail sent");
        Ok(())
    }
}

fn envelope(mail: &Mail) -> Result<Envelope> {
    let parse = |addr: &String| {
        addr.trim()
            .parse::<Address>()
            .map_err(|_| MailError::InvalidAddress(addr.clone()))
    };
    let from = parse(&mail.from)?;
    let to = mail.to.iter().map(parse).collect::<Result<Vec<_>>>()?;
    Envelope::new(Some(from), to).map_err(|e| MailError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Minimal relay that accepts one session and returns every line it read.
    async fn fake_relay() -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            let mut in_data = false;

            let _ = write.write_all(b"220 relay.test ESMTP\r\n").await;
            while let Ok(Some(line)) = lines.next_line().await {
                seen.push(line.clone());
                if in_data {
                    if line == "." {
                        in_data = false;
                        let _ = write.write_all(b"250 2.0.0 queued\r\n").await;
                    }
                    continue;
                }
                let verb = line
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_ascii_uppercase();
                let reply: &[u8] = match verb.as_str() {
                    "EHLO" => b"250-relay.test\r\n250 AUTH PLAIN LOGIN\r\n",
                    "AUTH" => b"235 2.7.0 Authentication successful\r\n",
                    "DATA" => {
                        in_data = true;
                        b"354 End data with <CR><LF>.<CR><LF>\r\n"
                    }
                    "QUIT" => {
                        let _ = write.write_all(b"221 2.0.0 Bye\r\n").await;
                        break;
                    }
                    _ => b"250 2.1.0 OK\r\n",
                };
                let _ = write.write_all(reply).await;
            }
            seen
        });
        (port, handle)
    }

    fn mail() -> Mail {
        Mail::new("backup@example.com", vec!["ops@example.com".into()], "Run report")
            .with_body("all good")
    }

    #[tokio::test]
    async fn test_send_logs_in_and_delivers() {
        let (port, relay) = fake_relay().await;

        Smtp::new("127.0.0.1")
            .with_port(port)
            .with_login("backup", "s3cret")
            .send(&mail())
            .await
            .unwrap();

        let seen = relay.await.unwrap();
        let auth = seen.iter().find(|l| l.starts_with("AUTH PLAIN")).unwrap();
        let token = auth.trim_start_matches("AUTH PLAIN").trim();
        assert_eq!(STANDARD.decode(token).unwrap(), b"\0backup\0s3cret");

        assert!(seen.iter().any(|l| l.contains("<backup@example.com>") && l.starts_with("MAIL FROM")));
        assert!(seen.iter().any(|l| l.contains("<ops@example.com>") && l.starts_with("RCPT TO")));
        assert!(seen.iter().any(|l| l == "Subject: Run report"));
        assert!(seen.iter().any(|l| l == "all good"));
    }

    #[tokio::test]
    async fn test_send_without_login_skips_auth() {
        let (port, relay) = fake_relay().await;

        Smtp::new(format!("127.0.0.1:{}", port)).send(&mail()).await.unwrap();

        let seen = relay.await.unwrap();
        assert!(!seen.iter().any(|l| l.starts_with("AUTH")));
        assert!(seen.iter().any(|l| l.starts_with("RCPT TO")));
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Smtp::new("127.0.0.1")
            .with_port(port)
            .with_timeout(Duration::from_secs(5))
            .send(&mail())
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Smtp(_)));
    }

    #[test]
    fn test_host_and_port() {
        let relay = Smtp::new("mail.example.com:2525");
        assert_eq!(relay.host(), "mail.example.com");
        assert_eq!(relay.port(), 2525);

        assert_eq!(Smtp::new("mail.example.com").port(), DEFAULT_SMTP_PORT);
        assert_eq!(Smtp::new("mail.example.com").with_tls(true).port(), DEFAULT_STARTTLS_PORT);
    }

    #[test]
    fn test_debug_hides_password() {
        let relay = Smtp::new("mail.example.com").with_login("backup", "s3cret");
        let shown = format!("{:?}", relay);
        assert!(shown.contains("backup"));
        assert!(!shown.contains("s3cret"));
    }
}
