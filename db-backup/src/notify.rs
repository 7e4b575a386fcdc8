//! Mail notification of the run summary.

use crate::config::NotifyConfig;
use crate::executor::report::RunReport;
use backup_mailer::{Mail, MailError, Sendmail, Smtp, Transport};
use tracing::{debug, warn};

/// Name of the machine running the backup, for the mail subject and sender.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Compose the notification for `report`, or `None` when notification is
/// disabled or has no recipients.
pub fn build_mail(config: &NotifyConfig, report: &RunReport, hostname: &str) -> Option<Mail> {
    if !config.enabled || config.to.is_empty() {
        return None;
    }

    let from = config
        .from
        .clone()
        .unwrap_or_else(|| format!("backup@{}", hostname));
    let subject = format!("{} {} on {}", config.subject_prefix, report.outcome.label(), hostname);
    let mut mail = Mail::new(from, config.to.clone(), subject.trim_start()).with_body(report.to_string());

    if config.attach_archive {
        if let Some(archive) = &report.archive {
            mail = mail.with_attachment(&archive.path);
        }
    }
    Some(mail)
}

/// SMTP relay when `smtp_host` is set, the sendmail program otherwise.
pub fn transport(config: &NotifyConfig) -> Transport {
    let Some(host) = config.smtp_host.as_deref().filter(|h| !h.trim().is_empty()) else {
        return Sendmail::new(&config.program).into();
    };

    let mut smtp = Smtp::new(host).with_tls(config.use_tls);
    if let Some(port) = config.smtp_port {
        smtp = smtp.with_port(port);
    }
    match (&config.smtp_username, &config.smtp_password) {
        (Some(user), Some(password)) => smtp = smtp.with_login(user, password),
        (None, None) => {}
        _ => warn!("SMTP login needs both smtp_username and smtp_password, sending without login"),
    }
    smtp.into()
}

/// Send the notification through the configured transport.
pub async fn send(config: &NotifyConfig, report: &RunReport, hostname: &str) -> Result<(), MailError> {
    let Some(mail) = build_mail(config, report, hostname) else {
        debug!("Notification disabled");
        return Ok(());
    };

    transport(config).send(&mail).await
}
