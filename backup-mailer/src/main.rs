//! Backup Mailer - send a mail, with or without an attachment.

use anyhow::Result;
use backup_mailer::{transport::DEFAULT_SENDMAIL, Mail, Sendmail, Smtp, Transport};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sender address
    #[arg(short, long)]
    from: String,

    /// Recipient address (repeatable)
    #[arg(short, long, required = true)]
    to: Vec<String>,

    /// Subject line
    #[arg(short, long)]
    subject: String,

    /// Message body; a literal `\n` is turned into a line break
    #[arg(short, long)]
    body: Option<String>,

    /// File to send as attachment
    #[arg(short = 'F', long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// sendmail-compatible program used when no SMTP host is given
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SENDMAIL)]
    sendmail: PathBuf,

    /// SMTP relay, `host` or `host:port`
    #[arg(long, value_name = "HOST")]
    smtphost: Option<String>,

    /// SMTP port (default 25, or 587 with --tls)
    #[arg(long, requires = "smtphost")]
    port: Option<u16>,

    /// SMTP login user
    #[arg(short, long, requires_all = ["smtphost", "pass"])]
    user: Option<String>,

    /// SMTP login password
    #[arg(short, long, env = "BACKUP_MAILER_PASSWORD", hide_env_values = true, requires = "user")]
    pass: Option<String>,

    /// Require STARTTLS on the SMTP connection
    #[arg(long, requires = "smtphost")]
    tls: bool,

    /// Print debug info
    #[arg(short, long)]
    verbose: bool,
}

fn transport(args: &Args) -> Transport {
    let Some(host) = &args.smtphost else {
        return Sendmail::new(&args.sendmail).into();
    };
    let mut smtp = Smtp::new(host).with_tls(args.tls);
    if let Some(port) = args.port {
        smtp = smtp.with_port(port);
    }
    if let (Some(user), Some(pass)) = (&args.user, &args.pass) {
        smtp = smtp.with_login(user, pass);
    }
    smtp.into()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut mail = Mail::new(args.from.clone(), args.to.clone(), args.subject.clone());
    if let Some(body) = &args.body {
        mail = mail.with_body(body.replace("\\n", "\n"));
    }
    if let Some(file) = &args.file {
        mail = mail.with_attachment(file);
    }

    let transport = transport(&args);
    tracing::debug!(?mail, ?transport, "Sending mail");
    transport.send(&mail).await?;
    tracing::info!("Message sent OK");

    Ok(())
}
