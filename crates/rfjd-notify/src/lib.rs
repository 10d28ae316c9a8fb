//! Digest delivery over SMTP, with a dry-run mode that only prints a preview.

use async_trait::async_trait;
use lettre::address::AddressError;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use rfjd_digest::Digest;
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "rfjd-notify";

pub const SMTP_HOST: &str = "smtp.gmail.com";
pub const SMTP_PORT: u16 = 465;

/// Sender/recipient used for dry-run previews when no account is configured.
pub const PLACEHOLDER_MAILBOX: &str = "rfjd@localhost";

const PREVIEW_CHARS: usize = 400;

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub dry_run: bool,
    /// Write the dry-run preview to stderr, keeping stdout for structured output.
    pub preview_to_stderr: bool,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: SMTP_HOST.to_string(),
            smtp_port: SMTP_PORT,
            username: None,
            password: None,
            dry_run: true,
            preview_to_stderr: false,
        }
    }
}

impl MailConfig {
    fn credentials(&self) -> Option<(&str, &str)> {
        let user = self
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())?;
        let pass = self.password.as_deref().filter(|p| !p.is_empty())?;
        Some((user, pass))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    DryRun { preview: String },
    Sent { recipient: String },
}

impl Delivery {
    pub fn mode(&self) -> &'static str {
        match self {
            Delivery::DryRun { .. } => "dry-run",
            Delivery::Sent { .. } => "smtp",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("EMAIL_USER or EMAIL_PASS missing; set both or enable DRY_RUN")]
    MissingCredentials,
    #[error("invalid mailbox `{address}`: {error}")]
    InvalidMailbox {
        address: String,
        #[source]
        error: AddressError,
    },
    #[error("building email message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp delivery failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

impl NotifyError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, NotifyError::MissingCredentials | NotifyError::InvalidMailbox { .. })
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, digest: &Digest) -> Result<Delivery, NotifyError>;
}

/// Sends the digest from the configured account to itself.
#[derive(Debug, Clone)]
pub struct EmailNotifier {
    config: MailConfig,
}

impl EmailNotifier {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    pub fn compose(&self, digest: &Digest) -> Result<Message, NotifyError> {
        let address = self
            .config
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(PLACEHOLDER_MAILBOX);
        let mailbox: Mailbox = address.parse().map_err(|error| NotifyError::InvalidMailbox {
            address: address.to_string(),
            error,
        })?;

        Ok(Message::builder()
            .from(mailbox.clone())
            .to(mailbox)
            .subject(digest.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(digest.html.clone())?)
    }
}

pub fn preview(message: &Message) -> String {
    let formatted = message.formatted();
    let text = String::from_utf8_lossy(&formatted);
    let head = text.chars().take(PREVIEW_CHARS).collect::<String>();
    format!("{head}...")
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, digest: &Digest) -> Result<Delivery, NotifyError> {
        let message = self.compose(digest)?;

        if self.config.dry_run {
            let preview = preview(&message);
            let report = format!("\n[DRY RUN] Email prepared but not sent.\n{preview}\n");
            if self.config.preview_to_stderr {
                eprintln!("{report}");
            } else {
                println!("{report}");
            }
            return Ok(Delivery::DryRun { preview });
        }

        let (user, pass) = self.config.credentials().ok_or(NotifyError::MissingCredentials)?;
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(user.to_string(), pass.to_string()))
            .build();

        info!(
            host = %self.config.smtp_host,
            port = self.config.smtp_port,
            jobs = digest.job_count,
            "sending digest"
        );
        mailer.send(message).await?;
        Ok(Delivery::Sent {
            recipient: user.to_string(),
        })
    }
}
