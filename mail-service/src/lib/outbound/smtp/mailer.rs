use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::message::MultiPart;
use lettre::message::SinglePart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::AsyncSmtpTransport;
use lettre::AsyncTransport;
use lettre::Message;
use lettre::Tokio1Executor;

use crate::config::SmtpConfig;
use crate::domain::delivery::errors::MailerError;
use crate::domain::delivery::models::Recipient;
use crate::domain::delivery::models::RenderedEmail;
use crate::domain::delivery::ports::Mailer;

/// SMTP transport via lettre.
///
/// With an empty host the mailer runs in no-op mode and only logs.
pub struct SmtpMailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    sender: Mailbox,
}

impl SmtpMailer {
    /// # Errors
    /// * `InvalidMailbox` - `sender` is not a valid mailbox
    /// * `BuildFailed` - The relay could not be configured
    pub fn new(config: &SmtpConfig) -> Result<Self, MailerError> {
        let sender = config
            .sender
            .parse::<Mailbox>()
            .map_err(|e| MailerError::InvalidMailbox(format!("{}: {}", config.sender, e)))?;

        let transport = if config.host.trim().is_empty() {
            tracing::warn!("SMTP host not configured; mailer running in no-op mode");
            None
        } else {
            let builder = if config.use_starttls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            }
            .map_err(|e| MailerError::BuildFailed(e.to_string()))?
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

            let builder = match (&config.username, &config.password) {
                (Some(username), Some(password)) => {
                    builder.credentials(Credentials::new(username.clone(), password.clone()))
                }
                _ => builder,
            };

            Some(builder.build())
        };

        Ok(Self { transport, sender })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    fn build_message(
        &self,
        recipient: &Recipient,
        email: &RenderedEmail,
    ) -> Result<Message, MailerError> {
        let to = recipient
            .as_str()
            .parse::<Mailbox>()
            .map_err(|e| MailerError::InvalidMailbox(format!("{}: {}", recipient, e)))?;

        Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(email.subject.clone())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.plain_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.clone()),
                    ),
            )
            .map_err(|e| MailerError::BuildFailed(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, recipient: &Recipient, email: &RenderedEmail) -> Result<(), MailerError> {
        let message = self.build_message(recipient, email)?;

        match &self.transport {
            Some(transport) => {
                transport
                    .send(message)
                    .await
                    .map_err(|e| MailerError::TransportFailed(e.to_string()))?;
                tracing::debug!(recipient = %recipient, subject = %email.subject, "Email handed to SMTP relay");
            }
            None => {
                tracing::info!(
                    recipient = %recipient,
                    subject = %email.subject,
                    "Mailer in no-op mode; skipping send"
                );
            }
        }

        Ok(())
    }
}
