use async_trait::async_trait;

use crate::domain::delivery::errors::MailerError;
use crate::domain::delivery::errors::PayloadError;
use crate::domain::delivery::errors::SourceError;
use crate::domain::delivery::errors::TemplateError;
use crate::domain::delivery::models::ActivationEmail;
use crate::domain::delivery::models::Recipient;
use crate::domain::delivery::models::RenderedEmail;

/// Outgoing mail transport.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    /// Send one rendered email. Any error is treated as retryable.
    async fn send(&self, recipient: &Recipient, email: &RenderedEmail) -> Result<(), MailerError>;
}

/// Turns an activation request into subject and bodies.
pub trait TemplateRenderer: Send + Sync + 'static {
    fn render_activation(&self, email: &ActivationEmail) -> Result<RenderedEmail, TemplateError>;
}

/// A received message awaiting its terminal outcome.
#[async_trait]
pub trait InboundMessage: Send {
    /// Broker-side position, for logs.
    fn id(&self) -> String;

    /// Decode the payload.
    ///
    /// # Errors
    /// Every `PayloadError` is permanent; the message must not be retried.
    fn decode(&self) -> Result<ActivationEmail, PayloadError>;

    /// Remove the message from the queue.
    async fn ack(self: Box<Self>) -> Result<(), SourceError>;
}

/// Durable subscription to "user created" events.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next message. `None` means the subscription has ended.
    async fn next(&mut self) -> Option<Result<Box<dyn InboundMessage>, SourceError>>;
}
