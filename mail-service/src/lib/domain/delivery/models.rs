use std::fmt;
use std::time::Duration;

use auth::PlainToken;

use crate::domain::delivery::errors::RecipientError;

/// Validated address an activation email is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient(String);

impl Recipient {
    /// # Errors
    /// * `Empty` - Blank address
    /// * `InvalidFormat` - Not a syntactically valid address
    pub fn new(address: String) -> Result<Self, RecipientError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(RecipientError::Empty);
        }

        if !email_address::EmailAddress::is_valid(trimmed) {
            return Err(RecipientError::InvalidFormat(trimmed.to_string()));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoded "user created" event: who to mail and which token to link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationEmail {
    pub recipient: Recipient,
    pub token: PlainToken,
}

/// Subject and bodies ready to hand to a [`Mailer`](super::ports::Mailer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub plain_body: String,
    pub html_body: String,
}

/// Attempt budget and pacing of a single delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub send_timeout: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// Terminal state of one message. The message is acknowledged in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    GaveUp { attempts: u32 },
    Rejected { reason: String },
}

/// Outcome counts of a finished worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub delivered: u64,
    pub gave_up: u64,
    pub rejected: u64,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered { .. } => self.delivered += 1,
            DeliveryOutcome::GaveUp { .. } => self.gave_up += 1,
            DeliveryOutcome::Rejected { .. } => self.rejected += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.delivered + self.gave_up + self.rejected
    }
}
