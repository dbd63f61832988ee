use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::domain::delivery::backoff;
use crate::domain::delivery::models::ActivationEmail;
use crate::domain::delivery::models::DeliveryOutcome;
use crate::domain::delivery::models::DeliveryPolicy;
use crate::domain::delivery::models::RunSummary;
use crate::domain::delivery::ports::InboundMessage;
use crate::domain::delivery::ports::Mailer;
use crate::domain::delivery::ports::MessageSource;
use crate::domain::delivery::ports::TemplateRenderer;

/// Pause after a broker error before polling again.
const SOURCE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Sends activation emails for "user created" events.
///
/// Messages are handled one at a time. Each is acknowledged only once its
/// outcome is known: delivered, given up after the attempt budget, or
/// rejected as undeliverable. Nothing is requeued.
pub struct DeliveryWorker<M, R>
where
    M: Mailer,
    R: TemplateRenderer,
{
    mailer: Arc<M>,
    renderer: Arc<R>,
    policy: DeliveryPolicy,
}

impl<M, R> DeliveryWorker<M, R>
where
    M: Mailer,
    R: TemplateRenderer,
{
    pub fn new(mailer: Arc<M>, renderer: Arc<R>, policy: DeliveryPolicy) -> Self {
        Self {
            mailer,
            renderer,
            policy,
        }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Consume `source` until it ends or `shutdown` flips to true.
    ///
    /// Shutdown is observed while waiting for the next message, never during
    /// a delivery.
    pub async fn run<S>(&self, source: &mut S, mut shutdown: watch::Receiver<bool>) -> RunSummary
    where
        S: MessageSource + ?Sized,
    {
        tracing::info!(
            max_attempts = self.policy.max_attempts,
            base_delay_ms = self.policy.base_delay.as_millis(),
            "Delivery worker started"
        );

        let mut summary = RunSummary::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                next = source.next() => next,
            };

            match next {
                Some(Ok(message)) => {
                    let outcome = self.process(message).await;
                    summary.record(&outcome);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Failed to receive message");
                    tokio::time::sleep(SOURCE_ERROR_BACKOFF).await;
                }
                None => {
                    tracing::warn!("Message source closed");
                    break;
                }
            }
        }

        tracing::info!(
            delivered = summary.delivered,
            gave_up = summary.gave_up,
            rejected = summary.rejected,
            "Delivery worker stopped"
        );

        summary
    }

    /// Drive one message to its terminal outcome, then acknowledge it.
    pub async fn process(&self, message: Box<dyn InboundMessage>) -> DeliveryOutcome {
        let message_id = message.id();

        let outcome = match message.decode() {
            Ok(email) => self.deliver(&email).await,
            Err(e) => {
                tracing::error!(message = %message_id, error = %e, "Dropping undeliverable message");
                DeliveryOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        };

        // A failed ack means the broker redelivers; duplicates are tolerated.
        if let Err(e) = message.ack().await {
            tracing::error!(message = %message_id, error = %e, "Failed to acknowledge message");
        }

        outcome
    }

    /// Render and send one activation email within the attempt budget.
    pub async fn deliver(&self, email: &ActivationEmail) -> DeliveryOutcome {
        let rendered = match self.renderer.render_activation(email) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::error!(recipient = %email.recipient, error = %e, "Failed to render activation email");
                return DeliveryOutcome::Rejected {
                    reason: e.to_string(),
                };
            }
        };

        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let sent = tokio::time::timeout(
                self.policy.send_timeout,
                self.mailer.send(&email.recipient, &rendered),
            )
            .await;

            match sent {
                Ok(Ok(())) => {
                    tracing::info!(recipient = %email.recipient, attempt, "Activation email sent");
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Ok(Err(e)) => {
                    tracing::warn!(recipient = %email.recipient, attempt, error = %e, "Activation email attempt failed");
                }
                Err(_) => {
                    tracing::warn!(
                        recipient = %email.recipient,
                        attempt,
                        timeout_ms = self.policy.send_timeout.as_millis(),
                        "Activation email attempt timed out"
                    );
                }
            }

            if attempt < max_attempts {
                let delay = backoff::full_jitter(
                    backoff::delay_bound(&self.policy, attempt),
                    &mut rand::thread_rng(),
                );
                tracing::debug!(
                    recipient = %email.recipient,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Delaying activation email"
                );
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(
            recipient = %email.recipient,
            attempts = max_attempts,
            "Giving up on activation email"
        );
        DeliveryOutcome::GaveUp {
            attempts: max_attempts,
        }
    }
}
