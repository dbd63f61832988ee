use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use mail_service::domain::delivery::errors::MailerError;
use mail_service::domain::delivery::errors::PayloadError;
use mail_service::domain::delivery::errors::SourceError;
use mail_service::domain::delivery::models::ActivationEmail;
use mail_service::domain::delivery::models::DeliveryPolicy;
use mail_service::domain::delivery::models::Recipient;
use mail_service::domain::delivery::models::RenderedEmail;
use mail_service::domain::delivery::ports::InboundMessage;
use mail_service::domain::delivery::ports::Mailer;
use mail_service::domain::delivery::ports::MessageSource;
use mail_service::inbound::events::UserCreatedMessage;
use tokio::sync::mpsc;

pub const TOKEN: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub fn fast_policy() -> DeliveryPolicy {
    DeliveryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        send_timeout: Duration::from_millis(500),
    }
}

pub fn payload(email: &str, token: &str) -> Vec<u8> {
    format!(r#"{{"Email":"{email}","Token":"{token}"}}"#).into_bytes()
}

/// Raw broker payload decoded the same way the Kafka adapter decodes it.
pub struct RawMessage {
    offset: usize,
    payload: Vec<u8>,
    acked: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl InboundMessage for RawMessage {
    fn id(&self) -> String {
        format!("test/0@{}", self.offset)
    }

    fn decode(&self) -> Result<ActivationEmail, PayloadError> {
        UserCreatedMessage::decode(&self.payload)?.try_into()
    }

    async fn ack(self: Box<Self>) -> Result<(), SourceError> {
        self.acked.lock().unwrap().push(self.offset);
        Ok(())
    }
}

/// In-process queue standing in for the broker.
pub struct TestQueue {
    sender: Option<mpsc::UnboundedSender<Box<dyn InboundMessage>>>,
    next_offset: usize,
    pub acked: Arc<Mutex<Vec<usize>>>,
}

pub struct ChannelSource(mpsc::UnboundedReceiver<Box<dyn InboundMessage>>);

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next(&mut self) -> Option<Result<Box<dyn InboundMessage>, SourceError>> {
        self.0.recv().await.map(Ok)
    }
}

impl TestQueue {
    pub fn new() -> (Self, ChannelSource) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
                next_offset: 0,
                acked: Arc::new(Mutex::new(Vec::new())),
            },
            ChannelSource(receiver),
        )
    }

    pub fn publish(&mut self, payload: Vec<u8>) {
        let message = RawMessage {
            offset: self.next_offset,
            payload,
            acked: Arc::clone(&self.acked),
        };
        self.next_offset += 1;

        if let Some(sender) = &self.sender {
            sender.send(Box::new(message)).unwrap();
        }
    }

    /// Close the queue so the worker stops after draining it.
    pub fn close(&mut self) {
        self.sender.take();
    }

    pub fn acked(&self) -> Vec<usize> {
        self.acked.lock().unwrap().clone()
    }
}

/// Mailer failing a fixed number of times per recipient before succeeding.
#[derive(Default)]
pub struct FlakyMailer {
    failures_before_success: usize,
    attempts: AtomicUsize,
    sent: Mutex<Vec<(String, RenderedEmail)>>,
}

impl FlakyMailer {
    pub fn failing(failures_before_success: usize) -> Self {
        Self {
            failures_before_success,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, RenderedEmail)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for FlakyMailer {
    async fn send(&self, recipient: &Recipient, email: &RenderedEmail) -> Result<(), MailerError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures_before_success {
            return Err(MailerError::TransportFailed("connection refused".to_string()));
        }

        self.sent
            .lock()
            .unwrap()
            .push((recipient.as_str().to_string(), email.clone()));
        Ok(())
    }
}
