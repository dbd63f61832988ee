pub mod consumer;
pub mod messages;

pub use consumer::KafkaMessageSource;
pub use messages::UserCreatedMessage;
