pub mod mailer;

pub use mailer::SmtpMailer;
