pub mod smtp;
pub mod templates;
