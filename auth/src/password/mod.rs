pub mod argon2;
pub mod errors;

pub use argon2::HashPolicy;
pub use argon2::PasswordHasher;
pub use errors::PasswordError;
