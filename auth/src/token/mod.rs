mod encoding;
pub mod errors;
pub mod secret;

pub use errors::TokenError;
pub use secret::PlainToken;
pub use secret::TokenHash;
pub use secret::TOKEN_ENTROPY_BYTES;
pub use secret::TOKEN_LENGTH;
