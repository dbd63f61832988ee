pub mod session;

pub use session::InMemorySessionCache;
