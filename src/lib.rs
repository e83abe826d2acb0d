pub mod config;
pub mod error;
pub mod filter;
pub mod frame;
pub mod pool;
pub mod resp;
pub mod router;
pub mod session;
pub mod slot;

#[cfg(test)]
mod tests;

pub use error::ProxyError;
pub use frame::Framer;
pub use resp::{Reply, RespError};
pub use router::Router;
pub use session::Session;

/// A specialized `Result` type for top-level proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
