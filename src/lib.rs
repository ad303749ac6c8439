pub mod config;
pub mod scanner;
pub mod delta;
pub mod transport;
pub mod remote;
pub mod error;
pub mod engine;
pub mod protocol;
pub mod dispatcher;
pub mod server;

pub use error::{DeltaBoxError, ErrorKind};
pub type Result<T> = std::result::Result<T, DeltaBoxError>;
