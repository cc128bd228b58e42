pub mod config;
pub mod error;
pub mod message;
pub mod time;

pub use config::Config;
pub use error::*;
pub use message::*;
