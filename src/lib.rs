#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod log;
pub mod park;
pub mod rng;
pub mod sim;

pub use config::Config;
pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
