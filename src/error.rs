use thiserror::Error;

use crate::config::ConfigError;
use crate::log::LogError;

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the module errors that can
/// actually abort a run. Everything past initialization blocks or clamps
/// instead of failing.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Log(#[from] LogError),
}
