//! Error type shared by all RecSplit components.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The value cannot be represented by the requested code.
    #[error("invalid code input: {0}")]
    InvalidCodeInput(&'static str),

    /// No seed splitting the node of `size` keys was found within `trials` attempts.
    /// Almost always caused by duplicate keys.
    #[error("seed search exhausted in bucket {bucket} for a node of {size} keys after {trials} trials (duplicate keys?)")]
    SeedSearchExhausted { bucket: usize, size: usize, trials: u64 },

    #[error("invalid settings: {0}")]
    InvalidSettings(&'static str),

    /// The artifact is shorter than its own header declares.
    #[error("truncated artifact: {needed} bits needed, only {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
