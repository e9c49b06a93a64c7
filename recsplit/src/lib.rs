#![doc = include_str!("../README.md")]

pub mod error;
pub use error::{Error, Result};

pub mod utils;
pub mod stats;
pub mod bit_buffer;
pub use bit_buffer::{BitBuffer, BitReader, fold, unfold};

pub mod universal_hash;
pub use universal_hash::{BuildSeededHasher, Seedable, BuildSip, BuildDefaultSeededHasher, UniversalHash};
#[cfg(feature = "wyhash")] pub use universal_hash::BuildWyHash;

pub mod settings;
pub use settings::{Settings, Split};

mod evaluator;
pub use evaluator::RecSplitEvaluator;

mod builder;
pub use builder::RecSplitBuilder;

pub use dyn_size_of::GetSize;
