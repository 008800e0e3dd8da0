//! Floodnel - concurrent batch classification of flood-related social media posts
//!
//! Each post in an input table is sent to a vision-language model that judges
//! nine non-economic loss categories. Results are written back to a sibling
//! table with checkpointing, so interrupted runs resume where they stopped.

pub mod checkpoint;
pub mod domain;
pub mod error;
pub mod llm;
pub mod runner;
pub mod scheduler;
pub mod store;

pub use error::{FloodnelError, LoadError, Result};
