//! Classifier layer - the remote vision model behind a trait
//!
//! This module provides:
//! - The `Classifier` trait and the `ClassifyError` taxonomy
//! - `OllamaClassifier`, the `/api/chat` backend
//! - Image downsizing and caching before upload
//! - Prompt construction and model-response parsing

pub mod client;
pub mod media;
pub mod ollama;
pub mod prompt;
pub mod response;

pub use client::{Classifier, ClassifyError};
pub use ollama::{OllamaClassifier, OllamaConfig};
pub use response::parse_analysis;
