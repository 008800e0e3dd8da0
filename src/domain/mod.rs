//! Domain types for floodnel
//!
//! This module contains all core domain types:
//! - PostRow: one social-media post with its classification state
//! - LossType / LossFields: the nine non-economic loss categories
//! - ScalarFields / Classification: everything a successful call writes
//! - Platform / ColumnMapping: how input columns map onto a PostRow

pub mod classification;
pub mod loss;
pub mod platform;
pub mod post;

pub use classification::{Classification, Demography, SENTIMENT_LABELS, ScalarFields, SceneType, SentimentScore};
pub use loss::{LossAssessment, LossFields, LossType};
pub use platform::{ColumnMapping, Platform};
pub use post::{ClassificationStatus, PostRow};
