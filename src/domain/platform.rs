//! Source platforms and the CSV columns each one is read from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where the posts in an input table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Tiktok,
    Twitter,
}

impl Platform {
    /// Default column layout produced by the scraping/download collaborators
    pub fn default_columns(&self) -> ColumnMapping {
        match self {
            Platform::Tiktok => ColumnMapping {
                id: "id".to_string(),
                text: vec!["title".to_string()],
                hashtags: Some("hashtags".to_string()),
                media: vec!["key_frames".to_string()],
            },
            Platform::Twitter => ColumnMapping {
                id: "tweet_id".to_string(),
                text: vec!["text".to_string()],
                hashtags: None,
                media: vec!["all_images".to_string()],
            },
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Tiktok => write!(f, "tiktok"),
            Platform::Twitter => write!(f, "twitter"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tiktok" => Ok(Platform::Tiktok),
            "twitter" | "x" => Ok(Platform::Twitter),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// Which input columns feed a [`crate::domain::PostRow`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Post id column (required)
    pub id: String,
    /// Text columns joined with newlines (required)
    pub text: Vec<String>,
    /// Comma separated hashtag column, appended to the text as `#tag` words
    #[serde(default)]
    pub hashtags: Option<String>,
    /// Media path columns; a cell is either one path or a JSON array of paths
    #[serde(default)]
    pub media: Vec<String>,
}

impl ColumnMapping {
    /// Columns whose absence makes the input unusable
    pub fn required(&self) -> Vec<&str> {
        std::iter::once(self.id.as_str())
            .chain(self.text.iter().map(String::as_str))
            .collect()
    }
}
