//! The structured judgment written to a row when classification succeeds.

use serde::{Deserialize, Serialize};

use super::loss::LossFields;

/// Demographic groups that are visibly present (never inferred identity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Demography {
    pub children: bool,
    pub elderly: bool,
    pub pregnant: bool,
    pub disabled_aid: bool,
    pub male: bool,
    pub female: bool,
}

impl Demography {
    pub const GROUPS: [&'static str; 6] = ["children", "elderly", "pregnant", "disabled_aid", "male", "female"];

    pub fn get(&self, group: &str) -> Option<bool> {
        match group {
            "children" => Some(self.children),
            "elderly" => Some(self.elderly),
            "pregnant" => Some(self.pregnant),
            "disabled_aid" => Some(self.disabled_aid),
            "male" => Some(self.male),
            "female" => Some(self.female),
            _ => None,
        }
    }

    pub fn set(&mut self, group: &str, value: bool) {
        match group {
            "children" => self.children = value,
            "elderly" => self.elderly = value,
            "pregnant" => self.pregnant = value,
            "disabled_aid" => self.disabled_aid = value,
            "male" => self.male = value,
            "female" => self.female = value,
            _ => {}
        }
    }
}

/// Camera viewpoint flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneType {
    pub aerial: bool,
    pub ground_outdoor: bool,
    pub indoor: bool,
}

impl SceneType {
    pub const KINDS: [&'static str; 3] = ["aerial", "ground_outdoor", "indoor"];

    pub fn get(&self, kind: &str) -> Option<bool> {
        match kind {
            "aerial" => Some(self.aerial),
            "ground_outdoor" => Some(self.ground_outdoor),
            "indoor" => Some(self.indoor),
            _ => None,
        }
    }

    pub fn set(&mut self, kind: &str, value: bool) {
        match kind {
            "aerial" => self.aerial = value,
            "ground_outdoor" => self.ground_outdoor = value,
            "indoor" => self.indoor = value,
            _ => {}
        }
    }
}

/// Sentiment labels scored for every post
pub const SENTIMENT_LABELS: [&str; 7] = ["fear", "hopelessness", "grief", "anger", "resilience", "neutral", "mixed"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    pub label: String,
    pub present: bool,
    pub confidence: f64,
}

/// Auxiliary scores written together with the loss fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarFields {
    /// 0 (no danger cues) to 5
    pub urgency_score: u8,
    pub water_depth_bin: String,
    pub crowd_size_bin: String,
    pub relief_visible: bool,
    pub relief_actor_type: String,
    pub damage_signs: Vec<String>,
    pub demography: Demography,
    pub scene: SceneType,
    pub context_area: Vec<String>,
    /// One entry per label in [`SENTIMENT_LABELS`], in that order
    pub sentiment: Vec<SentimentScore>,
    pub recovery_signals: bool,
    pub recovery_evidence: String,
}

impl Default for ScalarFields {
    fn default() -> Self {
        Self {
            urgency_score: 0,
            water_depth_bin: "unknown".to_string(),
            crowd_size_bin: "unknown".to_string(),
            relief_visible: false,
            relief_actor_type: "none".to_string(),
            damage_signs: vec!["none".to_string()],
            demography: Demography::default(),
            scene: SceneType::default(),
            context_area: vec!["unknown".to_string()],
            sentiment: SENTIMENT_LABELS
                .iter()
                .map(|label| SentimentScore {
                    label: label.to_string(),
                    present: false,
                    confidence: 0.0,
                })
                .collect(),
            recovery_signals: false,
            recovery_evidence: String::new(),
        }
    }
}

impl ScalarFields {
    pub fn sentiment_for(&self, label: &str) -> Option<&SentimentScore> {
        self.sentiment.iter().find(|s| s.label == label)
    }
}

/// Everything a successful classification writes, as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub loss: LossFields,
    pub scalars: ScalarFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scalars_cover_every_sentiment_label() {
        let scalars = ScalarFields::default();
        assert_eq!(scalars.sentiment.len(), SENTIMENT_LABELS.len());
        for label in SENTIMENT_LABELS {
            assert!(scalars.sentiment_for(label).is_some());
        }
    }

    #[test]
    fn test_demography_get_set() {
        let mut demo = Demography::default();
        demo.set("elderly", true);
        assert_eq!(demo.get("elderly"), Some(true));
        assert_eq!(demo.get("children"), Some(false));
        assert_eq!(demo.get("teenagers"), None);
    }

    #[test]
    fn test_scene_get_set() {
        let mut scene = SceneType::default();
        scene.set("aerial", true);
        assert_eq!(scene.get("aerial"), Some(true));
        assert_eq!(scene.get("indoor"), Some(false));
    }
}
