//! Non-economic loss categories and their per-post assessments.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The nine fixed non-economic loss categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    Displacement,
    EducationDisruption,
    HealthTrauma,
    SocialTiesLoss,
    CulturalRitualDisruption,
    CaregivingBurden,
    WaterFoodInsecurity,
    InfrastructureAccess,
    PsychosocialDistress,
}

impl LossType {
    pub const COUNT: usize = 9;

    /// All loss types in canonical (column) order
    pub const ALL: [LossType; LossType::COUNT] = [
        LossType::Displacement,
        LossType::EducationDisruption,
        LossType::HealthTrauma,
        LossType::SocialTiesLoss,
        LossType::CulturalRitualDisruption,
        LossType::CaregivingBurden,
        LossType::WaterFoodInsecurity,
        LossType::InfrastructureAccess,
        LossType::PsychosocialDistress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LossType::Displacement => "displacement",
            LossType::EducationDisruption => "education_disruption",
            LossType::HealthTrauma => "health_trauma",
            LossType::SocialTiesLoss => "social_ties_loss",
            LossType::CulturalRitualDisruption => "cultural_ritual_disruption",
            LossType::CaregivingBurden => "caregiving_burden",
            LossType::WaterFoodInsecurity => "water_food_insecurity",
            LossType::InfrastructureAccess => "infrastructure_access",
            LossType::PsychosocialDistress => "psychosocial_distress",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for LossType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LossType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LossType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown loss type: {}", s))
    }
}

/// Presence judgment for one loss type on one post
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LossAssessment {
    /// `None` means the service could not tell
    pub present: Option<bool>,
    /// Clamped to `[0, 1]` on construction
    pub confidence: Option<f64>,
}

impl LossAssessment {
    pub fn new(present: Option<bool>, confidence: Option<f64>) -> Self {
        Self {
            present,
            confidence: confidence.filter(|c| c.is_finite()).map(|c| c.clamp(0.0, 1.0)),
        }
    }
}

/// One assessment for every loss type. Cannot be built partially.
#[derive(Debug, Clone, PartialEq)]
pub struct LossFields {
    entries: [LossAssessment; LossType::COUNT],
}

impl LossFields {
    /// Build from `(type, assessment)` pairs; fails naming the first missing type.
    pub fn from_entries<I>(entries: I) -> Result<Self, LossType>
    where
        I: IntoIterator<Item = (LossType, LossAssessment)>,
    {
        let mut slots: [Option<LossAssessment>; LossType::COUNT] = [None; LossType::COUNT];
        for (loss_type, assessment) in entries {
            slots[loss_type.index()] = Some(assessment);
        }

        let mut filled = [LossAssessment::default(); LossType::COUNT];
        for loss_type in LossType::ALL {
            filled[loss_type.index()] = slots[loss_type.index()].ok_or(loss_type)?;
        }
        Ok(Self { entries: filled })
    }

    pub fn get(&self, loss_type: LossType) -> &LossAssessment {
        &self.entries[loss_type.index()]
    }

    /// Iterate in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (LossType, &LossAssessment)> {
        LossType::ALL.iter().map(move |t| (*t, &self.entries[t.index()]))
    }

    /// Loss types judged present
    pub fn present_types(&self) -> Vec<LossType> {
        self.iter()
            .filter(|(_, a)| a.present == Some(true))
            .map(|(t, _)| t)
            .collect()
    }
}
