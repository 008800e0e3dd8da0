//! Output column layout and cell encoding.
//!
//! Output columns are appended after the passthrough columns. Booleans are
//! written as `true`/`false` (an unknown tri-state is an empty cell), lists as
//! JSON arrays. Decoding is lenient about case so files touched by other tools
//! (`True`/`False`) still load.

use chrono::{DateTime, Utc};

use crate::domain::{
    Classification, ClassificationStatus, Demography, LossAssessment, LossFields, LossType, PostRow, SENTIMENT_LABELS,
    ScalarFields, SceneType, SentimentScore,
};

pub const STATUS: &str = "classification_status";
pub const ATTEMPTS: &str = "classification_attempts";
pub const ERROR: &str = "classification_error";
pub const CLASSIFIED_AT: &str = "classified_at";

pub const URGENCY: &str = "urgency_score";
pub const WATER_DEPTH: &str = "water_depth_bin";
pub const CROWD_SIZE: &str = "crowd_size_bin";
pub const RELIEF_VISIBLE: &str = "relief_visible";
pub const RELIEF_ACTOR: &str = "relief_actor_type";
pub const DAMAGE_SIGNS: &str = "damage_signs";
pub const CONTEXT_AREA: &str = "context_area";
pub const RECOVERY_SIGNALS: &str = "recovery_signals";
pub const RECOVERY_EVIDENCE: &str = "recovery_evidence";

pub fn loss_present(loss_type: LossType) -> String {
    format!("loss_{}_present", loss_type)
}

pub fn loss_confidence(loss_type: LossType) -> String {
    format!("loss_{}_confidence", loss_type)
}

fn demo(group: &str) -> String {
    format!("demo_{}", group)
}

fn scene(kind: &str) -> String {
    format!("scene_{}", kind)
}

fn sentiment_present(label: &str) -> String {
    format!("sentiment_{}_present", label)
}

fn sentiment_confidence(label: &str) -> String {
    format!("sentiment_{}_confidence", label)
}

/// All output column names, in write order
pub fn output_headers() -> Vec<String> {
    let mut headers: Vec<String> = [STATUS, ATTEMPTS, ERROR, CLASSIFIED_AT]
        .iter()
        .map(|s| s.to_string())
        .collect();

    for loss_type in LossType::ALL {
        headers.push(loss_present(loss_type));
        headers.push(loss_confidence(loss_type));
    }

    headers.extend(
        [URGENCY, WATER_DEPTH, CROWD_SIZE, RELIEF_VISIBLE, RELIEF_ACTOR, DAMAGE_SIGNS]
            .iter()
            .map(|s| s.to_string()),
    );
    headers.extend(Demography::GROUPS.iter().map(|g| demo(g)));
    headers.extend(SceneType::KINDS.iter().map(|k| scene(k)));
    headers.push(CONTEXT_AREA.to_string());
    for label in SENTIMENT_LABELS {
        headers.push(sentiment_present(label));
        headers.push(sentiment_confidence(label));
    }
    headers.push(RECOVERY_SIGNALS.to_string());
    headers.push(RECOVERY_EVIDENCE.to_string());
    headers
}

/// Encode a row's output cells, aligned with [`output_headers`]
pub fn encode(row: &PostRow) -> Vec<String> {
    let mut cells = vec![
        row.status.to_string(),
        row.attempts.to_string(),
        row.error_detail.clone().unwrap_or_default(),
        row.classified_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
    ];

    let Some(classification) = &row.classification else {
        cells.resize(output_headers().len(), String::new());
        return cells;
    };

    for (_, assessment) in classification.loss.iter() {
        cells.push(encode_tri_state(assessment.present));
        cells.push(assessment.confidence.map(|c| c.to_string()).unwrap_or_default());
    }

    let s = &classification.scalars;
    cells.push(s.urgency_score.to_string());
    cells.push(s.water_depth_bin.clone());
    cells.push(s.crowd_size_bin.clone());
    cells.push(s.relief_visible.to_string());
    cells.push(s.relief_actor_type.clone());
    cells.push(encode_list(&s.damage_signs));
    for group in Demography::GROUPS {
        cells.push(s.demography.get(group).unwrap_or(false).to_string());
    }
    for kind in SceneType::KINDS {
        cells.push(s.scene.get(kind).unwrap_or(false).to_string());
    }
    cells.push(encode_list(&s.context_area));
    for label in SENTIMENT_LABELS {
        let score = s.sentiment_for(label);
        cells.push(score.map(|x| x.present).unwrap_or(false).to_string());
        cells.push(score.map(|x| x.confidence).unwrap_or(0.0).to_string());
    }
    cells.push(s.recovery_signals.to_string());
    cells.push(s.recovery_evidence.clone());
    cells
}

/// Classification state recovered from a previously written output
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedState {
    pub status: ClassificationStatus,
    pub attempts: u32,
    pub error_detail: Option<String>,
    pub classified_at: Option<DateTime<Utc>>,
    pub classification: Option<Classification>,
}

/// Decode the output cells of one record. `cell` returns `None` when the
/// column is absent from the file.
pub fn decode<'a, F>(cell: F) -> Result<DecodedState, String>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let status: ClassificationStatus = cell(STATUS).unwrap_or("").parse()?;
    let attempts = match cell(ATTEMPTS).map(str::trim) {
        None | Some("") => 0,
        Some(v) => v.parse().map_err(|_| format!("invalid {}: {}", ATTEMPTS, v))?,
    };
    let error_detail = cell(ERROR).map(str::to_string).filter(|s| !s.is_empty());
    let classified_at = cell(CLASSIFIED_AT)
        .filter(|s| !s.trim().is_empty())
        .map(|s| DateTime::parse_from_rfc3339(s.trim()).map(|t| t.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| format!("invalid {}: {}", CLASSIFIED_AT, e))?;

    let classification = if status == ClassificationStatus::Done {
        Some(decode_classification(&cell)?)
    } else {
        None
    };

    Ok(DecodedState {
        status,
        attempts,
        error_detail,
        classified_at,
        classification,
    })
}

fn decode_classification<'a, F>(cell: &F) -> Result<Classification, String>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let required = |name: &str| cell(name).ok_or_else(|| format!("missing column {}", name));

    let mut entries = Vec::with_capacity(LossType::COUNT);
    for loss_type in LossType::ALL {
        let present = decode_tri_state(required(&loss_present(loss_type))?)?;
        let confidence = decode_optional_f64(required(&loss_confidence(loss_type))?)?;
        entries.push((loss_type, LossAssessment::new(present, confidence)));
    }
    let loss = LossFields::from_entries(entries).map_err(|t| format!("missing loss type {}", t))?;

    let defaults = ScalarFields::default();
    let text = |name: &str, fallback: &str| -> String {
        cell(name)
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    };
    let flag = |name: &str| -> Result<bool, String> { Ok(decode_tri_state(cell(name).unwrap_or(""))?.unwrap_or(false)) };

    let mut demography = Demography::default();
    for group in Demography::GROUPS {
        demography.set(group, flag(&demo(group))?);
    }
    let mut scene_type = SceneType::default();
    for kind in SceneType::KINDS {
        scene_type.set(kind, flag(&scene(kind))?);
    }

    let mut sentiment = Vec::with_capacity(SENTIMENT_LABELS.len());
    for label in SENTIMENT_LABELS {
        sentiment.push(SentimentScore {
            label: label.to_string(),
            present: flag(&sentiment_present(label))?,
            confidence: decode_optional_f64(cell(&sentiment_confidence(label)).unwrap_or(""))?.unwrap_or(0.0),
        });
    }

    let scalars = ScalarFields {
        urgency_score: decode_urgency(required(URGENCY)?)?,
        water_depth_bin: text(WATER_DEPTH, &defaults.water_depth_bin),
        crowd_size_bin: text(CROWD_SIZE, &defaults.crowd_size_bin),
        relief_visible: flag(RELIEF_VISIBLE)?,
        relief_actor_type: text(RELIEF_ACTOR, &defaults.relief_actor_type),
        damage_signs: decode_list(cell(DAMAGE_SIGNS).unwrap_or(""), &defaults.damage_signs)?,
        demography,
        scene: scene_type,
        context_area: decode_list(cell(CONTEXT_AREA).unwrap_or(""), &defaults.context_area)?,
        sentiment,
        recovery_signals: flag(RECOVERY_SIGNALS)?,
        recovery_evidence: cell(RECOVERY_EVIDENCE).unwrap_or("").to_string(),
    };

    Ok(Classification { loss, scalars })
}

fn encode_tri_state(value: Option<bool>) -> String {
    value.map(|b| b.to_string()).unwrap_or_default()
}

fn decode_tri_state(value: &str) -> Result<Option<bool>, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "unknown" | "nan" => Ok(None),
        "true" | "1" => Ok(Some(true)),
        "false" | "0" => Ok(Some(false)),
        other => Err(format!("invalid boolean: {}", other)),
    }
}

fn decode_optional_f64(value: &str) -> Result<Option<f64>, String> {
    match value.trim() {
        "" | "nan" | "NaN" => Ok(None),
        v => v.parse().map(Some).map_err(|_| format!("invalid number: {}", v)),
    }
}

fn decode_urgency(value: &str) -> Result<u8, String> {
    let score = decode_optional_f64(value)?.unwrap_or(0.0);
    Ok(score.round().clamp(0.0, 5.0) as u8)
}

fn encode_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list(value: &str, fallback: &[String]) -> Result<Vec<String>, String> {
    if value.trim().is_empty() {
        return Ok(fallback.to_vec());
    }
    serde_json::from_str(value).map_err(|e| format!("invalid list {}: {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_classification() -> Classification {
        let loss = LossFields::from_entries(LossType::ALL.iter().map(|t| {
            let assessment = match t {
                LossType::Displacement => LossAssessment::new(Some(true), Some(0.85)),
                LossType::HealthTrauma => LossAssessment::new(None, None),
                _ => LossAssessment::new(Some(false), Some(0.2)),
            };
            (*t, assessment)
        }))
        .unwrap();

        let mut scalars = ScalarFields {
            urgency_score: 4,
            water_depth_bin: "waist".to_string(),
            damage_signs: vec!["road_blocked".to_string(), "house_inundated".to_string()],
            recovery_evidence: "boats, \"relief\" tents".to_string(),
            ..ScalarFields::default()
        };
        scalars.demography.children = true;
        scalars.scene.aerial = true;
        scalars.sentiment[0].present = true;
        scalars.sentiment[0].confidence = 0.7;

        Classification { loss, scalars }
    }

    fn as_map(row: &PostRow) -> HashMap<String, String> {
        output_headers().into_iter().zip(encode(row)).collect()
    }

    #[test]
    fn test_headers_and_cells_align() {
        let headers = output_headers();
        assert_eq!(headers.len(), 4 + LossType::COUNT * 2 + 6 + 6 + 3 + 1 + SENTIMENT_LABELS.len() * 2 + 2);

        let pending = PostRow::new("1", "text", vec![]);
        assert_eq!(encode(&pending).len(), headers.len());

        let mut done = PostRow::new("2", "text", vec![]);
        done.complete(sample_classification(), 1);
        assert_eq!(encode(&done).len(), headers.len());
    }

    #[test]
    fn test_pending_row_has_empty_output_cells() {
        let cells = as_map(&PostRow::new("1", "text", vec![]));
        assert_eq!(cells[STATUS], "pending");
        assert_eq!(cells[&loss_present(LossType::Displacement)], "");
        assert_eq!(cells[URGENCY], "");
    }

    #[test]
    fn test_done_row_decodes_to_same_state() {
        let mut row = PostRow::new("1", "text", vec![]);
        row.complete(sample_classification(), 3);

        let cells = as_map(&row);
        let state = decode(|name| cells.get(name).map(String::as_str)).unwrap();

        assert_eq!(state.status, ClassificationStatus::Done);
        assert_eq!(state.attempts, 3);
        assert_eq!(state.classification, row.classification);
        assert!(state.classified_at.is_some());
    }

    #[test]
    fn test_unknown_presence_is_empty_cell() {
        let mut row = PostRow::new("1", "text", vec![]);
        row.complete(sample_classification(), 1);
        let cells = as_map(&row);

        assert_eq!(cells[&loss_present(LossType::HealthTrauma)], "");
        assert_eq!(cells[&loss_present(LossType::Displacement)], "true");
        assert_eq!(cells[&loss_confidence(LossType::Displacement)], "0.85");
    }

    #[test]
    fn test_failed_row_keeps_reason() {
        let mut row = PostRow::new("1", "text", vec![]);
        row.fail("unsupported media: clip.mp4", 1);
        let cells = as_map(&row);

        let state = decode(|name| cells.get(name).map(String::as_str)).unwrap();
        assert_eq!(state.status, ClassificationStatus::Failed);
        assert_eq!(state.error_detail.as_deref(), Some("unsupported media: clip.mp4"));
        assert!(state.classification.is_none());
    }

    #[test]
    fn test_done_without_loss_columns_is_rejected() {
        let cells: HashMap<&str, &str> = [(STATUS, "done"), (URGENCY, "2")].into_iter().collect();
        let err = decode(|name| cells.get(name).copied()).unwrap_err();
        assert!(err.contains("missing column loss_displacement_present"));
    }

    #[test]
    fn test_decode_accepts_capitalized_booleans() {
        assert_eq!(decode_tri_state("True").unwrap(), Some(true));
        assert_eq!(decode_tri_state("FALSE").unwrap(), Some(false));
        assert_eq!(decode_tri_state("").unwrap(), None);
        assert!(decode_tri_state("yes please").is_err());
    }

    #[test]
    fn test_decode_urgency_rounds_and_clamps() {
        assert_eq!(decode_urgency("3.0").unwrap(), 3);
        assert_eq!(decode_urgency("9").unwrap(), 5);
        assert_eq!(decode_urgency("").unwrap(), 0);
    }

    #[test]
    fn test_missing_status_column_means_pending() {
        let state = decode(|_| None).unwrap();
        assert_eq!(state.status, ClassificationStatus::Pending);
        assert_eq!(state.attempts, 0);
    }
}
