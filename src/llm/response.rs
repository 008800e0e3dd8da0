//! Turns the model's reply into a [`Classification`].
//!
//! Loss entries and the urgency score are mandatory. Everything else is read
//! loosely: a missing, null or oddly typed field falls back to the neutral
//! default in [`ScalarFields::default`] instead of rejecting the reply.

use serde::Deserialize;
use serde_json::Value;

use super::client::ClassifyError;
use crate::domain::{
    Classification, Demography, LossAssessment, LossFields, LossType, SENTIMENT_LABELS, ScalarFields, SceneType,
    SentimentScore,
};

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    loss_types: Option<serde_json::Map<String, Value>>,
    urgency_score_0_5: Option<Value>,
    #[serde(default)]
    visual_cues: Value,
    #[serde(default)]
    demography_presence: Value,
    #[serde(default)]
    scene_type: Value,
    #[serde(default)]
    context_area: Value,
    #[serde(default)]
    sentiment: Value,
    #[serde(default)]
    recovery: Value,
}

/// Slice from the first `{` to the last `}`; models like to wrap JSON in prose
fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accepts a JSON array of strings or a single bare string
fn as_string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(as_string).collect()),
        Value::String(s) if !s.trim().is_empty() => Some(vec![s.trim().to_string()]),
        _ => None,
    }
}

/// Field lookup that treats a non-object parent (including null) as empty
fn field<'a>(parent: &'a Value, key: &str) -> Option<&'a Value> {
    parent.as_object()?.get(key)
}

fn parse_flags(raw: &Value, names: &[&str], mut set: impl FnMut(&str, bool)) {
    for &name in names {
        if let Some(flag) = field(raw, name).and_then(as_bool) {
            set(name, flag);
        }
    }
}

fn parse_loss_fields(raw: &serde_json::Map<String, Value>) -> Result<LossFields, ClassifyError> {
    let entries = LossType::ALL.iter().filter_map(|loss_type| {
        let entry = raw.get(loss_type.as_str())?.as_object()?;
        let present = entry.get("present").and_then(as_bool);
        let confidence = entry.get("confidence").and_then(as_f64);
        Some((*loss_type, LossAssessment::new(present, confidence)))
    });

    LossFields::from_entries(entries)
        .map_err(|missing| ClassifyError::transient(format!("model response missing loss type '{}'", missing)))
}

fn parse_urgency(value: &Value) -> Result<u8, ClassifyError> {
    let score = as_f64(value)
        .filter(|f| f.is_finite())
        .ok_or_else(|| ClassifyError::transient(format!("urgency_score_0_5 is not a number: {}", value)))?;
    Ok(score.round().clamp(0.0, 5.0) as u8)
}

fn parse_sentiment(raw: &Value) -> Vec<SentimentScore> {
    let entries: Vec<(String, &Value)> = raw
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| Some((field(item, "label").and_then(as_string)?, item)))
                .collect()
        })
        .unwrap_or_default();

    SENTIMENT_LABELS
        .iter()
        .map(|label| {
            let found = entries
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(label))
                .map(|(_, item)| *item);
            SentimentScore {
                label: label.to_string(),
                present: found.and_then(|s| field(s, "present")).and_then(as_bool).unwrap_or(false),
                confidence: found
                    .and_then(|s| field(s, "confidence"))
                    .and_then(as_f64)
                    .filter(|c| c.is_finite())
                    .map(|c| c.clamp(0.0, 1.0))
                    .unwrap_or(0.0),
            }
        })
        .collect()
}

/// Parse the assistant message content into a classification
pub fn parse_analysis(content: &str) -> Result<Classification, ClassifyError> {
    let json = extract_json_object(content)
        .ok_or_else(|| ClassifyError::transient(format!("no JSON object in model response: {}", preview(content))))?;

    let raw: RawAnalysis = serde_json::from_str(json)
        .map_err(|e| ClassifyError::transient(format!("malformed model response: {} ({})", e, preview(content))))?;

    let loss_types = raw
        .loss_types
        .as_ref()
        .ok_or_else(|| ClassifyError::transient("model response missing loss_types"))?;
    let loss = parse_loss_fields(loss_types)?;

    let urgency = raw
        .urgency_score_0_5
        .as_ref()
        .ok_or_else(|| ClassifyError::transient("model response missing urgency_score_0_5"))?;

    let defaults = ScalarFields::default();
    let cues = &raw.visual_cues;

    let mut demography = Demography::default();
    parse_flags(&raw.demography_presence, &Demography::GROUPS, |g, v| demography.set(g, v));
    let mut scene = SceneType::default();
    parse_flags(&raw.scene_type, &SceneType::KINDS, |k, v| scene.set(k, v));

    let scalars = ScalarFields {
        urgency_score: parse_urgency(urgency)?,
        water_depth_bin: field(cues, "water_depth_bin")
            .and_then(as_string)
            .unwrap_or(defaults.water_depth_bin),
        crowd_size_bin: field(cues, "crowd_size_bin")
            .and_then(as_string)
            .unwrap_or(defaults.crowd_size_bin),
        relief_visible: field(cues, "relief_visible")
            .and_then(as_bool)
            .unwrap_or(defaults.relief_visible),
        relief_actor_type: field(cues, "relief_actor_type")
            .and_then(as_string)
            .unwrap_or(defaults.relief_actor_type),
        damage_signs: field(cues, "damage_signs")
            .and_then(as_string_list)
            .unwrap_or(defaults.damage_signs),
        demography,
        scene,
        context_area: as_string_list(&raw.context_area).unwrap_or(defaults.context_area),
        sentiment: parse_sentiment(&raw.sentiment),
        recovery_signals: field(&raw.recovery, "recovery_signals")
            .and_then(as_bool)
            .unwrap_or(defaults.recovery_signals),
        recovery_evidence: field(&raw.recovery, "evidence")
            .and_then(as_string)
            .unwrap_or(defaults.recovery_evidence),
    };

    Ok(Classification { loss, scalars })
}

fn preview(content: &str) -> String {
    content.chars().take(200).collect()
}
