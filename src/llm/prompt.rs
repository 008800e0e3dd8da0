//! Prompt text for the loss classification request.
//!
//! The user prompt embeds the post text and spells out the exact JSON shape
//! that [`super::response::parse_analysis`] expects back.

use crate::domain::LossType;

/// Instructions sent as the system message on every request
pub const SYSTEM_PROMPT: &str = "\
You annotate flood-related social media posts for non-economic loss signals.

Rules:
- Use only the post text and the attached images.
- Visual labels (infrastructure access, displacement, caregiving burden, education disruption) \
may be true only when the images clearly show the cue. Text alone is not enough.
- Mark water_food_insecurity only when images show distribution, containers, queues, \
or on-image text proving shortage.
- Mark psychosocial_distress only when the text states it and the images support the context. \
Never infer emotion from faces.
- urgency_score_0_5 is above 0 only when visual danger cues exist.
- Demography flags report visibility only. Never infer identity.
- Prefer precision over recall. When unsure set present=false with confidence at most 0.4.

Return strict JSON only, exactly matching the requested schema. No prose, no extra keys.";

/// Build the user message for one post
pub fn build_user_prompt(text: &str, image_count: usize) -> String {
    let text = if text.trim().is_empty() { "N/A" } else { text.trim() };

    let loss_lines = LossType::ALL
        .iter()
        .map(|t| format!("    \"{}\": {{\"present\": false, \"confidence\": 0.0}}", t))
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        r#"Task: extract NON-ECONOMIC flood impact signals for ONE post.

POST TEXT:
<<<{text}>>>

{image_count} image(s) attached.

Return EXACTLY this JSON shape:
{{
  "loss_types": {{
{loss_lines}
  }},
  "urgency_score_0_5": 0,
  "visual_cues": {{
    "water_depth_bin": "unknown",
    "crowd_size_bin": "unknown",
    "relief_visible": false,
    "relief_actor_type": "none",
    "damage_signs": ["none"]
  }},
  "demography_presence": {{"children": false, "elderly": false, "pregnant": false, "disabled_aid": false, "male": false, "female": false}},
  "scene_type": {{"aerial": false, "ground_outdoor": false, "indoor": false}},
  "context_area": ["unknown"],
  "sentiment": [{{"label": "fear", "present": false, "confidence": 0.0}}],
  "recovery": {{"recovery_signals": false, "evidence": ""}}
}}

Field values:
- water_depth_bin: none, ankle, knee, waist, vehicle_height, indoor_flood, unknown
- crowd_size_bin: 1, 2-5, 6-20, >20, unknown
- relief_actor_type: ngo, government, community, unknown, none
- damage_signs: any of road_blocked, house_inundated, bridge_damage, school_closed_sign, clinic_closed_sign, power_outage_sign, other, none
- context_area: any of settlement, farmland, roadway, riverbank, school_or_health_facility, mixed, unknown
- sentiment: one entry each for fear, hopelessness, grief, anger, resilience, neutral, mixed
- confidence: 0.0 to 1.0; urgency_score_0_5: integer 0 to 5"#
    )
}
