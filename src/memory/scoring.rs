//! Three-factor memory score: `relevance × recency × importance`.
//!
//! All fallbacks used by the scoring math live here as named constants.

use serde::Serialize;
use serde_json::Value;

/// Default recency time constant: 30 days, in seconds.
pub const DEFAULT_DECAY_RATE_SECS: f64 = 86_400.0 * 30.0;

/// Importance factor for records without `metadata.importance`.
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// Arousal assumed for records without `metadata.emotion.arousal`.
pub const DEFAULT_AROUSAL: f64 = 0.0;

/// How much full arousal stretches the decay window (1.0 + 0.5 = 1.5×).
pub const AROUSAL_DECAY_WEIGHT: f64 = 0.5;

/// LLM importance is on a 1–10 scale.
pub const IMPORTANCE_SCALE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub relevance: f64,
    pub recency: f64,
    pub importance: f64,
    pub score: f64,
}

/// Cosine similarity from sqlite-vec's cosine distance, clamped to [0, 1].
pub fn relevance_from_distance(distance: f64) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `metadata.importance / 10`, or [`DEFAULT_IMPORTANCE`].
pub fn importance_factor(metadata: &Value) -> f64 {
    metadata
        .get("importance")
        .and_then(as_number)
        .map(|i| (i / IMPORTANCE_SCALE).clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_IMPORTANCE)
}

/// `metadata.emotion.arousal` in [0, 1], or [`DEFAULT_AROUSAL`].
pub fn arousal(metadata: &Value) -> f64 {
    metadata
        .get("emotion")
        .and_then(|e| e.get("arousal"))
        .and_then(as_number)
        .map(|a| a.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_AROUSAL)
}

/// `exp(-age / (decay_rate × (1 + arousal × 0.5)))`. Future timestamps count as age 0.
pub fn recency_factor(age_secs: f64, decay_rate: f64, arousal: f64) -> f64 {
    let effective_decay = decay_rate * (1.0 + arousal * AROUSAL_DECAY_WEIGHT);
    if effective_decay <= 0.0 {
        return 0.0;
    }
    (-age_secs.max(0.0) / effective_decay).exp()
}

pub fn score(relevance: f64, age_secs: f64, decay_rate: f64, metadata: &Value) -> ScoreBreakdown {
    let recency = recency_factor(age_secs, decay_rate, arousal(metadata));
    let importance = importance_factor(metadata);
    ScoreBreakdown {
        relevance,
        recency,
        importance,
        score: relevance * recency * importance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fresh_memory_has_full_recency() {
        assert!(recency_factor(0.0, DEFAULT_DECAY_RATE_SECS, 0.0) > 0.99);
        assert_eq!(recency_factor(-60.0, DEFAULT_DECAY_RATE_SECS, 0.0), 1.0);
    }

    #[test]
    fn arousal_resists_decay() {
        let decay = DEFAULT_DECAY_RATE_SECS;
        let calm = recency_factor(decay, decay, 0.0);
        let charged = recency_factor(decay, decay, 1.0);
        assert!((calm - (-1.0f64).exp()).abs() < 1e-9);
        assert!((charged - (-1.0f64 / 1.5).exp()).abs() < 1e-9);
        assert!(charged > calm);
    }

    #[test]
    fn importance_scales_score() {
        assert_eq!(importance_factor(&json!({"importance": 1})), 0.1);
        assert_eq!(importance_factor(&json!({"importance": 10})), 1.0);
        assert_eq!(importance_factor(&json!({"importance": "8"})), 0.8);
        assert_eq!(importance_factor(&json!({})), DEFAULT_IMPORTANCE);

        let mut previous = 0.0;
        for i in 1..=10 {
            let s = score(0.9, 3600.0, DEFAULT_DECAY_RATE_SECS, &json!({"importance": i})).score;
            assert!(s > previous);
            previous = s;
        }
    }

    #[test]
    fn missing_or_malformed_arousal_defaults() {
        assert_eq!(arousal(&json!({"emotion": null})), DEFAULT_AROUSAL);
        assert_eq!(arousal(&json!({"emotion": {"arousal": "high"}})), DEFAULT_AROUSAL);
        assert_eq!(arousal(&json!({"emotion": {"arousal": 3.0}})), 1.0);
    }

    #[test]
    fn distance_maps_to_clamped_similarity() {
        assert_eq!(relevance_from_distance(0.0), 1.0);
        assert_eq!(relevance_from_distance(1.4), 0.0);
        assert_eq!(relevance_from_distance(f64::NAN), 0.0);
    }
}
