//! Fixed-order feature vector assembly and decision mapping (spec §4.4).

use std::collections::HashMap;

use crate::model::VECTOR_LEN;
use crate::schema::NUM_PCA_FEATURES;

/// The model's input field order: `V1..V28`, then `Amount_normalized`
/// (spec §4.4, step 3).
fn feature_order() -> [String; VECTOR_LEN] {
    let mut order: [String; VECTOR_LEN] = std::array::from_fn(|_| String::new());
    for i in 0..NUM_PCA_FEATURES {
        order[i] = format!("V{}", i + 1);
    }
    order[NUM_PCA_FEATURES] = "Amount_normalized".to_string();
    order
}

/// Builds the `(1, 29)` input vector from a feature snapshot. Non-numeric
/// or missing fields substitute `0.0` (spec §4.4, step 3).
pub fn assemble_vector(snapshot: &HashMap<String, String>) -> [f32; VECTOR_LEN] {
    let order = feature_order();
    let mut vector = [0.0f32; VECTOR_LEN];
    for (i, key) in order.iter().enumerate() {
        vector[i] = snapshot
            .get(key)
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(0.0);
    }
    vector
}

/// Maps a risk score to a decision via the two thresholds (spec §4.4, step 5).
pub fn build_decision(risk_score: f32, threshold_allow: f32, threshold_block: f32) -> &'static str {
    if risk_score < threshold_allow {
        "allow"
    } else if risk_score < threshold_block {
        "step_up"
    } else {
        "block"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_snapshot_fields_default_to_zero() {
        let snapshot = HashMap::new();
        let vector = assemble_vector(&snapshot);
        assert_eq!(vector, [0.0f32; VECTOR_LEN]);
    }

    #[test]
    fn non_numeric_field_defaults_to_zero() {
        let mut snapshot = HashMap::new();
        snapshot.insert("V1".to_string(), "not-a-number".to_string());
        let vector = assemble_vector(&snapshot);
        assert_eq!(vector[0], 0.0);
    }

    #[test]
    fn vector_preserves_v_then_amount_normalized_order() {
        let mut snapshot = HashMap::new();
        snapshot.insert("V1".to_string(), "1.5".to_string());
        snapshot.insert("V28".to_string(), "2.5".to_string());
        snapshot.insert("Amount_normalized".to_string(), "3.5".to_string());
        let vector = assemble_vector(&snapshot);
        assert_eq!(vector[0], 1.5);
        assert_eq!(vector[27], 2.5);
        assert_eq!(vector[28], 3.5);
    }

    #[test]
    fn decision_thresholds_are_monotonic() {
        assert_eq!(build_decision(0.1, 0.3, 0.7), "allow");
        assert_eq!(build_decision(0.3, 0.3, 0.7), "step_up");
        assert_eq!(build_decision(0.69, 0.3, 0.7), "step_up");
        assert_eq!(build_decision(0.7, 0.3, 0.7), "block");
        assert_eq!(build_decision(0.99, 0.3, 0.7), "block");
    }
}
