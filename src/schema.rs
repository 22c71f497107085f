//! The transaction event wire format shared across all three processes.
//!
//! Ingest validates and stamps an event, the event log carries it as a flat
//! field map (mirroring a Redis Streams entry, which has no nested types),
//! and the featurizer and columnar writer both decode it back into this
//! struct.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Number of PCA features (`V1`..`V28`) carried on every event.
pub const NUM_PCA_FEATURES: usize = 28;

/// Formats a float the way the field map wire format expects: always with a
/// decimal point (`50.0`, not `50`), matching the source system's
/// stringified floats so snapshot values are stable across languages.
pub fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// A single transaction event, as received by ingest and read back by every
/// downstream consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub ts: DateTime<Utc>,
    pub user_id: String,
    pub amount: f64,
    pub currency: String,
    pub country: String,
    pub device_id: String,
    pub ip: String,
    pub merchant_id: String,
    /// PCA features `V1..V28`, indexed `v[0]` = V1 .. `v[27]` = V28.
    pub v: [f64; NUM_PCA_FEATURES],
    pub amount_normalized: f64,
}

impl Event {
    /// Validates a freshly-deserialized event against the constraints ingest
    /// enforces before accepting it (spec §3, §7): non-empty identifiers and
    /// a non-negative amount. Timestamp parsing is handled by serde/chrono
    /// itself, so a malformed `ts` never reaches this point.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.event_id.trim().is_empty() {
            return Err(AppError::Validation("event_id must not be empty".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(AppError::Validation("user_id must not be empty".into()));
        }
        if self.amount < 0.0 {
            return Err(AppError::Validation("amount must be >= 0".into()));
        }
        if !self.amount.is_finite() {
            return Err(AppError::Validation("amount must be finite".into()));
        }
        Ok(())
    }

    /// Flattens the event into the string field map an event-log entry is
    /// made of (analogous to the field/value pairs of a Redis Streams
    /// `XADD`).
    pub fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::with_capacity(10 + NUM_PCA_FEATURES);
        fields.insert("event_id".to_string(), self.event_id.clone());
        fields.insert(
            "ts".to_string(),
            self.ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        );
        fields.insert("user_id".to_string(), self.user_id.clone());
        fields.insert("amount".to_string(), format_float(self.amount));
        fields.insert("currency".to_string(), self.currency.clone());
        fields.insert("country".to_string(), self.country.clone());
        fields.insert("device_id".to_string(), self.device_id.clone());
        fields.insert("ip".to_string(), self.ip.clone());
        fields.insert("merchant_id".to_string(), self.merchant_id.clone());
        for (i, value) in self.v.iter().enumerate() {
            fields.insert(format!("V{}", i + 1), format_float(*value));
        }
        fields.insert(
            "Amount_normalized".to_string(),
            format_float(self.amount_normalized),
        );
        fields
    }

    /// Reconstructs an event from an event-log field map. Returns an error
    /// describing the first missing or unparsable field, so a poison-pill
    /// entry in the log can be logged and skipped by its index rather than
    /// killing the whole consumer loop.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, AppError> {
        fn get<'a>(fields: &'a HashMap<String, String>, key: &str) -> Result<&'a str, AppError> {
            fields
                .get(key)
                .map(|s| s.as_str())
                .ok_or_else(|| AppError::Validation(format!("missing field {key}")))
        }

        fn parse_f64(fields: &HashMap<String, String>, key: &str) -> Result<f64, AppError> {
            get(fields, key)?
                .parse::<f64>()
                .map_err(|e| AppError::Validation(format!("invalid {key}: {e}")))
        }

        let ts = get(fields, "ts")?
            .parse::<DateTime<Utc>>()
            .map_err(|e| AppError::Validation(format!("invalid ts: {e}")))?;

        let mut v = [0.0f64; NUM_PCA_FEATURES];
        for (i, slot) in v.iter_mut().enumerate() {
            *slot = parse_f64(fields, &format!("V{}", i + 1))?;
        }

        let event = Event {
            event_id: get(fields, "event_id")?.to_string(),
            ts,
            user_id: get(fields, "user_id")?.to_string(),
            amount: parse_f64(fields, "amount")?,
            currency: get(fields, "currency")?.to_string(),
            country: get(fields, "country")?.to_string(),
            device_id: get(fields, "device_id")?.to_string(),
            ip: get(fields, "ip")?.to_string(),
            merchant_id: get(fields, "merchant_id")?.to_string(),
            v,
            amount_normalized: parse_f64(fields, "Amount_normalized")?,
        };
        event.validate()?;
        Ok(event)
    }
}

/// The wire shape of `POST /events`: a flat JSON object with individually
/// named `V1`..`V28` fields, matching the original schema's field-per-PCA-
/// component layout (spec §3, §6) rather than an array.
#[derive(Debug, Deserialize)]
pub struct EventPayload {
    pub event_id: String,
    pub ts: DateTime<Utc>,
    pub user_id: String,
    pub amount: f64,
    pub currency: String,
    pub country: String,
    pub device_id: String,
    pub ip: String,
    pub merchant_id: String,
    #[serde(rename = "V1")]
    pub v1: f64,
    #[serde(rename = "V2")]
    pub v2: f64,
    #[serde(rename = "V3")]
    pub v3: f64,
    #[serde(rename = "V4")]
    pub v4: f64,
    #[serde(rename = "V5")]
    pub v5: f64,
    #[serde(rename = "V6")]
    pub v6: f64,
    #[serde(rename = "V7")]
    pub v7: f64,
    #[serde(rename = "V8")]
    pub v8: f64,
    #[serde(rename = "V9")]
    pub v9: f64,
    #[serde(rename = "V10")]
    pub v10: f64,
    #[serde(rename = "V11")]
    pub v11: f64,
    #[serde(rename = "V12")]
    pub v12: f64,
    #[serde(rename = "V13")]
    pub v13: f64,
    #[serde(rename = "V14")]
    pub v14: f64,
    #[serde(rename = "V15")]
    pub v15: f64,
    #[serde(rename = "V16")]
    pub v16: f64,
    #[serde(rename = "V17")]
    pub v17: f64,
    #[serde(rename = "V18")]
    pub v18: f64,
    #[serde(rename = "V19")]
    pub v19: f64,
    #[serde(rename = "V20")]
    pub v20: f64,
    #[serde(rename = "V21")]
    pub v21: f64,
    #[serde(rename = "V22")]
    pub v22: f64,
    #[serde(rename = "V23")]
    pub v23: f64,
    #[serde(rename = "V24")]
    pub v24: f64,
    #[serde(rename = "V25")]
    pub v25: f64,
    #[serde(rename = "V26")]
    pub v26: f64,
    #[serde(rename = "V27")]
    pub v27: f64,
    #[serde(rename = "V28")]
    pub v28: f64,
    #[serde(rename = "Amount_normalized")]
    pub amount_normalized: f64,
}

impl From<EventPayload> for Event {
    fn from(p: EventPayload) -> Self {
        Event {
            event_id: p.event_id,
            ts: p.ts,
            user_id: p.user_id,
            amount: p.amount,
            currency: p.currency,
            country: p.country,
            device_id: p.device_id,
            ip: p.ip,
            merchant_id: p.merchant_id,
            v: [
                p.v1, p.v2, p.v3, p.v4, p.v5, p.v6, p.v7, p.v8, p.v9, p.v10, p.v11, p.v12, p.v13,
                p.v14, p.v15, p.v16, p.v17, p.v18, p.v19, p.v20, p.v21, p.v22, p.v23, p.v24,
                p.v25, p.v26, p.v27, p.v28,
            ],
            amount_normalized: p.amount_normalized,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_event(event_id: &str, user_id: &str, amount: f64) -> Event {
    Event {
        event_id: event_id.to_string(),
        ts: Utc::now(),
        user_id: user_id.to_string(),
        amount,
        currency: "EUR".to_string(),
        country: "FR".to_string(),
        device_id: "device-1".to_string(),
        ip: "10.0.0.1".to_string(),
        merchant_id: "merchant-1".to_string(),
        v: [0.0; NUM_PCA_FEATURES],
        amount_normalized: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_field_map() {
        let event = sample_event("evt-1", "user-1", 42.5);
        let fields = event.to_fields();
        let decoded = Event::from_fields(&fields).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn rejects_negative_amount() {
        let event = sample_event("evt-1", "user-1", -1.0);
        assert!(event.validate().is_err());
    }

    #[test]
    fn rejects_empty_user_id() {
        let event = sample_event("evt-1", "", 10.0);
        assert!(event.validate().is_err());
    }

    #[test]
    fn from_fields_reports_missing_field() {
        let mut fields = sample_event("evt-1", "user-1", 1.0).to_fields();
        fields.remove("merchant_id");
        let err = Event::from_fields(&fields).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn event_payload_deserializes_flat_v_fields() {
        let json = r#"{
            "event_id": "e1", "ts": "2025-01-15T10:00:00Z", "user_id": "u1",
            "amount": 50.0, "currency": "USD", "country": "US",
            "device_id": "d1", "ip": "1.1.1.1", "merchant_id": "m1",
            "V1": 0.1, "V2": 0.0, "V3": 0.0, "V4": 0.0, "V5": 0.0, "V6": 0.0,
            "V7": 0.0, "V8": 0.0, "V9": 0.0, "V10": 0.0, "V11": 0.0, "V12": 0.0,
            "V13": 0.0, "V14": 0.0, "V15": 0.0, "V16": 0.0, "V17": 0.0, "V18": 0.0,
            "V19": 0.0, "V20": 0.0, "V21": 0.0, "V22": 0.0, "V23": 0.0, "V24": 0.0,
            "V25": 0.0, "V26": 0.0, "V27": 0.0, "V28": 0.0, "Amount_normalized": 0.0
        }"#;
        let payload: EventPayload = serde_json::from_str(json).unwrap();
        let event: Event = payload.into();
        assert_eq!(event.v[0], 0.1);
        assert_eq!(event.user_id, "u1");
    }
}
