//! Derived-feature computation and reason-code rules (spec §4.3, §4.5).
//!
//! `derive` is a pure function of a window and the current event: given
//! identical inputs and an identical `now`, it always produces the same
//! output (spec §8, property 5).

use std::collections::HashMap;
use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::schema::{format_float, Event};
use crate::window::{UserWindow, WINDOW_1H, WINDOW_24H, WINDOW_5M};

/// The 11 behavioral features derived from a user's window (spec §4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFeatures {
    pub txns_last_5m: u64,
    pub txns_last_1h: u64,
    pub txns_last_24h: u64,
    pub avg_amount_1h: f64,
    pub max_amount_24h: f64,
    pub unique_devices_24h: u64,
    pub unique_ips_24h: u64,
    pub amount_zscore: f64,
    pub merchant_velocity_1h: u64,
    pub device_churn_24h: u64,
    pub ip_changes_24h: u64,
}

/// Computes the derived features for `current`, which must already have
/// been inserted into `window` (spec §4.3: "the current event is added to
/// the window before features are computed").
pub fn derive(window: &UserWindow, current: &Event, now: DateTime<Utc>) -> DerivedFeatures {
    let in_5m: Vec<&Event> = window.within(now, WINDOW_5M).collect();
    let in_1h: Vec<&Event> = window.within(now, WINDOW_1H).collect();
    let in_24h: Vec<&Event> = window.within(now, WINDOW_24H).collect();

    let avg_amount_1h = if in_1h.is_empty() {
        0.0
    } else {
        in_1h.iter().map(|e| e.amount).sum::<f64>() / in_1h.len() as f64
    };

    let max_amount_24h = in_24h
        .iter()
        .map(|e| e.amount)
        .fold(0.0_f64, |acc, x| acc.max(x));

    let unique_devices_24h = in_24h
        .iter()
        .map(|e| e.device_id.as_str())
        .collect::<HashSet<_>>()
        .len() as u64;

    let unique_ips_24h = in_24h
        .iter()
        .map(|e| e.ip.as_str())
        .collect::<HashSet<_>>()
        .len() as u64;

    let mu = window.total_amount() / window.amount_count().max(1) as f64;
    let amount_zscore = if mu <= 0.0 {
        0.0
    } else {
        (current.amount - mu) / mu
    };

    let merchant_velocity_1h = in_1h
        .iter()
        .filter(|e| e.merchant_id == current.merchant_id)
        .count() as u64;

    let device_churn_24h = adjacent_disagreements(&in_24h, |e| e.device_id.as_str());
    let ip_changes_24h = adjacent_disagreements(&in_24h, |e| e.ip.as_str());

    DerivedFeatures {
        txns_last_5m: in_5m.len() as u64,
        txns_last_1h: in_1h.len() as u64,
        txns_last_24h: in_24h.len() as u64,
        avg_amount_1h,
        max_amount_24h,
        unique_devices_24h,
        unique_ips_24h,
        amount_zscore,
        merchant_velocity_1h,
        device_churn_24h,
        ip_changes_24h,
    }
}

/// Counts adjacent-pair disagreements traversed oldest-to-newest.
/// `events` is assumed already oldest-first, matching window order.
fn adjacent_disagreements<'a>(
    events: &[&'a Event],
    key: impl Fn(&'a Event) -> &'a str,
) -> u64 {
    events
        .windows(2)
        .filter(|pair| key(pair[0]) != key(pair[1]))
        .count() as u64
}

impl DerivedFeatures {
    /// Flattens derived features into the string field map merged into a
    /// feature snapshot (spec §3: "Feature Snapshot").
    pub fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::with_capacity(11);
        fields.insert("txns_last_5m".to_string(), self.txns_last_5m.to_string());
        fields.insert("txns_last_1h".to_string(), self.txns_last_1h.to_string());
        fields.insert("txns_last_24h".to_string(), self.txns_last_24h.to_string());
        fields.insert("avg_amount_1h".to_string(), format_float(self.avg_amount_1h));
        fields.insert(
            "max_amount_24h".to_string(),
            format_float(self.max_amount_24h),
        );
        fields.insert(
            "unique_devices_24h".to_string(),
            self.unique_devices_24h.to_string(),
        );
        fields.insert(
            "unique_ips_24h".to_string(),
            self.unique_ips_24h.to_string(),
        );
        fields.insert("amount_zscore".to_string(), format_float(self.amount_zscore));
        fields.insert(
            "merchant_velocity_1h".to_string(),
            self.merchant_velocity_1h.to_string(),
        );
        fields.insert(
            "device_churn_24h".to_string(),
            self.device_churn_24h.to_string(),
        );
        fields.insert(
            "ip_changes_24h".to_string(),
            self.ip_changes_24h.to_string(),
        );
        fields
    }
}

/// The subset of fields the reason-code predicates read (spec §4.5).
/// Lets inference evaluate the rules straight off a feature-store
/// snapshot without reconstructing a [`DerivedFeatures`] (which requires a
/// window it does not have).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReasonInputs {
    pub txns_last_5m: f64,
    pub txns_last_1h: f64,
    pub avg_amount_1h: f64,
    pub amount_zscore: f64,
    pub device_churn_24h: f64,
    pub ip_changes_24h: f64,
    pub merchant_velocity_1h: f64,
}

impl From<&DerivedFeatures> for ReasonInputs {
    fn from(f: &DerivedFeatures) -> Self {
        Self {
            txns_last_5m: f.txns_last_5m as f64,
            txns_last_1h: f.txns_last_1h as f64,
            avg_amount_1h: f.avg_amount_1h,
            amount_zscore: f.amount_zscore,
            device_churn_24h: f.device_churn_24h as f64,
            ip_changes_24h: f.ip_changes_24h as f64,
            merchant_velocity_1h: f.merchant_velocity_1h as f64,
        }
    }
}

impl ReasonInputs {
    /// Parses the relevant fields out of a feature-store snapshot,
    /// defaulting to `0.0` on a missing or non-numeric value, the same
    /// permissive coercion the rest of the snapshot contract uses.
    pub fn from_snapshot(snapshot: &HashMap<String, String>) -> Self {
        let get = |key: &str| -> f64 {
            snapshot
                .get(key)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        Self {
            txns_last_5m: get("txns_last_5m"),
            txns_last_1h: get("txns_last_1h"),
            avg_amount_1h: get("avg_amount_1h"),
            amount_zscore: get("amount_zscore"),
            device_churn_24h: get("device_churn_24h"),
            ip_changes_24h: get("ip_changes_24h"),
            merchant_velocity_1h: get("merchant_velocity_1h"),
        }
    }
}

/// A reason code in priority order (spec §4.5), highest priority first.
const PRIORITY: [&str; 6] = [
    "high_velocity_5m",
    "unusual_amount",
    "high_device_churn",
    "frequent_ip_changes",
    "high_merchant_velocity",
    "high_velocity_1h",
];

/// Evaluates the reason-code predicates, returning at most the top 3 in
/// fixed priority order, or `["no_significant_indicators"]` if nothing
/// matched.
pub fn reason_codes(features: impl Into<ReasonInputs>) -> Vec<String> {
    let features: ReasonInputs = features.into();
    let mut matched = Vec::new();
    if features.txns_last_5m > 5.0 {
        matched.push("high_velocity_5m");
    }
    if features.txns_last_1h > 20.0 {
        matched.push("high_velocity_1h");
    }
    if features.avg_amount_1h > 0.0 && features.amount_zscore > 3.0 {
        matched.push("unusual_amount");
    }
    if features.device_churn_24h > 2.0 {
        matched.push("high_device_churn");
    }
    if features.ip_changes_24h > 3.0 {
        matched.push("frequent_ip_changes");
    }
    if features.merchant_velocity_1h > 5.0 {
        matched.push("high_merchant_velocity");
    }

    if matched.is_empty() {
        return vec!["no_significant_indicators".to_string()];
    }

    let mut ordered: Vec<&str> = PRIORITY
        .iter()
        .filter(|code| matched.contains(code))
        .copied()
        .collect();
    ordered.truncate(3);
    ordered.into_iter().map(str::to_string).collect()
}
