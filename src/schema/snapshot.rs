//! Stored raw snapshot record
//!
//! The producer keeps one loosely-typed record: scalar attributes (date of
//! birth, blood type, ...) next to measurements carrying a value, a unit and
//! an optional source. Every field of a measurement may be missing, so all of
//! them are optional here and consumers decide how to degrade.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Measurement keys consumed by the normalizer
pub mod keys {
    pub const HEIGHT: &str = "Height";
    pub const WEIGHT: &str = "Weight";
    pub const HEART_RATE: &str = "HeartRate";
    pub const HEART_RATE_VARIABILITY: &str = "HeartRateVariability";
    pub const RESTING_HEART_RATE: &str = "RestingHeartRate";
    pub const SLEEP_HOURS: &str = "SleepHours";
    pub const STEPS_COUNT: &str = "StepsCount";

    pub const DOB: &str = "DOB";
    pub const BIOLOGICAL_SEX: &str = "BiologicalSex";
    pub const BLOOD_TYPE: &str = "BloodType";
    pub const SKIN_TYPE: &str = "FitzpatrickSkinType";
    pub const WHEELCHAIR_USE: &str = "WheelchairUse";
}

/// Unit tag for metres
pub const UNIT_METERS: &str = "M";
/// Unit tag for kilograms
pub const UNIT_KILOGRAMS: &str = "Kg";

/// Raw value as sent by the producer: usually text, sometimes a bare number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Text(String),
    Number(f64),
}

impl RawValue {
    /// Numeric reading of the value; text that is empty or not a number is `None`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Number(n) => Some(*n).filter(|n| n.is_finite()),
            RawValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
            }
        }
    }

    /// Textual reading of the value
    pub fn to_text(&self) -> String {
        match self {
            RawValue::Text(s) => s.clone(),
            RawValue::Number(n) => n.to_string(),
        }
    }

    /// Whether the value counts as absent (empty text)
    pub fn is_empty(&self) -> bool {
        matches!(self, RawValue::Text(s) if s.is_empty())
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Number(v)
    }
}

/// One measurement in the stored record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMeasurement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<RawValue>,
    /// Unit of measure ("M", "Kg", "Bpm", ...)
    #[serde(default, alias = "unitOfMeasure", skip_serializing_if = "Option::is_none")]
    pub uom: Option<String>,
    /// Reporting device, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl RawMeasurement {
    pub fn new(value: impl Into<RawValue>, uom: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            uom: Some(uom.into()),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The value, unless it is missing or empty
    pub fn present_value(&self) -> Option<&RawValue> {
        self.value.as_ref().filter(|v| !v.is_empty())
    }

    /// Whether the unit tag equals `unit` exactly
    pub fn has_unit(&self, unit: &str) -> bool {
        self.uom.as_deref() == Some(unit)
    }
}

/// One entry of the stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotEntry {
    Attribute(String),
    Measurement(RawMeasurement),
    /// Anything else the producer stored; carried through untouched
    Other(serde_json::Value),
}

/// Complete raw snapshot: attributes and measurements merged by key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawSnapshot {
    entries: BTreeMap<String, SnapshotEntry>,
}

impl RawSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the producer starts with before the first ingestion
    pub fn seeded() -> Self {
        let mut snapshot = Self::new();
        snapshot.set_attribute(keys::DOB, "1961-11-27");
        snapshot.set_attribute(keys::BIOLOGICAL_SEX, "Male");
        snapshot.set_attribute(keys::BLOOD_TYPE, "A+");
        snapshot.set_attribute(keys::SKIN_TYPE, "I");
        snapshot.set_attribute(keys::WHEELCHAIR_USE, "no");
        snapshot.set_measurement(keys::WEIGHT, RawMeasurement::new(113.85, UNIT_KILOGRAMS));
        snapshot.set_measurement(keys::HEIGHT, RawMeasurement::new(1.98, UNIT_METERS));
        snapshot
    }

    /// Parse a snapshot from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Look up a measurement; attributes stored under the same key yield `None`
    pub fn measurement(&self, key: &str) -> Option<&RawMeasurement> {
        match self.entries.get(key) {
            Some(SnapshotEntry::Measurement(m)) => Some(m),
            _ => None,
        }
    }

    /// Look up a scalar attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(SnapshotEntry::Attribute(a)) => Some(a.as_str()),
            _ => None,
        }
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .insert(key.into(), SnapshotEntry::Attribute(value.into()));
    }

    pub fn set_measurement(&mut self, key: impl Into<String>, measurement: RawMeasurement) {
        self.entries
            .insert(key.into(), SnapshotEntry::Measurement(measurement));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_stored_record() {
        let json = r#"{
            "DOB": "1966-11-11",
            "BloodType": "B+",
            "Weight": { "value": "99.34", "uom": "Kg", "source": "" },
            "Height": { "value": 1.70, "uom": "M" },
            "HeartRate": { "value": "84", "unitOfMeasure": "Bpm", "source": "Apple Watch" }
        }"#;

        let snapshot = RawSnapshot::from_json(json).unwrap();
        assert_eq!(snapshot.attribute(keys::DOB), Some("1966-11-11"));
        assert_eq!(snapshot.len(), 5);

        let weight = snapshot.measurement(keys::WEIGHT).unwrap();
        assert!(weight.has_unit(UNIT_KILOGRAMS));
        assert_eq!(weight.present_value().and_then(RawValue::as_f64), Some(99.34));

        let height = snapshot.measurement(keys::HEIGHT).unwrap();
        assert_eq!(height.value, Some(RawValue::Number(1.70)));

        let hr = snapshot.measurement(keys::HEART_RATE).unwrap();
        assert_eq!(hr.uom.as_deref(), Some("Bpm"));
        assert_eq!(hr.source.as_deref(), Some("Apple Watch"));
    }

    #[test]
    fn test_attribute_is_not_a_measurement() {
        let snapshot = RawSnapshot::seeded();
        assert!(snapshot.measurement(keys::DOB).is_none());
        assert!(snapshot.attribute(keys::WEIGHT).is_none());
        assert!(snapshot.measurement(keys::WEIGHT).is_some());
    }

    #[test]
    fn test_raw_value_parsing() {
        assert_eq!(RawValue::from(" 72 ").as_f64(), Some(72.0));
        assert_eq!(RawValue::from("").as_f64(), None);
        assert_eq!(RawValue::from("n/a").as_f64(), None);
        assert_eq!(RawValue::from(f64::NAN).as_f64(), None);
        assert!(RawValue::from("").is_empty());
        assert!(!RawValue::from(0.0).is_empty());
    }

    #[test]
    fn test_unknown_entries_round_trip() {
        let json = r#"{"Paired":true,"Count":3}"#;
        let snapshot = RawSnapshot::from_json(json).unwrap();
        assert!(snapshot.attribute("Count").is_none());
        assert_eq!(serde_json::to_string(&snapshot).unwrap(), r#"{"Count":3,"Paired":true}"#);
    }
}
