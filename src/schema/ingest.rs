//! Ingestion batch schema
//!
//! The producer posts two ordered sequences: scalar attributes and typed
//! measurements. Both are merged into the stored [`RawSnapshot`] by key, later
//! entries overwriting earlier ones, after the whole batch has been validated.

use crate::error::{ValidationError, VitalsError};
use crate::schema::snapshot::{RawMeasurement, RawSnapshot, RawValue};
use serde::{Deserialize, Serialize};

/// Scalar attribute overwrite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeEntry {
    pub attribute_type: String,
    pub attribute_value: RawValue,
}

/// Typed measurement overwrite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementEntry {
    pub measurement_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_value: Option<RawValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl MeasurementEntry {
    pub fn new(
        measurement_type: impl Into<String>,
        value: impl Into<RawValue>,
        unit_of_measure: impl Into<String>,
    ) -> Self {
        Self {
            measurement_type: measurement_type.into(),
            measurement_value: Some(value.into()),
            unit_of_measure: Some(unit_of_measure.into()),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn to_measurement(&self) -> RawMeasurement {
        RawMeasurement {
            value: self.measurement_value.clone(),
            uom: self.unit_of_measure.clone(),
            source: self.source.clone(),
        }
    }
}

/// One ingestion request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestBatch {
    #[serde(default)]
    pub attributes: Vec<AttributeEntry>,
    #[serde(default)]
    pub measurements: Vec<MeasurementEntry>,
}

impl IngestBatch {
    /// Parse a batch from JSON
    pub fn from_json(json: &str) -> Result<Self, VitalsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.attributes.push(AttributeEntry {
            attribute_type: key.into(),
            attribute_value: value.into(),
        });
        self
    }

    pub fn with_measurement(mut self, entry: MeasurementEntry) -> Self {
        self.measurements.push(entry);
        self
    }

    /// Total number of entries in the batch
    pub fn len(&self) -> usize {
        self.attributes.len() + self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every problem in the batch, in input order
    pub fn validation_errors(&self) -> Vec<ValidationError> {
        let attributes = self
            .attributes
            .iter()
            .enumerate()
            .filter(|(_, a)| a.attribute_type.trim().is_empty())
            .map(|(index, _)| ValidationError::EmptyAttributeType { index });

        let measurements = self
            .measurements
            .iter()
            .enumerate()
            .filter(|(_, m)| m.measurement_type.trim().is_empty())
            .map(|(index, _)| ValidationError::EmptyMeasurementType { index });

        attributes.chain(measurements).collect()
    }

    /// Validate the batch, reporting the first problem
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.validation_errors().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Merge the batch into `snapshot`.
    ///
    /// Attributes are applied before measurements, each in input order. Nothing
    /// is written when the batch does not validate.
    pub fn merge_into(&self, snapshot: &mut RawSnapshot) -> Result<(), ValidationError> {
        self.validate()?;

        for attribute in &self.attributes {
            snapshot.set_attribute(
                attribute.attribute_type.clone(),
                attribute.attribute_value.to_text(),
            );
        }

        for measurement in &self.measurements {
            snapshot.set_measurement(
                measurement.measurement_type.clone(),
                measurement.to_measurement(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::snapshot::keys;
    use pretty_assertions::assert_eq;

    fn sample_batch_json() -> &'static str {
        r#"{
            "attributes": [
                { "attributeType": "DOB", "attributeValue": "1966-11-11" },
                { "attributeType": "BloodType", "attributeValue": "B+" }
            ],
            "measurements": [
                { "measurementType": "Weight", "measurementValue": "99.34", "unitOfMeasure": "Kg" },
                { "measurementType": "HeartRate", "measurementValue": "84", "unitOfMeasure": "Bpm", "source": "Apple Watch" },
                { "measurementType": "HeartRate", "measurementValue": "91", "unitOfMeasure": "Bpm", "source": "Polar H10" }
            ]
        }"#
    }

    #[test]
    fn test_parse_batch() {
        let batch = IngestBatch::from_json(sample_batch_json()).unwrap();
        assert_eq!(batch.attributes.len(), 2);
        assert_eq!(batch.measurements.len(), 3);
        assert_eq!(batch.measurements[1].source.as_deref(), Some("Apple Watch"));
        assert!(batch.validate().is_ok());
    }

    #[test]
    fn test_missing_sequences_default_to_empty() {
        let batch = IngestBatch::from_json(r#"{"measurements": []}"#).unwrap();
        assert!(batch.is_empty());
        assert!(batch.validate().is_ok());
    }

    #[test]
    fn test_merge_last_write_wins_within_batch() {
        let batch = IngestBatch::from_json(sample_batch_json()).unwrap();
        let mut snapshot = RawSnapshot::seeded();
        batch.merge_into(&mut snapshot).unwrap();

        let hr = snapshot.measurement(keys::HEART_RATE).unwrap();
        assert_eq!(hr.value, Some(RawValue::from("91")));
        assert_eq!(hr.source.as_deref(), Some("Polar H10"));
        assert_eq!(snapshot.attribute(keys::DOB), Some("1966-11-11"));
        // Untouched seeded entries survive
        assert!(snapshot.measurement(keys::HEIGHT).is_some());
        assert_eq!(snapshot.attribute(keys::WHEELCHAIR_USE), Some("no"));
    }

    #[test]
    fn test_measurement_overwrites_attribute_with_same_key() {
        let batch = IngestBatch::default()
            .with_attribute("Weight", "heavy")
            .with_measurement(MeasurementEntry::new("Weight", "80", "Kg"));
        let mut snapshot = RawSnapshot::new();
        batch.merge_into(&mut snapshot).unwrap();

        assert!(snapshot.attribute("Weight").is_none());
        assert_eq!(
            snapshot.measurement("Weight"),
            Some(&RawMeasurement::new("80", "Kg"))
        );
    }

    #[test]
    fn test_numeric_attribute_is_stored_as_text() {
        let batch = IngestBatch::default().with_attribute("Age", 61.0);
        let mut snapshot = RawSnapshot::new();
        batch.merge_into(&mut snapshot).unwrap();
        assert_eq!(snapshot.attribute("Age"), Some("61"));
    }

    #[test]
    fn test_invalid_batch_leaves_snapshot_untouched() {
        let batch = IngestBatch::default()
            .with_measurement(MeasurementEntry::new("HeartRate", "70", "Bpm"))
            .with_measurement(MeasurementEntry::new("  ", "1", "Count"))
            .with_attribute("", "x");

        let mut snapshot = RawSnapshot::seeded();
        let before = snapshot.clone();
        let err = batch.merge_into(&mut snapshot).unwrap_err();

        assert_eq!(err, ValidationError::EmptyAttributeType { index: 0 });
        assert_eq!(snapshot, before);
        assert_eq!(
            batch.validation_errors(),
            vec![
                ValidationError::EmptyAttributeType { index: 0 },
                ValidationError::EmptyMeasurementType { index: 1 },
            ]
        );
    }
}
