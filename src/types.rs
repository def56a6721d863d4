//! Core types for the Vitals Board display engine
//!
//! This module defines the canonical view model that every inbound snapshot is
//! normalized into, the closed set of field names the change tracker works
//! with, and the value type used to compare fields.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Names of the view model fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Bmi,
    HeartRate,
    HeartRateSource,
    HeartRateVariability,
    HeightFeet,
    HeightInches,
    PeakHeartRate,
    RestingHeartRate,
    SleepHours,
    SleepMinutes,
    StepsCount,
    Weight,
}

impl Field {
    /// Every field, in declaration order
    pub const ALL: [Field; 12] = [
        Field::Bmi,
        Field::HeartRate,
        Field::HeartRateSource,
        Field::HeartRateVariability,
        Field::HeightFeet,
        Field::HeightInches,
        Field::PeakHeartRate,
        Field::RestingHeartRate,
        Field::SleepHours,
        Field::SleepMinutes,
        Field::StepsCount,
        Field::Weight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Bmi => "bmi",
            Field::HeartRate => "heartRate",
            Field::HeartRateSource => "heartRateSource",
            Field::HeartRateVariability => "heartRateVariability",
            Field::HeightFeet => "heightFeet",
            Field::HeightInches => "heightInches",
            Field::PeakHeartRate => "peakHeartRate",
            Field::RestingHeartRate => "restingHeartRate",
            Field::SleepHours => "sleepHours",
            Field::SleepMinutes => "sleepMinutes",
            Field::StepsCount => "stepsCount",
            Field::Weight => "weight",
        }
    }

    /// The field that must flash together with this one, if any.
    ///
    /// Height and sleep are each displayed as one composite value split over
    /// two numeric fields.
    pub fn partner(&self) -> Option<Field> {
        match self {
            Field::HeightFeet => Some(Field::HeightInches),
            Field::HeightInches => Some(Field::HeightFeet),
            Field::SleepHours => Some(Field::SleepMinutes),
            Field::SleepMinutes => Some(Field::SleepHours),
            _ => None,
        }
    }

    /// Unit suffix shown next to the value
    pub fn unit(&self) -> &'static str {
        match self {
            Field::RestingHeartRate | Field::PeakHeartRate => "bpm",
            Field::HeartRateVariability => "ms",
            Field::StepsCount => "steps",
            Field::HeightFeet => "ft",
            Field::HeightInches => "in",
            Field::Weight => "lb",
            _ => "",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of field names (ordered for stable output)
pub type FieldSet = BTreeSet<Field>;

/// Value of a single view model field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Integer(i64),
    Text(String),
}

impl FieldValue {
    /// Truthiness used by the renderer: non-zero numbers and non-empty text
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Number(n) => *n != 0.0 && !n.is_nan(),
            FieldValue::Integer(i) => *i != 0,
            FieldValue::Text(s) => !s.is_empty(),
        }
    }
}

/// Canonical, unit-converted representation of one snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewModel {
    /// Body mass index, one decimal place
    pub bmi: f64,
    /// Latest heart rate (bpm)
    pub heart_rate: f64,
    /// Device that reported the heart rate
    pub heart_rate_source: String,
    /// Heart rate variability (ms)
    pub heart_rate_variability: f64,
    pub height_feet: i64,
    pub height_inches: i64,
    /// Reserved; no feed populates it
    pub peak_heart_rate: f64,
    /// Resting heart rate (bpm)
    pub resting_heart_rate: f64,
    pub sleep_hours: i64,
    pub sleep_minutes: i64,
    pub steps_count: f64,
    /// Weight in pounds
    pub weight: f64,
}

impl ViewModel {
    /// Read a field by name
    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::Bmi => FieldValue::Number(self.bmi),
            Field::HeartRate => FieldValue::Number(self.heart_rate),
            Field::HeartRateSource => FieldValue::Text(self.heart_rate_source.clone()),
            Field::HeartRateVariability => FieldValue::Number(self.heart_rate_variability),
            Field::HeightFeet => FieldValue::Integer(self.height_feet),
            Field::HeightInches => FieldValue::Integer(self.height_inches),
            Field::PeakHeartRate => FieldValue::Number(self.peak_heart_rate),
            Field::RestingHeartRate => FieldValue::Number(self.resting_heart_rate),
            Field::SleepHours => FieldValue::Integer(self.sleep_hours),
            Field::SleepMinutes => FieldValue::Integer(self.sleep_minutes),
            Field::StepsCount => FieldValue::Number(self.steps_count),
            Field::Weight => FieldValue::Number(self.weight),
        }
    }
}
