//! Snapshot normalization
//!
//! This module converts a raw snapshot into the canonical view model.
//! - Height from metres to feet and inches
//! - Weight from kilograms to pounds
//! - BMI from metric height and weight
//! - Sleep duration text ("7h 22m") into hours and minutes
//!
//! Every conversion is total: a missing measurement, an empty value, a value
//! that is not a number or an unexpected unit tag yields zero.

use crate::error::VitalsError;
use crate::schema::{keys, RawMeasurement, RawSnapshot, RawValue, UNIT_KILOGRAMS, UNIT_METERS};
use crate::types::ViewModel;

const CM_PER_INCH: f64 = 2.54;
const LB_PER_KG: f64 = 2.20462;

/// Normalizer for converting raw snapshots to view models
pub struct Normalizer;

impl Normalizer {
    /// Normalize a raw snapshot
    pub fn normalize(raw: &RawSnapshot) -> ViewModel {
        let height = raw.measurement(keys::HEIGHT);
        let weight = raw.measurement(keys::WEIGHT);
        let (height_feet, height_inches) = convert_height(height);
        let heart_rate = raw.measurement(keys::HEART_RATE);
        let (sleep_hours, sleep_minutes) = raw
            .measurement(keys::SLEEP_HOURS)
            .and_then(RawMeasurement::present_value)
            .map(|v| parse_sleep(&v.to_text()))
            .unwrap_or((0, 0));

        ViewModel {
            bmi: calc_bmi(weight, height),
            heart_rate: number_of(heart_rate),
            heart_rate_source: heart_rate
                .and_then(|m| m.source.clone())
                .unwrap_or_default(),
            heart_rate_variability: number_of(raw.measurement(keys::HEART_RATE_VARIABILITY)),
            height_feet,
            height_inches,
            peak_heart_rate: 0.0,
            resting_heart_rate: number_of(raw.measurement(keys::RESTING_HEART_RATE)),
            sleep_hours,
            sleep_minutes,
            steps_count: number_of(raw.measurement(keys::STEPS_COUNT)),
            weight: convert_weight(weight),
        }
    }

    /// Parse a raw snapshot from JSON and normalize it
    pub fn normalize_json(json: &str) -> Result<ViewModel, VitalsError> {
        let raw = RawSnapshot::from_json(json)?;
        Ok(Self::normalize(&raw))
    }
}

/// Numeric value of a measurement tagged with `unit`
fn metric_value(measurement: Option<&RawMeasurement>, unit: &str) -> Option<f64> {
    measurement
        .filter(|m| m.has_unit(unit))
        .and_then(RawMeasurement::present_value)
        .and_then(RawValue::as_f64)
}

fn number_of(measurement: Option<&RawMeasurement>) -> f64 {
    measurement
        .and_then(RawMeasurement::present_value)
        .and_then(RawValue::as_f64)
        .unwrap_or(0.0)
}

/// Convert a metric height to whole feet and whole remaining inches
fn convert_height(height: Option<&RawMeasurement>) -> (i64, i64) {
    match metric_value(height, UNIT_METERS) {
        Some(meters) => {
            let total_inches = meters * 100.0 / CM_PER_INCH;
            let feet = (total_inches / 12.0).floor() as i64;
            let inches = (total_inches % 12.0).floor() as i64;
            (feet, inches)
        }
        None => (0, 0),
    }
}

/// Convert a weight in kilograms to whole pounds
fn convert_weight(weight: Option<&RawMeasurement>) -> f64 {
    metric_value(weight, UNIT_KILOGRAMS)
        .map(|kg| (kg * LB_PER_KG).floor())
        .unwrap_or(0.0)
}

/// BMI from metric weight and height, rounded to one decimal place
fn calc_bmi(weight: Option<&RawMeasurement>, height: Option<&RawMeasurement>) -> f64 {
    // Both tags must be right even if a value is missing
    let (Some(w), Some(h)) = (weight, height) else {
        return 0.0;
    };
    if !w.has_unit(UNIT_KILOGRAMS) || !h.has_unit(UNIT_METERS) {
        return 0.0;
    }

    let kg = number_of(Some(w));
    let meters = number_of(Some(h));
    let bmi = kg / meters.powi(2);
    if !bmi.is_finite() {
        return 0.0;
    }
    round_one_decimal(bmi)
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Parse a sleep duration such as `"7h 22m"` into `(hours, minutes)`.
///
/// Either half may be missing and a group without digits counts as zero.
/// Text that does not match yields `(0, 0)`.
pub fn parse_sleep(text: &str) -> (i64, i64) {
    let rest = text.trim_start();
    let (hours, rest) = take_unit(rest, 'h').unwrap_or((0, rest));
    let minutes = take_unit(rest.trim_start(), 'm')
        .map(|(m, _)| m)
        .unwrap_or(0);
    (hours, minutes)
}

/// Split `<digits><suffix>` off the front of `text`
fn take_unit(text: &str, suffix: char) -> Option<(i64, &str)> {
    let digits_end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let rest = text[digits_end..].strip_prefix(suffix)?;
    let value = if digits_end == 0 {
        0
    } else {
        text[..digits_end].parse().ok()?
    };
    Some((value, rest))
}
