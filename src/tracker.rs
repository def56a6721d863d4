//! Change detection and flash tracking
//!
//! This module compares consecutive view models and keeps the set of fields
//! currently highlighted after a change. Every flashed field owns its own
//! deadline; a sweep removes exactly the fields whose deadline has passed, so
//! one field expiring never disturbs another and a field that changes again
//! simply has its deadline pushed out.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::types::{Field, FieldSet, ViewModel};

/// Default highlight duration in milliseconds
pub const DEFAULT_FLASH_MS: u64 = 2000;

/// Longest accepted highlight duration (one day)
pub const MAX_FLASH_MS: u64 = 86_400_000;

/// Names of the fields whose value differs between two view models.
///
/// Paired fields (height feet/inches, sleep hours/minutes) are always reported
/// together.
pub fn diff(previous: &ViewModel, next: &ViewModel) -> FieldSet {
    let mut changed: FieldSet = Field::ALL
        .into_iter()
        .filter(|field| previous.get(*field) != next.get(*field))
        .collect();

    let partners: Vec<Field> = changed.iter().filter_map(Field::partner).collect();
    changed.extend(partners);
    changed
}

/// Fields currently highlighted, each with its own expiry deadline
#[derive(Debug, Clone, PartialEq)]
pub struct FlashSet {
    duration: Duration,
    deadlines: BTreeMap<Field, DateTime<Utc>>,
}

impl Default for FlashSet {
    fn default() -> Self {
        Self::new(std::time::Duration::from_millis(DEFAULT_FLASH_MS))
    }
}

impl FlashSet {
    /// Create an empty set whose entries last `duration`, capped at
    /// [`MAX_FLASH_MS`]
    pub fn new(duration: std::time::Duration) -> Self {
        let duration = duration.min(std::time::Duration::from_millis(MAX_FLASH_MS));
        Self {
            duration: Duration::from_std(duration)
                .unwrap_or_else(|_| Duration::milliseconds(DEFAULT_FLASH_MS as i64)),
            deadlines: BTreeMap::new(),
        }
    }

    /// Create an empty set whose entries last `millis` milliseconds
    pub fn with_millis(millis: u64) -> Self {
        Self::new(std::time::Duration::from_millis(millis))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Flash `fields` from `now`, replacing any earlier deadline they had
    pub fn flash<'a>(&mut self, fields: impl IntoIterator<Item = &'a Field>, now: DateTime<Utc>) {
        let deadline = now
            .checked_add_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        for field in fields {
            self.deadlines.insert(*field, deadline);
        }
    }

    /// Remove every field whose deadline is at or before `now`.
    ///
    /// Returns the removed fields.
    pub fn expire(&mut self, now: DateTime<Utc>) -> FieldSet {
        let expired: FieldSet = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(field, _)| *field)
            .collect();
        for field in &expired {
            self.deadlines.remove(field);
        }
        expired
    }

    /// Whether `field` is highlighted at `now`, regardless of sweep timing
    pub fn is_flashing(&self, field: Field, now: DateTime<Utc>) -> bool {
        self.deadlines
            .get(&field)
            .map_or(false, |deadline| now < *deadline)
    }

    /// Fields highlighted at `now`
    pub fn flashing(&self, now: DateTime<Utc>) -> FieldSet {
        self.deadlines
            .iter()
            .filter(|(_, deadline)| now < **deadline)
            .map(|(field, _)| *field)
            .collect()
    }

    /// Whether `field` is in the set (not yet swept)
    pub fn contains(&self, field: Field) -> bool {
        self.deadlines.contains_key(&field)
    }

    pub fn deadline(&self, field: Field) -> Option<DateTime<Utc>> {
        self.deadlines.get(&field).copied()
    }

    /// Earliest pending deadline, for scheduling the next sweep
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.deadlines.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

/// Holds the previously displayed view model and the flash state
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeTracker {
    previous: ViewModel,
    flash: FlashSet,
    last_updated: Option<DateTime<Utc>>,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new(std::time::Duration::from_millis(DEFAULT_FLASH_MS))
    }
}

impl ChangeTracker {
    /// Create a tracker starting from an all-zero view model
    pub fn new(flash_duration: std::time::Duration) -> Self {
        Self {
            previous: ViewModel::default(),
            flash: FlashSet::new(flash_duration),
            last_updated: None,
        }
    }

    /// Accept a new view model at `now`.
    ///
    /// Replaces the displayed view model, flashes every changed field and
    /// stamps the update time even when nothing changed. Returns the change set.
    pub fn accept(&mut self, next: ViewModel, now: DateTime<Utc>) -> FieldSet {
        let changed = diff(&self.previous, &next);
        self.flash.flash(&changed, now);
        self.previous = next;
        self.last_updated = Some(now);
        changed
    }

    /// Sweep expired flashes
    pub fn expire(&mut self, now: DateTime<Utc>) -> FieldSet {
        self.flash.expire(now)
    }

    pub fn view_model(&self) -> &ViewModel {
        &self.previous
    }

    pub fn flash_set(&self) -> &FlashSet {
        &self.flash
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap()
    }

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    fn sample_view_model() -> ViewModel {
        ViewModel {
            bmi: 34.4,
            heart_rate: 84.0,
            heart_rate_source: "Apple Watch".to_string(),
            height_feet: 5,
            height_inches: 6,
            sleep_hours: 7,
            sleep_minutes: 10,
            steps_count: 1539.0,
            weight: 219.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let vm = sample_view_model();
        assert!(diff(&vm, &vm.clone()).is_empty());
    }

    #[test]
    fn test_diff_reports_changed_fields() {
        let previous = sample_view_model();
        let next = ViewModel {
            heart_rate: 90.0,
            heart_rate_source: "Polar H10".to_string(),
            ..previous.clone()
        };
        assert_eq!(
            diff(&previous, &next),
            FieldSet::from([Field::HeartRate, Field::HeartRateSource])
        );
    }

    #[test]
    fn test_diff_couples_height_fields() {
        let previous = sample_view_model();
        let next = ViewModel {
            height_inches: 7,
            ..previous.clone()
        };
        assert_eq!(
            diff(&previous, &next),
            FieldSet::from([Field::HeightFeet, Field::HeightInches])
        );
    }

    #[test]
    fn test_diff_couples_sleep_fields() {
        let previous = sample_view_model();
        let next = ViewModel {
            sleep_hours: 8,
            ..previous.clone()
        };
        assert_eq!(
            diff(&previous, &next),
            FieldSet::from([Field::SleepHours, Field::SleepMinutes])
        );
    }

    #[test]
    fn test_diff_from_initial_state() {
        let changed = diff(&ViewModel::default(), &sample_view_model());
        assert!(changed.contains(&Field::Bmi));
        assert!(changed.contains(&Field::HeightFeet));
        // Untouched zero fields are unchanged
        assert!(!changed.contains(&Field::PeakHeartRate));
        assert!(!changed.contains(&Field::RestingHeartRate));
    }

    #[test]
    fn test_flash_lifecycle() {
        let mut flash = FlashSet::with_millis(2000);
        flash.flash(&FieldSet::from([Field::Weight]), t0());

        assert!(flash.is_flashing(Field::Weight, t0()));
        assert!(flash.is_flashing(Field::Weight, t0() + ms(1999)));
        assert!(!flash.is_flashing(Field::Weight, t0() + ms(2000)));
        assert!(!flash.is_flashing(Field::Weight, t0() + ms(5000)));
    }

    #[test]
    fn test_expire_removes_only_due_fields() {
        let mut flash = FlashSet::with_millis(2000);
        flash.flash(&FieldSet::from([Field::Weight]), t0());
        flash.flash(&FieldSet::from([Field::Bmi]), t0() + ms(1000));

        assert!(flash.expire(t0() + ms(1500)).is_empty());
        assert_eq!(flash.expire(t0() + ms(2000)), FieldSet::from([Field::Weight]));
        assert!(flash.contains(Field::Bmi));
        assert_eq!(flash.next_deadline(), Some(t0() + ms(3000)));
        assert_eq!(flash.expire(t0() + ms(3000)), FieldSet::from([Field::Bmi]));
        assert!(flash.is_empty());
        assert_eq!(flash.next_deadline(), None);
    }

    #[test]
    fn test_rechange_extends_flash() {
        let mut flash = FlashSet::with_millis(2000);
        flash.flash(&FieldSet::from([Field::HeartRate]), t0());
        flash.flash(&FieldSet::from([Field::HeartRate]), t0() + ms(1500));

        // The first deadline passes without interrupting the highlight
        assert!(flash.expire(t0() + ms(2000)).is_empty());
        for offset in [0, 500, 1999, 2000, 3000, 3499] {
            assert!(flash.is_flashing(Field::HeartRate, t0() + ms(offset)), "offset {offset}");
        }
        assert!(!flash.is_flashing(Field::HeartRate, t0() + ms(3500)));
    }

    #[test]
    fn test_tracker_accept() {
        let mut tracker = ChangeTracker::new(std::time::Duration::from_millis(2000));
        let first = sample_view_model();

        let changed = tracker.accept(first.clone(), t0());
        assert!(changed.contains(&Field::Weight));
        assert_eq!(tracker.view_model(), &first);
        assert_eq!(tracker.last_updated(), Some(t0()));
        assert!(tracker.flash_set().is_flashing(Field::Weight, t0()));

        // Same values later: no change, but the timestamp moves
        let changed = tracker.accept(first.clone(), t0() + ms(500));
        assert!(changed.is_empty());
        assert_eq!(tracker.last_updated(), Some(t0() + ms(500)));
        assert_eq!(tracker.flash_set().deadline(Field::Weight), Some(t0() + ms(2000)));
    }

    #[test]
    fn test_tracker_flash_accumulates_across_updates() {
        let mut tracker = ChangeTracker::default();
        let first = sample_view_model();
        tracker.accept(first.clone(), t0());
        tracker.expire(t0() + ms(2000));
        assert!(tracker.flash_set().is_empty());

        tracker.accept(ViewModel { heart_rate: 91.0, ..first.clone() }, t0() + ms(3000));
        tracker.accept(
            ViewModel { heart_rate: 91.0, steps_count: 2000.0, ..first },
            t0() + ms(3500),
        );

        assert_eq!(
            tracker.flash_set().flashing(t0() + ms(3600)),
            FieldSet::from([Field::HeartRate, Field::StepsCount])
        );
        assert_eq!(tracker.expire(t0() + ms(5000)), FieldSet::from([Field::HeartRate]));
        assert!(tracker.flash_set().contains(Field::StepsCount));
    }

    #[test]
    fn test_oversized_duration_is_capped() {
        let mut flash = FlashSet::with_millis(9_000_000_000_000_000);
        assert_eq!(flash.duration(), ms(MAX_FLASH_MS as i64));

        flash.flash(&[Field::Weight], t0());
        assert_eq!(flash.deadline(Field::Weight), Some(t0() + ms(MAX_FLASH_MS as i64)));
        assert!(flash.is_flashing(Field::Weight, t0() + ms(1000)));

        let huge = FlashSet::new(std::time::Duration::from_secs(u64::MAX));
        assert_eq!(huge.duration(), ms(MAX_FLASH_MS as i64));
    }

    #[test]
    fn test_flash_near_end_of_time_saturates() {
        let mut flash = FlashSet::with_millis(MAX_FLASH_MS);
        let late = DateTime::<Utc>::MAX_UTC - ms(10);
        flash.flash(&[Field::Bmi], late);
        assert_eq!(flash.deadline(Field::Bmi), Some(DateTime::<Utc>::MAX_UTC));
    }
}
