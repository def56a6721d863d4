//! Display state machine
//!
//! Composes the normalizer and change tracker into the state a display client
//! renders. The machine starts in `NotStarted`, moves to `Started` once the
//! live channel opens, and records an error (staying not started) when opening
//! fails so the user can retry.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::VitalsError;
use crate::normalizer::Normalizer;
use crate::schema::RawSnapshot;
use crate::tracker::{ChangeTracker, FlashSet};
use crate::types::{Field, FieldSet, FieldValue, ViewModel};

/// Placeholder shown for empty fields once the display has started
pub const PLACEHOLDER: &str = "----";

/// Complete state of one display
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayState {
    tracker: ChangeTracker,
    started: bool,
    error: Option<String>,
}

impl DisplayState {
    /// Create a display with an all-zero view model and no flashes
    pub fn new(flash_duration: std::time::Duration) -> Self {
        Self {
            tracker: ChangeTracker::new(flash_duration),
            started: false,
            error: None,
        }
    }

    pub fn view_model(&self) -> &ViewModel {
        self.tracker.view_model()
    }

    pub fn flash_set(&self) -> &FlashSet {
        self.tracker.flash_set()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.tracker.last_updated()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Open the live channel with `open` unless already started.
    ///
    /// Returns whatever `open` produced on success. When already started,
    /// `open` is not called and `None` is returned.
    pub fn start<T>(&mut self, open: impl FnOnce() -> Result<T, VitalsError>) -> Option<T> {
        if self.started {
            return None;
        }
        self.complete_start(open())
    }

    /// Record the outcome of opening the live channel.
    ///
    /// For callers that open the channel asynchronously after checking
    /// [`DisplayState::is_started`].
    pub fn complete_start<T>(&mut self, opened: Result<T, VitalsError>) -> Option<T> {
        if self.started {
            return None;
        }
        match opened {
            Ok(channel) => {
                log::info!("live channel open");
                self.started = true;
                self.error = None;
                Some(channel)
            }
            Err(e) => {
                log::warn!("failed to open live channel: {}", e);
                self.error = Some(e.to_string());
                None
            }
        }
    }

    /// Record that the live channel failed after starting.
    ///
    /// The display drops back to not started so a later start can reopen it.
    /// The view model and flashes are kept.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("live channel failed: {}", message);
        self.started = false;
        self.error = Some(message);
    }

    /// Reconcile an inbound snapshot at `now`.
    ///
    /// An absent snapshot is ignored. Returns the change set otherwise.
    pub fn load(&mut self, raw: Option<&RawSnapshot>, now: DateTime<Utc>) -> Option<FieldSet> {
        let raw = raw?;
        let next = Normalizer::normalize(raw);
        let changed = self.tracker.accept(next, now);
        log::debug!("snapshot accepted, {} field(s) changed", changed.len());
        Some(changed)
    }

    /// Sweep flashes whose deadline has passed
    pub fn expire(&mut self, now: DateTime<Utc>) -> FieldSet {
        let expired = self.tracker.expire(now);
        if !expired.is_empty() {
            log::debug!("{} flash(es) expired", expired.len());
        }
        expired
    }

    /// Earliest flash deadline still pending
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.flash_set().next_deadline()
    }

    /// Text for a single field: value and unit, the placeholder, or nothing
    pub fn field_text(&self, field: Field) -> String {
        let value = self.view_model().get(field);
        if value.is_truthy() {
            let text = format_value(&value);
            return match field.unit() {
                "" => text,
                unit => format!("{} {}", text, unit),
            };
        }
        self.empty_text()
    }

    /// Text for the composite sleep value, e.g. `7h 10m` or `7h`
    pub fn sleep_text(&self) -> String {
        let vm = self.view_model();
        if vm.sleep_hours == 0 && vm.sleep_minutes == 0 {
            return self.empty_text();
        }
        if vm.sleep_minutes == 0 {
            format!("{}h", vm.sleep_hours)
        } else {
            format!("{}h {}m", vm.sleep_hours, vm.sleep_minutes)
        }
    }

    fn empty_text(&self) -> String {
        if self.started {
            PLACEHOLDER.to_string()
        } else {
            String::new()
        }
    }

    /// Render the whole board at `now`
    pub fn render_board(&self, now: DateTime<Utc>) -> Board {
        let flash = self.flash_set();
        let mut rows = Vec::with_capacity(BOARD_LAYOUT.len() + 1);

        for (label, cell) in BOARD_LAYOUT {
            let row = match cell {
                Cell::Single(field) => BoardRow {
                    label,
                    text: self.field_text(field),
                    flashing: flash.is_flashing(field, now),
                },
                Cell::Sleep => BoardRow {
                    label,
                    text: self.sleep_text(),
                    flashing: flash.is_flashing(Field::SleepHours, now),
                },
            };
            rows.push(row);
        }

        Board {
            rows,
            last_recorded: self.last_updated().map(|at| relative_age(at, now)),
            error: self.error.clone(),
        }
    }
}

#[derive(Clone, Copy)]
enum Cell {
    Single(Field),
    Sleep,
}

const BOARD_LAYOUT: [(&str, Cell); 11] = [
    ("Resting heart rate", Cell::Single(Field::RestingHeartRate)),
    ("Peak heart rate", Cell::Single(Field::PeakHeartRate)),
    ("Heart rate variability", Cell::Single(Field::HeartRateVariability)),
    ("Steps", Cell::Single(Field::StepsCount)),
    ("Sleep", Cell::Sleep),
    ("Height (ft)", Cell::Single(Field::HeightFeet)),
    ("Height (in)", Cell::Single(Field::HeightInches)),
    ("Weight", Cell::Single(Field::Weight)),
    ("BMI", Cell::Single(Field::Bmi)),
    ("Heart rate", Cell::Single(Field::HeartRate)),
    ("Heart rate source", Cell::Single(Field::HeartRateSource)),
];

/// One rendered line of the board
#[derive(Debug, Clone, PartialEq)]
pub struct BoardRow {
    pub label: &'static str,
    pub text: String,
    pub flashing: bool,
}

/// Rendered board
#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    pub rows: Vec<BoardRow>,
    /// Age of the last accepted snapshot, `None` before the first one
    pub last_recorded: Option<String>,
    pub error: Option<String>,
}

impl Board {
    pub fn row(&self, label: &str) -> Option<&BoardRow> {
        self.rows.iter().find(|r| r.label == label)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            let marker = if row.flashing { '*' } else { ' ' };
            writeln!(f, "{} {:<24}{}", marker, row.label, row.text)?;
        }
        writeln!(
            f,
            "  Last recorded: {}",
            self.last_recorded.as_deref().unwrap_or("never")
        )?;
        if let Some(error) = &self.error {
            writeln!(f, "  Error: {}", error)?;
        }
        Ok(())
    }
}

fn format_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Number(n) => format_number(*n),
        FieldValue::Integer(i) => format_number(*i as f64),
        FieldValue::Text(s) => s.clone(),
    }
}

/// Format a number, grouping thousands for values above 1000.
///
/// Grouped values keep at most three fractional digits.
pub fn format_number(value: f64) -> String {
    if value.abs() <= 1000.0 {
        return value.to_string();
    }
    let text = ((value * 1000.0).round() / 1000.0).to_string();

    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    match fraction {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

/// Human readable age of `at` relative to `now`
pub fn relative_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=4 => "just now".to_string(),
        5..=59 => format!("{}s ago", secs),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
