use serde::Serialize;
use time::{Date, Month, PrimitiveDateTime, Time};

use super::constants::{
    DATE_LENGTH, MAX_COMMENT_LENGTH, MAX_LABEL_LENGTH, MAX_TITLE_FIELD_LENGTH, TIME_LENGTH,
};

/// Cut a string down to at most `max` characters
pub(crate) fn clip(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Parse the number at the start of a title string such as `"12.5 G"` or `"1.8K"`
pub fn leading_number(value: &str) -> Option<f64> {
    let trimmed = value.trim_start();
    let end = trimmed
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
        .map(|(idx, _)| idx)
        .unwrap_or(trimmed.len());
    // Shrink until it parses, so "5.0E" or "3-" still yield a value
    (1..=end)
        .rev()
        .find_map(|n| trimmed[..n].parse::<f64>().ok())
}

fn parse_month(abbrev: &str) -> Option<Month> {
    let month = match abbrev.to_ascii_uppercase().as_str() {
        "JAN" => Month::January,
        "FEB" => Month::February,
        "MAR" => Month::March,
        "APR" => Month::April,
        "MAY" => Month::May,
        "JUN" => Month::June,
        "JUL" => Month::July,
        "AUG" => Month::August,
        "SEP" => Month::September,
        "OCT" => Month::October,
        "NOV" => Month::November,
        "DEC" => Month::December,
        _ => return None,
    };
    Some(month)
}

/// Parse the `DD-MMM-YY` / `HH:MM:SS` pair stored in the headers.
///
/// Two digit years below 70 are taken to be in the 21st century.
pub fn parse_datetime(date: &str, time: &str) -> Option<PrimitiveDateTime> {
    let mut date_parts = date.trim().split('-');
    let day: u8 = date_parts.next()?.trim().parse().ok()?;
    let month = parse_month(date_parts.next()?.trim())?;
    let year_str = date_parts.next()?.trim();
    let mut year: i32 = year_str.parse().ok()?;
    if year_str.len() <= 2 {
        year += if year < 70 { 2000 } else { 1900 };
    }
    let mut time_parts = time.trim().split(':');
    let hour: u8 = time_parts.next()?.trim().parse().ok()?;
    let minute: u8 = time_parts.next()?.trim().parse().ok()?;
    let second: u8 = time_parts.next()?.trim().parse().ok()?;

    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}

/// Run level identification strings shared by all formats.
///
/// All setters clip their input to the width of the corresponding header field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunIdentity {
    format_id: String,
    run_number: i32,
    sample: String,
    temperature: String,
    field: String,
    orientation: String,
    setup: String,
    comment: String,
    start_date: String,
    start_time: String,
    stop_date: String,
    stop_time: String,
}

impl RunIdentity {
    pub fn format_id(&self) -> &str {
        &self.format_id
    }

    pub(crate) fn set_format_id(&mut self, id: &str) {
        self.format_id = clip(id, 2);
    }

    pub fn run_number(&self) -> i32 {
        self.run_number
    }

    pub fn set_run_number(&mut self, run_number: i32) {
        self.run_number = run_number;
    }

    pub fn sample(&self) -> &str {
        &self.sample
    }

    pub fn set_sample(&mut self, sample: &str) {
        self.sample = clip(sample, MAX_TITLE_FIELD_LENGTH);
    }

    pub fn temperature(&self) -> &str {
        &self.temperature
    }

    pub fn set_temperature(&mut self, temperature: &str) {
        self.temperature = clip(temperature, MAX_TITLE_FIELD_LENGTH);
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn set_field(&mut self, field: &str) {
        self.field = clip(field, MAX_TITLE_FIELD_LENGTH);
    }

    pub fn orientation(&self) -> &str {
        &self.orientation
    }

    pub fn set_orientation(&mut self, orientation: &str) {
        self.orientation = clip(orientation, MAX_TITLE_FIELD_LENGTH);
    }

    pub fn setup(&self) -> &str {
        &self.setup
    }

    pub fn set_setup(&mut self, setup: &str) {
        self.setup = clip(setup, MAX_TITLE_FIELD_LENGTH);
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn set_comment(&mut self, comment: &str) {
        self.comment = clip(comment, MAX_COMMENT_LENGTH);
    }

    /// Start date and time strings, in that order
    pub fn time_start(&self) -> (&str, &str) {
        (&self.start_date, &self.start_time)
    }

    pub fn set_time_start(&mut self, date: &str, time: &str) {
        self.start_date = clip(date, DATE_LENGTH);
        self.start_time = clip(time, TIME_LENGTH);
    }

    /// Stop date and time strings, in that order
    pub fn time_stop(&self) -> (&str, &str) {
        (&self.stop_date, &self.stop_time)
    }

    pub fn set_time_stop(&mut self, date: &str, time: &str) {
        self.stop_date = clip(date, DATE_LENGTH);
        self.stop_time = clip(time, TIME_LENGTH);
    }

    pub fn start_datetime(&self) -> Option<PrimitiveDateTime> {
        parse_datetime(&self.start_date, &self.start_time)
    }

    pub fn stop_datetime(&self) -> Option<PrimitiveDateTime> {
        parse_datetime(&self.stop_date, &self.stop_time)
    }

    /// Magnetic field in Gauss as written in the title, e.g. `"100 G"`
    pub fn field_value(&self) -> Option<f64> {
        leading_number(&self.field)
    }

    /// Temperature in Kelvin as written in the title, e.g. `"1.6 K"`
    pub fn temperature_value(&self) -> Option<f64> {
        leading_number(&self.temperature)
    }
}

/// A hardware counter stored next to the histograms
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Scaler {
    pub label: String,
    pub count: i64,
}

impl Scaler {
    pub fn new(label: &str, count: i64) -> Self {
        Self {
            label: clip(label, MAX_LABEL_LENGTH),
            count,
        }
    }
}

/// Averaged temperature of one sensor over the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TemperatureReading {
    pub mean: f64,
    pub deviation: f64,
}

impl TemperatureReading {
    pub fn new(mean: f64, deviation: f64) -> Self {
        Self { mean, deviation }
    }
}
