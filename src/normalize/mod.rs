use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Number, Value};

pub const BUGZILLA_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const BUGZILLA_DATETIME_LEN: usize = 19;

/// Recursively replaces Bugzilla `YYYY-MM-DDTHH:MM:SS` strings with epoch
/// seconds. The strings carry no zone and are UTC.
pub fn convert_datetimes(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(convert_datetimes).collect()),
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key, convert_datetimes(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::String(text) => match parse_bugzilla_datetime(&text) {
            Some(parsed) => epoch_value(parsed).unwrap_or(Value::String(text)),
            None => Value::String(text),
        },
        other => other,
    }
}

pub fn epoch_seconds(instant: DateTime<Utc>) -> f64 {
    instant.timestamp() as f64 + f64::from(instant.timestamp_subsec_nanos()) / 1_000_000_000.0
}

pub fn parse_bugzilla_datetime(text: &str) -> Option<DateTime<Utc>> {
    // chrono tolerates some variations (e.g. single-digit fields) that the
    // fixed format does not.
    if text.len() != BUGZILLA_DATETIME_LEN || !text.is_ascii() {
        return None;
    }

    NaiveDateTime::parse_from_str(text, BUGZILLA_DATETIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn epoch_value(instant: DateTime<Utc>) -> Option<Value> {
    Number::from_f64(epoch_seconds(instant)).map(Value::Number)
}
