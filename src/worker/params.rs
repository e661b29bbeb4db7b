//! Parameter binding for task execution.
//!
//! Merges the master-supplied global parameters with time parameters derived
//! from the well-known `syncDate` property, and builds the schedule-time
//! business parameters consumed by downstream scripts.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};

use crate::context::Property;

/// Well-known key of the schedule-time business parameter.
pub const PARAMETER_DATETIME: &str = "system.datetime";

/// Property name that triggers derivation of the `*_time_stamp*` parameters.
pub const SYNC_DATE_PROP: &str = "syncDate";

const DAY_END_OFFSET_MS: i64 = 86399 * 1000;

/// Build the defined-parameter map from the serialized global parameter list.
///
/// When a `syncDate` property is present, its value is parsed as a local
/// `yyyy-MM-dd` date and four derived entries are added: the millisecond
/// timestamps of 00:00:00 and 23:59:59 of that day plus their second-level
/// siblings. A value that fails to parse yields empty strings for all four.
/// The property list itself is overlaid last, so a user-supplied entry wins
/// over a derived one.
pub fn build_global_params_map(global_params: Option<&str>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(json) = global_params else {
        return map;
    };

    let properties: Vec<Property> = serde_json::from_str(json).unwrap_or_default();

    if let Some(sync_date) = properties.iter().find(|p| p.prop == SYNC_DATE_PROP) {
        match parse_sync_date(&sync_date.value) {
            Some(start_ms) => {
                let end_ms = start_ms + DAY_END_OFFSET_MS;
                map.insert("start_time_stamp".to_string(), start_ms.to_string());
                map.insert("end_time_stamp".to_string(), end_ms.to_string());
                map.insert("start_time_stamp_s".to_string(), (start_ms / 1000).to_string());
                map.insert("end_time_stamp_s".to_string(), (end_ms / 1000).to_string());
            }
            None => {
                tracing::warn!(
                    value = %sync_date.value,
                    "Unparseable syncDate, derived time parameters left empty"
                );
                for key in [
                    "start_time_stamp",
                    "end_time_stamp",
                    "start_time_stamp_s",
                    "end_time_stamp_s",
                ] {
                    map.insert(key.to_string(), String::new());
                }
            }
        }
    }

    for property in properties {
        map.insert(property.prop, property.value);
    }
    map
}

/// Millisecond timestamp of local midnight of a `yyyy-MM-dd` date.
fn parse_sync_date(value: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

/// Build the schedule-time business parameters. A scheduled task exposes its
/// schedule time as `system.datetime` in `yyyyMMddHHmmss` form; an
/// unscheduled task exposes nothing.
pub fn pre_build_business_params(
    schedule_time: Option<DateTime<Utc>>,
) -> HashMap<String, Property> {
    let mut params = HashMap::new();
    if let Some(schedule_time) = schedule_time {
        let datetime = schedule_time.format("%Y%m%d%H%M%S").to_string();
        params.insert(
            PARAMETER_DATETIME.to_string(),
            Property::new(PARAMETER_DATETIME, datetime),
        );
    }
    params
}
