//! Route Normalizer (§4.B)
//!
//! Turns the raw stop list the upstream route endpoint returns into a
//! clean ordered route: halt durations corrected against the parsed
//! arrival/departure times, and a per-station local calendar date
//! derived by walking the route and detecting midnight wraps.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};

use crate::types::RouteStop;
use crate::upstream::RawRouteStop;

/// Parse a time string in the upstream's local 12-hour form,
/// `"HH:MM am/pm BST"`, into minutes since midnight. Returns `None` for
/// anything that doesn't parse — callers treat that as "no information",
/// never as an error.
pub fn parse_time_to_minutes(raw: &str) -> Option<i64> {
    let cleaned = raw.trim().trim_end_matches("BST").trim().to_uppercase();
    let time = NaiveTime::parse_from_str(&cleaned, "%I:%M %p").ok()?;
    Some(time.num_seconds_from_midnight() as i64 / 60)
}

/// Best-effort extraction of an integer minute count out of whatever the
/// upstream `halt` field happened to contain (a JSON number, a numeric
/// string, or something else entirely).
fn numeric_halt(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Recompute a stop's halt duration from its parsed arrival/departure
/// times, wrapping to the next day when departure precedes arrival.
fn recompute_halt(arrival: Option<&str>, departure: Option<&str>) -> Option<i64> {
    let arrival_minutes = arrival.and_then(parse_time_to_minutes)?;
    let departure_minutes = departure.and_then(parse_time_to_minutes)?;
    Some(if departure_minutes < arrival_minutes {
        departure_minutes + 24 * 60 - arrival_minutes
    } else {
        departure_minutes - arrival_minutes
    })
}

/// Halt correction (spec §4.B): keep the upstream-provided halt only if
/// it is numeric and within `[0, 120]` minutes; otherwise replace it with
/// the recomputed value, falling back to the (possibly out-of-range)
/// original when recomputation isn't possible.
pub fn correct_halt(stop: &RawRouteStop) -> Option<i64> {
    let original = stop.halt.as_ref().and_then(numeric_halt);
    if let Some(orig) = original {
        if (0..=120).contains(&orig) {
            return Some(orig);
        }
    }
    recompute_halt(stop.arrival_time.as_deref(), stop.departure_time.as_deref()).or(original)
}

fn format_short_date(date: NaiveDate) -> String {
    date.format("%d %b").to_string()
}

/// `DD-MMM-YYYY`, the user-facing date format used throughout the system.
pub fn format_display_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

/// Parse a `DD-MMM-YYYY` date string.
pub fn parse_display_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%d-%b-%Y").ok()
}

/// The abbreviated weekday spec.md §6 enumerates: `Mon,Tue,Wed,Thu,Fri,Sat,Sun`.
/// `chrono::Weekday`'s own `Display` impl already renders exactly this form.
pub fn weekday_abbrev(date: NaiveDate) -> String {
    date.weekday().to_string()
}

/// Full weekday name, used in the "does not run on <weekday>" message.
pub fn weekday_full_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// The normalized route: ordered stops with corrected halts and
/// display-date markers, plus the per-station local date maps the
/// matrix engine needs to pick a journey date for each pair fetch.
pub struct NormalizedRoute {
    pub stops: Vec<RouteStop>,
    /// ISO `YYYY-MM-DD` per station.
    pub station_dates: HashMap<String, String>,
    /// `DD-MMM-YYYY` per station.
    pub station_dates_formatted: HashMap<String, String>,
}

/// Normalize a raw route: correct halts, then walk the stops assigning a
/// local calendar date to each (spec §4.B "Per-station date derivation").
pub fn normalize_route(raw: &[RawRouteStop], journey_date: NaiveDate) -> NormalizedRoute {
    let mut stops: Vec<RouteStop> = raw
        .iter()
        .map(|r| RouteStop {
            city: r.city.clone(),
            arrival_time: r.arrival_time.clone(),
            departure_time: r.departure_time.clone(),
            halt_minutes: correct_halt(r),
            display_date: None,
        })
        .collect();

    let mut station_dates = HashMap::new();
    let mut station_dates_formatted = HashMap::new();
    let mut current_date = journey_date;
    let mut prev_minutes: Option<i64> = None;

    for i in 0..stops.len() {
        let time_str = stops[i]
            .departure_time
            .clone()
            .or_else(|| stops[i].arrival_time.clone());
        let minutes = time_str.as_deref().and_then(parse_time_to_minutes);

        if let Some(curr_minutes) = minutes {
            if let Some(prev) = prev_minutes {
                if curr_minutes < prev {
                    let forward_gap_minutes = (24 * 60 - prev) + curr_minutes;
                    let gap_hours = forward_gap_minutes as f64 / 60.0;
                    if gap_hours < 12.0 {
                        if i > 0 {
                            stops[i - 1].display_date = Some(format_short_date(current_date));
                        }
                        current_date = current_date.succ_opt().expect("date overflow");
                        stops[i].display_date = Some(format_short_date(current_date));
                    }
                }
            }
            prev_minutes = Some(curr_minutes);
        }

        station_dates.insert(stops[i].city.clone(), current_date.format("%Y-%m-%d").to_string());
        station_dates_formatted.insert(stops[i].city.clone(), format_display_date(current_date));
    }

    NormalizedRoute {
        stops,
        station_dates,
        station_dates_formatted,
    }
}
