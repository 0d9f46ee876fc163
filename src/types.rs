//! Shared Data Model
//!
//! Types shared across the upstream client, route normalizer, matrix
//! engine, scheduler, and HTTP layer. Mirrors the wire shapes the
//! front-end and the upstream reservation API exchange.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The ten seat classes the upstream reservation system knows about, in
/// their fixed display order. This order is an invariant of the matrix
/// output: `Matrix::seat_types` is always these ten, in this sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeatType {
    SChair,
    Shovan,
    Snigdha,
    FSeat,
    FChair,
    AcS,
    FBerth,
    AcB,
    Shulov,
    AcChair,
}

impl SeatType {
    /// Fixed ordering used everywhere a `seat_types` list is produced.
    pub const ALL: [SeatType; 10] = [
        SeatType::SChair,
        SeatType::Shovan,
        SeatType::Snigdha,
        SeatType::FSeat,
        SeatType::FChair,
        SeatType::AcS,
        SeatType::FBerth,
        SeatType::AcB,
        SeatType::Shulov,
        SeatType::AcChair,
    ];

    /// The upstream API's wire code for this seat type, e.g. `"S_CHAIR"`.
    pub fn code(self) -> &'static str {
        match self {
            SeatType::SChair => "S_CHAIR",
            SeatType::Shovan => "SHOVAN",
            SeatType::Snigdha => "SNIGDHA",
            SeatType::FSeat => "F_SEAT",
            SeatType::FChair => "F_CHAIR",
            SeatType::AcS => "AC_S",
            SeatType::FBerth => "F_BERTH",
            SeatType::AcB => "AC_B",
            SeatType::Shulov => "SHULOV",
            SeatType::AcChair => "AC_CHAIR",
        }
    }

    pub fn from_code(code: &str) -> Option<SeatType> {
        SeatType::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Berth classes carry a fixed surcharge, applied in the matrix engine.
    pub fn is_berth(self) -> bool {
        matches!(self, SeatType::FBerth | SeatType::AcB)
    }
}

/// One cell of a fare matrix: availability and pricing for a single
/// (seat type, from station, to station) triple. The zero value is used
/// for pairs whose upstream lookup was unusable but shouldn't fail the
/// whole matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeatRecord {
    pub online: i64,
    pub offline: i64,
    pub fare: f64,
    pub vat_amount: f64,
}

impl SeatRecord {
    pub fn has_seats(&self) -> bool {
        self.online + self.offline > 0
    }
}

/// A single stop in a train's route, after halt correction and
/// per-station local date derivation (route.rs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStop {
    pub city: String,
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    pub halt_minutes: Option<i64>,
    /// Set only on the stop immediately before, and the stop immediately
    /// after, a midnight wrap; carries the human-facing "DD Mon" label.
    pub display_date: Option<String>,
}

/// Authorization material forwarded to the upstream search-trips call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCredentials {
    pub token: String,
    pub device_key: String,
}

/// The parameters a scheduler worker needs to compute one
/// fare-and-availability matrix. This is the typed replacement for the
/// dynamic keyword-argument bag described in the design notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixParams {
    pub train_model: String,
    /// The raw form value the user submitted, e.g. `"Sundarban Express (726)"`.
    pub train_form_value: String,
    /// `DD-MMM-YYYY`, as displayed to the user.
    pub journey_date_display: String,
    /// `YYYY-MM-DD`, as sent to the route endpoint.
    pub journey_date_api: String,
    pub auth: Option<AuthCredentials>,
}

/// Form values echoed back alongside a successful result, so the
/// front-end can repopulate its form without re-deriving them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormValues {
    pub train: String,
    pub date: String,
}

/// The assembled output of the matrix engine (§4.C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matrix {
    pub train_model: String,
    pub train_name: String,
    pub date: String,
    pub stations: Vec<String>,
    /// Always the ten codes in `SeatType::ALL` order.
    pub seat_types: Vec<String>,
    /// `fare_matrices[seat_code][from][to]`.
    pub fare_matrices: HashMap<String, HashMap<String, HashMap<String, SeatRecord>>>,
    /// `has_data_map[seat_code]`.
    pub has_data_map: HashMap<String, bool>,
    pub routes: Vec<RouteStop>,
    pub days: Vec<String>,
    pub total_duration: Option<String>,
    /// ISO `YYYY-MM-DD` per station.
    pub station_dates: HashMap<String, String>,
    /// `DD-MMM-YYYY` per station.
    pub station_dates_formatted: HashMap<String, String>,
    pub has_segmented_dates: bool,
    pub next_day_str: Option<String>,
    pub prev_day_str: Option<String>,
}

/// A unit type that always serializes as the JSON literal `true`, used
/// only so `MatrixOutcome::Success` carries a `"success": true` field in
/// its wire form without a plain boolean that could drift from reality.
#[derive(Debug, Clone, Copy)]
pub struct SuccessMarker;

impl Serialize for SuccessMarker {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bool(true)
    }
}

impl<'de> Deserialize<'de> for SuccessMarker {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = bool::deserialize(deserializer)?;
        if value {
            Ok(SuccessMarker)
        } else {
            Err(serde::de::Error::custom("expected `true`"))
        }
    }
}

/// The terminal outcome of a scheduled matrix computation, delivered
/// exactly once by `Scheduler::get_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixOutcome {
    Success {
        success: SuccessMarker,
        result: Box<Matrix>,
        form_values: FormValues,
    },
    Failure {
        error: String,
    },
}

impl MatrixOutcome {
    pub fn success(result: Matrix, form_values: FormValues) -> Self {
        MatrixOutcome::Success {
            success: SuccessMarker,
            result: Box::new(result),
            form_values,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        MatrixOutcome::Failure {
            error: error.into(),
        }
    }
}

/// Lifecycle status of a scheduled request, see spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// A point-in-time snapshot returned by `Scheduler::get_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: RequestStatus,
    /// 1-based position in the queued suffix; 0 when not queued.
    pub position: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Estimated wait, in seconds; 0 when not queued.
    pub estimated_time: f64,
    /// Seconds elapsed since the last heartbeat was recorded.
    pub last_heartbeat_age: f64,
    /// Present only when `status == Failed`.
    pub error_message: Option<String>,
}

/// Aggregate scheduler statistics, see spec §4.D `stats()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub processing: usize,
    pub avg_processing_time: f64,
    pub recent_abandonments: usize,
    pub queue_size: usize,
}

/// Standardized API response envelope used by the thin HTTP front-end.
///
/// Kept from the teacher's own response wrapper: a consistent
/// success/error shape across every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_type_codes_are_fixed_order() {
        let codes: Vec<&str> = SeatType::ALL.iter().map(|s| s.code()).collect();
        assert_eq!(
            codes,
            vec![
                "S_CHAIR", "SHOVAN", "SNIGDHA", "F_SEAT", "F_CHAIR", "AC_S", "F_BERTH", "AC_B",
                "SHULOV", "AC_CHAIR"
            ]
        );
    }

    #[test]
    fn seat_type_round_trips_through_code() {
        for seat in SeatType::ALL {
            assert_eq!(SeatType::from_code(seat.code()), Some(seat));
        }
        assert_eq!(SeatType::from_code("NOT_A_SEAT"), None);
    }

    #[test]
    fn only_berth_classes_carry_surcharge() {
        assert!(SeatType::FBerth.is_berth());
        assert!(SeatType::AcB.is_berth());
        assert!(!SeatType::Shulov.is_berth());
    }

    #[test]
    fn success_outcome_serializes_with_literal_true() {
        let matrix = Matrix {
            train_model: "726".into(),
            train_name: "Sundarban Express".into(),
            date: "01-Jul-2025".into(),
            stations: vec!["Dhaka".into(), "Chittagong".into()],
            seat_types: SeatType::ALL.iter().map(|s| s.code().to_string()).collect(),
            fare_matrices: HashMap::new(),
            has_data_map: HashMap::new(),
            routes: vec![],
            days: vec!["Mon".into()],
            total_duration: None,
            station_dates: HashMap::new(),
            station_dates_formatted: HashMap::new(),
            has_segmented_dates: false,
            next_day_str: None,
            prev_day_str: None,
        };
        let outcome = MatrixOutcome::success(
            matrix,
            FormValues {
                train: "Sundarban Express (726)".into(),
                date: "01-Jul-2025".into(),
            },
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], serde_json::json!(true));
        assert_eq!(json["result"]["train_model"], serde_json::json!("726"));
    }

    #[test]
    fn failure_outcome_serializes_as_error_only() {
        let outcome = MatrixOutcome::failure("No seats available for the selected train and date. Please try a different date or train.");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json.get("success"), None);
        assert!(json["error"].as_str().unwrap().starts_with("No seats available"));
    }
}
