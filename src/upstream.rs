//! Upstream Client (§4.A)
//!
//! One-shot HTTPS calls to the railway reservation API's train-routes and
//! search-trips endpoints, with the status-to-error mapping from spec
//! §4.A. Every non-2xx precedence rule is a match arm, not a string
//! search over an exception message.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::types::AuthCredentials;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorInner,
}

#[derive(Debug, Deserialize)]
struct ErrorInner {
    #[serde(default)]
    messages: Vec<String>,
}

fn parse_error_messages(body: &str) -> Vec<String> {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.messages)
        .unwrap_or_default()
}

/// Raw stop as returned by the route endpoint, before halt correction and
/// date derivation (route.rs).
#[derive(Debug, Clone, Deserialize)]
pub struct RawRouteStop {
    pub city: String,
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    /// May be a number, a numeric string, or missing/non-numeric junk —
    /// the route normalizer decides whether to trust it.
    #[serde(default)]
    pub halt: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainRouteData {
    pub train_name: Option<String>,
    #[serde(default)]
    pub days: Vec<String>,
    #[serde(default)]
    pub routes: Vec<RawRouteStop>,
    pub total_duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrainRoutesResponse {
    data: TrainRouteData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeatCounts {
    #[serde(default)]
    pub online: i64,
    #[serde(default)]
    pub offline: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TripSeatType {
    #[serde(rename = "type")]
    pub seat_type: String,
    #[serde(default)]
    pub fare: f64,
    #[serde(default)]
    pub vat_amount: f64,
    #[serde(default)]
    pub seat_counts: SeatCounts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TripTrain {
    pub train_model: String,
    #[serde(default)]
    pub seat_types: Vec<TripSeatType>,
    pub trip_number: Option<String>,
    pub origin_city_name: Option<String>,
    pub destination_city_name: Option<String>,
    pub departure_date_time: Option<String>,
    pub arrival_date_time: Option<String>,
    pub travel_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchTripsData {
    #[serde(default)]
    trains: Vec<TripTrain>,
}

#[derive(Debug, Deserialize)]
struct SearchTripsResponse {
    data: SearchTripsData,
}

/// Classify a non-2xx, non-5xx response into the matching `UpstreamError`
/// variant, in the precedence order of spec §4.A's mapping table.
fn classify_status(status: StatusCode, body: &str, lib_error: Option<String>) -> UpstreamError {
    match status.as_u16() {
        429 => UpstreamError::RateLimited(parse_error_messages(body).into_iter().next()),
        401 => {
            if body.contains("Invalid User Access Token!") {
                UpstreamError::AuthTokenExpired
            } else if body.contains("not authorized") || body.contains("Please login first") {
                UpstreamError::AuthDeviceKeyExpired
            } else {
                UpstreamError::AuthTokenExpired
            }
        }
        403 => UpstreamError::HighTraffic,
        _ => UpstreamError::Http(
            lib_error.unwrap_or_else(|| format!("unexpected upstream status {status}")),
        ),
    }
}

/// Thin HTTPS client for the two upstream endpoints this service depends
/// on. One `Client` (and its connection pool) is shared across every
/// call the service makes.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build upstream HTTP client");

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Send the request built by `build`, retrying once on a 5xx
    /// response (spec §4.A: "Retry once (total 2 attempts)"), and
    /// returning the classified error or the response body text.
    async fn send_and_classify<F>(&self, build: F) -> Result<String, UpstreamError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u8;
        loop {
            attempt += 1;
            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.text().await.map_err(|e| UpstreamError::Http(e.to_string()));
                    }
                    if status.is_server_error() {
                        if attempt < 2 {
                            continue;
                        }
                        return Err(UpstreamError::BackendUnavailable);
                    }
                    let lib_error = resp.error_for_status_ref().err().map(|e| e.to_string());
                    let body = resp.text().await.unwrap_or_default();
                    return Err(classify_status(status, &body, lib_error));
                }
                Err(e) => {
                    if e.is_timeout() {
                        return Err(UpstreamError::Timeout);
                    }
                    return Err(UpstreamError::Http(e.to_string()));
                }
            }
        }
    }

    /// `POST {base}/train-routes` — the train's route, stop schedule,
    /// and operating days for a given departure date.
    pub async fn fetch_train_data(
        &self,
        model: &str,
        api_date: &str,
    ) -> Result<TrainRouteData, UpstreamError> {
        let url = format!("{}/train-routes", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "departure_date_time": api_date,
        });

        let text = self
            .send_and_classify(|| self.client.post(&url).json(&body))
            .await?;

        let parsed: TrainRoutesResponse = serde_json::from_str(&text)
            .map_err(|e| UpstreamError::Http(format!("invalid train-routes response: {e}")))?;
        Ok(parsed.data)
    }

    /// `GET {base}/bookings/search-trips-v2` — trains found between two
    /// stations on a given journey date.
    pub async fn fetch_trip(
        &self,
        from_city: &str,
        to_city: &str,
        journey_date: &str,
        seat_class: Option<&str>,
        auth: &AuthCredentials,
    ) -> Result<Vec<TripTrain>, UpstreamError> {
        let url = format!("{}/bookings/search-trips-v2", self.base_url);
        let seat_class = seat_class.unwrap_or("SHULOV");

        let text = self
            .send_and_classify(|| {
                self.client
                    .get(&url)
                    .query(&[
                        ("from_city", from_city),
                        ("to_city", to_city),
                        ("date_of_journey", journey_date),
                        ("seat_class", seat_class),
                    ])
                    .header("Authorization", format!("Bearer {}", auth.token))
                    .header("x-device-key", auth.device_key.as_str())
            })
            .await?;

        let parsed: SearchTripsResponse = serde_json::from_str(&text)
            .map_err(|e| UpstreamError::Http(format!("invalid search-trips response: {e}")))?;
        Ok(parsed.data.trains)
    }
}
