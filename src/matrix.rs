//! Matrix Engine (§4.C)
//!
//! Orchestrates the upstream client and route normalizer to compute one
//! fare-and-availability matrix: fetch the route, normalize it, validate
//! the journey date against the train's operating days, fan out
//! pair-wise availability lookups bounded at `fan_out_limit` concurrent
//! calls, and assemble the result.

use std::collections::HashMap;

use chrono::Datelike;
use futures::stream::{self, StreamExt};

use crate::error::{MatrixError, UpstreamError};
use crate::route;
use crate::scheduler::{BoxFuture, Worker};
use crate::types::{Matrix, MatrixParams, SeatRecord, SeatType};
use crate::upstream::UpstreamClient;

#[derive(Clone)]
pub struct MatrixEngine {
    client: UpstreamClient,
    fan_out_limit: usize,
}

impl MatrixEngine {
    pub fn new(client: UpstreamClient, fan_out_limit: usize) -> Self {
        Self {
            client,
            fan_out_limit: fan_out_limit.max(1),
        }
    }

    /// Run the full algorithm described in spec §4.C.
    pub async fn compute(&self, params: &MatrixParams) -> Result<Matrix, MatrixError> {
        let auth = params
            .auth
            .clone()
            .ok_or(MatrixError::AuthCredentialsRequired)?;

        // 1. Fetch route.
        let route_data = self
            .client
            .fetch_train_data(&params.train_model, &params.journey_date_api)
            .await?;

        let train_name = route_data
            .train_name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or(MatrixError::NoTrainInfo)?;
        if route_data.routes.is_empty() {
            return Err(MatrixError::NoTrainInfo);
        }

        let journey_date = route::parse_display_date(&params.journey_date_display)
            .ok_or(MatrixError::NoTrainInfo)?;

        // 2. Normalize routes.
        let normalized = route::normalize_route(&route_data.routes, journey_date);

        // 3. Validate weekday.
        let journey_weekday_abbrev = route::weekday_abbrev(journey_date);
        if !route_data.days.iter().any(|d| d == &journey_weekday_abbrev) {
            return Err(MatrixError::WeekdayMismatch {
                train_name,
                weekday: route::weekday_full_name(journey_date.weekday()).to_string(),
            });
        }

        // 4. Station list.
        let stations: Vec<String> = normalized.stops.iter().map(|s| s.city.clone()).collect();

        // Pre-populate every (seat type, from, to) cell with the zero
        // record so partial upstream failures never leave a gap.
        let mut fare_matrices: HashMap<String, HashMap<String, HashMap<String, SeatRecord>>> =
            HashMap::new();
        let mut has_data_map: HashMap<String, bool> = HashMap::new();
        for seat in SeatType::ALL {
            has_data_map.insert(seat.code().to_string(), false);
            let table = fare_matrices.entry(seat.code().to_string()).or_default();
            for i in 0..stations.len() {
                for j in (i + 1)..stations.len() {
                    table
                        .entry(stations[i].clone())
                        .or_default()
                        .insert(stations[j].clone(), SeatRecord::default());
                }
            }
        }

        // 5. Fan out pair-wise availability fetches, bounded concurrency.
        let mut pairs = Vec::new();
        for i in 0..stations.len() {
            for j in (i + 1)..stations.len() {
                pairs.push((stations[i].clone(), stations[j].clone()));
            }
        }

        let fan_out_limit = self.fan_out_limit;
        let mut fetches = stream::iter(pairs.into_iter().map(|(from, to)| {
            let client = self.client.clone();
            let auth = auth.clone();
            let pair_date = normalized
                .station_dates
                .get(&from)
                .and_then(|iso| chrono::NaiveDate::parse_from_str(iso, "%Y-%m-%d").ok())
                .map(route::format_display_date)
                .unwrap_or_else(|| params.journey_date_display.clone());
            async move {
                let result = client.fetch_trip(&from, &to, &pair_date, None, &auth).await;
                (from, to, result)
            }
        }))
        .buffer_unordered(fan_out_limit);

        // 6. Assemble results, applying the berth surcharge.
        while let Some((from, to, result)) = fetches.next().await {
            match result {
                Ok(trains) => {
                    if let Some(train) = trains
                        .into_iter()
                        .find(|t| t.train_model == params.train_model)
                    {
                        for seat in train.seat_types {
                            let Some(seat_type) = SeatType::from_code(&seat.seat_type) else {
                                continue;
                            };
                            let fare = if seat_type.is_berth() {
                                seat.fare + 50.0
                            } else {
                                seat.fare
                            };
                            let record = SeatRecord {
                                online: seat.seat_counts.online,
                                offline: seat.seat_counts.offline,
                                fare,
                                vat_amount: seat.vat_amount,
                            };
                            if record.has_seats() {
                                has_data_map.insert(seat_type.code().to_string(), true);
                            }
                            fare_matrices
                                .get_mut(seat_type.code())
                                .expect("seat table pre-populated")
                                .entry(from.clone())
                                .or_default()
                                .insert(to.clone(), record);
                        }
                    }
                    // train not found for this pair/date: zero record already in place.
                }
                // AUTH_* must propagate up verbatim, never be swallowed.
                Err(err @ UpstreamError::AuthTokenExpired)
                | Err(err @ UpstreamError::AuthDeviceKeyExpired) => {
                    return Err(MatrixError::Upstream(err));
                }
                // every other per-pair failure silently becomes a zero record.
                Err(_) => {}
            }
        }

        // 7. & 8. Aggregate and check for all-zero availability.
        if has_data_map.values().all(|has| !*has) {
            return Err(MatrixError::NoSeatsAvailable);
        }

        // 9. Segmented-date bookkeeping.
        let unique_dates: std::collections::HashSet<&String> =
            normalized.station_dates.values().collect();
        let has_segmented_dates = unique_dates.len() > 1;
        let (next_day_str, prev_day_str) = if has_segmented_dates {
            (
                journey_date
                    .succ_opt()
                    .map(route::format_display_date),
                journey_date
                    .pred_opt()
                    .map(route::format_display_date),
            )
        } else {
            (None, None)
        };

        Ok(Matrix {
            train_model: params.train_model.clone(),
            train_name,
            date: params.journey_date_display.clone(),
            stations,
            seat_types: SeatType::ALL.iter().map(|s| s.code().to_string()).collect(),
            fare_matrices,
            has_data_map,
            routes: normalized.stops,
            days: route_data.days,
            total_duration: route_data.total_duration,
            station_dates: normalized.station_dates,
            station_dates_formatted: normalized.station_dates_formatted,
            has_segmented_dates,
            next_day_str,
            prev_day_str,
        })
    }
}

impl Worker for MatrixEngine {
    fn invoke(&self, params: MatrixParams) -> BoxFuture<'static, Result<Matrix, MatrixError>> {
        let engine = self.clone();
        Box::pin(async move { engine.compute(&params).await })
    }
}
