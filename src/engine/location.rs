use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::events::ChangeEvent;
use crate::geo::{self, MapMarker};
use crate::models::courier::{Courier, GeoPoint};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct TrackedCourier {
    pub courier_id: Uuid,
    pub name: String,
    pub available: bool,
    pub lat: f64,
    pub lng: f64,
    pub last_location_at: DateTime<Utc>,
    pub seconds_since_update: i64,
    pub stale: bool,
}

/// Stores the courier's latest position. Last write wins; callers debounce.
pub async fn report_location(
    state: &AppState,
    courier_id: Uuid,
    point: GeoPoint,
) -> Result<Courier, AppError> {
    geo::validate(&point)?;

    let at = Utc::now();
    let courier = state
        .repository
        .update_courier_location(courier_id, geo::format_point(&point), at)
        .await?;

    debug!(courier_id = %courier_id, lat = point.lat, lng = point.lng, "location reported");
    state.publish(ChangeEvent::CourierLocation {
        courier_id,
        location: point,
        at,
    });

    Ok(courier)
}

pub async fn set_availability(
    state: &AppState,
    courier_id: Uuid,
    available: bool,
) -> Result<Courier, AppError> {
    let courier = state
        .repository
        .set_courier_availability(courier_id, available)
        .await?;
    debug!(courier_id = %courier_id, available, "availability changed");
    Ok(courier)
}

pub fn is_stale(last_seen: DateTime<Utc>, now: DateTime<Utc>, stale_after_secs: i64) -> bool {
    now - last_seen > Duration::seconds(stale_after_secs)
}

/// Couriers with a usable position, most recently seen first.
pub async fn tracking_snapshot(
    state: &AppState,
    now: DateTime<Utc>,
) -> Result<Vec<TrackedCourier>, AppError> {
    let stale_after = state.settings.location_stale_secs;

    let mut tracked: Vec<TrackedCourier> = state
        .repository
        .list_couriers()
        .await?
        .into_iter()
        .filter_map(|courier| {
            let point = geo::parse_optional(courier.current_location.as_deref())?;
            let last_location_at = courier.last_location_at?;
            Some(TrackedCourier {
                courier_id: courier.id,
                name: courier.name,
                available: courier.available,
                lat: point.lat,
                lng: point.lng,
                last_location_at,
                seconds_since_update: (now - last_location_at).num_seconds().max(0),
                stale: is_stale(last_location_at, now, stale_after),
            })
        })
        .collect();

    tracked.sort_by(|a, b| b.last_location_at.cmp(&a.last_location_at));
    Ok(tracked)
}

pub async fn markers(state: &AppState, now: DateTime<Utc>) -> Result<Vec<MapMarker>, AppError> {
    let markers = tracking_snapshot(state, now)
        .await?
        .into_iter()
        .map(|tracked| {
            let minutes = u32::try_from(tracked.seconds_since_update / 60).unwrap_or(u32::MAX);
            let label = if tracked.stale {
                format!("{} (last seen {} ago)", tracked.name, geo::format_duration(minutes))
            } else {
                tracked.name
            };
            MapMarker::new(
                format!("courier-{}", tracked.courier_id),
                GeoPoint {
                    lat: tracked.lat,
                    lng: tracked.lng,
                },
                label,
            )
        })
        .collect();
    Ok(markers)
}
