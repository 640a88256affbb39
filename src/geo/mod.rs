use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::models::courier::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;
const AVERAGE_SPEED_KMH: f64 = 30.0;

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("invalid coordinate: lat {lat}, lng {lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("cannot parse point: {0}")]
    Parse(String),
}

/// Distance and travel-time estimate between two known locations.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub eta_minutes: u32,
}

/// Presentational marker consumed by map views.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MapMarker {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub label: String,
}

impl MapMarker {
    pub fn new(id: String, point: GeoPoint, label: String) -> Self {
        Self {
            id,
            lat: point.lat,
            lng: point.lng,
            label,
        }
    }
}

pub fn validate(point: &GeoPoint) -> Result<(), GeoError> {
    let lat_ok = point.lat.is_finite() && (-90.0..=90.0).contains(&point.lat);
    let lng_ok = point.lng.is_finite() && (-180.0..=180.0).contains(&point.lng);

    if lat_ok && lng_ok {
        Ok(())
    } else {
        Err(GeoError::InvalidCoordinate {
            lat: point.lat,
            lng: point.lng,
        })
    }
}

/// Great-circle distance in kilometers.
pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> Result<f64, GeoError> {
    validate(a)?;
    validate(b)?;

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    Ok(EARTH_RADIUS_KM * central_angle)
}

/// Minutes needed to ride `km` at the fixed urban average speed, rounded up.
pub fn estimate_travel_minutes(km: f64) -> u32 {
    if !km.is_finite() || km <= 0.0 {
        return 0;
    }
    (km / AVERAGE_SPEED_KMH * 60.0).ceil() as u32
}

/// Parses `POINT(lng lat)`, optionally prefixed with an `SRID=...;` tag.
pub fn parse_point(raw: &str) -> Result<GeoPoint, GeoError> {
    let malformed = || GeoError::Parse(raw.to_string());

    let mut text = raw.trim();
    if let Some((prefix, rest)) = text.split_once(';') {
        if !prefix.trim().to_ascii_uppercase().starts_with("SRID=") {
            return Err(malformed());
        }
        text = rest.trim();
    }

    let rest = match text.get(..5) {
        Some(keyword) if keyword.eq_ignore_ascii_case("POINT") => &text[5..],
        _ => return Err(malformed()),
    };

    let inner = rest
        .trim_start()
        .strip_prefix('(')
        .and_then(|rest| rest.trim_end().strip_suffix(')'))
        .ok_or_else(malformed)?;

    let mut parts = inner.split_whitespace();
    let (Some(lng), Some(lat), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed());
    };

    let point = GeoPoint {
        lat: lat.parse().map_err(|_| malformed())?,
        lng: lng.parse().map_err(|_| malformed())?,
    };
    validate(&point)?;
    Ok(point)
}

pub fn format_point(point: &GeoPoint) -> String {
    format!("POINT({} {})", point.lng, point.lat)
}

/// Parses a stored location, treating anything unusable as unknown.
pub fn parse_optional(raw: Option<&str>) -> Option<GeoPoint> {
    let raw = raw?;
    match parse_point(raw) {
        Ok(point) => Some(point),
        Err(err) => {
            debug!(error = %err, "ignoring unusable location");
            None
        }
    }
}

pub fn route_estimate(from: Option<&str>, to: Option<&str>) -> Option<RouteEstimate> {
    let from = parse_optional(from)?;
    let to = parse_optional(to)?;

    match distance_km(&from, &to) {
        Ok(distance_km) => Some(RouteEstimate {
            distance_km,
            eta_minutes: estimate_travel_minutes(distance_km),
        }),
        Err(err) => {
            debug!(error = %err, "route estimate unavailable");
            None
        }
    }
}

pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{} m", (km * 1000.0).round() as i64)
    } else {
        format!("{km:.1} km")
    }
}

pub fn format_duration(minutes: u32) -> String {
    if minutes < 60 {
        format!("{minutes} min")
    } else {
        format!("{}h {}min", minutes / 60, minutes % 60)
    }
}
