use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub available: bool,
    /// Last reported position as `POINT(lng lat)`.
    pub current_location: Option<String>,
    pub last_location_at: Option<DateTime<Utc>>,
    pub total_deliveries: u64,
    pub total_earnings: i64,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
}
