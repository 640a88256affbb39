use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub name: String,
    pub address: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}
