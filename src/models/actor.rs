use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The party requesting an order mutation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Store(Uuid),
    Courier(Uuid),
    Customer(Uuid),
    Admin,
}
