use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalState {
    Pending,
    Approved,
    Rejected,
    Paid,
}

impl fmt::Display for WithdrawalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WithdrawalState::Pending => "pending",
            WithdrawalState::Approved => "approved",
            WithdrawalState::Rejected => "rejected",
            WithdrawalState::Paid => "paid",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub courier_id: Uuid,
    pub amount: i64,
    pub state: WithdrawalState,
    pub admin_notes: Option<String>,
    pub payment_reference: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}
