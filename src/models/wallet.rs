use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: i64,
    pub pending_balance: i64,
    pub available_balance: i64,
    pub lifetime_deposited: i64,
    pub lifetime_withdrawn: i64,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance: 0,
            pending_balance: 0,
            available_balance: 0,
            lifetime_deposited: 0,
            lifetime_withdrawn: 0,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    DeliveryIncome,
    Withdrawal,
    Adjustment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: TransactionKind,
    pub amount: i64,
    pub status: TransactionStatus,
    pub order_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A wallet together with its append-only transaction log.
///
/// Both halves are mutated under the same lock so the balance fields and the
/// log can never be observed out of step.
#[derive(Debug, Clone)]
pub struct WalletAccount {
    pub wallet: Wallet,
    pub transactions: Vec<WalletTransaction>,
}

impl WalletAccount {
    pub fn new(wallet: Wallet) -> Self {
        Self {
            wallet,
            transactions: Vec::new(),
        }
    }

    pub fn ledger_sum(&self) -> i64 {
        self.transactions
            .iter()
            .filter(|tx| tx.status == TransactionStatus::Completed)
            .map(|tx| tx.amount)
            .sum()
    }

    /// Checks `balance == pending + available` and that the completed
    /// transactions reconcile to `balance`.
    pub fn check_consistency(&self) -> Result<(), String> {
        let w = &self.wallet;

        if w.pending_balance.checked_add(w.available_balance) != Some(w.balance) {
            return Err(format!(
                "wallet {}: balance {} != pending {} + available {}",
                w.id, w.balance, w.pending_balance, w.available_balance
            ));
        }

        let ledger = self.ledger_sum();
        if ledger != w.balance {
            return Err(format!(
                "wallet {}: ledger sum {} != balance {}",
                w.id, ledger, w.balance
            ));
        }

        Ok(())
    }

    pub fn credit(
        &mut self,
        amount: i64,
        kind: TransactionKind,
        order_id: Option<Uuid>,
        description: String,
        now: DateTime<Utc>,
    ) -> Result<WalletTransaction, String> {
        let overflow = || {
            format!(
                "wallet {}: crediting {} overflows balance {}",
                self.wallet.id, amount, self.wallet.balance
            )
        };
        let balance = self.wallet.balance.checked_add(amount).ok_or_else(overflow)?;
        let available = self
            .wallet
            .available_balance
            .checked_add(amount)
            .ok_or_else(overflow)?;
        let deposited = self
            .wallet
            .lifetime_deposited
            .checked_add(amount)
            .ok_or_else(overflow)?;

        self.wallet.balance = balance;
        self.wallet.available_balance = available;
        self.wallet.lifetime_deposited = deposited;
        self.wallet.updated_at = now;
        Ok(self.append(kind, amount, order_id, description, now))
    }

    /// Moves `amount` from available into pending. Balance is unchanged.
    pub fn reserve(&mut self, amount: i64, now: DateTime<Utc>) {
        self.wallet.available_balance -= amount;
        self.wallet.pending_balance += amount;
        self.wallet.updated_at = now;
    }

    pub fn release(&mut self, amount: i64, now: DateTime<Utc>) {
        self.wallet.pending_balance -= amount;
        self.wallet.available_balance += amount;
        self.wallet.updated_at = now;
    }

    /// Pays out a previously reserved amount.
    pub fn settle_withdrawal(
        &mut self,
        amount: i64,
        description: String,
        now: DateTime<Utc>,
    ) -> WalletTransaction {
        self.wallet.pending_balance -= amount;
        self.wallet.balance -= amount;
        self.wallet.lifetime_withdrawn += amount;
        self.wallet.updated_at = now;
        self.append(TransactionKind::Withdrawal, -amount, None, description, now)
    }

    fn append(
        &mut self,
        kind: TransactionKind,
        amount: i64,
        order_id: Option<Uuid>,
        description: String,
        now: DateTime<Utc>,
    ) -> WalletTransaction {
        let tx = WalletTransaction {
            id: Uuid::new_v4(),
            wallet_id: self.wallet.id,
            kind,
            amount,
            status: TransactionStatus::Completed,
            order_id,
            description,
            created_at: now,
        };
        self.transactions.push(tx.clone());
        tx
    }
}
