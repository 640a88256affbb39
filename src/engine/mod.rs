pub mod assignment;
pub mod lifecycle;
pub mod location;
pub mod withdrawals;
