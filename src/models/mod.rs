pub mod actor;
pub mod courier;
pub mod notification;
pub mod order;
pub mod store;
pub mod wallet;
pub mod withdrawal;
