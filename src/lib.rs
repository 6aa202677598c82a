pub mod api;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod notify;
pub mod observability;
pub mod otp;
pub mod state;
pub mod stats;
pub mod store;
