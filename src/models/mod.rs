pub mod agent;
pub mod ids;
pub mod notification;
pub mod order;
pub mod otp;
